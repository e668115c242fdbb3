use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// A piece of information the agent collects, in the order it asks for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// What the caller needs done.
    ServiceType,
    Name,
    Phone,
    Address,
    PreferredTime,
}

impl Field {
    pub const ORDER: [Field; 5] = [
        Self::ServiceType,
        Self::Name,
        Self::Phone,
        Self::Address,
        Self::PreferredTime,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServiceType => "service_type",
            Self::Name => "name",
            Self::Phone => "phone",
            Self::Address => "address",
            Self::PreferredTime => "preferred_time",
        }
    }

    /// What the agent should ask to fill this field.
    pub fn question(self) -> &'static str {
        match self {
            Self::ServiceType => "Ask what problem they need help with.",
            Self::Name => "Ask for their name.",
            Self::Phone => "Ask for the best phone number to reach them.",
            Self::Address => "Ask for the service address.",
            Self::PreferredTime => "Ask what day and time works best for a visit.",
        }
    }
}

/// Values gathered so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedFields {
    pub service_type: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
}

impl CollectedFields {
    pub fn has(&self, field: Field) -> bool {
        match field {
            Field::ServiceType => self.service_type.is_some(),
            Field::Name => self.name.is_some(),
            Field::Phone => self.phone.is_some(),
            Field::Address => self.address.is_some(),
            Field::PreferredTime => self.date.is_some(),
        }
    }

    /// The first field in asking order that is still missing.
    pub fn next_missing(&self) -> Option<Field> {
        Field::ORDER.into_iter().find(|f| !self.has(*f))
    }

    /// True once every field a booking needs is present.
    pub fn is_complete(&self) -> bool {
        self.next_missing().is_none()
    }

    pub fn missing(&self) -> Vec<Field> {
        Field::ORDER.into_iter().filter(|f| !self.has(*f)).collect()
    }

    /// What has been collected so far, in asking order, for the model.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(problem) = &self.service_type {
            parts.push(format!("problem \"{problem}\""));
        }
        if let Some(name) = &self.name {
            parts.push(format!("name {name}"));
        }
        if let Some(phone) = &self.phone {
            parts.push(format!("phone {phone}"));
        }
        if let Some(address) = &self.address {
            parts.push(format!("address {address}"));
        }
        if let Some(date) = self.date {
            parts.push(match self.time {
                Some(time) => format!("visit {} at {}", date.format("%Y-%m-%d"), time.format("%H:%M")),
                None => format!("visit {}", date.format("%Y-%m-%d")),
            });
        }
        if parts.is_empty() {
            "nothing yet".to_string()
        } else {
            parts.join("; ")
        }
    }
}
