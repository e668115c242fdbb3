//! Keyword scan over recent caller turns.

use callbridge_types::{BusinessProfile, Urgency};

/// Caller turns considered by each scan.
pub const SCAN_WINDOW: usize = 3;

/// A keyword hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrgencyMatch {
    pub urgency: Urgency,
    pub keyword: String,
}

/// Lowercased keyword lists from a business profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordSet {
    emergency: Vec<String>,
    transfer: Vec<String>,
}

impl KeywordSet {
    pub fn new(emergency: Vec<String>, transfer: Vec<String>) -> Self {
        let lower = |v: Vec<String>| {
            v.into_iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect()
        };
        Self {
            emergency: lower(emergency),
            transfer: lower(transfer),
        }
    }

    pub fn from_profile(profile: &BusinessProfile) -> Self {
        Self::new(
            profile.effective_emergency_keywords(),
            profile.effective_transfer_keywords(),
        )
    }

    /// Case-insensitive substring match; emergency keywords win over transfer ones.
    pub fn scan<'a>(&self, turns: impl IntoIterator<Item = &'a str>) -> Option<UrgencyMatch> {
        let text = turns
            .into_iter()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" \n ");
        if let Some(k) = self.emergency.iter().find(|k| text.contains(k.as_str())) {
            return Some(UrgencyMatch {
                urgency: Urgency::Emergency,
                keyword: k.clone(),
            });
        }
        self.transfer
            .iter()
            .find(|k| text.contains(k.as_str()))
            .map(|k| UrgencyMatch {
                urgency: Urgency::Urgent,
                keyword: k.clone(),
            })
    }
}
