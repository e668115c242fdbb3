//! Fixed argument schemas for the four tools.
//!
//! Arguments arrive as free-form JSON from the model. They are parsed into
//! strict structs (unknown fields rejected) and then checked for empty
//! strings and well-formed dates before any backend is contacted.

use crate::error::ToolError;
use callbridge_types::Urgency;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    CheckAvailability,
    BookAppointment,
    CreateMessage,
    TransferCall,
}

impl ToolName {
    pub const ALL: [ToolName; 4] = [
        Self::CheckAvailability,
        Self::BookAppointment,
        Self::CreateMessage,
        Self::TransferCall,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckAvailability => "check_availability",
            Self::BookAppointment => "book_appointment",
            Self::CreateMessage => "create_message",
            Self::TransferCall => "transfer_call",
        }
    }

    /// Path segment of the backend endpoint.
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::CheckAvailability => "check-availability",
            Self::BookAppointment => "book-appointment",
            Self::CreateMessage => "create-message",
            Self::TransferCall => "transfer-call",
        }
    }

    /// Whether the tool changes state in the business's systems.
    pub fn has_side_effects(self) -> bool {
        !matches!(self, Self::CheckAvailability)
    }
}

impl std::str::FromStr for ToolName {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ToolError::invalid(s, "unknown tool"))
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckAvailabilityArgs {
    /// `YYYY-MM-DD`.
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BookAppointmentArgs {
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_address: String,
    pub service_type: String,
    /// `YYYY-MM-DD`.
    pub date: String,
    /// `HH:MM`, 24-hour.
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateMessageArgs {
    pub customer_name: String,
    pub customer_phone: String,
    pub message: String,
    #[serde(default)]
    pub urgency: Urgency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferCallArgs {
    pub reason: String,
    #[serde(default)]
    pub is_emergency: bool,
}

/// A validated tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    CheckAvailability(CheckAvailabilityArgs),
    BookAppointment(BookAppointmentArgs),
    CreateMessage(CreateMessageArgs),
    TransferCall(TransferCallArgs),
}

impl ToolCall {
    /// Parses and validates model-issued arguments for the named tool.
    pub fn parse(name: &str, arguments: &Value) -> Result<Self, ToolError> {
        let tool: ToolName = name.parse()?;
        let call = match tool {
            ToolName::CheckAvailability => Self::CheckAvailability(from_value(tool, arguments)?),
            ToolName::BookAppointment => Self::BookAppointment(from_value(tool, arguments)?),
            ToolName::CreateMessage => Self::CreateMessage(from_value(tool, arguments)?),
            ToolName::TransferCall => Self::TransferCall(from_value(tool, arguments)?),
        };
        call.validate()?;
        Ok(call)
    }

    pub fn name(&self) -> ToolName {
        match self {
            Self::CheckAvailability(_) => ToolName::CheckAvailability,
            Self::BookAppointment(_) => ToolName::BookAppointment,
            Self::CreateMessage(_) => ToolName::CreateMessage,
            Self::TransferCall(_) => ToolName::TransferCall,
        }
    }

    /// Checks field contents beyond what the struct shape enforces.
    pub fn validate(&self) -> Result<(), ToolError> {
        let tool = self.name().as_str();
        match self {
            Self::CheckAvailability(a) => check_date(tool, &a.date),
            Self::BookAppointment(a) => {
                non_empty(tool, "customer_name", &a.customer_name)?;
                check_phone(tool, &a.customer_phone)?;
                non_empty(tool, "customer_address", &a.customer_address)?;
                non_empty(tool, "service_type", &a.service_type)?;
                check_date(tool, &a.date)?;
                NaiveTime::parse_from_str(&a.time, "%H:%M")
                    .map(|_| ())
                    .map_err(|_| ToolError::invalid(tool, format!("time must be HH:MM, got {:?}", a.time)))
            }
            Self::CreateMessage(a) => {
                non_empty(tool, "customer_name", &a.customer_name)?;
                check_phone(tool, &a.customer_phone)?;
                non_empty(tool, "message", &a.message)
            }
            Self::TransferCall(a) => non_empty(tool, "reason", &a.reason),
        }
    }

    /// Arguments as JSON, in the schema's field names.
    pub fn arguments(&self) -> Value {
        let value = match self {
            Self::CheckAvailability(a) => serde_json::to_value(a),
            Self::BookAppointment(a) => serde_json::to_value(a),
            Self::CreateMessage(a) => serde_json::to_value(a),
            Self::TransferCall(a) => serde_json::to_value(a),
        };
        value.unwrap_or(Value::Null)
    }
}

fn from_value<T: serde::de::DeserializeOwned>(tool: ToolName, arguments: &Value) -> Result<T, ToolError> {
    T::deserialize(arguments).map_err(|e| ToolError::invalid(tool.as_str(), e.to_string()))
}

fn non_empty(tool: &str, field: &str, value: &str) -> Result<(), ToolError> {
    if value.trim().is_empty() {
        return Err(ToolError::invalid(tool, format!("{field} must not be empty")));
    }
    Ok(())
}

fn check_date(tool: &str, date: &str) -> Result<(), ToolError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| ToolError::invalid(tool, format!("date must be YYYY-MM-DD, got {date:?}")))
}

fn check_phone(tool: &str, phone: &str) -> Result<(), ToolError> {
    let digits = phone.chars().filter(char::is_ascii_digit).count();
    if digits < 7 {
        return Err(ToolError::invalid(tool, "customer_phone needs at least 7 digits"));
    }
    Ok(())
}

/// Function definition advertised to the voice model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// Definitions for every tool, in the JSON schema form models expect.
pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: ToolName::CheckAvailability.as_str(),
            description: "Check open appointment slots on a date.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "date": { "type": "string", "description": "Date as YYYY-MM-DD" }
                },
                "required": ["date"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: ToolName::BookAppointment.as_str(),
            description: "Book a service appointment once name, phone, address, service type, date and time are known.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "customer_name": { "type": "string" },
                    "customer_phone": { "type": "string" },
                    "customer_address": { "type": "string" },
                    "service_type": { "type": "string", "description": "What needs fixing or servicing" },
                    "date": { "type": "string", "description": "YYYY-MM-DD" },
                    "time": { "type": "string", "description": "HH:MM, 24-hour" },
                    "notes": { "type": "string" }
                },
                "required": ["customer_name", "customer_phone", "customer_address", "service_type", "date", "time"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: ToolName::CreateMessage.as_str(),
            description: "Leave a message for the business to call the customer back.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "customer_name": { "type": "string" },
                    "customer_phone": { "type": "string" },
                    "message": { "type": "string" },
                    "urgency": { "type": "string", "enum": ["normal", "urgent", "emergency"] }
                },
                "required": ["customer_name", "customer_phone", "message"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: ToolName::TransferCall.as_str(),
            description: "Transfer the caller to a person at the business.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "reason": { "type": "string" },
                    "is_emergency": { "type": "boolean" }
                },
                "required": ["reason", "is_emergency"],
                "additionalProperties": false
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking() -> Value {
        json!({
            "customer_name": "Dana Reyes",
            "customer_phone": "555-867-5309",
            "customer_address": "12 Oak Street",
            "service_type": "AC repair",
            "date": "2026-10-18",
            "time": "14:00"
        })
    }

    #[test]
    fn valid_booking_parses() {
        match ToolCall::parse("book_appointment", &booking()).unwrap() {
            ToolCall::BookAppointment(args) => {
                assert_eq!(args.customer_name, "Dana Reyes");
                assert_eq!(args.notes, None);
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[test]
    fn missing_field_is_invalid() {
        let mut args = booking();
        args.as_object_mut().unwrap().remove("customer_address");
        let err = ToolCall::parse("book_appointment", &args).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { ref tool, .. } if tool == "book_appointment"));
    }

    #[test]
    fn unknown_field_is_invalid() {
        let mut args = booking();
        args["discount_code"] = json!("FREE");
        assert!(ToolCall::parse("book_appointment", &args).is_err());
    }

    #[test]
    fn blank_and_malformed_values_are_invalid() {
        let mut blank = booking();
        blank["customer_name"] = json!("   ");
        assert!(ToolCall::parse("book_appointment", &blank).is_err());

        let mut bad_date = booking();
        bad_date["date"] = json!("tomorrow");
        assert!(ToolCall::parse("book_appointment", &bad_date).is_err());

        let mut bad_time = booking();
        bad_time["time"] = json!("2pm");
        assert!(ToolCall::parse("book_appointment", &bad_time).is_err());
    }

    #[test]
    fn unknown_tool_is_invalid() {
        assert!(matches!(
            ToolCall::parse("order_pizza", &json!({})),
            Err(ToolError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn non_object_arguments_are_invalid() {
        assert!(ToolCall::parse("transfer_call", &json!("not an object")).is_err());
    }

    #[test]
    fn transfer_defaults_to_non_emergency() {
        let call = ToolCall::parse("transfer_call", &json!({ "reason": "wants a manager" })).unwrap();
        assert_eq!(
            call,
            ToolCall::TransferCall(TransferCallArgs {
                reason: "wants a manager".to_string(),
                is_emergency: false
            })
        );
    }

    #[test]
    fn every_tool_has_a_definition() {
        let defs = definitions();
        for tool in ToolName::ALL {
            assert!(defs.iter().any(|d| d.name == tool.as_str()), "{tool} missing");
        }
    }
}
