//! Shared types for the call bridge.
//!
//! This crate provides the domain types used across the workspace: the
//! read-only [`BusinessProfile`] a call session is configured from, call
//! status values reported by the telephony provider, and the urgency levels
//! produced by the conversation layer.
//!
//! It carries no I/O and depends on nothing but `serde`, so every other crate
//! can depend on it without pulling in a runtime.

pub mod profile;

pub use profile::{BusinessProfile, TurnDetection, VoiceSettings};

use serde::{Deserialize, Serialize};

/// Urgency detected from what the caller has said so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    /// Nothing unusual.
    #[default]
    Normal,
    /// The caller asked for a person, or the issue needs prompt attention.
    Urgent,
    /// An emergency keyword matched; the call goes to a human immediately.
    Emergency,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Urgent => "urgent",
            Self::Emergency => "emergency",
        }
    }
}

/// Call status values delivered by the telephony provider's status callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Queued,
    Ringing,
    InProgress,
    Completed,
    Busy,
    Failed,
    NoAnswer,
    Canceled,
}

impl CallStatus {
    /// Returns the wire label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Ringing => "ringing",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Busy => "busy",
            Self::Failed => "failed",
            Self::NoAnswer => "no-answer",
            Self::Canceled => "canceled",
        }
    }

    /// Returns `true` if the call can no longer carry media.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Busy | Self::Failed | Self::NoAnswer | Self::Canceled
        )
    }
}

impl std::str::FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "ringing" => Ok(Self::Ringing),
            "in-progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "busy" => Ok(Self::Busy),
            "failed" => Ok(Self::Failed),
            "no-answer" => Ok(Self::NoAnswer),
            "canceled" => Ok(Self::Canceled),
            other => Err(format!("unknown call status: {}", other)),
        }
    }
}

/// How a call ended, as recorded on the call record at teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Booked,
    MessageTaken,
    Transferred,
    Completed,
    Failed,
}

impl CallOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Booked => "booked",
            Self::MessageTaken => "message_taken",
            Self::Transferred => "transferred",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_status_parses_provider_labels() {
        for status in [
            CallStatus::Queued,
            CallStatus::Ringing,
            CallStatus::InProgress,
            CallStatus::Completed,
            CallStatus::Busy,
            CallStatus::Failed,
            CallStatus::NoAnswer,
            CallStatus::Canceled,
        ] {
            assert_eq!(status.as_str().parse::<CallStatus>(), Ok(status));
        }
        assert!("ringing-ish".parse::<CallStatus>().is_err());
    }

    #[test]
    fn only_finished_statuses_are_terminal() {
        assert!(!CallStatus::InProgress.is_terminal());
        assert!(!CallStatus::Ringing.is_terminal());
        assert!(CallStatus::Completed.is_terminal());
        assert!(CallStatus::NoAnswer.is_terminal());
    }

    #[test]
    fn urgency_serializes_snake_case() {
        let json = serde_json::to_string(&Urgency::Emergency).unwrap();
        assert_eq!(json, "\"emergency\"");
    }
}
