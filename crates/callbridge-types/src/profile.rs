//! Business profile definitions.
//!
//! A `BusinessProfile` is the read-only snapshot a call session is built
//! from: who the agent is, what it says first, and which caller phrases must
//! be routed to a human.

use serde::{Deserialize, Serialize};

/// Phrases that indicate an emergency when no list is configured.
pub const DEFAULT_EMERGENCY_KEYWORDS: &[&str] = &[
    "emergency",
    "gas leak",
    "smell gas",
    "burning",
    "smoke",
    "fire",
    "sparking",
    "carbon monoxide",
    "flooding",
    "burst pipe",
    "no heat",
];

/// Phrases that ask for a person when no list is configured.
pub const DEFAULT_TRANSFER_KEYWORDS: &[&str] = &[
    "speak to a human",
    "talk to a human",
    "real person",
    "speak to someone",
    "representative",
    "manager",
    "operator",
];

/// Voice model selection and synthesis parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    /// Provider voice name (e.g. "alloy") or voice id.
    pub voice: String,
    /// Model name, if the profile overrides the server default.
    #[serde(default)]
    pub model: Option<String>,
    /// Sampling temperature for the conversational model.
    pub temperature: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            voice: "alloy".to_string(),
            model: None,
            temperature: 0.8,
        }
    }
}

/// Server-side voice activity detection thresholds sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TurnDetection {
    /// Activation threshold in `0.0..=1.0`.
    pub threshold: f32,
    /// Audio retained before detected speech, in milliseconds.
    pub prefix_padding_ms: u32,
    /// Silence that ends a caller turn, in milliseconds.
    pub silence_duration_ms: u32,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

/// Immutable per-call snapshot of a business's phone agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessProfile {
    /// Stable public identifier used in media stream URLs and tool calls.
    pub business_id: String,
    /// Display name of the business.
    pub name: String,
    /// Inbound phone number (E.164) routed to this business.
    pub phone_number: String,
    /// Name the agent introduces itself with.
    pub agent_name: String,
    /// First sentence spoken to the caller.
    pub greeting: String,
    /// Free-form opening hours, quoted to callers.
    pub business_hours: String,
    /// Lowercase phrases that force an emergency transfer.
    #[serde(default)]
    pub emergency_keywords: Vec<String>,
    /// Lowercase phrases that force a regular transfer.
    #[serde(default)]
    pub transfer_keywords: Vec<String>,
    /// Number dialed when the bridge itself cannot continue the call.
    #[serde(default)]
    pub emergency_transfer_number: Option<String>,
    #[serde(default)]
    pub voice: VoiceSettings,
    #[serde(default)]
    pub turn_detection: TurnDetection,
}

impl BusinessProfile {
    /// Emergency phrases, falling back to the built-in list when none are set.
    pub fn effective_emergency_keywords(&self) -> Vec<String> {
        if self.emergency_keywords.is_empty() {
            DEFAULT_EMERGENCY_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect()
        } else {
            self.emergency_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect()
        }
    }

    /// Transfer phrases, falling back to the built-in list when none are set.
    pub fn effective_transfer_keywords(&self) -> Vec<String> {
        if self.transfer_keywords.is_empty() {
            DEFAULT_TRANSFER_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect()
        } else {
            self.transfer_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect()
        }
    }
}
