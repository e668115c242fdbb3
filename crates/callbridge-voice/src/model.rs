//! Provider-agnostic voice-model interface.
//!
//! A call session talks to the conversational model only through
//! [`ModelCommand`]s and [`ModelEvent`]s. Each provider supplies a
//! [`ModelCodec`] that maps these to its own wire events, and a
//! [`VoiceModelAdapter`] that opens a connection and hands back a pair of
//! bounded channels.

use crate::codec::AudioFormat;
use crate::error::VoiceError;
use async_trait::async_trait;
use callbridge_types::TurnDetection;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A function the model may call, described by a JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Initial session configuration built from the business profile.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Persona and task instructions.
    pub instructions: String,
    /// First thing the agent says when the session opens.
    pub greeting: String,
    pub voice: String,
    pub temperature: f32,
    pub audio_format: AudioFormat,
    pub turn_detection: TurnDetection,
    pub tools: Vec<ToolSpec>,
}

/// Instructions sent from the session to the model.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelCommand {
    /// Configure the session and speak the greeting.
    Configure(Box<SessionConfig>),
    /// Caller audio in the model's input format.
    AppendAudio(Vec<u8>),
    /// Trim an utterance to what the caller actually heard.
    Truncate {
        utterance_id: String,
        audio_end_ms: u64,
    },
    /// Output of a function call the model issued.
    ToolResult {
        call_id: String,
        output: serde_json::Value,
    },
    /// Ask the model to respond now, optionally steering what it says.
    Respond { instructions: Option<String> },
    /// Background the model should know before its next reply. Does not
    /// trigger a reply on its own.
    Context { text: String },
    Pong { event_id: Option<u64> },
}

/// Events received from the model.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    SessionReady,
    /// A fragment of agent speech in the model's output format.
    AudioDelta { utterance_id: String, audio: Vec<u8> },
    /// The caller started talking.
    SpeechStarted,
    FunctionCall {
        call_id: String,
        name: String,
        arguments: serde_json::Value,
    },
    CallerTranscript { text: String },
    AgentTranscript { text: String },
    ResponseDone,
    Ping { event_id: Option<u64> },
    /// A provider-reported error. `fatal` errors end the model connection.
    Error { message: String, fatal: bool },
}

/// Maps commands and events to one provider's text frames.
///
/// Codecs may keep per-connection state (e.g. utterance counters), so each
/// connection gets its own clone.
pub trait ModelCodec: Clone + Send + 'static {
    fn provider(&self) -> &'static str;

    /// Encodes a command into zero or more text frames.
    fn encode(&mut self, command: &ModelCommand) -> Result<Vec<String>, VoiceError>;

    /// Decodes one text frame into zero or more events.
    fn decode(&mut self, text: &str) -> Result<Vec<ModelEvent>, VoiceError>;
}

/// An open model connection.
///
/// Dropping `commands` closes the underlying connection; `events` yields
/// `None` once the connection has gone away.
#[derive(Debug)]
pub struct ModelConnection {
    pub commands: mpsc::Sender<ModelCommand>,
    pub events: mpsc::Receiver<ModelEvent>,
}

/// Opens connections to a streaming voice model.
#[async_trait]
pub trait VoiceModelAdapter: Send + Sync {
    fn provider(&self) -> &'static str;

    /// Connects and completes the transport handshake.
    ///
    /// `model` overrides the configured model name where the provider
    /// selects models per connection. Callers bound this with their own
    /// timeout.
    async fn connect(&self, model: Option<&str>) -> Result<ModelConnection, VoiceError>;
}
