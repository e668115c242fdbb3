//! OpenAI Realtime API event codec.

use crate::error::VoiceError;
use crate::model::{ModelCodec, ModelCommand, ModelEvent, SessionConfig};
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

pub const DEFAULT_URL: &str = "wss://api.openai.com/v1/realtime";
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview";

/// Error codes after which the session cannot continue.
const FATAL_ERROR_CODES: &[&str] = &["session_expired", "invalid_api_key", "insufficient_quota"];

#[derive(Debug, Clone, Default)]
pub struct OpenAiCodec;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ServerEvent {
    #[serde(rename = "session.created", alias = "session.updated")]
    SessionReady,
    #[serde(rename = "response.audio.delta", alias = "response.output_audio.delta")]
    AudioDelta { item_id: String, delta: String },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallDone {
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    CallerTranscript { transcript: String },
    #[serde(
        rename = "response.audio_transcript.done",
        alias = "response.output_audio_transcript.done"
    )]
    AgentTranscript { transcript: String },
    #[serde(rename = "response.done")]
    ResponseDone,
    #[serde(rename = "error")]
    Error { error: ErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    code: Option<String>,
    message: String,
}

impl ErrorBody {
    fn is_fatal(&self) -> bool {
        self.kind.as_deref() == Some("server_error")
            || self
                .code
                .as_deref()
                .is_some_and(|c| FATAL_ERROR_CODES.contains(&c))
    }
}

fn session_update(config: &SessionConfig) -> serde_json::Value {
    let tools: Vec<_> = config
        .tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "name": t.name,
                "description": t.description,
                "parameters": t.parameters,
            })
        })
        .collect();
    let format = config.audio_format.wire_name();

    json!({
        "type": "session.update",
        "session": {
            "modalities": ["audio", "text"],
            "instructions": config.instructions,
            "voice": config.voice,
            "temperature": config.temperature,
            "input_audio_format": format,
            "output_audio_format": format,
            "input_audio_transcription": { "model": "whisper-1" },
            "turn_detection": {
                "type": "server_vad",
                "threshold": config.turn_detection.threshold,
                "prefix_padding_ms": config.turn_detection.prefix_padding_ms,
                "silence_duration_ms": config.turn_detection.silence_duration_ms,
            },
            "tools": tools,
            "tool_choice": "auto",
        }
    })
}

fn response_create(instructions: Option<&str>) -> serde_json::Value {
    match instructions {
        Some(text) => json!({ "type": "response.create", "response": { "instructions": text } }),
        None => json!({ "type": "response.create" }),
    }
}

impl ModelCodec for OpenAiCodec {
    fn provider(&self) -> &'static str {
        "openai"
    }

    fn encode(&mut self, command: &ModelCommand) -> Result<Vec<String>, VoiceError> {
        let events = match command {
            ModelCommand::Configure(config) => {
                let greet = format!(
                    "Greet the caller by saying exactly: \"{}\"",
                    config.greeting
                );
                vec![session_update(config), response_create(Some(&greet))]
            }
            ModelCommand::AppendAudio(audio) => vec![json!({
                "type": "input_audio_buffer.append",
                "audio": base64::engine::general_purpose::STANDARD.encode(audio),
            })],
            ModelCommand::Truncate {
                utterance_id,
                audio_end_ms,
            } => vec![json!({
                "type": "conversation.item.truncate",
                "item_id": utterance_id,
                "content_index": 0,
                "audio_end_ms": audio_end_ms,
            })],
            ModelCommand::ToolResult { call_id, output } => vec![
                json!({
                    "type": "conversation.item.create",
                    "item": {
                        "type": "function_call_output",
                        "call_id": call_id,
                        "output": output.to_string(),
                    }
                }),
                response_create(None),
            ],
            ModelCommand::Respond { instructions } => {
                vec![response_create(instructions.as_deref())]
            }
            ModelCommand::Context { text } => vec![json!({
                "type": "conversation.item.create",
                "item": {
                    "type": "message",
                    "role": "system",
                    "content": [{ "type": "input_text", "text": text }],
                }
            })],
            // Keep-alive is handled by the websocket layer for this provider.
            ModelCommand::Pong { .. } => Vec::new(),
        };
        Ok(events.iter().map(|e| e.to_string()).collect())
    }

    fn decode(&mut self, text: &str) -> Result<Vec<ModelEvent>, VoiceError> {
        let event = match serde_json::from_str::<ServerEvent>(text)? {
            ServerEvent::SessionReady => ModelEvent::SessionReady,
            ServerEvent::AudioDelta { item_id, delta } => ModelEvent::AudioDelta {
                utterance_id: item_id,
                audio: base64::engine::general_purpose::STANDARD.decode(delta)?,
            },
            ServerEvent::SpeechStarted => ModelEvent::SpeechStarted,
            ServerEvent::FunctionCallDone {
                call_id,
                name,
                arguments,
            } => ModelEvent::FunctionCall {
                call_id,
                name,
                // Unparseable arguments are passed through as a string and
                // rejected by schema validation.
                arguments: serde_json::from_str(&arguments)
                    .unwrap_or(serde_json::Value::String(arguments)),
            },
            ServerEvent::CallerTranscript { transcript } => {
                ModelEvent::CallerTranscript { text: transcript }
            }
            ServerEvent::AgentTranscript { transcript } => {
                ModelEvent::AgentTranscript { text: transcript }
            }
            ServerEvent::ResponseDone => ModelEvent::ResponseDone,
            ServerEvent::Error { error } => ModelEvent::Error {
                fatal: error.is_fatal(),
                message: error.message,
            },
            ServerEvent::Other => return Ok(Vec::new()),
        };
        Ok(vec![event])
    }
}
