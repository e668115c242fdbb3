//! ElevenLabs Conversational AI event codec.
//!
//! The protocol has no utterance ids, no truncate instruction and no
//! end-of-response event: the provider truncates its own speech when it
//! reports an `interruption`. The codec numbers utterances itself and
//! reports an utterance as done once the next turn begins (a new agent
//! response or a caller transcript), so the session can track playback the
//! same way for every provider.

use crate::error::VoiceError;
use crate::model::{ModelCodec, ModelCommand, ModelEvent};
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

pub const DEFAULT_URL: &str = "wss://api.elevenlabs.io/v1/convai/conversation";

#[derive(Debug, Clone, Default)]
pub struct ElevenLabsCodec {
    utterance: u64,
    /// Audio has arrived for the current utterance.
    speaking: bool,
}

impl ElevenLabsCodec {
    fn utterance_id(&self) -> String {
        format!("el-{}", self.utterance)
    }

    /// Ends the current utterance, reporting it done if it produced audio.
    fn finish_utterance(&mut self) -> Option<ModelEvent> {
        if !std::mem::take(&mut self.speaking) {
            return None;
        }
        self.utterance += 1;
        Some(ModelEvent::ResponseDone)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerEvent {
    ConversationInitiationMetadata,
    Audio {
        audio_event: AudioEvent,
    },
    Interruption,
    UserTranscript {
        user_transcription_event: UserTranscription,
    },
    AgentResponse {
        agent_response_event: AgentResponse,
    },
    Ping {
        ping_event: PingEvent,
    },
    ClientToolCall {
        client_tool_call: ClientToolCall,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AudioEvent {
    audio_base_64: String,
}

#[derive(Debug, Deserialize)]
struct UserTranscription {
    user_transcript: String,
}

#[derive(Debug, Deserialize)]
struct AgentResponse {
    agent_response: String,
}

#[derive(Debug, Deserialize)]
struct PingEvent {
    event_id: u64,
}

#[derive(Debug, Deserialize)]
struct ClientToolCall {
    tool_name: String,
    tool_call_id: String,
    #[serde(default)]
    parameters: serde_json::Value,
}

impl ModelCodec for ElevenLabsCodec {
    fn provider(&self) -> &'static str {
        "elevenlabs"
    }

    fn encode(&mut self, command: &ModelCommand) -> Result<Vec<String>, VoiceError> {
        let event = match command {
            ModelCommand::Configure(config) => json!({
                "type": "conversation_initiation_client_data",
                "conversation_config_override": {
                    "agent": {
                        "prompt": { "prompt": config.instructions },
                        "first_message": config.greeting,
                    },
                    "tts": { "voice_id": config.voice },
                }
            }),
            ModelCommand::AppendAudio(audio) => json!({
                "user_audio_chunk": base64::engine::general_purpose::STANDARD.encode(audio),
            }),
            ModelCommand::Truncate { .. } => return Ok(Vec::new()),
            ModelCommand::ToolResult { call_id, output } => {
                let is_error = output
                    .get("success")
                    .and_then(serde_json::Value::as_bool)
                    .is_some_and(|ok| !ok);
                let result = match output {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                json!({
                    "type": "client_tool_result",
                    "tool_call_id": call_id,
                    "result": result,
                    "is_error": is_error,
                })
            }
            ModelCommand::Respond {
                instructions: Some(text),
            } => json!({ "type": "contextual_update", "text": text }),
            ModelCommand::Respond { instructions: None } => return Ok(Vec::new()),
            ModelCommand::Context { text } => json!({ "type": "contextual_update", "text": text }),
            ModelCommand::Pong { event_id } => json!({ "type": "pong", "event_id": event_id }),
        };
        Ok(vec![event.to_string()])
    }

    fn decode(&mut self, text: &str) -> Result<Vec<ModelEvent>, VoiceError> {
        let event = match serde_json::from_str::<ServerEvent>(text)? {
            ServerEvent::ConversationInitiationMetadata => ModelEvent::SessionReady,
            ServerEvent::Audio { audio_event } => {
                self.speaking = true;
                ModelEvent::AudioDelta {
                    utterance_id: self.utterance_id(),
                    audio: base64::engine::general_purpose::STANDARD
                        .decode(audio_event.audio_base_64)?,
                }
            }
            ServerEvent::Interruption => {
                self.speaking = false;
                self.utterance += 1;
                ModelEvent::SpeechStarted
            }
            ServerEvent::UserTranscript {
                user_transcription_event,
            } => {
                let mut events: Vec<_> = self.finish_utterance().into_iter().collect();
                events.push(ModelEvent::CallerTranscript {
                    text: user_transcription_event.user_transcript,
                });
                return Ok(events);
            }
            ServerEvent::AgentResponse {
                agent_response_event,
            } => {
                let mut events: Vec<_> = self.finish_utterance().into_iter().collect();
                events.push(ModelEvent::AgentTranscript {
                    text: agent_response_event.agent_response,
                });
                return Ok(events);
            }
            ServerEvent::Ping { ping_event } => ModelEvent::Ping {
                event_id: Some(ping_event.event_id),
            },
            ServerEvent::ClientToolCall { client_tool_call } => ModelEvent::FunctionCall {
                call_id: client_tool_call.tool_call_id,
                name: client_tool_call.tool_name,
                arguments: client_tool_call.parameters,
            },
            ServerEvent::Other => return Ok(Vec::new()),
        };
        Ok(vec![event])
    }
}
