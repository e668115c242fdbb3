use crate::codec::AudioFormat;
use crate::elevenlabs::{self, ElevenLabsCodec};
use crate::error::VoiceError;
use crate::model::VoiceModelAdapter;
use crate::openai::{self, OpenAiCodec};
use crate::transport::{WebSocketModelAdapter, DEFAULT_QUEUE_CAPACITY};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// Sample rate used by the realtime API's `pcm16` format.
const OPENAI_PCM16_RATE: u32 = 24_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    #[default]
    OpenAi,
    ElevenLabs,
}

impl std::str::FromStr for ModelProvider {
    type Err = VoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(VoiceError::Config(format!("unknown model provider: {other}"))),
        }
    }
}

/// Wire audio format name in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelAudioFormat {
    #[default]
    G711Ulaw,
    Pcm16,
}

/// Voice-model connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: ModelProvider,
    /// Websocket endpoint; the provider's public endpoint when empty.
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Default model name (OpenAI).
    #[serde(default)]
    pub model: String,
    /// Conversational agent id (ElevenLabs).
    #[serde(default)]
    pub agent_id: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub audio_format: ModelAudioFormat,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ModelProvider::default(),
            url: String::new(),
            api_key: String::new(),
            model: String::new(),
            agent_id: String::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            audio_format: ModelAudioFormat::default(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("agent_id", &self.agent_id)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("audio_format", &self.audio_format)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl ModelConfig {
    /// The audio format the model is configured to exchange.
    pub fn session_audio_format(&self) -> AudioFormat {
        match (self.provider, self.audio_format) {
            (_, ModelAudioFormat::G711Ulaw) => AudioFormat::G711Ulaw,
            (ModelProvider::OpenAi, ModelAudioFormat::Pcm16) => AudioFormat::Pcm16 {
                sample_rate: OPENAI_PCM16_RATE,
            },
            // The agent's own audio settings decide; 16 kHz is the platform default.
            (ModelProvider::ElevenLabs, ModelAudioFormat::Pcm16) => {
                AudioFormat::Pcm16 { sample_rate: 16_000 }
            }
        }
    }

    /// Builds the websocket adapter for the configured provider.
    pub fn build_adapter(&self) -> Result<Arc<dyn VoiceModelAdapter>, VoiceError> {
        match self.provider {
            ModelProvider::OpenAi => {
                if self.api_key.is_empty() {
                    return Err(VoiceError::Config("model.api_key is required".to_string()));
                }
                let url = if self.url.is_empty() {
                    openai::DEFAULT_URL
                } else {
                    self.url.as_str()
                };
                let model = if self.model.is_empty() {
                    openai::DEFAULT_MODEL
                } else {
                    self.model.as_str()
                };
                Ok(Arc::new(
                    WebSocketModelAdapter::new(url, OpenAiCodec)
                        .with_header("Authorization", format!("Bearer {}", self.api_key))
                        .with_header("OpenAI-Beta", "realtime=v1")
                        .with_model_param("model", model)
                        .with_queue_capacity(self.queue_capacity),
                ))
            }
            ModelProvider::ElevenLabs => {
                if self.agent_id.is_empty() {
                    return Err(VoiceError::Config(
                        "model.agent_id is required for elevenlabs".to_string(),
                    ));
                }
                let base = if self.url.is_empty() {
                    elevenlabs::DEFAULT_URL
                } else {
                    self.url.as_str()
                };
                let mut adapter = WebSocketModelAdapter::new(
                    format!("{base}?agent_id={}", self.agent_id),
                    ElevenLabsCodec::default(),
                )
                .with_queue_capacity(self.queue_capacity);
                if !self.api_key.is_empty() {
                    adapter = adapter.with_header("xi-api-key", self.api_key.clone());
                }
                Ok(Arc::new(adapter))
            }
        }
    }
}
