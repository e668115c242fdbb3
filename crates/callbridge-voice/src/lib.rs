//! Media plumbing for the call bridge.
//!
//! Two duplex streams meet in a call session: the telephony media stream
//! (8 kHz μ-law in JSON frames) and a streaming conversational voice model.
//! This crate owns everything about those streams except the session
//! itself: the audio transcoder and fixed-size framing, the telephony frame
//! codec, and the provider-agnostic [`VoiceModelAdapter`] with websocket
//! implementations for OpenAI Realtime and ElevenLabs Conversational AI.

pub mod codec;
pub mod config;
pub mod elevenlabs;
pub mod error;
pub mod model;
pub mod openai;
pub mod telephony;
pub mod transport;

pub use codec::{
    AudioFormat, FrameChunker, Resampler, Transcoder, FRAME_DURATION_MS, MULAW_FRAME_BYTES,
};
pub use config::{ModelAudioFormat, ModelConfig, ModelProvider};
pub use elevenlabs::ElevenLabsCodec;
pub use error::VoiceError;
pub use model::{
    ModelCodec, ModelCommand, ModelConnection, ModelEvent, SessionConfig, ToolSpec,
    VoiceModelAdapter,
};
pub use openai::OpenAiCodec;
pub use telephony::{StreamStart, TelephonyCommand, TelephonyEvent};
pub use transport::WebSocketModelAdapter;
