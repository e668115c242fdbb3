use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    /// Connect or handshake failed, timed out, or the model reported a fatal error.
    #[error("voice model unavailable: {0}")]
    ModelUnavailable(String),

    /// A duplex connection dropped mid-stream.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame could not be decoded.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for VoiceError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedFrame(e.to_string())
    }
}

impl From<base64::DecodeError> for VoiceError {
    fn from(e: base64::DecodeError) -> Self {
        Self::MalformedFrame(format!("invalid base64 audio: {e}"))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for VoiceError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
