use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    /// A model-issued function call did not match the tool's schema.
    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The tool backend failed (network error, 5xx, undecodable reply).
    #[error("tool backend error: {0}")]
    Backend(String),

    #[error("tool backend timed out after {0} ms")]
    Timeout(u64),

    /// The session's tool worker is gone or its queue is full.
    #[error("tool worker unavailable: {0}")]
    Unavailable(String),
}

impl ToolError {
    pub(crate) fn invalid(tool: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        Self::Backend(e.to_string())
    }
}
