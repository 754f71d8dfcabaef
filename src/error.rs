// src/error.rs
// Error type shared by the signer, normalizer and session

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SparkError {
    /// Conversation rejected before any network I/O
    #[error("validation error: {0}")]
    Validation(String),

    /// Base URL could not be turned into a signed URL
    #[error("signing error: {0}")]
    Signing(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// Non-zero `header.code` reported by the server
    #[error("server error {code}: {message}")]
    Protocol {
        code: i64,
        message: String,
        sid: Option<String>,
    },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("no frame received within {0:?}")]
    Timeout(Duration),

    #[error("session cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),
}

impl SparkError {
    /// Server error code, if this error came from the remote side
    pub fn code(&self) -> Option<i64> {
        match self {
            SparkError::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SparkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SparkError::Transport(err.to_string())
    }
}

impl From<url::ParseError> for SparkError {
    fn from(err: url::ParseError) -> Self {
        SparkError::Signing(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SparkError>;
