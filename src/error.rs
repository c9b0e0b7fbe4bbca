//! Error types for Casabot

use std::time::Duration;

use thiserror::Error;

use crate::assistant::SessionState;

/// Result type alias for Casabot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Casabot
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Speech-to-text failed on the payload or the engine
    #[error("transcription error: {0}")]
    Transcription(#[from] TranscriptionError),

    /// Text-to-speech engine failure
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Session handshake failed or the session was lost
    #[error("connection error: {0}")]
    Connection(String),

    /// A bounded wait was exceeded
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Backend was reachable but reported a failure
    ///
    /// `user_message` is safe to display, `diagnostic` is the raw backend text
    #[error("backend error: {diagnostic}")]
    Backend {
        user_message: String,
        diagnostic: String,
    },

    /// Request rejected before reaching the backend
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Assistant session is not in a state that accepts requests
    #[error("assistant session not ready ({0})")]
    NotReady(SessionState),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Build a backend error with the generic user-facing message
    pub fn backend(diagnostic: impl Into<String>) -> Self {
        Self::Backend {
            user_message: "The assistant could not complete that request.".to_string(),
            diagnostic: diagnostic.into(),
        }
    }

    /// Build a timeout error
    #[must_use]
    pub const fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::Timeout { operation, after }
    }

    /// Short stable label for logs and metrics fields
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Transcription(_) => "transcription",
            Self::Synthesis(_) => "synthesis",
            Self::Connection(_) => "connection",
            Self::Timeout { .. } => "timeout",
            Self::Backend { .. } => "backend",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotReady(_) => "not_ready",
            Self::Io(_) => "io",
            Self::Http(_) => "http",
            Self::Serialization(_) => "serialization",
            Self::Toml(_) => "toml",
        }
    }
}

/// Why an audio payload could not be transcribed
#[derive(Debug, Error)]
pub enum TranscriptionError {
    /// No audio bytes were supplied
    #[error("empty audio payload")]
    EmptyPayload,

    /// The payload is not decodable audio
    #[error("malformed audio payload: {0}")]
    Malformed(String),

    /// The speech engine is missing, failing or too slow
    #[error("speech engine unavailable: {0}")]
    EngineUnavailable(String),
}

impl TranscriptionError {
    /// Whether the failure is caused by the input rather than the engine
    #[must_use]
    pub const fn is_bad_input(&self) -> bool {
        matches!(self, Self::EmptyPayload | Self::Malformed(_))
    }
}
