//! Error types for the shotcheck engine

use thiserror::Error;

/// Result type alias using the engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Engine error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config encode error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Comparison failed: {0}")]
    Comparison(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Join rejected for topic {topic}: {reason}")]
    JoinRejected { topic: String, reason: String },

    #[error("Unknown result group: {0}")]
    UnknownGroup(String),

    #[error("Session is no longer running")]
    SessionClosed,
}

impl Error {
    /// Message without the variant prefix, for verdict details
    pub fn detail(&self) -> String {
        match self {
            Error::Comparison(message) | Error::Transport(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// A comparison that the collaborator rejected.
///
/// Cloneable so it can travel through a shared in-flight future to every
/// caller waiting on the same name.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("comparison of '{name}' failed: {message}")]
pub struct ComparisonFailure {
    pub name: String,
    pub message: String,
}

impl ComparisonFailure {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::SessionClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::SessionClosed
    }
}
