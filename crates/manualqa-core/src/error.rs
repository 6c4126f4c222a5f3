use thiserror::Error;

use crate::types::ManualId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown manual: {0}")]
    UnknownManual(ManualId),

    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid chunk hierarchy: {0}")]
    InvalidHierarchy(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation failed: {0}")]
    Operation(String),
}

impl Error {
    /// Only rate limiting is worth another attempt; everything else is final
    /// for the current call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RateLimited(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Operation(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Operation(format!("json: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
