use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    /// The status request could not complete.
    #[error("Network error: {0}")]
    Network(String),
    /// The status response was malformed.
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Exhausted retries after {attempts} attempts")]
    ExhaustedRetries { attempts: u32 },
    #[error("Subject expired: {0}")]
    SubjectExpired(String),
    #[error("Command rejected: {0}")]
    CommandRejected(String),
    #[error("Command already in flight: {0}")]
    CommandInFlight(String),
    #[error("Session already active")]
    AlreadyActive,
    #[error("Session stopped before reaching a terminal state")]
    Stopped,
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WatchError>;
