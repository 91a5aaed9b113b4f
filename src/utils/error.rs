//! Error types and handling
//!
//! Common error types used across the supervisor.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supervisor-wide error type
///
/// Only `Launch`, `Fetch` and `InvalidRequest` ever reach a caller of
/// `Supervisor::start`. `Restart` and `Sample` are produced by the background
/// tasks and end up in the log.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Launch failed: {0}")]
    Launch(String),

    #[error("Overlay fetch failed: {0}")]
    Fetch(String),

    #[error("Restart failed: {0}")]
    Restart(String),

    #[error("Thumbnail capture failed: {0}")]
    Sample(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Error response for collaborators that render errors as text
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<SupervisorError> for ErrorResponse {
    fn from(error: SupervisorError) -> Self {
        let code = match &error {
            SupervisorError::Io(_) => "IO_ERROR",
            SupervisorError::Serialization(_) => "SERIALIZATION_ERROR",
            SupervisorError::Launch(_) => "LAUNCH_FAILURE",
            SupervisorError::Fetch(_) => "FETCH_FAILURE",
            SupervisorError::Restart(_) => "RESTART_FAILURE",
            SupervisorError::Sample(_) => "SAMPLE_FAILURE",
            SupervisorError::InvalidConfig(_) => "INVALID_CONFIG",
            SupervisorError::InvalidRequest(_) => "INVALID_REQUEST",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using SupervisorError
pub type SupervisorResult<T> = Result<T, SupervisorError>;
