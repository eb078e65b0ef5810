//! Repository host error types

use thiserror::Error;

/// Errors returned by a repository host
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized (status {0}): check the host token")]
    Unauthorized(u16),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl HostError {
    /// Map a non-success HTTP status and body to an error
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => HostError::Unauthorized(status),
            404 => HostError::NotFound(message),
            _ => HostError::Api { status, message },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, HostError::NotFound(_))
    }
}
