use crate::config::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotepurgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Misskey API error: {0}")]
    Misskey(#[from] MisskeyError),

    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("A cleanup run is already in progress")]
    RunInProgress,

    #[error("Interrupted by user")]
    Interrupted,

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl NotepurgeError {
    /// Message shown on the error line: the server's own wording for API failures
    pub fn user_message(&self) -> String {
        match self {
            NotepurgeError::Misskey(inner) => inner.to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MisskeyError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("{message}")]
    ApiRequestFailed {
        status: u16,
        message: String,
        code: Option<String>,
    },

    #[error("Rate limit exceeded after {attempts} attempts, retry after {wait_ms} ms")]
    RateLimitExceeded { wait_ms: u64, attempts: u32 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl MisskeyError {
    /// HTTP status of the failed request, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            MisskeyError::ApiRequestFailed { status, .. } => Some(*status),
            MisskeyError::RateLimitExceeded { .. } => Some(429),
            _ => None,
        }
    }
}

/// Classification of failures for logging and exit handling
pub struct ErrorRecovery;

impl ErrorRecovery {
    /// Whether re-running the same operation later could succeed
    pub fn is_recoverable(error: &NotepurgeError) -> bool {
        match error {
            NotepurgeError::Misskey(misskey_error) => match misskey_error {
                MisskeyError::Network(_) => true,
                MisskeyError::RateLimitExceeded { .. } => true,
                MisskeyError::ApiRequestFailed { status, .. } => *status >= 500,
                MisskeyError::InvalidResponse(_) => false,
            },
            NotepurgeError::RunInProgress => true,
            NotepurgeError::Interrupted => false,
            NotepurgeError::Config(_) => false,
            NotepurgeError::TaskJoin(_) => false,
            NotepurgeError::InvalidData(_) => false,
        }
    }

    /// Whether the server rejected the credentials themselves
    pub fn is_authentication_failure(error: &NotepurgeError) -> bool {
        matches!(
            error,
            NotepurgeError::Misskey(MisskeyError::ApiRequestFailed {
                status: 401 | 403,
                ..
            })
        )
    }
}
