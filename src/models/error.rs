//! Error types for askbatch.
//!
//! Two tiers:
//! - `AskbatchError`: failures that stop a run (configuration, durable I/O)
//! - `ServiceError`: failures of a single completion call, always classified
//!   and folded into a recorded outcome by the invoker

use super::FailureKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for askbatch.
#[derive(Debug, Error)]
pub enum AskbatchError {
    // ═══════════════════════════════════════════════════════════════════
    // FATAL BEFORE START: nothing has been processed yet
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Question list not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Malformed question list: {0}")]
    Csv(#[from] csv::Error),

    // ═══════════════════════════════════════════════════════════════════
    // FATAL DURING RUN: durable state could not be written
    // ═══════════════════════════════════════════════════════════════════

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(String),
}

impl AskbatchError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Failure of one call to the completion service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed response payload")]
    Malformed { raw: String },

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl ServiceError {
    /// Classify this failure for the retry policy.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Auth(_) => FailureKind::Auth,
            Self::RateLimited(_) => FailureKind::RateLimit,
            Self::Timeout(_) | Self::Network(_) => FailureKind::Transient,
            Self::Api { status, .. } if *status == 408 || *status >= 500 => FailureKind::Transient,
            Self::Api { .. } => FailureKind::Unknown,
            Self::Malformed { .. } => FailureKind::Malformed,
            Self::Unknown(_) => FailureKind::Unknown,
        }
    }

    /// Map an HTTP status and body to a classified failure.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Auth(message),
            429 => Self::RateLimited(message),
            _ => Self::Api { status, message },
        }
    }
}

/// Result type alias for askbatch.
pub type Result<T> = std::result::Result<T, AskbatchError>;
