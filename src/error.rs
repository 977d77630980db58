// ===============================
// src/error.rs
// ===============================
use thiserror::Error;

use crate::domain::FailReason;

/// Errors coming back from either venue.
#[derive(Debug, Clone, Error)]
pub enum VenueError {
    #[error("credentials rejected: {0}")]
    Auth(String),
    #[error("transient network error: {0}")]
    Transient(String),
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("venue business error [{code}]: {msg}")]
    Business { code: String, msg: String },
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl VenueError {
    pub fn is_transient(&self) -> bool {
        matches!(self, VenueError::Transient(_))
    }

    /// Classify an HTTP status that came without a parseable venue envelope.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            VenueError::Auth(format!("{status}: {body}"))
        } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            VenueError::Transient(format!("{status}: {body}"))
        } else {
            VenueError::Business { code: status.as_u16().to_string(), msg: body }
        }
    }

    pub fn into_fail_reason(self) -> FailReason {
        match self {
            VenueError::Auth(m) => FailReason::Auth(m),
            VenueError::Transient(m) => FailReason::Transient(m),
            VenueError::Business { code, msg } => FailReason::Business { code, msg },
            VenueError::Malformed(m) => FailReason::Malformed(m),
            VenueError::InsufficientBalance(m) => {
                FailReason::Business { code: "insufficient_balance".into(), msg: m }
            }
        }
    }
}

impl From<reqwest::Error> for VenueError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            VenueError::Malformed(e.to_string())
        } else {
            // timeout, connect, body read: semua dianggap transient
            VenueError::Transient(e.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for VenueError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        VenueError::Transient("call timed out".into())
    }
}

impl From<serde_json::Error> for VenueError {
    fn from(e: serde_json::Error) -> Self {
        VenueError::Malformed(e.to_string())
    }
}

pub type VenueResult<T> = Result<T, VenueError>;

/// Startup failures after config is accepted.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("dedup ledger unavailable: {0}")]
    Ledger(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
    #[error("invalid endpoint {0}: {1}")]
    BadUrl(String, String),
    #[error("no stream kinds selected")]
    NoStreams,
}
