//! Custom error types for vuo.

use thiserror::Error;

/// Errors that can occur while talking to the VCF API or driving an upgrade.
#[derive(Error, Debug, Clone)]
pub enum VuoError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("API request failed with status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Unexpected API response: {0}")]
    Decode(String),

    #[error("{operation} timed out after {minutes} minutes")]
    Timeout { operation: String, minutes: u64 },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("API unavailable: {0}")]
    TransientUnavailable(String),

    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    #[error("No applicable release: {0}")]
    NoApplicableRelease(String),

    #[error("Upgrade already running for domain {0}")]
    RunInProgress(String),

    #[error("Upgrade abandoned: {0}")]
    Cancelled(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl VuoError {
    /// Classify a transport-level reqwest error.
    pub fn transport(err: &reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        Self::Connection(err.to_string())
    }

    /// HTTP status code carried by an `Api` error.
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if the API endpoint could not be reached.
    ///
    /// Gateway errors count as unreachable: the manager service sits behind a
    /// reverse proxy that answers 502/503/504 while the backend restarts.
    pub const fn is_unreachable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::TransientUnavailable(_) => true,
            Self::Api { status, .. } => matches!(*status, 502..=504),
            _ => false,
        }
    }

    /// Returns true if an `Api` error means the resource is already in the
    /// requested state (409, or 400 whose body says "already").
    pub fn is_conflict_tolerable(&self) -> bool {
        match self {
            Self::Api { status: 409, .. } => true,
            Self::Api { status: 400, body } => body.to_lowercase().contains("already"),
            _ => false,
        }
    }

    /// Returns true if this error is transient and the request may be retried.
    pub const fn is_transient(&self) -> bool {
        self.is_unreachable() || matches!(self, Self::Api { status: 429, .. })
    }
}
