//! # Error Types
//!
//! Error taxonomy for the sync engine:
//!
//! - [`DestinationError`] - a single failed call against a destination API.
//!   Carries enough classification (kind + optional HTTP status) for the
//!   rate-limit queue to decide whether the call is retryable.
//! - [`SyncError`] - fatal, run-aborting conditions. Per-item failures are
//!   never surfaced through this type; they are collected into the run
//!   result instead.

use thiserror::Error;

use crate::store::StoreError;

/// Classification of a destination API failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationErrorKind {
    /// Credentials invalid or expired
    Auth,
    /// Named throttling error (e.g. AWS `ThrottlingException`)
    Throttled,
    /// The referenced object does not exist
    NotFound,
    /// Any other API failure
    Api,
}

/// A failed call against a destination API
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DestinationError {
    pub kind: DestinationErrorKind,
    /// HTTP status of the response, when the failure came from an HTTP reply
    pub status: Option<u16>,
    pub message: String,
}

impl DestinationError {
    pub fn api(message: impl Into<String>) -> Self {
        Self {
            kind: DestinationErrorKind::Api,
            status: None,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self {
            kind: DestinationErrorKind::Auth,
            status: None,
            message: message.into(),
        }
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self {
            kind: DestinationErrorKind::Throttled,
            status: None,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: DestinationErrorKind::NotFound,
            status: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Whether this failure should be retried by the rate-limit queue.
    ///
    /// True for named throttling errors and for HTTP statuses listed in the
    /// queue's `rate_limit_status_codes`.
    pub fn is_rate_limit(&self, rate_limit_status_codes: &[u16]) -> bool {
        if self.kind == DestinationErrorKind::Throttled {
            return true;
        }
        self.status
            .is_some_and(|status| rate_limit_status_codes.contains(&status))
    }

    pub fn is_auth(&self) -> bool {
        self.kind == DestinationErrorKind::Auth
    }
}

/// Fatal, run-aborting sync failures
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("destination authentication failed: {0}")]
    Auth(String),

    #[error("failed to enumerate destination objects: {0}")]
    Enumeration(#[source] DestinationError),

    #[error("invalid sync configuration: {0}")]
    Config(String),

    #[error("certificate lookup failed: {0}")]
    CertificateLookup(#[source] anyhow::Error),

    #[error("sync record store error: {0}")]
    Store(#[from] StoreError),
}
