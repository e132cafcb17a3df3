//! Source client errors.

use std::time::Duration;

use cart_insights_core::Resource;
use thiserror::Error;

/// Errors that can occur when fetching pages from the source catalog.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network failure, timeout, 5xx or rate limit. Retried locally.
    #[error("transient error fetching {resource}: {message}")]
    Transient {
        resource: Resource,
        status: Option<u16>,
        message: String,
        /// Server-provided wait hint (`Retry-After`).
        retry_after: Option<Duration>,
    },

    /// Client error or malformed response. Aborts the run.
    #[error("fatal error fetching {resource}: {message}")]
    Fatal {
        resource: Resource,
        status: Option<u16>,
        message: String,
    },

    /// A transient failure persisted past the attempt ceiling.
    #[error("giving up on {resource} after {attempts} attempts: {last}")]
    RetriesExhausted {
        resource: Resource,
        attempts: u32,
        last: Box<FetchError>,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The configured base URL cannot address the resource.
    #[error("invalid source URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Whether the failure should be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// HTTP status of the failing response, if there was one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Fatal { status, .. } => *status,
            Self::RetriesExhausted { last, .. } => last.status(),
            Self::Client(_) | Self::InvalidUrl(_) => None,
        }
    }

    pub(crate) const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Classify a transport-level `reqwest` error.
    pub(crate) fn from_transport(resource: Resource, err: &reqwest::Error) -> Self {
        if err.is_decode() || err.is_builder() {
            return Self::Fatal {
                resource,
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            };
        }
        Self::Transient {
            resource,
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
            retry_after: None,
        }
    }
}
