//! Error types for CID lookups.
//!
//! [`CidError`] is what callers of [`CidService`](crate::CidService) see.
//! [`CacheError`] never escapes the service: cache failures are logged and
//! treated as misses.

use thiserror::Error;

/// Result type alias for CID operations.
pub type CidResult<T> = Result<T, CidError>;

/// Errors surfaced by the upstream client and the lookup service.
#[derive(Debug, Clone, Error)]
pub enum CidError {
    /// Client credentials or endpoint URLs are missing.
    ///
    /// Stays fatal for the process until the configuration is fixed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The token endpoint answered but the body lacks a token or a numeric expiry.
    #[error("Invalid token response: {0}")]
    AuthResponse(String),

    /// Token issuance failed at the transport or HTTP level.
    #[error("Upstream authentication failed{}: {message}", fmt_status(.status))]
    UpstreamAuth {
        /// HTTP status returned by the token endpoint, if any.
        status: Option<u16>,
        /// Description of the failure.
        message: String,
    },

    /// The classification search call failed.
    #[error("Upstream search failed{}: {message}", fmt_status(.status))]
    Upstream {
        /// HTTP status returned by the search endpoint, if any.
        status: Option<u16>,
        /// Description of the failure.
        message: String,
    },

    /// The upstream call failed and the cache could not be consulted either.
    #[error("No cache available after upstream failure: {0}")]
    NoCacheAvailable(String),

    /// The caller passed an empty term or code.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl CidError {
    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a new `AuthResponse` error.
    #[must_use]
    pub fn auth_response(message: impl Into<String>) -> Self {
        Self::AuthResponse(message.into())
    }

    /// Creates a new `UpstreamAuth` error.
    #[must_use]
    pub fn upstream_auth(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::UpstreamAuth {
            status,
            message: message.into(),
        }
    }

    /// Creates a new `Upstream` error.
    #[must_use]
    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Creates a new `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// HTTP status reported by the upstream service, when there was one.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::UpstreamAuth { status, .. } | Self::Upstream { status, .. } => *status,
            _ => None,
        }
    }

    /// Returns true if a retry of the same call could succeed.
    ///
    /// Only rate limiting (429) and server-side failures (5xx) qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self.upstream_status(), Some(s) if s == 429 || s >= 500)
    }
}

/// Errors raised by a [`CacheStore`](crate::cache::CacheStore) backend.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend could not be reached.
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// A cached value could not be encoded or decoded.
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CidError::upstream(Some(503), "service unavailable");
        assert_eq!(
            err.to_string(),
            "Upstream search failed (HTTP 503): service unavailable"
        );

        let err = CidError::upstream_auth(None, "connection refused");
        assert_eq!(
            err.to_string(),
            "Upstream authentication failed: connection refused"
        );

        let err = CidError::configuration("OMS_CLIENT_ID is not set");
        assert_eq!(err.to_string(), "Configuration error: OMS_CLIENT_ID is not set");
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(CidError::upstream(Some(429), "rate limited").is_retryable());
        assert!(CidError::upstream(Some(500), "boom").is_retryable());
        assert!(CidError::upstream(Some(504), "timeout").is_retryable());
        assert!(!CidError::upstream(Some(404), "missing").is_retryable());
        assert!(!CidError::upstream(None, "dns failure").is_retryable());
        assert!(!CidError::configuration("missing").is_retryable());
    }
}
