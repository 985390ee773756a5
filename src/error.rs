//! Geogate error types

use std::time::Duration;

use crate::types::Provider;

/// Geogate error types
///
/// Quota denials and exhausted fallback chains are deliberately NOT errors:
/// they are returned as typed decision values
/// ([`QuotaDecision`](crate::QuotaDecision),
/// [`FallbackOutcome`](crate::FallbackOutcome)) so callers can branch on
/// them deterministically. This enum covers genuine failures only.
#[derive(Debug, thiserror::Error)]
pub enum GeogateError {
    // Provider/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("upstream timeout for {provider} after {after:?}")]
    Timeout { provider: Provider, after: Duration },

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Configuration errors, raised at load/build time rather than per request
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no adapter registered for provider {0}")]
    NoAdapter(Provider),

    // Durable layer errors
    #[error("durable store error: {0}")]
    Store(String),
}

impl GeogateError {
    /// Whether the error is transient and worth routing through fallback
    /// handling (as opposed to a caller bug or misconfiguration).
    pub fn is_transient(&self) -> bool {
        match self {
            GeogateError::Http(_) | GeogateError::Timeout { .. } => true,
            GeogateError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for GeogateError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => GeogateError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => GeogateError::Http(err.to_string()),
        }
    }
}

/// Result type alias for Geogate operations
pub type Result<T> = std::result::Result<T, GeogateError>;
