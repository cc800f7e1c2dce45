//! Error types for the downstream content backend.
//!
//! [`BackendError`] covers the failures a content/media creation service can
//! report. Generators translate them into the job-level taxonomy.

use thiserror::Error;

/// Errors returned by a [`ContentBackend`](super::ContentBackend).
#[derive(Debug, Error)]
pub enum BackendError {
    /// An artifact with the same natural key already exists (HTTP 409).
    #[error("artifact for node {node_id} already exists")]
    Conflict { node_id: String },

    /// The service refused the payload (4xx other than 409/429).
    #[error("rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The service returned HTTP 429.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// The service answered 5xx or is otherwise not reachable.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The configured base URL cannot carry artifact paths.
    #[error("invalid content service URL: {0}")]
    InvalidUrl(String),

    /// Underlying transport failure (DNS, refused connection, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display() {
        let err = BackendError::RateLimited {
            retry_after_ms: 5000,
        };
        assert_eq!(err.to_string(), "rate limited, retry after 5000ms");
    }

    #[test]
    fn rejected_display() {
        let err = BackendError::Rejected {
            status: 422,
            message: "title required".into(),
        };
        assert_eq!(err.to_string(), "rejected (status 422): title required");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BackendError>();
    }
}
