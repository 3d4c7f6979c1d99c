//! Error type surfaced to agent code by the runtime SDK (spec §7).

use soorma_types::{ErrorBody, SoormaError};

/// Errors a handler or plan routine sees when it calls into `bus`,
/// `registry`, or `memory` through a [`crate::context::PlatformContext`].
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The HTTP transport itself failed (connection, TLS, decode).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A service responded with a structured error body from the spec §7
    /// taxonomy.
    #[error("{kind} ({status}): {message}")]
    Api { status: u16, kind: String, message: String },

    /// A response body didn't parse into the expected shape.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Misuse of the SDK that isn't a remote failure — e.g. aggregating a
    /// parallel-delegation group that was never started.
    #[error("{0}")]
    Internal(String),
}

impl RuntimeError {
    /// Whether a caller should retry this error with backoff (spec §7
    /// propagation policy).
    pub fn retryable(&self) -> bool {
        match self {
            RuntimeError::Api { status, .. } => *status == 503,
            RuntimeError::Transport(_) => true,
            _ => false,
        }
    }

    /// The HTTP status this error carried, if it originated from a
    /// service response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RuntimeError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<SoormaError> for RuntimeError {
    fn from(err: SoormaError) -> Self {
        let status = err.status_code();
        let body = ErrorBody::from(&err);
        RuntimeError::Api { status, kind: body.error, message: body.message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backbone_unavailable_is_retryable_after_conversion() {
        let err: RuntimeError = SoormaError::BackboneUnavailable("down".into()).into();
        assert!(err.retryable());
        assert_eq!(err.status_code(), Some(503));
    }

    #[test]
    fn not_found_is_not_retryable() {
        let err: RuntimeError = SoormaError::NotFound("x".into()).into();
        assert!(!err.retryable());
    }
}
