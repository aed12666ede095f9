//! Error types for the Vigil decision engine.

use crate::types::DenialCode;
use thiserror::Error;

/// Result type alias using `EngineError`.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur during engine operations.
///
/// The taxonomy mirrors how callers are expected to react:
/// `NotFound` and `Validation` are surfaced without retry,
/// `DependencyUnavailable` is retryable with backoff, `Conflict` means the
/// operation was already handled, and `PolicyDenied` carries a machine
/// reason code alongside the human-readable message.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind (user, employee, device, alert, ...).
        entity: &'static str,
        /// Identifier that failed to resolve.
        id: String,
    },

    /// Input validation failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The operation was denied by policy rather than by error.
    #[error("Denied ({code}): {message}")]
    PolicyDenied {
        /// Machine-readable denial code.
        code: DenialCode,
        /// Human-readable explanation.
        message: String,
    },

    /// An upstream store or provider could not be reached in time.
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// A concurrent writer already handled this operation.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create a not-found error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create a validation error.
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// Create a policy denial with a machine reason code.
    #[must_use]
    pub fn denied(code: DenialCode, message: impl Into<String>) -> Self {
        EngineError::PolicyDenied {
            code,
            message: message.into(),
        }
    }

    /// Create a dependency-unavailable error.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        EngineError::DependencyUnavailable(msg.into())
    }

    /// Create a conflict error.
    #[must_use]
    pub fn conflict(msg: impl Into<String>) -> Self {
        EngineError::Conflict(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        EngineError::Internal(msg.into())
    }

    /// Returns true if the caller may retry the operation with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::DependencyUnavailable(_))
    }

    /// Returns true if the operation was already handled elsewhere.
    #[must_use]
    pub fn is_already_handled(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(EngineError::unavailable("ledger timeout").is_retryable());
        assert!(!EngineError::validation("bad input").is_retryable());
        assert!(!EngineError::not_found("user", "u-1").is_retryable());
    }

    #[test]
    fn test_conflict_is_already_handled() {
        assert!(EngineError::conflict("duplicate evaluation").is_already_handled());
        assert!(!EngineError::internal("oops").is_already_handled());
    }

    #[test]
    fn test_denial_carries_code() {
        let err = EngineError::denied(DenialCode::DeviceBlocked, "device is blocked");
        let msg = err.to_string();
        assert!(msg.contains("device_blocked"), "{msg}");
        assert!(msg.contains("device is blocked"), "{msg}");
    }
}
