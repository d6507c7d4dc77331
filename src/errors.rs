//! Error types for the login-risk engine.

use thiserror::Error;

/// Result type alias for the login-risk engine.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Main error type for the login-risk engine.
///
/// Every variant here is an *infrastructure* fault, not a security verdict.
/// Denials, challenges, and 2FA gates are expressed through
/// [`LoginDecision`](crate::orchestrator::LoginDecision); an `EngineError`
/// that escapes the pipeline is converted into the fail-open fallback
/// decision instead of being surfaced to the end user as a login failure.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Storage backend failure (unavailable, query error, write conflict).
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// A storage call exceeded its request-scoped deadline.
    #[error("Storage operation '{operation}' timed out")]
    Timeout { operation: String },

    /// Caller-supplied input could not be interpreted.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// A persisted rule is malformed beyond what lenient matching tolerates.
    #[error("Rule '{rule_id}' is malformed: {message}")]
    MalformedRule { rule_id: String, message: String },

    /// JSON (de)serialization failure at the storage boundary.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Create a storage error from any displayable cause.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a timeout error for the named storage operation.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }
}
