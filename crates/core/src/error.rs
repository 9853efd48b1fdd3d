//! Errors raised by the domain building blocks.

use thiserror::Error;

/// Failure of a domain rule that is not specific to stock movements.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A field of an incoming record is unusable.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// A command targets state it does not belong to.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier could not be parsed or canonicalized.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
