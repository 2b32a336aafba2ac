//! Domain error model.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Rejected input when building domain values (ids, kinds, priority tables).
///
/// Storage and scheduling failures live in the broker crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Empty or unparseable identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A proof kind name did not match any known kind.
    #[error("unknown proof kind: {0}")]
    UnknownProofKind(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
