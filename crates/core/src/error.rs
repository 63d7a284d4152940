//! Domain error model.

use thiserror::Error;

/// Domain-level error.
///
/// Only value parsing failures live here. Backend and identity-provider
/// failures have their own error types in the crates that talk to them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A role tag that the client does not know about.
    #[error("unknown role: {0}")]
    UnknownRole(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn unknown_role(tag: impl Into<String>) -> Self {
        Self::UnknownRole(tag.into())
    }
}
