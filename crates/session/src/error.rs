use thiserror::Error;

use veritas_events::AuthProviderError;

/// Errors surfaced to callers of the session handle.
///
/// Backend lookups never show up here: they degrade the affected field and
/// are only logged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("sign-out failed: {0}")]
    AuthProvider(#[from] AuthProviderError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid session configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid session configuration: {0}")]
    Invalid(String),
}
