//! Opaque session credentials issued by the identity provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::User;

/// Access token string.
///
/// Never parsed or validated on the client; it only serves as the identity of
/// a session for change detection.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens are credentials; keep them out of logs.
impl core::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "AccessToken(..{})", self.0.len())
    }
}

/// Authenticated session bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: AccessToken,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub user: User,
}

impl Session {
    pub fn new(access_token: impl Into<String>, user: User) -> Self {
        Self {
            access_token: AccessToken::new(access_token),
            expires_at: None,
            user,
        }
    }

    /// Two sessions are the same credential iff their access tokens match.
    pub fn same_identity(&self, other: &Session) -> bool {
        self.access_token == other.access_token
    }
}
