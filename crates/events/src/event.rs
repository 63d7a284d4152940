use serde::{Deserialize, Serialize};

use veritas_auth::Session;

/// Kind of session lifecycle change announced by the identity provider.
///
/// The initial session is not an event: it is fetched once through
/// [`IdentityProvider::current_session`](crate::IdentityProvider::current_session).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    /// The user record or credentials changed (e.g. password update).
    UserUpdated,
}

impl IdentityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityEventKind::SignedIn => "signed_in",
            IdentityEventKind::SignedOut => "signed_out",
            IdentityEventKind::TokenRefreshed => "token_refreshed",
            IdentityEventKind::UserUpdated => "user_updated",
        }
    }
}

impl core::fmt::Display for IdentityEventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event together with the session it carries, if any.
///
/// A `SignedIn` event replayed by the provider after a page load looks exactly
/// like one caused by a deliberate login; consumers tell them apart by
/// ordering only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityEvent {
    pub kind: IdentityEventKind,
    pub session: Option<Session>,
}

impl IdentityEvent {
    pub fn new(kind: IdentityEventKind, session: Option<Session>) -> Self {
        Self { kind, session }
    }

    pub fn signed_in(session: Session) -> Self {
        Self::new(IdentityEventKind::SignedIn, Some(session))
    }

    pub fn signed_out() -> Self {
        Self::new(IdentityEventKind::SignedOut, None)
    }

    pub fn token_refreshed(session: Session) -> Self {
        Self::new(IdentityEventKind::TokenRefreshed, Some(session))
    }

    pub fn user_updated(session: Session) -> Self {
        Self::new(IdentityEventKind::UserUpdated, Some(session))
    }
}
