//! In-memory identity provider for tests/dev.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use veritas_auth::{AccessToken, Session};

use crate::source::{AuthProviderError, IdentityProvider, Subscription};
use crate::IdentityEvent;

#[derive(Debug, Default)]
struct ProviderState {
    session: Option<Session>,
    subscribers: Vec<mpsc::UnboundedSender<IdentityEvent>>,
    sign_out_failure: Option<AuthProviderError>,
}

/// In-memory identity provider.
///
/// - Holds the "persisted" session returned by `current_session`
/// - Fans events out to every live subscription
/// - Can be told to fail `sign_out`
#[derive(Debug, Default)]
pub struct InMemoryIdentityProvider {
    state: Mutex<ProviderState>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a session persisted from an earlier visit.
    pub fn with_session(session: Session) -> Self {
        let provider = Self::new();
        provider.set_session(Some(session));
        provider
    }

    /// Replace the persisted session without announcing it.
    pub fn set_session(&self, session: Option<Session>) {
        if let Ok(mut state) = self.state.lock() {
            state.session = session;
        }
    }

    pub fn fail_sign_out(&self, error: Option<AuthProviderError>) {
        if let Ok(mut state) = self.state.lock() {
            state.sign_out_failure = error;
        }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: IdentityEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        // Drop any closed subscriptions while publishing.
        state.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        tracing::debug!(kind = %event.kind, subscribers = state.subscribers.len(), "identity event published");
    }

    /// Persist a session and announce it as a sign-in.
    pub fn sign_in(&self, session: Session) {
        self.set_session(Some(session.clone()));
        self.publish(IdentityEvent::signed_in(session));
    }

    /// Announce the persisted session again, as providers do after a reload.
    pub fn replay(&self) {
        let session = self.state.lock().ok().and_then(|s| s.session.clone());
        if let Some(session) = session {
            self.publish(IdentityEvent::signed_in(session));
        }
    }

    /// Rotate the access token of the persisted session.
    pub fn rotate_token(&self, token: impl Into<String>) -> Option<Session> {
        let rotated = {
            let mut state = self.state.lock().ok()?;
            let session = state.session.as_mut()?;
            session.access_token = AccessToken::new(token);
            session.clone()
        };
        self.publish(IdentityEvent::token_refreshed(rotated.clone()));
        Some(rotated)
    }

    pub fn subscriber_count(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.subscribers.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn current_session(&self) -> Result<Option<Session>, AuthProviderError> {
        self.state
            .lock()
            .map(|s| s.session.clone())
            .map_err(|_| AuthProviderError::Unavailable("provider state poisoned".to_string()))
    }

    fn subscribe(&self) -> Subscription<IdentityEvent> {
        let (tx, rx) = mpsc::unbounded_channel();

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive anything.
        if let Ok(mut state) = self.state.lock() {
            state.subscribers.push(tx);
        }

        Subscription::new(rx)
    }

    async fn sign_out(&self) -> Result<(), AuthProviderError> {
        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| AuthProviderError::Unavailable("provider state poisoned".to_string()))?;
            if let Some(err) = state.sign_out_failure.clone() {
                return Err(err);
            }
            state.session = None;
        }
        self.publish(IdentityEvent::signed_out());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdentityEventKind;
    use veritas_auth::User;
    use veritas_core::UserId;

    fn session(token: &str) -> Session {
        Session::new(token, User::new(UserId::new(), "ana@example.com"))
    }

    #[tokio::test]
    async fn events_fan_out_to_every_subscriber() {
        let provider = InMemoryIdentityProvider::new();
        let mut a = provider.subscribe();
        let mut b = provider.subscribe();

        provider.sign_in(session("t1"));

        assert_eq!(a.recv().await.unwrap().kind, IdentityEventKind::SignedIn);
        assert_eq!(b.recv().await.unwrap().kind, IdentityEventKind::SignedIn);
    }

    #[tokio::test]
    async fn unsubscribed_receivers_are_pruned() {
        let provider = InMemoryIdentityProvider::new();
        let sub = provider.subscribe();
        let _kept = provider.subscribe();
        assert_eq!(provider.subscriber_count(), 2);

        sub.unsubscribe();
        provider.publish(IdentityEvent::signed_out());
        assert_eq!(provider.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn rotate_token_keeps_user_and_announces_refresh() {
        let provider = InMemoryIdentityProvider::with_session(session("t1"));
        let mut sub = provider.subscribe();

        let rotated = provider.rotate_token("t2").unwrap();
        let event = sub.recv().await.unwrap();

        assert_eq!(event.kind, IdentityEventKind::TokenRefreshed);
        assert_eq!(event.session.unwrap().access_token.as_str(), "t2");
        assert_eq!(
            provider.current_session().await.unwrap().unwrap().user,
            rotated.user
        );
    }

    #[tokio::test]
    async fn failing_sign_out_keeps_the_session() {
        let provider = InMemoryIdentityProvider::with_session(session("t1"));
        provider.fail_sign_out(Some(AuthProviderError::Unavailable("offline".into())));

        assert!(provider.sign_out().await.is_err());
        assert!(provider.current_session().await.unwrap().is_some());

        provider.fail_sign_out(None);
        provider.sign_out().await.unwrap();
        assert!(provider.current_session().await.unwrap().is_none());
    }
}
