//! Identity event source abstraction.
//!
//! The provider pushes events to every live subscription (broadcast
//! semantics). Delivery order per subscription follows publication order, but
//! nothing is promised about when the provider chooses to publish: a replayed
//! session may arrive before, during or after the initial session fetch.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use veritas_auth::Session;

use crate::IdentityEvent;

/// Failure of a credential operation at the identity provider.
///
/// The message is meant to be shown to the user as-is.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthProviderError {
    #[error("could not reach the identity provider: {0}")]
    Unavailable(String),

    #[error("the identity provider rejected the request: {0}")]
    Rejected(String),
}

/// A subscription to identity events.
///
/// Dropping the subscription (or calling [`Subscription::unsubscribe`])
/// detaches it; the provider prunes closed subscriptions on the next publish.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: mpsc::UnboundedReceiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: mpsc::UnboundedReceiver<M>) -> Self {
        Self { receiver }
    }

    /// Wait for the next event. `None` once the provider is gone.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.receiver.close();
    }
}

/// Contract of the external identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// One-shot fetch of the session persisted from a previous visit.
    async fn current_session(&self) -> Result<Option<Session>, AuthProviderError>;

    /// Subscribe to lifecycle events from now on.
    fn subscribe(&self) -> Subscription<IdentityEvent>;

    /// End the session at the provider.
    async fn sign_out(&self) -> Result<(), AuthProviderError>;
}
