//! Shared fixtures for the session integration tests.
#![allow(dead_code)]

use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use veritas_auth::{
    AccessToken, InMemoryDirectory, Role, RoleStore, Session, StoreError, TokenSink, User,
};
use veritas_core::UserId;
use veritas_events::{
    AuthProviderError, IdentityEvent, IdentityProvider, InMemoryIdentityProvider, Subscription,
};
use veritas_session::{Collaborators, MemoryNavigator, SessionConfig, SessionReconciler};

/// Holds the next call at a chosen point until the test releases it.
#[derive(Default)]
pub struct Gate {
    next: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
}

pub struct Held {
    entered: Option<oneshot::Receiver<()>>,
    release: oneshot::Sender<()>,
}

impl Held {
    /// Wait until the held call has reached the gate.
    pub async fn entered(&mut self) {
        if let Some(rx) = self.entered.take() {
            tokio::time::timeout(Duration::from_secs(2), rx)
                .await
                .expect("held call never reached the gate")
                .expect("gate dropped");
        }
    }

    pub fn release(self) {
        let _ = self.release.send(());
    }
}

impl Gate {
    pub fn hold_next(&self) -> Held {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.next.lock().unwrap() = Some((entered_tx, release_rx));
        Held {
            entered: Some(entered_rx),
            release: release_tx,
        }
    }

    pub async fn pass(&self) {
        let held = self.next.lock().unwrap().take();
        if let Some((entered, release)) = held {
            let _ = entered.send(());
            let _ = release.await;
        }
    }
}

/// Identity provider whose `current_session` can be held.
#[derive(Default)]
pub struct GatedIdentity {
    inner: InMemoryIdentityProvider,
    pub gate: Gate,
}

impl Deref for GatedIdentity {
    type Target = InMemoryIdentityProvider;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[async_trait]
impl IdentityProvider for GatedIdentity {
    async fn current_session(&self) -> Result<Option<Session>, AuthProviderError> {
        let session = self.inner.current_session().await;
        self.gate.pass().await;
        session
    }

    fn subscribe(&self) -> Subscription<IdentityEvent> {
        self.inner.subscribe()
    }

    async fn sign_out(&self) -> Result<(), AuthProviderError> {
        self.inner.sign_out().await
    }
}

/// Role store that reads immediately but can hold the answer back.
pub struct GatedRoles {
    directory: Arc<InMemoryDirectory>,
    pub gate: Gate,
}

#[async_trait]
impl RoleStore for GatedRoles {
    async fn get_role(&self, user_id: UserId) -> Result<Role, StoreError> {
        let role = self.directory.get_role(user_id).await;
        self.gate.pass().await;
        role
    }
}

/// Remembers every token handed to the backend, `None` for signed out.
#[derive(Default)]
pub struct RecordedTokens {
    seen: Mutex<Vec<Option<String>>>,
}

impl RecordedTokens {
    pub fn seen(&self) -> Vec<Option<String>> {
        self.seen.lock().unwrap().clone()
    }
}

impl TokenSink for RecordedTokens {
    fn token_changed(&self, token: Option<&AccessToken>) {
        self.seen
            .lock()
            .unwrap()
            .push(token.map(|t| t.as_str().to_string()));
    }
}

pub struct Harness {
    pub identity: Arc<GatedIdentity>,
    pub directory: Arc<InMemoryDirectory>,
    pub roles: Arc<GatedRoles>,
    pub navigator: Arc<MemoryNavigator>,
    pub tokens: Arc<RecordedTokens>,
    pub reconciler: SessionReconciler,
}

impl Harness {
    pub fn new(start_path: &str) -> Self {
        Self::with_config(start_path, SessionConfig::default())
    }

    pub fn with_config(start_path: &str, config: SessionConfig) -> Self {
        veritas_observability::init_for_tests();

        let identity = Arc::new(GatedIdentity::default());
        let directory = InMemoryDirectory::arc();
        let roles = Arc::new(GatedRoles {
            directory: directory.clone(),
            gate: Gate::default(),
        });
        let navigator = Arc::new(MemoryNavigator::new(start_path));
        let tokens = Arc::new(RecordedTokens::default());

        let reconciler = SessionReconciler::new(
            config,
            Collaborators {
                identity: identity.clone(),
                roles: roles.clone(),
                profiles: directory.clone(),
                subscriptions: directory.clone(),
                navigator: navigator.clone(),
                token_sink: Some(tokens.clone()),
            },
        );

        Self {
            identity,
            directory,
            roles,
            navigator,
            tokens,
            reconciler,
        }
    }

    /// Run the initial load inline and wait for it.
    pub async fn ready(&self) {
        self.reconciler.initial_load().await;
    }

    /// Feed an event and wait for its resolution, if it has one.
    pub async fn deliver(&self, event: IdentityEvent) {
        if let Some(task) = self.reconciler.handle_event(event) {
            task.await.expect("resolution task panicked");
        }
    }
}

pub fn session_for(token: &str, user_id: UserId) -> Session {
    Session::new(token, User::new(user_id, "user@example.com"))
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
