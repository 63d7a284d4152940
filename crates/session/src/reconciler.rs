//! Async session handle.
//!
//! Owns the event subscription and the background resolutions. Every state
//! transition goes through [`ReconcilerState`] under one mutex that is never
//! held across an `.await`; snapshots are published on a `watch` channel.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::instrument;

use veritas_auth::{
    AccessToken, ProfileRoleResolver, ProfileStore, Resolution, RoleStore, StoreError,
    SubscriptionStore, TokenSink, TrialState, TrialStatusCalculator,
};
use veritas_core::UserId;
use veritas_events::{IdentityEvent, IdentityEventKind, IdentityProvider, Subscription};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::navigation::{Navigator, Route};
use crate::generation::Generation;
use crate::state::{
    PendingWrite, Phase, ReconcilerState, ReconciliationFlags, RedirectCheck, Resolved,
    SessionSnapshot,
};

/// External systems the reconciler talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityProvider>,
    pub roles: Arc<dyn RoleStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub navigator: Arc<dyn Navigator>,
    /// Told about every access-token change, e.g. the REST backend whose
    /// lookups must run as the signed-in user.
    pub token_sink: Option<Arc<dyn TokenSink>>,
}

impl Collaborators {
    /// All three stores served by one backend.
    pub fn with_directory<D>(
        identity: Arc<dyn IdentityProvider>,
        directory: Arc<D>,
        navigator: Arc<dyn Navigator>,
    ) -> Self
    where
        D: RoleStore + ProfileStore + SubscriptionStore + 'static,
    {
        Self {
            identity,
            roles: directory.clone(),
            profiles: directory.clone(),
            subscriptions: directory,
            navigator,
            token_sink: None,
        }
    }

    pub fn with_token_sink(mut self, sink: Arc<dyn TokenSink>) -> Self {
        self.token_sink = Some(sink);
        self
    }
}

struct Shared {
    config: SessionConfig,
    identity: Arc<dyn IdentityProvider>,
    resolver: ProfileRoleResolver,
    trials: TrialStatusCalculator,
    navigator: Arc<dyn Navigator>,
    token_sink: Option<Arc<dyn TokenSink>>,
    state: Mutex<ReconcilerState>,
    snapshots: watch::Sender<SessionSnapshot>,
    /// Last applied generation and liveness; wakes superseded logins.
    applied: watch::Sender<(Option<Generation>, bool)>,
    shutdown: Notify,
}

/// Cloneable handle to one reconciled session.
#[derive(Clone)]
pub struct SessionReconciler {
    shared: Arc<Shared>,
}

impl SessionReconciler {
    pub fn new(config: SessionConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            identity,
            roles,
            profiles,
            subscriptions,
            navigator,
            token_sink,
        } = collaborators;

        let (snapshots, _) = watch::channel(SessionSnapshot::default());
        let (applied, _) = watch::channel((None, true));

        Self {
            shared: Arc::new(Shared {
                config,
                identity,
                resolver: ProfileRoleResolver::new(roles, profiles),
                trials: TrialStatusCalculator::new(subscriptions),
                navigator,
                token_sink,
                state: Mutex::new(ReconcilerState::new()),
                snapshots,
                applied,
                shutdown: Notify::new(),
            }),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshots.borrow().clone()
    }

    /// Change notifications. A notification is sent only when a field changed.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshots.subscribe()
    }

    pub fn flags(&self) -> ReconciliationFlags {
        self.lock().flags()
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase()
    }

    /// Start consuming identity events and run the initial load.
    ///
    /// The subscription is taken before this returns, so an event published
    /// right after `start` is never missed. The task ends on
    /// [`shutdown`](Self::shutdown) or when the provider closes the stream.
    pub fn start(&self) -> JoinHandle<()> {
        let events = self.shared.identity.subscribe();
        let this = self.clone();
        tokio::spawn(async move { this.run(events).await })
    }

    async fn run(self, mut events: Subscription<IdentityEvent>) {
        tracing::info!("session reconciler started");

        let init = self.clone();
        tokio::spawn(async move { init.initial_load().await });

        loop {
            tokio::select! {
                _ = self.shared.shutdown.notified() => {
                    tracing::info!("session reconciler received shutdown signal");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle_event(event);
                    }
                    None => {
                        tracing::info!("identity event stream closed");
                        break;
                    }
                }
            }
        }

        events.unsubscribe();
        tracing::info!("session reconciler stopped");
    }

    /// One-shot fetch of the persisted session. Later calls do nothing.
    pub async fn initial_load(&self) {
        let Some(generation) = self.apply(|state| state.begin_initial_load()) else {
            tracing::debug!("initial load already ran");
            return;
        };

        let (session, resolved) = match self.shared.identity.current_session().await {
            Ok(Some(session)) => {
                self.hand_over_token(Some(&session.access_token));
                let resolved = self.resolve(session.user.id).await;
                (Some(session), Some(resolved))
            }
            Ok(None) => (None, None),
            Err(e) => {
                tracing::warn!(error = %e, "could not read persisted session; starting signed out");
                (None, None)
            }
        };

        self.apply(|state| state.finish_initial_load(generation, session, resolved));
    }

    /// Feed one identity event through the state machine.
    ///
    /// Returns the task resolving the event's data, if it needs one.
    pub fn handle_event(&self, event: IdentityEvent) -> Option<JoinHandle<()>> {
        let kind = event.kind;
        tracing::debug!(%kind, "identity event received");
        let (pending, alive) = self.apply(|state| (state.begin_event(event), state.is_alive()));

        let Some(pending) = pending else {
            if alive && kind == IdentityEventKind::SignedOut {
                self.hand_over_token(None);
            }
            return None;
        };
        self.hand_over_token(Some(&pending.session.access_token));

        let this = self.clone();
        Some(tokio::spawn(async move { this.complete_event(pending).await }))
    }

    async fn complete_event(self, pending: PendingWrite) {
        let kind = pending.kind;
        let user_id = pending.session.user.id;

        let resolved = self.resolve(user_id).await;
        let on_login_page = self.on_login_page();
        let route = self.apply(|state| state.finish_event(pending, resolved, on_login_page));

        if route.is_some() {
            self.navigate(route);
        } else if kind == IdentityEventKind::SignedIn {
            self.settle_superseded_login(user_id).await;
        }
    }

    /// A login overtaken by a newer write for the same user still owns its
    /// redirect. Wait for the newest write to land, then decide.
    async fn settle_superseded_login(&self, user_id: UserId) {
        let mut applied = self.shared.applied.subscribe();
        loop {
            let on_login_page = self.on_login_page();
            match self.apply(|state| state.settle_redirect(user_id, on_login_page)) {
                RedirectCheck::Settled(route) => {
                    self.navigate(route);
                    return;
                }
                RedirectCheck::Waiting => {
                    if applied.changed().await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Re-resolve role, profile and trial for the signed-in user (e.g. after
    /// an approval or a password change). No-op when signed out.
    pub async fn refresh_role(&self) {
        let Some((generation, user_id)) = self.apply(|state| state.begin_refresh()) else {
            tracing::debug!("refresh requested without a signed-in user");
            return;
        };

        let resolved = self.resolve(user_id).await;
        self.apply(|state| state.finish_refresh(generation, resolved));
    }

    /// End the session at the provider, then clear local state and go to the
    /// login page. On provider failure nothing local changes.
    pub async fn sign_out(&self) -> Result<(), SessionError> {
        if let Err(e) = self.shared.identity.sign_out().await {
            tracing::warn!(error = %e, "sign-out rejected by identity provider");
            return Err(e.into());
        }

        if self.apply(|state| state.sign_out()) {
            self.hand_over_token(None);
            self.shared.navigator.navigate_to(&self.shared.config.routes.login);
        }
        Ok(())
    }

    /// Stop the event loop and drop every in-flight write.
    pub fn shutdown(&self) {
        self.apply(|state| state.shutdown());
        self.shared.shutdown.notify_one();
    }

    // ─────────────────────────────────────────────────────────────────────

    #[instrument(skip_all, fields(user_id = %user_id))]
    async fn resolve(&self, user_id: UserId) -> Resolved {
        let work = async {
            let Resolution { role, profile } = self.shared.resolver.resolve(user_id).await;
            let trial = match &profile {
                Ok(Some(p)) => {
                    self.shared
                        .trials
                        .calculate(p.company_id, p.service_provider_id, Utc::now())
                        .await
                }
                Ok(None) => Ok(TrialState::default()),
                Err(_) => Err(StoreError::transport(anyhow::anyhow!(
                    "profile unavailable; trial not evaluated"
                ))),
            };
            Resolved { role, profile, trial }
        };

        match self.shared.config.resolve_timeout() {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(resolved) => resolved,
                Err(_) => {
                    tracing::warn!(timeout_ms = limit.as_millis() as u64, "resolution timed out");
                    Resolved::unavailable("resolution timed out")
                }
            },
            None => work.await,
        }
    }

    fn on_login_page(&self) -> bool {
        let location = self.shared.navigator.current_path();
        self.shared.config.routes.is_login(&location)
    }

    fn navigate(&self, route: Option<Route>) {
        if let Some(route) = route {
            let path = self.shared.config.routes.path(route);
            tracing::info!(?route, path, "navigating after login");
            self.shared.navigator.navigate_to(path);
        }
    }

    fn hand_over_token(&self, token: Option<&AccessToken>) {
        if let Some(sink) = &self.shared.token_sink {
            sink.token_changed(token);
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReconcilerState> {
        // State is only mutated through complete transitions, so a poisoned
        // lock still holds a consistent value.
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run one transition and publish the resulting snapshot if it changed.
    fn apply<R>(&self, transition: impl FnOnce(&mut ReconcilerState) -> R) -> R {
        let mut state = self.lock();
        let out = transition(&mut state);
        let next = state.snapshot();
        self.shared.snapshots.send_if_modified(|current| {
            if current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
        let progress = (state.last_applied(), state.is_alive());
        self.shared.applied.send_if_modified(|current| {
            if *current == progress {
                false
            } else {
                *current = progress;
                true
            }
        });
        out
    }
}

impl core::fmt::Debug for SessionReconciler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionReconciler")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritas_auth::{AccessToken, InMemoryDirectory, Profile, Role, Session, User};
    use veritas_events::InMemoryIdentityProvider;

    use crate::navigation::MemoryNavigator;

    fn setup(start: &str) -> (SessionReconciler, Arc<InMemoryIdentityProvider>, Arc<InMemoryDirectory>, Arc<MemoryNavigator>) {
        let identity = Arc::new(InMemoryIdentityProvider::new());
        let dir = InMemoryDirectory::arc();
        let nav = Arc::new(MemoryNavigator::new(start));
        let reconciler = SessionReconciler::new(
            SessionConfig::default(),
            Collaborators::with_directory(identity.clone(), dir.clone(), nav.clone()),
        );
        (reconciler, identity, dir, nav)
    }

    fn user_session(token: &str) -> Session {
        Session::new(token, User::new(UserId::new(), "ana@example.com"))
    }

    #[tokio::test]
    async fn initial_load_without_session_ends_signed_out() {
        let (reconciler, _, _, nav) = setup("/");
        reconciler.initial_load().await;

        let snap = reconciler.snapshot();
        assert!(!snap.is_loading);
        assert!(snap.user.is_none());
        assert_eq!(reconciler.phase(), Phase::Ready);
        assert!(nav.navigations().is_empty());
    }

    #[tokio::test]
    async fn explicit_login_on_login_page_navigates() {
        let (reconciler, _, dir, nav) = setup("/login");
        reconciler.initial_load().await;

        let session = user_session("t1");
        dir.set_role(session.user.id, Role::Admin);
        dir.put_profile(Profile::new(session.user.id, "Ana"));

        let task = reconciler.handle_event(IdentityEvent::signed_in(session)).unwrap();
        task.await.unwrap();

        assert_eq!(nav.navigations(), vec!["/admin".to_string()]);
        assert!(reconciler.flags().has_redirected_this_session);
    }

    #[tokio::test]
    async fn unchanged_state_sends_no_notification() {
        let (reconciler, _, _, _) = setup("/");
        reconciler.initial_load().await;
        let mut rx = reconciler.subscribe();
        rx.borrow_and_update();

        reconciler.handle_event(IdentityEvent::signed_out());
        assert!(!rx.has_changed().unwrap());
    }

    #[derive(Default)]
    struct LastToken(Mutex<Option<Option<String>>>);

    impl TokenSink for LastToken {
        fn token_changed(&self, token: Option<&AccessToken>) {
            *self.0.lock().unwrap() = Some(token.map(|t| t.as_str().to_string()));
        }
    }

    #[tokio::test]
    async fn token_sink_follows_sign_in_and_sign_out() {
        let identity = Arc::new(InMemoryIdentityProvider::new());
        let dir = InMemoryDirectory::arc();
        let nav = Arc::new(MemoryNavigator::new("/"));
        let sink = Arc::new(LastToken::default());
        let reconciler = SessionReconciler::new(
            SessionConfig::default(),
            Collaborators::with_directory(identity.clone(), dir, nav).with_token_sink(sink.clone()),
        );
        reconciler.initial_load().await;
        assert_eq!(*sink.0.lock().unwrap(), None);

        let task = reconciler.handle_event(IdentityEvent::signed_in(user_session("t1"))).unwrap();
        assert_eq!(*sink.0.lock().unwrap(), Some(Some("t1".to_string())));
        task.await.unwrap();

        reconciler.sign_out().await.unwrap();
        assert_eq!(*sink.0.lock().unwrap(), Some(None));
    }

    #[tokio::test]
    async fn sign_out_failure_changes_nothing() {
        let (reconciler, identity, dir, nav) = setup("/company");
        let session = user_session("t1");
        dir.set_role(session.user.id, Role::Company);
        identity.set_session(Some(session));
        reconciler.initial_load().await;

        identity.fail_sign_out(Some(veritas_events::AuthProviderError::Unavailable("offline".into())));
        let err = reconciler.sign_out().await.unwrap_err();

        assert!(matches!(err, SessionError::AuthProvider(_)));
        assert!(reconciler.snapshot().user.is_some());
        assert!(nav.navigations().is_empty());
    }
}
