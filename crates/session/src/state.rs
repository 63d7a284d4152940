//! Synchronous reconciliation state machine.
//!
//! All the ordering rules live here, free of IO: the async
//! [`SessionReconciler`](crate::SessionReconciler) only fetches data and feeds
//! the outcome back in. Each method runs to completion under one lock, so a
//! consumer never observes a half-applied snapshot.

use chrono::{DateTime, Utc};
use serde::Serialize;

use veritas_auth::{Profile, Role, Session, StoreError, TrialState, User};
use veritas_core::UserId;
use veritas_events::{IdentityEvent, IdentityEventKind};

use crate::generation::{Generation, GenerationCounter};
use crate::navigation::{route_for, Route};

/// Lifecycle of the reconciler.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Nothing has been loaded yet.
    Uninitialized,
    /// The initial session fetch is in flight.
    Initializing,
    /// The initial load completed; later events revalidate in place.
    Ready,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ReconciliationFlags {
    pub has_initialized: bool,
    pub has_redirected_this_session: bool,
}

/// What consumers see. Always written as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub session: Option<Session>,
    pub profile: Option<Profile>,
    pub role: Option<Role>,
    pub is_loading: bool,
    pub is_trial_expired: bool,
    pub trial_ends_at: Option<DateTime<Utc>>,
    /// Bumped each time the session or user identity is actually replaced.
    pub identity_revision: u64,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            user: None,
            session: None,
            profile: None,
            role: None,
            is_loading: true,
            is_trial_expired: false,
            trial_ends_at: None,
            identity_revision: 0,
        }
    }
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// Outcome of resolving role, profile and trial for one user.
#[derive(Debug)]
pub struct Resolved {
    pub role: Result<Option<Role>, StoreError>,
    pub profile: Result<Option<Profile>, StoreError>,
    pub trial: Result<TrialState, StoreError>,
}

impl Resolved {
    /// Every field failed (e.g. the resolution timed out).
    pub fn unavailable(reason: &str) -> Self {
        let err = || StoreError::transport(anyhow::anyhow!("{reason}"));
        Self {
            role: Err(err()),
            profile: Err(err()),
            trial: Err(err()),
        }
    }
}

/// Answer to "may this superseded login navigate now?".
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RedirectCheck {
    /// A newer write is still in flight; ask again once it lands.
    Waiting,
    /// Decided. `None` when the login no longer navigates.
    Settled(Option<Route>),
}

/// A write requested by an identity event, waiting for its resolution.
#[derive(Debug)]
pub struct PendingWrite {
    pub generation: Generation,
    pub kind: IdentityEventKind,
    pub session: Session,
}

#[derive(Debug)]
pub struct ReconcilerState {
    phase: Phase,
    redirected: bool,
    /// User whose explicit login may still navigate once its data lands.
    redirect_armed: Option<UserId>,
    generations: GenerationCounter,
    last_applied: Option<Generation>,
    /// The initial load finished stale; clear `is_loading` on the next write.
    release_loading_on_write: bool,
    alive: bool,
    snapshot: SessionSnapshot,
}

impl Default for ReconcilerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconcilerState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Uninitialized,
            redirected: false,
            redirect_armed: None,
            generations: GenerationCounter::new(),
            last_applied: None,
            release_loading_on_write: false,
            alive: true,
            snapshot: SessionSnapshot::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn flags(&self) -> ReconciliationFlags {
        ReconciliationFlags {
            has_initialized: self.phase == Phase::Ready,
            has_redirected_this_session: self.redirected,
        }
    }

    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn latest_generation(&self) -> Generation {
        self.generations.latest()
    }

    pub fn last_applied(&self) -> Option<Generation> {
        self.last_applied
    }

    /// Stop accepting writes. In-flight resolutions finish and are dropped.
    pub fn shutdown(&mut self) {
        self.alive = false;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Initial load
    // ─────────────────────────────────────────────────────────────────────

    /// Start the one-shot initial load. `None` if it already ran.
    pub fn begin_initial_load(&mut self) -> Option<Generation> {
        if !self.alive || self.phase != Phase::Uninitialized {
            return None;
        }
        self.phase = Phase::Initializing;
        Some(self.generations.begin())
    }

    /// Land the initial load. Always marks the reconciler initialized; the
    /// snapshot itself is only written if nothing newer has started.
    pub fn finish_initial_load(
        &mut self,
        generation: Generation,
        session: Option<Session>,
        resolved: Option<Resolved>,
    ) {
        if !self.alive {
            tracing::debug!(%generation, "initial load finished after shutdown; dropped");
            return;
        }

        if self.generations.is_current(generation) {
            self.write(generation, session, resolved);
            self.snapshot.is_loading = false;
        } else if self.last_applied == Some(self.generations.latest()) {
            tracing::debug!(%generation, latest = %self.generations.latest(), "initial load superseded by an applied write");
            self.snapshot.is_loading = false;
        } else {
            tracing::debug!(%generation, latest = %self.generations.latest(), "initial load superseded; loading ends with the newer write");
            self.release_loading_on_write = true;
        }

        self.phase = Phase::Ready;
        tracing::info!(
            authenticated = self.snapshot.is_authenticated(),
            loading = self.snapshot.is_loading,
            "session initialized"
        );
    }

    // ─────────────────────────────────────────────────────────────────────
    // Identity events
    // ─────────────────────────────────────────────────────────────────────

    /// Take an event off the stream. Sign-out is applied immediately; the
    /// other kinds return the write to perform once data is resolved.
    pub fn begin_event(&mut self, event: IdentityEvent) -> Option<PendingWrite> {
        if !self.alive {
            return None;
        }

        let kind = event.kind;
        if kind == IdentityEventKind::SignedOut {
            self.clear_session();
            return None;
        }

        let Some(session) = event.session else {
            tracing::debug!(%kind, "identity event without a session ignored");
            return None;
        };

        let generation = self.generations.begin();

        if kind == IdentityEventKind::SignedIn {
            // Providers replay the stored session as a sign-in right after a
            // reload. Before the initial load lands that is all it can be.
            if self.phase == Phase::Ready {
                self.redirect_armed = Some(session.user.id);
            } else {
                tracing::debug!(%generation, "sign-in before initial load finished; treated as replay");
            }
        }

        Some(PendingWrite {
            generation,
            kind,
            session,
        })
    }

    /// Land an event's resolution. Returns where to navigate, if anywhere.
    ///
    /// Only a sign-in's own completion may navigate. A superseded sign-in
    /// keeps its redirect armed; see [`settle_redirect`](Self::settle_redirect).
    pub fn finish_event(
        &mut self,
        pending: PendingWrite,
        resolved: Resolved,
        on_login_page: bool,
    ) -> Option<Route> {
        if !self.accepts(pending.generation) {
            tracing::debug!(
                generation = %pending.generation,
                latest = %self.generations.latest(),
                kind = %pending.kind,
                "discarding superseded resolution"
            );
            return None;
        }

        let user_id = pending.session.user.id;
        self.write(pending.generation, Some(pending.session), Some(resolved));
        if pending.kind == IdentityEventKind::SignedIn {
            self.take_redirect(user_id, on_login_page)
        } else {
            None
        }
    }

    /// Decide the redirect of a sign-in whose resolution was superseded, once
    /// the newest write has landed for the same user.
    pub fn settle_redirect(&mut self, user_id: UserId, on_login_page: bool) -> RedirectCheck {
        if !self.alive || self.redirect_armed != Some(user_id) {
            return RedirectCheck::Settled(None);
        }
        if self.last_applied != Some(self.generations.latest()) {
            return RedirectCheck::Waiting;
        }
        if self.snapshot.user.as_ref().map(|u| u.id) != Some(user_id) {
            self.redirect_armed = None;
            return RedirectCheck::Settled(None);
        }
        RedirectCheck::Settled(self.take_redirect(user_id, on_login_page))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────

    /// Start re-resolving the current user. `None` when nobody is signed in.
    pub fn begin_refresh(&mut self) -> Option<(Generation, UserId)> {
        if !self.alive {
            return None;
        }
        let user_id = self.snapshot.user.as_ref()?.id;
        Some((self.generations.begin(), user_id))
    }

    /// Land a refresh. Session, user and navigation state are left alone.
    pub fn finish_refresh(&mut self, generation: Generation, resolved: Resolved) {
        if !self.accepts(generation) {
            tracing::debug!(%generation, latest = %self.generations.latest(), "discarding superseded refresh");
            return;
        }
        self.write_resolved(resolved, true);
        self.mark_applied(generation);
    }

    /// Local half of an explicit sign-out, after the provider confirmed it.
    /// Returns `false` once shut down.
    pub fn sign_out(&mut self) -> bool {
        if !self.alive {
            return false;
        }
        self.clear_session();
        tracing::info!("signed out");
        true
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    fn accepts(&self, generation: Generation) -> bool {
        self.alive && self.generations.is_current(generation)
    }

    fn mark_applied(&mut self, generation: Generation) {
        self.last_applied = Some(generation);
        if self.release_loading_on_write {
            self.release_loading_on_write = false;
            self.snapshot.is_loading = false;
        }
    }

    fn clear_session(&mut self) {
        let generation = self.generations.begin();
        let had_identity = self.snapshot.user.is_some() || self.snapshot.session.is_some();

        self.snapshot.user = None;
        self.snapshot.session = None;
        self.clear_resolved();
        if had_identity {
            self.snapshot.identity_revision += 1;
        }

        self.redirected = false;
        self.redirect_armed = None;
        self.mark_applied(generation);
    }

    fn write(&mut self, generation: Generation, session: Option<Session>, resolved: Option<Resolved>) {
        let same_user = match (&self.snapshot.user, &session) {
            (Some(current), Some(next)) => current.id == next.user.id,
            _ => false,
        };

        let mut identity_changed = false;
        match session {
            Some(session) => {
                if !same_user {
                    self.snapshot.user = Some(session.user.clone());
                    identity_changed = true;
                }
                let same_token = self
                    .snapshot
                    .session
                    .as_ref()
                    .is_some_and(|current| current.same_identity(&session));
                if !same_token {
                    self.snapshot.session = Some(session);
                    identity_changed = true;
                }
            }
            None => {
                identity_changed = self.snapshot.user.is_some() || self.snapshot.session.is_some();
                self.snapshot.user = None;
                self.snapshot.session = None;
            }
        }

        match resolved {
            Some(resolved) => self.write_resolved(resolved, same_user),
            None => self.clear_resolved(),
        }

        if identity_changed {
            self.snapshot.identity_revision += 1;
        }
        self.mark_applied(generation);
    }

    /// Failed lookups keep the previous value for the same user and fall back
    /// to empty for a new one.
    fn write_resolved(&mut self, resolved: Resolved, keep_previous: bool) {
        self.snapshot.role = settle(resolved.role, self.snapshot.role.take(), keep_previous, "role");
        self.snapshot.profile = settle(
            resolved.profile,
            self.snapshot.profile.take(),
            keep_previous,
            "profile",
        );

        match resolved.trial {
            Ok(trial) => {
                self.snapshot.is_trial_expired = trial.is_expired;
                self.snapshot.trial_ends_at = trial.ends_at;
            }
            Err(e) => {
                tracing::warn!(field = "trial", error = %e, keep_previous, "resolution failed; degrading");
                if !keep_previous {
                    self.snapshot.is_trial_expired = false;
                    self.snapshot.trial_ends_at = None;
                }
            }
        }
    }

    fn clear_resolved(&mut self) {
        self.snapshot.profile = None;
        self.snapshot.role = None;
        self.snapshot.is_trial_expired = false;
        self.snapshot.trial_ends_at = None;
    }

    fn take_redirect(&mut self, user_id: UserId, on_login_page: bool) -> Option<Route> {
        if self.redirect_armed.take() != Some(user_id) {
            return None;
        }
        if self.redirected {
            tracing::debug!("already redirected this session");
            return None;
        }
        if !on_login_page {
            tracing::debug!("login completed away from the login page; staying put");
            return None;
        }

        let route = route_for(self.snapshot.role.as_ref(), self.snapshot.profile.as_ref())?;
        self.redirected = true;
        Some(route)
    }
}

fn settle<T>(
    fresh: Result<Option<T>, StoreError>,
    previous: Option<T>,
    keep_previous: bool,
    field: &'static str,
) -> Option<T> {
    match fresh {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(field, error = %e, keep_previous, "resolution failed; degrading");
            if keep_previous { previous } else { None }
        }
    }
}
