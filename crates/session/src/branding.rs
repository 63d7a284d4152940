//! Tenant branding.
//!
//! Branding follows the URL first and the signed-in user second. It is
//! recomputed from scratch on every route or identity change; a run that was
//! overtaken by a newer one never publishes.

use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use veritas_auth::{Branding, BrandingStore, Role, StoreError};

use crate::generation::{Generation, GenerationCounter};
use crate::state::SessionSnapshot;

#[derive(Debug)]
struct Runs {
    generations: GenerationCounter,
    alive: bool,
}

struct Inner {
    store: Arc<dyn BrandingStore>,
    prefix: String,
    runs: Mutex<Runs>,
    current: watch::Sender<Option<Branding>>,
    shutdown: Notify,
}

#[derive(Clone)]
pub struct BrandingResolver {
    inner: Arc<Inner>,
}

impl BrandingResolver {
    /// `prefix` is the path segment that introduces a provider slug
    /// (`channel` for `/channel/{slug}`).
    pub fn new(store: Arc<dyn BrandingStore>, prefix: impl Into<String>) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                store,
                prefix: prefix.into().trim_matches('/').to_string(),
                runs: Mutex::new(Runs {
                    generations: GenerationCounter::new(),
                    alive: true,
                }),
                current,
                shutdown: Notify::new(),
            }),
        }
    }

    pub fn current(&self) -> Option<Branding> {
        self.inner.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Branding>> {
        self.inner.current.subscribe()
    }

    /// Recompute branding for `path` and the given session.
    pub async fn refresh(&self, path: &str, session: &SessionSnapshot) {
        let Some(generation) = self.begin() else {
            return;
        };

        let branding = self.resolve(path, session).await;
        self.commit(generation, branding);
    }

    /// Re-run on every change of either channel until shutdown or until one
    /// of the senders is dropped. Meant to be driven by a single task.
    pub fn follow(
        &self,
        mut sessions: watch::Receiver<SessionSnapshot>,
        mut paths: watch::Receiver<String>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            tracing::debug!("branding follower started");
            loop {
                let path = paths.borrow_and_update().clone();
                let session = sessions.borrow_and_update().clone();
                let run = this.clone();
                tokio::spawn(async move { run.refresh(&path, &session).await });

                tokio::select! {
                    _ = this.inner.shutdown.notified() => break,
                    changed = sessions.changed() => if changed.is_err() { break },
                    changed = paths.changed() => if changed.is_err() { break },
                }
            }
            tracing::debug!("branding follower stopped");
        })
    }

    /// Stop following and drop every in-flight run.
    pub fn shutdown(&self) {
        if let Ok(mut runs) = self.inner.runs.lock() {
            runs.alive = false;
        }
        self.inner.shutdown.notify_one();
    }

    fn begin(&self) -> Option<Generation> {
        let mut runs = self.inner.runs.lock().ok()?;
        if !runs.alive {
            return None;
        }
        Some(runs.generations.begin())
    }

    fn commit(&self, generation: Generation, branding: Option<Branding>) {
        let Ok(runs) = self.inner.runs.lock() else {
            return;
        };
        if !runs.alive || !runs.generations.is_current(generation) {
            tracing::debug!(%generation, latest = %runs.generations.latest(), "discarding superseded branding");
            return;
        }

        self.inner.current.send_if_modified(|current| {
            if *current == branding {
                false
            } else {
                tracing::debug!(provider = ?branding.as_ref().map(|b| &b.slug), "branding changed");
                *current = branding;
                true
            }
        });
    }

    async fn resolve(&self, path: &str, session: &SessionSnapshot) -> Option<Branding> {
        let store = &self.inner.store;

        if let Some(slug) = slug_from_path(path, &self.inner.prefix) {
            if let Some(branding) = displayable(store.branding_by_slug(slug).await, "slug") {
                return Some(branding);
            }
        }

        let profile = session.profile.as_ref()?;
        match session.role? {
            Role::ServiceProvider => {
                let provider_id = profile.service_provider_id?;
                displayable(store.branding_for_provider(provider_id).await, "own provider")
            }
            Role::Company => {
                let company_id = profile.company_id?;
                let provider_id = match store.assigned_provider_for_company(company_id).await {
                    Ok(id) => id,
                    Err(e) => {
                        note_miss(&e, "company assignment");
                        return None;
                    }
                };
                displayable(store.branding_for_provider(provider_id).await, "company provider")
            }
            _ => None,
        }
    }
}

impl core::fmt::Debug for BrandingResolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BrandingResolver")
            .field("prefix", &self.inner.prefix)
            .finish_non_exhaustive()
    }
}

fn displayable(result: Result<Branding, StoreError>, source: &'static str) -> Option<Branding> {
    match result {
        Ok(branding) if branding.is_displayable() => Some(branding),
        Ok(branding) => {
            tracing::debug!(source, slug = %branding.slug, "branding has no logo; skipped");
            None
        }
        Err(e) => {
            note_miss(&e, source);
            None
        }
    }
}

fn note_miss(e: &StoreError, source: &'static str) {
    if e.is_not_found() {
        tracing::debug!(source, "no branding record");
    } else {
        tracing::warn!(source, error = %e, "branding lookup failed");
    }
}

/// Slug following `prefix` in `path`, e.g. `acme` in `/channel/acme/offers`.
pub fn slug_from_path<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let mut segments = path[..end].split('/').filter(|s| !s.is_empty());
    segments.find(|s| *s == prefix)?;
    segments.next()
}
