//! Read-only backend contracts consumed by the session core.
//!
//! Each store answers one kind of question keyed by an identifier. A missing
//! row is [`StoreError::NotFound`], which callers generally map to `None`
//! (see [`found`]); anything else is a transport failure.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use veritas_core::{CompanyId, ServiceProviderId, UserId};

use crate::{AccessToken, Branding, Profile, Role};

/// Backend lookup error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No row exists for the key. Valid state for unprovisioned users.
    #[error("record not found")]
    NotFound,
    /// Network or backend failure.
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),
}

impl StoreError {
    pub fn transport(err: impl Into<anyhow::Error>) -> Self {
        Self::Transport(err.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

/// Fold `NotFound` into `Ok(None)`, keeping transport failures as errors.
pub fn found<T>(result: Result<T, StoreError>) -> Result<Option<T>, StoreError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(StoreError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Billing state of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Trial,
    Active,
    PastDue,
    Canceled,
    #[serde(other)]
    Other,
}

/// Subscription record for a company or service provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    pub status: PlanStatus,
    #[serde(default)]
    pub trial_ends_at: Option<DateTime<Utc>>,
}

impl SubscriptionStatus {
    pub fn trial(ends_at: Option<DateTime<Utc>>) -> Self {
        Self {
            status: PlanStatus::Trial,
            trial_ends_at: ends_at,
        }
    }

    pub fn active() -> Self {
        Self {
            status: PlanStatus::Active,
            trial_ends_at: None,
        }
    }
}

/// Who owns a subscription.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionOwner {
    Company(CompanyId),
    ServiceProvider(ServiceProviderId),
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn get_role(&self, user_id: UserId) -> Result<Role, StoreError>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, user_id: UserId) -> Result<Profile, StoreError>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get_status(&self, owner: SubscriptionOwner) -> Result<SubscriptionStatus, StoreError>;
}

#[async_trait]
pub trait BrandingStore: Send + Sync {
    async fn branding_by_slug(&self, slug: &str) -> Result<Branding, StoreError>;

    async fn branding_for_provider(
        &self,
        provider_id: ServiceProviderId,
    ) -> Result<Branding, StoreError>;

    /// Provider that operates the channels of a company, if one is assigned.
    async fn assigned_provider_for_company(
        &self,
        company_id: CompanyId,
    ) -> Result<ServiceProviderId, StoreError>;
}

/// Backend that authorizes lookups with the user's access token.
///
/// Told about every token change before the lookups for it start. `None`
/// means signed out: fall back to anonymous access.
pub trait TokenSink: Send + Sync {
    fn token_changed(&self, token: Option<&AccessToken>);
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory backend
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Tables {
    roles: HashMap<UserId, Role>,
    profiles: HashMap<UserId, Profile>,
    subscriptions: HashMap<SubscriptionOwner, SubscriptionStatus>,
    brandings: HashMap<ServiceProviderId, Branding>,
    company_providers: HashMap<CompanyId, ServiceProviderId>,
}

/// In-memory implementation of every store, for tests/dev.
///
/// `set_unreachable(true)` makes every lookup fail with a transport error,
/// which is how tests simulate a backend outage.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    tables: RwLock<Tables>,
    unreachable: RwLock<bool>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn set_role(&self, user_id: UserId, role: Role) {
        if let Ok(mut t) = self.tables.write() {
            t.roles.insert(user_id, role);
        }
    }

    pub fn put_profile(&self, profile: Profile) {
        if let Ok(mut t) = self.tables.write() {
            t.profiles.insert(profile.user_id, profile);
        }
    }

    pub fn set_subscription(&self, owner: SubscriptionOwner, status: SubscriptionStatus) {
        if let Ok(mut t) = self.tables.write() {
            t.subscriptions.insert(owner, status);
        }
    }

    pub fn put_branding(&self, branding: Branding) {
        if let Ok(mut t) = self.tables.write() {
            t.brandings.insert(branding.provider_id, branding);
        }
    }

    pub fn assign_provider(&self, company_id: CompanyId, provider_id: ServiceProviderId) {
        if let Ok(mut t) = self.tables.write() {
            t.company_providers.insert(company_id, provider_id);
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        if let Ok(mut flag) = self.unreachable.write() {
            *flag = unreachable;
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> Option<T>) -> Result<T, StoreError> {
        if self.unreachable.read().map(|f| *f).unwrap_or(false) {
            return Err(StoreError::transport(anyhow::anyhow!("backend unreachable")));
        }
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::transport(anyhow::anyhow!("directory lock poisoned")))?;
        f(&tables).ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl RoleStore for InMemoryDirectory {
    async fn get_role(&self, user_id: UserId) -> Result<Role, StoreError> {
        self.read(|t| t.roles.get(&user_id).copied())
    }
}

#[async_trait]
impl ProfileStore for InMemoryDirectory {
    async fn get_profile(&self, user_id: UserId) -> Result<Profile, StoreError> {
        self.read(|t| t.profiles.get(&user_id).cloned())
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryDirectory {
    async fn get_status(&self, owner: SubscriptionOwner) -> Result<SubscriptionStatus, StoreError> {
        self.read(|t| t.subscriptions.get(&owner).cloned())
    }
}

#[async_trait]
impl BrandingStore for InMemoryDirectory {
    async fn branding_by_slug(&self, slug: &str) -> Result<Branding, StoreError> {
        self.read(|t| t.brandings.values().find(|b| b.slug == slug).cloned())
    }

    async fn branding_for_provider(
        &self,
        provider_id: ServiceProviderId,
    ) -> Result<Branding, StoreError> {
        self.read(|t| t.brandings.get(&provider_id).cloned())
    }

    async fn assigned_provider_for_company(
        &self,
        company_id: CompanyId,
    ) -> Result<ServiceProviderId, StoreError> {
        self.read(|t| t.company_providers.get(&company_id).copied())
    }
}
