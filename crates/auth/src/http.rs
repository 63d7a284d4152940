//! REST-backed stores (PostgREST-style API).
//!
//! Rows are fetched with `GET {base}/rest/v1/{table}?{column}=eq.{value}`,
//! which answers with a JSON array. An empty array is a missing row.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use veritas_core::{CompanyId, ServiceProviderId, UserId};

use crate::store::{
    BrandingStore, PlanStatus, ProfileStore, RoleStore, StoreError, SubscriptionOwner,
    SubscriptionStatus, SubscriptionStore, TokenSink,
};
use crate::{AccessToken, Branding, Profile, Role};

/// Client for the backend's REST interface.
pub struct RestBackend {
    base_url: String,
    api_key: String,
    access_token: RwLock<Option<String>>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RoleRow {
    role: String,
}

#[derive(Debug, Deserialize)]
struct SubscriptionRow {
    subscription_status: Option<PlanStatus>,
    trial_ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CompanyProviderRow {
    service_provider_id: Option<ServiceProviderId>,
}

impl RestBackend {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            access_token: RwLock::new(None),
            client: reqwest::Client::new(),
        }
    }

    /// Build from `VERITAS_BACKEND_URL` / `VERITAS_BACKEND_KEY`.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("VERITAS_BACKEND_URL").ok()?;
        let api_key = std::env::var("VERITAS_BACKEND_KEY").unwrap_or_else(|_| {
            tracing::warn!("VERITAS_BACKEND_KEY not set; requests will be anonymous");
            String::new()
        });
        Some(Self::new(base_url, api_key))
    }

    /// Use the user's access token for row-level security instead of the
    /// anonymous key. `None` goes back to the anonymous key.
    ///
    /// Wired as a [`TokenSink`], the session reconciler keeps this current.
    pub fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut current) = self.access_token.write() {
            *current = token;
        }
    }

    async fn fetch_one<T: DeserializeOwned>(
        &self,
        table: &str,
        select: &str,
        column: &str,
        value: &str,
    ) -> Result<T, StoreError> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let filter = format!("eq.{value}");

        let mut req = self
            .client
            .get(&url)
            .query(&[("select", select), (column, filter.as_str()), ("limit", "1")])
            .header("apikey", &self.api_key);

        let bearer = self
            .access_token
            .read()
            .ok()
            .and_then(|t| t.clone())
            .unwrap_or_else(|| self.api_key.clone());
        if !bearer.is_empty() {
            req = req.bearer_auth(bearer);
        }

        let resp = req.send().await.map_err(StoreError::transport)?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::transport(anyhow::anyhow!(
                "{table} lookup failed ({status}): {body}"
            )));
        }

        let rows: Vec<T> = resp.json().await.map_err(StoreError::transport)?;
        rows.into_iter().next().ok_or(StoreError::NotFound)
    }
}

impl core::fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RestBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl TokenSink for RestBackend {
    fn token_changed(&self, token: Option<&AccessToken>) {
        self.set_access_token(token.map(|t| t.as_str().to_string()));
    }
}

#[async_trait]
impl RoleStore for RestBackend {
    async fn get_role(&self, user_id: UserId) -> Result<Role, StoreError> {
        let row: RoleRow = self
            .fetch_one("user_roles", "role", "user_id", &user_id.to_string())
            .await?;
        row.role.parse().map_err(StoreError::transport)
    }
}

#[async_trait]
impl ProfileStore for RestBackend {
    async fn get_profile(&self, user_id: UserId) -> Result<Profile, StoreError> {
        #[derive(Deserialize)]
        struct ProfileRow {
            id: UserId,
            full_name: Option<String>,
            company_id: Option<CompanyId>,
            service_provider_id: Option<ServiceProviderId>,
            #[serde(default)]
            must_change_password: bool,
        }

        let row: ProfileRow = self
            .fetch_one(
                "profiles",
                "id,full_name,company_id,service_provider_id,must_change_password",
                "id",
                &user_id.to_string(),
            )
            .await?;

        Ok(Profile {
            user_id: row.id,
            display_name: row.full_name.unwrap_or_default(),
            company_id: row.company_id,
            service_provider_id: row.service_provider_id,
            must_change_password: row.must_change_password,
        })
    }
}

#[async_trait]
impl SubscriptionStore for RestBackend {
    async fn get_status(&self, owner: SubscriptionOwner) -> Result<SubscriptionStatus, StoreError> {
        let (table, id) = match owner {
            SubscriptionOwner::Company(id) => ("companies", id.to_string()),
            SubscriptionOwner::ServiceProvider(id) => ("service_providers", id.to_string()),
        };
        let row: SubscriptionRow = self
            .fetch_one(table, "subscription_status,trial_ends_at", "id", &id)
            .await?;

        Ok(SubscriptionStatus {
            status: row.subscription_status.ok_or(StoreError::NotFound)?,
            trial_ends_at: row.trial_ends_at,
        })
    }
}

#[async_trait]
impl BrandingStore for RestBackend {
    async fn branding_by_slug(&self, slug: &str) -> Result<Branding, StoreError> {
        self.fetch_one(
            "service_providers",
            "provider_id:id,slug,name,logo_url,primary_color",
            "slug",
            slug,
        )
        .await
    }

    async fn branding_for_provider(
        &self,
        provider_id: ServiceProviderId,
    ) -> Result<Branding, StoreError> {
        self.fetch_one(
            "service_providers",
            "provider_id:id,slug,name,logo_url,primary_color",
            "id",
            &provider_id.to_string(),
        )
        .await
    }

    async fn assigned_provider_for_company(
        &self,
        company_id: CompanyId,
    ) -> Result<ServiceProviderId, StoreError> {
        let row: CompanyProviderRow = self
            .fetch_one("companies", "service_provider_id", "id", &company_id.to_string())
            .await?;
        row.service_provider_id.ok_or(StoreError::NotFound)
    }
}
