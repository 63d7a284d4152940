//! Session configuration.
//!
//! Defaults work out of the box; deployments override them from the
//! environment (`SessionConfig::from_env`) or a JSON document
//! (`SessionConfig::from_json`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::navigation::Route;

/// Path of every route the session core may navigate to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteTable {
    pub login: String,
    pub change_password: String,
    pub pending_approval: String,
    pub admin_dashboard: String,
    pub company_dashboard: String,
    pub provider_dashboard: String,
    pub partner_dashboard: String,
    pub affiliate_dashboard: String,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            login: "/login".to_string(),
            change_password: "/change-password".to_string(),
            pending_approval: "/pending-approval".to_string(),
            admin_dashboard: "/admin".to_string(),
            company_dashboard: "/company".to_string(),
            provider_dashboard: "/service-provider".to_string(),
            partner_dashboard: "/partner".to_string(),
            affiliate_dashboard: "/affiliate".to_string(),
        }
    }
}

impl RouteTable {
    pub fn path(&self, route: Route) -> &str {
        match route {
            Route::Login => &self.login,
            Route::ChangePassword => &self.change_password,
            Route::PendingApproval => &self.pending_approval,
            Route::AdminDashboard => &self.admin_dashboard,
            Route::CompanyDashboard => &self.company_dashboard,
            Route::ProviderDashboard => &self.provider_dashboard,
            Route::PartnerDashboard => &self.partner_dashboard,
            Route::AffiliateDashboard => &self.affiliate_dashboard,
        }
    }

    /// Whether `location` is the login page. Query string, fragment and a
    /// trailing slash are ignored.
    pub fn is_login(&self, location: &str) -> bool {
        normalize_path(location) == normalize_path(&self.login)
    }
}

fn normalize_path(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let trimmed = path[..end].trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub routes: RouteTable,
    /// Upper bound for one role/profile/trial resolution. `None` waits forever.
    pub resolve_timeout_ms: Option<u64>,
    /// Path segment that precedes a service-provider slug (`/{prefix}/{slug}`).
    pub branding_path_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            routes: RouteTable::default(),
            resolve_timeout_ms: None,
            branding_path_prefix: "channel".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn resolve_timeout(&self) -> Option<Duration> {
        self.resolve_timeout_ms.map(Duration::from_millis)
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Load from a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `VERITAS_*` environment variables.
    ///
    /// Invalid values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(login) = std::env::var("VERITAS_LOGIN_PATH") {
            if login.starts_with('/') {
                config.routes.login = login;
            } else {
                tracing::warn!(value = %login, "VERITAS_LOGIN_PATH must start with '/'; using default");
            }
        }

        if let Ok(raw) = std::env::var("VERITAS_RESOLVE_TIMEOUT_MS") {
            match raw.parse::<u64>() {
                Ok(0) => config.resolve_timeout_ms = None,
                Ok(ms) => config.resolve_timeout_ms = Some(ms),
                Err(e) => {
                    tracing::warn!(value = %raw, error = %e, "invalid VERITAS_RESOLVE_TIMEOUT_MS; resolutions will not time out")
                }
            }
        }

        if let Ok(prefix) = std::env::var("VERITAS_BRANDING_PREFIX") {
            let prefix = prefix.trim_matches('/').to_string();
            if prefix.is_empty() {
                tracing::warn!("VERITAS_BRANDING_PREFIX is empty; using default");
            } else {
                config.branding_path_prefix = prefix;
            }
        }

        config
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.routes.login.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "login route must be an absolute path, got {:?}",
                self.routes.login
            )));
        }
        if self.branding_path_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid("branding path prefix is empty".to_string()));
        }
        if self.resolve_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("resolve timeout must be positive".to_string()));
        }
        Ok(())
    }
}
