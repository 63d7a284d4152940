//! User identity and profile records.

use serde::{Deserialize, Serialize};

use veritas_core::{CompanyId, ServiceProviderId, UserId};

/// Stable identity of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
}

impl User {
    pub fn new(id: UserId, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
        }
    }
}

/// Backend-owned profile record, keyed by user id.
///
/// The session core only reads profiles. Page components that edit them ask
/// the core to refresh afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub company_id: Option<CompanyId>,
    #[serde(default)]
    pub service_provider_id: Option<ServiceProviderId>,
    #[serde(default)]
    pub must_change_password: bool,
}

impl Profile {
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            company_id: None,
            service_provider_id: None,
            must_change_password: false,
        }
    }

    pub fn with_company(mut self, company_id: CompanyId) -> Self {
        self.company_id = Some(company_id);
        self
    }

    pub fn with_service_provider(mut self, provider_id: ServiceProviderId) -> Self {
        self.service_provider_id = Some(provider_id);
        self
    }

    pub fn requiring_password_change(mut self) -> Self {
        self.must_change_password = true;
        self
    }
}
