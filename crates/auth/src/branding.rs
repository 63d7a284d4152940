use serde::{Deserialize, Serialize};

use veritas_core::ServiceProviderId;

/// Visual identity of a service provider, applied to every page it fronts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branding {
    pub provider_id: ServiceProviderId,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub primary_color: Option<String>,
}

impl Branding {
    /// Only branding with a logo is worth applying; anything else falls back
    /// to the default look.
    pub fn is_displayable(&self) -> bool {
        self.logo_url.as_deref().is_some_and(|url| !url.trim().is_empty())
    }
}
