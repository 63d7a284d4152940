use core::str::FromStr;

use serde::{Deserialize, Serialize};

use veritas_core::DomainError;

/// Authorization tag attached to a user by the role store.
///
/// A user holds at most one role. The absence of a role (`Option<Role>::None`)
/// means the account has not been approved yet and is distinct from
/// [`Role::Pending`], which is an explicit "awaiting approval" assignment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Company,
    ServiceProvider,
    Pending,
    Partner,
    Affiliate,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Admin,
        Role::Company,
        Role::ServiceProvider,
        Role::Pending,
        Role::Partner,
        Role::Affiliate,
    ];

    /// Wire name, as stored by the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Company => "company",
            Role::ServiceProvider => "service_provider",
            Role::Pending => "pending",
            Role::Partner => "partner",
            Role::Affiliate => "affiliate",
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        Role::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(tag))
            .ok_or_else(|| DomainError::unknown_role(tag))
    }
}
