//! Role + profile lookup for a user.

use std::sync::Arc;

use veritas_core::UserId;

use crate::store::{found, ProfileStore, RoleStore, StoreError};
use crate::{Profile, Role};

/// Outcome of resolving one user.
///
/// The two lookups fail independently, so each field carries its own result.
/// `Ok(None)` means the backend has no row (an unprovisioned user).
#[derive(Debug)]
pub struct Resolution {
    pub role: Result<Option<Role>, StoreError>,
    pub profile: Result<Option<Profile>, StoreError>,
}

/// Stateless resolver over the role and profile stores.
#[derive(Clone)]
pub struct ProfileRoleResolver {
    roles: Arc<dyn RoleStore>,
    profiles: Arc<dyn ProfileStore>,
}

impl ProfileRoleResolver {
    pub fn new(roles: Arc<dyn RoleStore>, profiles: Arc<dyn ProfileStore>) -> Self {
        Self { roles, profiles }
    }

    /// Fetch role and profile in parallel and wait for both.
    pub async fn resolve(&self, user_id: UserId) -> Resolution {
        let (role, profile) = tokio::join!(
            self.roles.get_role(user_id),
            self.profiles.get_profile(user_id),
        );

        Resolution {
            role: found(role),
            profile: found(profile),
        }
    }
}

impl core::fmt::Debug for ProfileRoleResolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProfileRoleResolver").finish_non_exhaustive()
    }
}
