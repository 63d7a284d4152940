//! Navigation effects.
//!
//! Deciding *where* to go is pure ([`route_for`]); actually going there is the
//! [`Navigator`]'s job and is fire-and-forget.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use veritas_auth::{Profile, Role};

/// Destinations the session core can send a user to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Login,
    ChangePassword,
    PendingApproval,
    AdminDashboard,
    CompanyDashboard,
    ProviderDashboard,
    PartnerDashboard,
    AffiliateDashboard,
}

/// Landing route after an explicit login.
///
/// A forced password change beats every role. Without a role there is no
/// destination; page guards take over.
pub fn route_for(role: Option<&Role>, profile: Option<&Profile>) -> Option<Route> {
    if profile.is_some_and(|p| p.must_change_password) {
        return Some(Route::ChangePassword);
    }

    let route = match role? {
        Role::Pending => Route::PendingApproval,
        Role::Admin => Route::AdminDashboard,
        Role::Company => Route::CompanyDashboard,
        Role::ServiceProvider => Route::ProviderDashboard,
        Role::Partner => Route::PartnerDashboard,
        Role::Affiliate => Route::AffiliateDashboard,
    };
    Some(route)
}

/// Route-change side effect boundary.
pub trait Navigator: Send + Sync {
    /// Path the user is currently on.
    fn current_path(&self) -> String;

    /// Request a route change. No result is consumed.
    fn navigate_to(&self, path: &str);
}

#[derive(Debug)]
struct History {
    current: String,
    navigations: Vec<String>,
}

/// In-process navigator: tracks the current path and every programmatic
/// navigation. Used headless and in tests.
#[derive(Debug)]
pub struct MemoryNavigator {
    history: Mutex<History>,
}

impl MemoryNavigator {
    pub fn new(start: impl Into<String>) -> Self {
        Self {
            history: Mutex::new(History {
                current: start.into(),
                navigations: Vec::new(),
            }),
        }
    }

    /// Move without recording a programmatic navigation (the user clicked a link).
    pub fn visit(&self, path: impl Into<String>) {
        if let Ok(mut h) = self.history.lock() {
            h.current = path.into();
        }
    }

    /// Every path passed to `navigate_to`, oldest first.
    pub fn navigations(&self) -> Vec<String> {
        self.history
            .lock()
            .map(|h| h.navigations.clone())
            .unwrap_or_default()
    }
}

impl Navigator for MemoryNavigator {
    fn current_path(&self) -> String {
        self.history
            .lock()
            .map(|h| h.current.clone())
            .unwrap_or_default()
    }

    fn navigate_to(&self, path: &str) {
        if let Ok(mut h) = self.history.lock() {
            h.current = path.to_string();
            h.navigations.push(path.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use veritas_core::UserId;

    fn profile(must_change_password: bool) -> Profile {
        let mut p = Profile::new(UserId::new(), "Ana");
        p.must_change_password = must_change_password;
        p
    }

    #[test]
    fn roles_map_to_their_dashboards() {
        let p = profile(false);
        let cases = [
            (Role::Pending, Route::PendingApproval),
            (Role::Admin, Route::AdminDashboard),
            (Role::Company, Route::CompanyDashboard),
            (Role::ServiceProvider, Route::ProviderDashboard),
            (Role::Partner, Route::PartnerDashboard),
            (Role::Affiliate, Route::AffiliateDashboard),
        ];
        for (role, expected) in cases {
            assert_eq!(route_for(Some(&role), Some(&p)), Some(expected));
        }
    }

    #[test]
    fn password_change_beats_company_dashboard() {
        let p = profile(true);
        assert_eq!(route_for(Some(&Role::Company), Some(&p)), Some(Route::ChangePassword));
    }

    #[test]
    fn no_role_means_no_navigation() {
        assert_eq!(route_for(None, Some(&profile(false))), None);
        assert_eq!(route_for(None, None), None);
    }

    #[test]
    fn role_without_profile_still_navigates() {
        assert_eq!(route_for(Some(&Role::Admin), None), Some(Route::AdminDashboard));
    }

    #[test]
    fn memory_navigator_records_programmatic_moves_only() {
        let nav = MemoryNavigator::new("/login");
        nav.visit("/about");
        nav.navigate_to("/company");

        assert_eq!(nav.current_path(), "/company");
        assert_eq!(nav.navigations(), vec!["/company".to_string()]);
    }

    proptest! {
        #[test]
        fn forced_password_change_always_wins(idx in 0usize..Role::ALL.len(), has_role in any::<bool>()) {
            let role = has_role.then(|| Role::ALL[idx]);
            let p = profile(true);
            prop_assert_eq!(route_for(role.as_ref(), Some(&p)), Some(Route::ChangePassword));
        }

        #[test]
        fn any_role_yields_some_route(idx in 0usize..Role::ALL.len()) {
            let p = profile(false);
            let route = route_for(Some(&Role::ALL[idx]), Some(&p));
            prop_assert!(route.is_some());
            prop_assert_ne!(route, Some(Route::ChangePassword));
            prop_assert_ne!(route, Some(Route::Login));
        }
    }
}
