//! `veritas-auth` — identity records and the backend read contracts the
//! client session core consumes.
//!
//! Nothing here mutates backend state. Stores are read-only views; the
//! resolver and trial calculator are stateless request/response helpers.

pub mod branding;
#[cfg(feature = "http")]
pub mod http;
pub mod resolver;
pub mod roles;
pub mod session;
pub mod store;
pub mod trial;
pub mod user;

pub use branding::Branding;
#[cfg(feature = "http")]
pub use http::RestBackend;
pub use resolver::{ProfileRoleResolver, Resolution};
pub use roles::Role;
pub use session::{AccessToken, Session};
pub use store::{
    BrandingStore, InMemoryDirectory, PlanStatus, ProfileStore, RoleStore, StoreError,
    SubscriptionOwner, SubscriptionStatus, SubscriptionStore, TokenSink,
};
pub use trial::{TrialState, TrialStatusCalculator};
pub use user::{Profile, User};
