//! `veritas-session` — client-side session reconciliation.
//!
//! Turns the asynchronous, possibly out-of-order stream of identity provider
//! events into one consistent [`SessionSnapshot`] and decides, exactly once
//! per explicit login, whether the application should navigate.
//!
//! The moving parts:
//! - `reconciler.rs`: the async handle that consumes events and runs resolutions
//! - `state.rs`: the synchronous state machine those resolutions write into
//! - `generation.rs`: the token that discards superseded writes
//! - `navigation.rs`: role → route mapping and the navigator seam
//! - `branding.rs`: tenant branding, resolved with the same discipline
//! - `config.rs`: routes, timeouts and URL conventions

pub mod branding;
pub mod config;
pub mod error;
pub mod generation;
pub mod navigation;
pub mod reconciler;
pub mod state;

pub use branding::BrandingResolver;
pub use config::{RouteTable, SessionConfig};
pub use error::{ConfigError, SessionError};
pub use generation::{Generation, GenerationCounter};
pub use navigation::{route_for, MemoryNavigator, Navigator, Route};
pub use reconciler::{Collaborators, SessionReconciler};
pub use state::{Phase, ReconciliationFlags, RedirectCheck, SessionSnapshot};
