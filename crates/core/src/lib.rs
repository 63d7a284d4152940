//! `veritas-core` — identifiers and error primitives shared by every crate.
//!
//! This crate is deliberately free of IO and async concerns.

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{CompanyId, ServiceProviderId, UserId};
