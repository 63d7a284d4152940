//! Identity provider contract: session lifecycle events and the source that
//! emits them.

pub mod event;
pub mod in_memory;
pub mod source;

pub use event::{IdentityEvent, IdentityEventKind};
pub use in_memory::InMemoryIdentityProvider;
pub use source::{AuthProviderError, IdentityProvider, Subscription};
