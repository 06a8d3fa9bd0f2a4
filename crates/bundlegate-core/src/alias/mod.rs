//! Tenant alias state and its lifecycle.

mod lifecycle;
mod state;
mod store;

pub use lifecycle::AliasLifecycleManager;
pub use state::{AliasDocument, AliasState, BundleRef};
pub use store::AliasStateStore;
