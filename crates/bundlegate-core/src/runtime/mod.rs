//! Runtime side: version compatibility and bundle resolution.

mod resolver;
mod version;

pub use resolver::{
    ControlPlaneClient, ControlPlaneReply, ResolutionSource, ResolvedBundle, RuntimeBundleResolver,
};
pub use version::RuntimeVersion;
