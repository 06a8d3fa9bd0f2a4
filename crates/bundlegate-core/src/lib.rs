#![allow(clippy::doc_markdown)]
#![allow(clippy::too_long_first_doc_paragraph)]

//! bundlegate-core - bundle rollout control plane library
//!
//! This crate holds the domain logic shared by the control plane and the
//! runtime. Every persisted state transition goes through [`fs_safe`]
//! (temp file + fsync + rename) and every ambiguous input is rejected rather
//! than guessed at.
//!
//! # Modules
//!
//! - [`alias`]: per-tenant `{candidate, current}` state, its store, and the
//!   lifecycle manager (set-candidate / promote / rollback)
//! - [`audit`]: audit event shape and sinks
//! - [`auth`]: tenant authentication interface and static-token backend
//! - [`bundle`]: bundle locator, manifest and static alias catalog
//! - [`cache`]: content-addressed bundle distribution cache
//! - [`config`]: TOML configuration for both daemons
//! - [`error`]: the [`BundleError`] taxonomy
//! - [`fs_safe`]: atomic write and bounded read primitives
//! - [`gate`]: suites, gate results, the gate result store and engine
//! - [`ids`]: path-safe identifier validation
//! - [`limits`]: per-tenant rate limit and quota counters
//! - [`resolution`]: control-plane resolution service and wire payload
//! - [`runtime`]: runtime-side resolver and version compatibility

pub mod alias;
pub mod audit;
pub mod auth;
pub mod bundle;
pub mod cache;
pub mod config;
pub mod error;
pub mod fs_safe;
pub mod gate;
pub mod ids;
pub mod limits;
pub mod resolution;
pub mod runtime;

pub use error::{BundleError, ErrorClass};

/// Version of this build, used as the default local runtime version.
pub const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");
