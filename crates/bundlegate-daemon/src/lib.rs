//! bundlegate-daemon - HTTP services for bundle rollout
//!
//! Two axum services share this crate:
//!
//! - [`control_plane`]: alias lifecycle, gate runs and current-bundle
//!   resolution for operators and runtimes
//! - [`runtime_service`]: the tenant-facing `/execute` endpoint, which
//!   resolves the current bundle through the control plane, materializes it
//!   in the local cache and answers from it
//!
//! Domain logic lives in `bundlegate-core`; this crate adds HTTP routing,
//! header handling, outbound clients and audit wiring.

pub mod api_error;
pub mod audit_scope;
pub mod control_plane;
pub mod faq;
pub mod http_client;
pub mod request;
pub mod runtime_service;

use std::sync::Arc;

use bundlegate_core::BundleError;
use bundlegate_core::audit::{AuditError, AuditSink, DisabledAuditSink, JsonLinesAuditSink};
use bundlegate_core::config::{AuditConfig, AuditSinkKind};
use secrecy::SecretString;

/// Run filesystem-bound work off the async executor.
pub async fn blocking<T, F>(work: F) -> Result<T, BundleError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BundleError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| BundleError::Storage {
            detail: format!("blocking task failed: {e}"),
        })?
}

/// Build the audit sink described by `[audit]`.
pub fn audit_sink_from_config(config: &AuditConfig) -> Result<Arc<dyn AuditSink>, AuditError> {
    if !config.enabled {
        tracing::warn!("audit disabled by configuration");
        return Ok(Arc::new(DisabledAuditSink));
    }
    match (config.sink, &config.file_path) {
        (AuditSinkKind::File, Some(path)) => {
            tracing::info!(path = %path.display(), "audit events appended to file");
            Ok(Arc::new(JsonLinesAuditSink::file(path)?))
        },
        _ => Ok(Arc::new(JsonLinesAuditSink::stdout())),
    }
}

/// Read a secret from the environment variable `name`. Unset or blank is a
/// configuration error.
pub fn secret_from_env(name: &str) -> Result<SecretString, BundleError> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(SecretString::from)
        .ok_or_else(|| BundleError::Config {
            detail: format!("environment variable {name} is unset or empty"),
        })
}
