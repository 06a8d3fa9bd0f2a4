//! Runtime-side bundle resolution.
//!
//! With a control plane configured, every request asks it for the tenant's
//! current bundle, checks compatibility against the local runtime version
//! and makes the bundle available through the [`BundleCache`]. Without one,
//! the static catalog names a local bundle directory directly.
//!
//! There is no fallback: an unreachable control plane, a malformed answer or
//! an incompatible bundle fails the request.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use super::version::RuntimeVersion;
use crate::bundle::AliasCatalog;
use crate::cache::{BundleCache, BundleOrigin, CacheStatus};
use crate::error::BundleError;
use crate::ids;
use crate::resolution::ResolutionResponse;

/// Raw control-plane answer; validated by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPlaneReply {
    /// HTTP status.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

/// Client for the control plane's resolve endpoint.
pub trait ControlPlaneClient: Send + Sync {
    /// `GET /tenants/{tenant_id}/resolve/current`. Transport failures and
    /// timeouts are [`BundleError::ControlPlaneUnavailable`] with no status.
    fn resolve_current(
        &self,
        tenant_id: &str,
        request_id: &str,
    ) -> impl Future<Output = Result<ControlPlaneReply, BundleError>> + Send;
}

/// Where the resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// The control plane.
    ControlPlane,
    /// The static local catalog.
    Catalog,
}

/// A bundle ready to serve a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBundle {
    /// Bundle id.
    pub bundle_id: String,
    /// Local bundle directory.
    pub path: PathBuf,
    /// Resolution source.
    pub source: ResolutionSource,
    /// Cache outcome, for control-plane resolutions.
    pub cache_status: Option<CacheStatus>,
    /// Control-plane status, for control-plane resolutions.
    pub control_plane_status: Option<u16>,
}

/// Resolves and materializes the current bundle for a tenant.
#[derive(Debug)]
pub struct RuntimeBundleResolver<C, O> {
    control_plane: Option<C>,
    origin: Option<O>,
    cache: BundleCache,
    catalog: Arc<AliasCatalog>,
    runtime_version: RuntimeVersion,
    require_digest: bool,
}

impl<C: ControlPlaneClient, O: BundleOrigin> RuntimeBundleResolver<C, O> {
    /// Resolver using only the static catalog until a control plane is
    /// attached.
    #[must_use]
    pub fn new(
        cache: BundleCache,
        catalog: Arc<AliasCatalog>,
        runtime_version: RuntimeVersion,
    ) -> Self {
        Self {
            control_plane: None,
            origin: None,
            cache,
            catalog,
            runtime_version,
            require_digest: false,
        }
    }

    /// Resolve through `client`.
    #[must_use]
    pub fn with_control_plane(mut self, client: C) -> Self {
        self.control_plane = Some(client);
        self
    }

    /// Fetch cache misses from `origin`.
    #[must_use]
    pub fn with_origin(mut self, origin: O) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Reject control-plane resolutions that carry no digest.
    #[must_use]
    pub fn require_digest(mut self, require: bool) -> Self {
        self.require_digest = require;
        self
    }

    /// Local runtime version.
    #[must_use]
    pub const fn runtime_version(&self) -> RuntimeVersion {
        self.runtime_version
    }

    fn ensure_compatible(&self, min_version: RuntimeVersion, bundle_id: &str) -> Result<(), BundleError> {
        if self.runtime_version.satisfies(min_version) {
            return Ok(());
        }
        tracing::warn!(
            bundle_id,
            runtime_version = %self.runtime_version,
            min_version = %min_version,
            "bundle requires a newer runtime"
        );
        Err(BundleError::Incompatible {
            runtime_version: self.runtime_version.to_string(),
            min_version: min_version.to_string(),
        })
    }

    /// Resolve the tenant's current bundle and ensure it is present locally.
    pub async fn resolve_and_ensure(
        &self,
        tenant_id: &str,
        request_id: &str,
    ) -> Result<ResolvedBundle, BundleError> {
        ids::tenant(tenant_id)?;
        match &self.control_plane {
            Some(client) => self.via_control_plane(client, tenant_id, request_id).await,
            None => self.via_catalog(tenant_id),
        }
    }

    async fn via_control_plane(
        &self,
        client: &C,
        tenant_id: &str,
        request_id: &str,
    ) -> Result<ResolvedBundle, BundleError> {
        let reply = client.resolve_current(tenant_id, request_id).await?;
        if !(200..300).contains(&reply.status) {
            tracing::warn!(tenant_id, status = reply.status, "control plane refused resolution");
            return Err(BundleError::ControlPlaneUnavailable {
                detail: format!("control plane returned {}", reply.status),
                status: Some(reply.status),
            });
        }

        let resolution = ResolutionResponse::from_payload(&reply.body)?;
        let min_version: RuntimeVersion = resolution.runtime_compatibility.min_version.parse()?;
        self.ensure_compatible(min_version, &resolution.bundle_id)?;

        if self.require_digest && resolution.content_digest.is_none() {
            return Err(BundleError::DigestRequired {
                bundle_id: resolution.bundle_id,
            });
        }

        let cached = self
            .cache
            .ensure_local(
                &resolution.bundle_id,
                resolution.content_digest.as_deref(),
                self.origin.as_ref(),
            )
            .await?;
        tracing::debug!(
            tenant_id,
            bundle_id = %cached.bundle_id,
            cache = cached.status.as_str(),
            "bundle resolved via control plane"
        );
        Ok(ResolvedBundle {
            bundle_id: cached.bundle_id,
            path: cached.path,
            source: ResolutionSource::ControlPlane,
            cache_status: Some(cached.status),
            control_plane_status: Some(reply.status),
        })
    }

    fn via_catalog(&self, tenant_id: &str) -> Result<ResolvedBundle, BundleError> {
        let entry = self
            .catalog
            .entry_for(tenant_id)
            .ok_or_else(|| BundleError::Config {
                detail: format!("no catalog entry for tenant {tenant_id} and no control plane"),
            })?;
        let located = self.catalog.resolve_entry(entry)?;
        let min_version: RuntimeVersion =
            located
                .manifest
                .min_version
                .parse()
                .map_err(|_| BundleError::BundleMetadata {
                    detail: format!("bundle {} has an unparsable min_version", located.bundle_id),
                })?;
        self.ensure_compatible(min_version, &located.bundle_id)?;
        Ok(ResolvedBundle {
            bundle_id: located.bundle_id,
            path: located.path,
            source: ResolutionSource::Catalog,
            cache_status: None,
            control_plane_status: None,
        })
    }
}
