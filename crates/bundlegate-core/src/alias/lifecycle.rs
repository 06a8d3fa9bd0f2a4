//! Set-candidate / promote / rollback.
//!
//! Promotion and rollback are the only ways `current` changes, and both
//! require a passing gate result for the exact `(tenant, bundle)` pair. The
//! gate check runs inside the tenant lock so a concurrent writer cannot slip
//! a different candidate in between the check and the write.

use std::sync::Arc;

use super::state::{AliasState, BundleRef};
use super::store::AliasStateStore;
use crate::auth::{AuthenticatedTenant, require_tenant};
use crate::bundle::BundleLocator;
use crate::error::BundleError;
use crate::gate::GateResultStore;
use crate::ids;

/// Tenant alias lifecycle operations.
#[derive(Clone)]
pub struct AliasLifecycleManager {
    aliases: AliasStateStore,
    gates: GateResultStore,
    locator: Arc<dyn BundleLocator>,
}

impl std::fmt::Debug for AliasLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AliasLifecycleManager")
            .field("aliases", &self.aliases)
            .field("gates", &self.gates)
            .finish_non_exhaustive()
    }
}

impl AliasLifecycleManager {
    /// Create a manager.
    #[must_use]
    pub fn new(
        aliases: AliasStateStore,
        gates: GateResultStore,
        locator: Arc<dyn BundleLocator>,
    ) -> Self {
        Self {
            aliases,
            gates,
            locator,
        }
    }

    /// Read-only view of the tenant's aliases.
    pub fn aliases(
        &self,
        auth: &AuthenticatedTenant,
        tenant_id: &str,
    ) -> Result<AliasState, BundleError> {
        require_tenant(auth, tenant_id)?;
        self.aliases.load(tenant_id)
    }

    /// Point the tenant's candidate at `bundle_id`.
    pub fn set_candidate(
        &self,
        auth: &AuthenticatedTenant,
        tenant_id: &str,
        bundle_id: &str,
    ) -> Result<AliasState, BundleError> {
        require_tenant(auth, tenant_id)?;
        ids::tenant(tenant_id)?;
        self.locator.locate(bundle_id)?;

        let state = self.aliases.update(tenant_id, |state| {
            Ok(AliasState {
                candidate: Some(BundleRef::new(bundle_id)),
                current: state.current.clone(),
            })
        })?;
        tracing::info!(tenant_id, bundle_id, "candidate set");
        Ok(state)
    }

    /// Move `current` to the candidate. Requires a passing gate for it.
    pub fn promote(
        &self,
        auth: &AuthenticatedTenant,
        tenant_id: &str,
    ) -> Result<AliasState, BundleError> {
        require_tenant(auth, tenant_id)?;
        ids::tenant(tenant_id)?;

        let state = self.aliases.update(tenant_id, |state| {
            let Some(candidate) = &state.candidate else {
                tracing::warn!(tenant_id, "promotion denied: no candidate");
                return Err(BundleError::NoCandidate {
                    tenant_id: tenant_id.to_string(),
                });
            };
            self.require_passing_gate(tenant_id, &candidate.bundle_id, "promotion")?;
            Ok(AliasState {
                candidate: state.candidate.clone(),
                current: Some(candidate.clone()),
            })
        })?;
        tracing::info!(
            tenant_id,
            bundle_id = ?state.current.as_ref().map(|c| c.bundle_id.as_str()),
            "candidate promoted"
        );
        Ok(state)
    }

    /// Point `current` at `bundle_id` regardless of the candidate. Requires
    /// a passing gate for that bundle.
    pub fn rollback(
        &self,
        auth: &AuthenticatedTenant,
        tenant_id: &str,
        bundle_id: &str,
    ) -> Result<AliasState, BundleError> {
        require_tenant(auth, tenant_id)?;
        ids::tenant(tenant_id)?;
        ids::bundle(bundle_id)?;

        let state = self.aliases.update(tenant_id, |state| {
            self.require_passing_gate(tenant_id, bundle_id, "rollback")?;
            Ok(AliasState {
                candidate: state.candidate.clone(),
                current: Some(BundleRef::new(bundle_id)),
            })
        })?;
        tracing::info!(tenant_id, bundle_id, "rolled back");
        Ok(state)
    }

    fn require_passing_gate(
        &self,
        tenant_id: &str,
        bundle_id: &str,
        action: &'static str,
    ) -> Result<(), BundleError> {
        if self.gates.has_passing(tenant_id, bundle_id)? {
            Ok(())
        } else {
            tracing::warn!(tenant_id, bundle_id, action, "denied: no passing gate");
            Err(BundleError::GateNotPassed {
                tenant_id: tenant_id.to_string(),
                bundle_id: bundle_id.to_string(),
            })
        }
    }
}
