//! Current-bundle resolution.
//!
//! [`ResolutionService`] answers "which bundle is current for tenant X" on
//! the control plane. [`ResolutionResponse::from_payload`] is the strict
//! parser the runtime applies to that answer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::alias::AliasStateStore;
use crate::bundle::{AliasCatalog, BundleLocator, LocatedBundle};
use crate::cache::ContentDigest;
use crate::error::BundleError;
use crate::ids;
use crate::runtime::RuntimeVersion;

/// Compatibility block of a resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeCompatibility {
    /// Minimum runtime version.
    pub min_version: String,
}

/// Wire shape of `GET /tenants/{t}/resolve/current`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionResponse {
    /// Current bundle.
    pub bundle_id: String,
    /// Compatibility requirement.
    pub runtime_compatibility: RuntimeCompatibility,
    /// Expected archive digest.
    #[serde(default, alias = "bundle_sha256", skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<String>,
}

impl ResolutionResponse {
    fn from_located(located: LocatedBundle) -> Self {
        Self {
            bundle_id: located.bundle_id,
            runtime_compatibility: RuntimeCompatibility {
                min_version: located.manifest.min_version,
            },
            content_digest: located.content_digest,
        }
    }

    /// Parse and validate an untrusted resolution payload.
    ///
    /// Rejects anything that is not an object carrying a path-safe
    /// `bundle_id` and a `MAJOR.MINOR.PATCH` `min_version`. A digest, when
    /// present, must be well-formed.
    pub fn from_payload(bytes: &[u8]) -> Result<Self, BundleError> {
        let invalid = |detail: &str| BundleError::InvalidResolution {
            detail: detail.to_string(),
        };
        let root: Value = serde_json::from_slice(bytes).map_err(|_| invalid("unparsable JSON"))?;
        let obj = root.as_object().ok_or_else(|| invalid("not an object"))?;

        let bundle_id = obj
            .get("bundle_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("missing bundle_id"))?;
        ids::bundle(bundle_id).map_err(|_| invalid("bundle_id is not a valid identifier"))?;

        let min_version = obj
            .get("runtime_compatibility")
            .and_then(Value::as_object)
            .ok_or_else(|| invalid("missing runtime_compatibility"))?
            .get("min_version")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("missing min_version"))?;
        min_version.parse::<RuntimeVersion>()?;

        let content_digest = match obj.get("content_digest").or_else(|| obj.get("bundle_sha256")) {
            None | Some(Value::Null) => None,
            Some(Value::String(digest)) => {
                ContentDigest::parse(digest)?;
                Some(digest.clone())
            },
            Some(_) => return Err(invalid("content_digest must be a string")),
        };

        Ok(Self {
            bundle_id: bundle_id.to_string(),
            runtime_compatibility: RuntimeCompatibility {
                min_version: min_version.to_string(),
            },
            content_digest,
        })
    }
}

/// Control-plane resolution of a tenant's current bundle.
#[derive(Clone)]
pub struct ResolutionService {
    aliases: AliasStateStore,
    catalog: Arc<AliasCatalog>,
    locator: Arc<dyn BundleLocator>,
}

impl std::fmt::Debug for ResolutionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionService")
            .field("aliases", &self.aliases)
            .finish_non_exhaustive()
    }
}

impl ResolutionService {
    /// Create a service.
    #[must_use]
    pub fn new(
        aliases: AliasStateStore,
        catalog: Arc<AliasCatalog>,
        locator: Arc<dyn BundleLocator>,
    ) -> Self {
        Self {
            aliases,
            catalog,
            locator,
        }
    }

    /// Resolve the current bundle: alias state, then the catalog entry for
    /// the tenant, then the catalog wildcard.
    pub fn resolve_current(&self, tenant_id: &str) -> Result<ResolutionResponse, BundleError> {
        ids::tenant(tenant_id)?;

        if let Some(current) = self.aliases.load(tenant_id)?.current {
            let located = self.locator.locate(&current.bundle_id).map_err(|e| match e {
                BundleError::BundleNotFound { bundle_id } => BundleError::BundleMetadata {
                    detail: format!("current bundle {bundle_id} of tenant {tenant_id} has no location"),
                },
                other => other,
            })?;
            tracing::debug!(tenant_id, bundle_id = %located.bundle_id, "resolved from alias state");
            return Ok(ResolutionResponse::from_located(located));
        }

        let entry = self
            .catalog
            .entry_for(tenant_id)
            .ok_or_else(|| BundleError::TenantNotFound {
                tenant_id: tenant_id.to_string(),
            })?;
        let located = self.catalog.resolve_entry(entry)?;
        tracing::debug!(tenant_id, bundle_id = %located.bundle_id, "resolved from catalog");
        Ok(ResolutionResponse::from_located(located))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::alias::{AliasState, BundleRef};
    use crate::bundle::FsBundleLocator;

    fn write_bundle(dir: &Path, bundle_id: &str, min_version: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join("manifest.yaml"),
            format!("bundle_id: {bundle_id}\nruntime_compatibility:\n  min_version: '{min_version}'\n"),
        )
        .unwrap();
    }

    #[test]
    fn test_payload_validation() {
        let ok = ResolutionResponse::from_payload(
            br#"{"bundle_id": "b1", "runtime_compatibility": {"min_version": "1.0.0"}}"#,
        )
        .unwrap();
        assert_eq!(ok.bundle_id, "b1");
        assert_eq!(ok.content_digest, None);

        let digest = "a".repeat(64);
        let with_alias = ResolutionResponse::from_payload(
            format!(
                r#"{{"bundle_id": "b1", "runtime_compatibility": {{"min_version": "1.0.0"}}, "bundle_sha256": "{digest}"}}"#
            )
            .as_bytes(),
        )
        .unwrap();
        assert_eq!(with_alias.content_digest.as_deref(), Some(digest.as_str()));

        for bad in [
            "[]",
            "nope",
            r#"{"runtime_compatibility": {"min_version": "1.0.0"}}"#,
            r#"{"bundle_id": "b1"}"#,
            r#"{"bundle_id": "b1", "runtime_compatibility": {}}"#,
            r#"{"bundle_id": "b1", "runtime_compatibility": {"min_version": "one"}}"#,
            r#"{"bundle_id": "../b1", "runtime_compatibility": {"min_version": "1.0.0"}}"#,
        ] {
            assert!(matches!(
                ResolutionResponse::from_payload(bad.as_bytes()),
                Err(BundleError::InvalidResolution { .. })
            ), "{bad}");
        }
        assert!(matches!(
            ResolutionResponse::from_payload(
                br#"{"bundle_id": "b1", "runtime_compatibility": {"min_version": "1.0.0"}, "content_digest": "zz"}"#
            ),
            Err(BundleError::InvalidDigest { .. })
        ));
    }

    #[test]
    fn test_resolution_order() {
        let dir = tempfile::tempdir().unwrap();
        let bundles = dir.path().join("bundles");
        write_bundle(&bundles.join("b1"), "b1", "1.0.0");
        write_bundle(&bundles.join("b2"), "b2", "1.2.0");
        write_bundle(&dir.path().join("default"), "default-bundle", "1.0.0");

        let catalog = Arc::new(
            AliasCatalog::from_json(r#"{"tenants": {"tenant_b": "bundles/b2", "*": "default"}}"#, dir.path())
                .unwrap(),
        );
        let aliases = AliasStateStore::new(dir.path().join("aliases"));
        let service = ResolutionService::new(
            aliases.clone(),
            catalog.clone(),
            Arc::new(FsBundleLocator::new(vec![bundles], catalog)),
        );

        assert_eq!(service.resolve_current("tenant_b").unwrap().bundle_id, "b2");
        assert_eq!(
            service.resolve_current("tenant_c").unwrap().bundle_id,
            "default-bundle"
        );

        aliases
            .update("tenant_b", |_| {
                Ok(AliasState {
                    candidate: None,
                    current: Some(BundleRef::new("b1")),
                })
            })
            .unwrap();
        let resolved = service.resolve_current("tenant_b").unwrap();
        assert_eq!(resolved.bundle_id, "b1");
        assert_eq!(resolved.runtime_compatibility.min_version, "1.0.0");
    }

    #[test]
    fn test_unknown_tenant_without_wildcard() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(AliasCatalog::default());
        let service = ResolutionService::new(
            AliasStateStore::new(dir.path()),
            catalog.clone(),
            Arc::new(FsBundleLocator::new(vec![], catalog)),
        );
        assert!(matches!(
            service.resolve_current("tenant_a"),
            Err(BundleError::TenantNotFound { .. })
        ));
    }

    #[test]
    fn test_dangling_current_is_internal() {
        let dir = tempfile::tempdir().unwrap();
        let aliases = AliasStateStore::new(dir.path());
        aliases
            .update("tenant_a", |_| {
                Ok(AliasState {
                    candidate: None,
                    current: Some(BundleRef::new("gone")),
                })
            })
            .unwrap();
        let catalog = Arc::new(AliasCatalog::default());
        let service = ResolutionService::new(
            aliases,
            catalog.clone(),
            Arc::new(FsBundleLocator::new(vec![], catalog)),
        );
        let err = service.resolve_current("tenant_a").unwrap_err();
        assert_eq!(err.class(), crate::ErrorClass::Internal);
    }
}
