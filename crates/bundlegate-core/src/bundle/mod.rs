//! Bundle location, manifests and the static alias catalog.
//!
//! A bundle is an immutable directory with a `manifest.yaml` at its root.
//! [`BundleLocator`] maps a bundle id to such a directory. The filesystem
//! implementation searches configured bundle roots for `<root>/<bundle_id>`
//! and then falls back to the static [`AliasCatalog`].

mod catalog;
mod manifest;

use std::path::PathBuf;
use std::sync::Arc;

pub use catalog::{AliasCatalog, AliasEntry, LocatedBundle};
pub use manifest::{BundleManifest, MANIFEST_FILE};

use crate::error::BundleError;
use crate::ids;

/// Resolves bundle ids to on-disk bundles.
pub trait BundleLocator: Send + Sync {
    /// Locate `bundle_id`. `BundleNotFound` when no location is known.
    fn locate(&self, bundle_id: &str) -> Result<LocatedBundle, BundleError>;
}

/// Locator over bundle root directories plus the static catalog.
#[derive(Debug, Clone)]
pub struct FsBundleLocator {
    roots: Vec<PathBuf>,
    catalog: Arc<AliasCatalog>,
}

impl FsBundleLocator {
    /// Create a locator.
    #[must_use]
    pub const fn new(roots: Vec<PathBuf>, catalog: Arc<AliasCatalog>) -> Self {
        Self { roots, catalog }
    }
}

impl BundleLocator for FsBundleLocator {
    fn locate(&self, bundle_id: &str) -> Result<LocatedBundle, BundleError> {
        ids::bundle(bundle_id)?;

        for root in &self.roots {
            let path = root.join(bundle_id);
            if !path.join(MANIFEST_FILE).is_file() {
                continue;
            }
            let manifest = BundleManifest::load(&path)?;
            if manifest.bundle_id != bundle_id {
                return Err(BundleError::BundleMetadata {
                    detail: format!(
                        "manifest at {} declares {}, expected {bundle_id}",
                        path.display(),
                        manifest.bundle_id
                    ),
                });
            }
            let content_digest = manifest.content_digest.clone();
            return Ok(LocatedBundle {
                bundle_id: bundle_id.to_string(),
                path,
                manifest,
                content_digest,
            });
        }

        self.catalog
            .find_bundle(bundle_id)
            .ok_or_else(|| BundleError::BundleNotFound {
                bundle_id: bundle_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn write_bundle(dir: &std::path::Path, bundle_id: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join(MANIFEST_FILE),
            format!("bundle_id: {bundle_id}\nruntime_compatibility:\n  min_version: '1.0.0'\n"),
        )
        .unwrap();
    }

    #[test]
    fn test_locates_in_root_then_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let roots = dir.path().join("bundles");
        write_bundle(&roots.join("b1"), "b1");
        write_bundle(&dir.path().join("elsewhere"), "b2");

        let mut entries = BTreeMap::new();
        entries.insert("*".to_string(), AliasEntry::LegacyPath("elsewhere".into()));
        let locator = FsBundleLocator::new(
            vec![roots],
            Arc::new(AliasCatalog::new(entries, dir.path())),
        );

        assert_eq!(locator.locate("b1").unwrap().bundle_id, "b1");
        assert_eq!(
            locator.locate("b2").unwrap().path,
            dir.path().join("elsewhere")
        );
        assert!(matches!(
            locator.locate("b3"),
            Err(BundleError::BundleNotFound { .. })
        ));
        assert!(matches!(
            locator.locate("../b1"),
            Err(BundleError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn test_manifest_id_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(&dir.path().join("b1"), "not-b1");
        let locator =
            FsBundleLocator::new(vec![dir.path().to_path_buf()], Arc::new(AliasCatalog::default()));
        assert!(matches!(
            locator.locate("b1"),
            Err(BundleError::BundleMetadata { .. })
        ));
    }
}
