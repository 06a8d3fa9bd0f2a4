//! Bundle manifest (`manifest.yaml`).

use std::path::Path;

use serde::Deserialize;

use crate::error::BundleError;
use crate::fs_safe;

/// Manifest file name at the root of every bundle.
pub const MANIFEST_FILE: &str = "manifest.yaml";

/// Upper bound on manifest size.
const MAX_MANIFEST_SIZE: u64 = 64 * 1024;

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    bundle_id: Option<String>,
    #[serde(default)]
    runtime_compatibility: Option<RawCompatibility>,
    #[serde(default)]
    content_digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCompatibility {
    #[serde(default)]
    min_version: Option<String>,
}

/// Fields of a bundle manifest consumed by the control plane and runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleManifest {
    /// Bundle identity.
    pub bundle_id: String,
    /// Minimum compatible runtime version (`MAJOR.MINOR.PATCH`).
    pub min_version: String,
    /// Optional SHA-256 digest of the published archive.
    pub content_digest: Option<String>,
}

impl BundleManifest {
    /// Parse manifest YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, BundleError> {
        let raw: RawManifest =
            serde_yaml::from_str(text).map_err(|e| BundleError::BundleMetadata {
                detail: format!("manifest unparsable: {e}"),
            })?;
        let bundle_id = raw
            .bundle_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| BundleError::BundleMetadata {
                detail: "manifest missing bundle_id".to_string(),
            })?;
        let min_version = raw
            .runtime_compatibility
            .and_then(|c| c.min_version)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| BundleError::BundleMetadata {
                detail: format!("manifest for {bundle_id} missing runtime_compatibility.min_version"),
            })?;
        Ok(Self {
            bundle_id,
            min_version,
            content_digest: raw.content_digest.filter(|d| !d.trim().is_empty()),
        })
    }

    /// Load the manifest from a bundle directory.
    pub fn load(bundle_dir: &Path) -> Result<Self, BundleError> {
        let path = bundle_dir.join(MANIFEST_FILE);
        let bytes =
            fs_safe::read_bounded(&path, MAX_MANIFEST_SIZE)?.ok_or_else(|| {
                BundleError::BundleMetadata {
                    detail: format!("manifest missing at {}", path.display()),
                }
            })?;
        let text = String::from_utf8(bytes).map_err(|_| BundleError::BundleMetadata {
            detail: format!("manifest at {} is not UTF-8", path.display()),
        })?;
        Self::from_yaml(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_required_fields() {
        let m = BundleManifest::from_yaml(
            "bundle_id: demo-faq-0001\nruntime_compatibility:\n  min_version: '1.0.0'\n",
        )
        .unwrap();
        assert_eq!(m.bundle_id, "demo-faq-0001");
        assert_eq!(m.min_version, "1.0.0");
        assert_eq!(m.content_digest, None);
    }

    #[test]
    fn test_missing_min_version_is_metadata_error() {
        let err = BundleManifest::from_yaml("bundle_id: demo\n").unwrap_err();
        assert!(matches!(err, BundleError::BundleMetadata { .. }));
    }

    #[test]
    fn test_missing_manifest_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            BundleManifest::load(dir.path()),
            Err(BundleError::BundleMetadata { .. })
        ));
    }
}
