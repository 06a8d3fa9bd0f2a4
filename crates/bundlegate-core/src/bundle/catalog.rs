//! Static tenant → bundle catalog.
//!
//! The catalog is the bootstrap mapping used when no alias state exists for
//! a tenant and, on the runtime, when no control plane is configured.
//! Historically an entry is either a bare location string or an object; both
//! shapes are accepted on disk and modelled as [`AliasEntry`].
//!
//! ```json
//! {"tenants": {
//!     "tenant_a": {"current_bundle_path": "bundles/faq", "bundle_id": "demo-faq-0001"},
//!     "*": "bundles/default"
//! }}
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::manifest::BundleManifest;
use crate::error::BundleError;
use crate::fs_safe;
use crate::ids::WILDCARD_TENANT;

const MAX_CATALOG_SIZE: u64 = 1024 * 1024;

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasEntry {
    /// Bare location; the bundle id comes from the manifest.
    LegacyPath(String),
    /// Structured entry.
    Structured {
        /// Bundle directory.
        location: String,
        /// Bundle id, when the entry pins one.
        bundle_id: Option<String>,
        /// Expected archive digest.
        digest: Option<String>,
    },
}

impl AliasEntry {
    fn from_value(key: &str, value: &Value) -> Result<Self, BundleError> {
        match value {
            Value::String(location) => Ok(Self::LegacyPath(location.clone())),
            Value::Object(map) => {
                let text = |field: &str| {
                    map.get(field)
                        .and_then(Value::as_str)
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                };
                let location = text("current_bundle_path")
                    .or_else(|| text("bundle_path"))
                    .ok_or_else(|| BundleError::Config {
                        detail: format!("catalog entry {key:?}: bundle path missing"),
                    })?;
                Ok(Self::Structured {
                    location,
                    bundle_id: text("bundle_id"),
                    digest: text("bundle_sha256").or_else(|| text("content_digest")),
                })
            },
            _ => Err(BundleError::Config {
                detail: format!("catalog entry {key:?} must be a string or an object"),
            }),
        }
    }

    /// Location of the bundle directory as written in the catalog.
    #[must_use]
    pub fn location(&self) -> &str {
        match self {
            Self::LegacyPath(location) | Self::Structured { location, .. } => location,
        }
    }
}

/// A bundle resolved to a directory with its manifest loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedBundle {
    /// Bundle id.
    pub bundle_id: String,
    /// Bundle directory.
    pub path: PathBuf,
    /// Parsed manifest.
    pub manifest: BundleManifest,
    /// Expected archive digest, from the catalog entry or the manifest.
    pub content_digest: Option<String>,
}

/// Tenant → [`AliasEntry`] map with wildcard fallback.
#[derive(Debug, Clone, Default)]
pub struct AliasCatalog {
    entries: BTreeMap<String, AliasEntry>,
    base_dir: PathBuf,
}

impl AliasCatalog {
    /// Build a catalog from entries; relative locations resolve against
    /// `base_dir`.
    #[must_use]
    pub fn new(entries: BTreeMap<String, AliasEntry>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            entries,
            base_dir: base_dir.into(),
        }
    }

    /// Parse catalog JSON text.
    pub fn from_json(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self, BundleError> {
        let root: Value = serde_json::from_str(text).map_err(|e| BundleError::Config {
            detail: format!("alias catalog unparsable: {e}"),
        })?;
        let tenants = match root.get("tenants") {
            Some(tenants) => tenants,
            None => &root,
        };
        let map = tenants.as_object().ok_or_else(|| BundleError::Config {
            detail: "alias catalog must map tenants to entries".to_string(),
        })?;
        let mut entries = BTreeMap::new();
        for (key, value) in map {
            entries.insert(key.clone(), AliasEntry::from_value(key, value)?);
        }
        Ok(Self::new(entries, base_dir))
    }

    /// Load a catalog file. A missing file yields an empty catalog.
    pub fn load(path: &Path, base_dir: impl Into<PathBuf>) -> Result<Self, BundleError> {
        let base_dir = base_dir.into();
        let Some(bytes) = fs_safe::read_bounded(path, MAX_CATALOG_SIZE)? else {
            tracing::warn!(path = %path.display(), "alias catalog missing, using empty catalog");
            return Ok(Self::new(BTreeMap::new(), base_dir));
        };
        let text = String::from_utf8(bytes).map_err(|_| BundleError::Config {
            detail: format!("alias catalog {} is not UTF-8", path.display()),
        })?;
        Self::from_json(&text, base_dir)
    }

    /// Whether the catalog has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for `tenant_id`, falling back to the wildcard entry.
    #[must_use]
    pub fn entry_for(&self, tenant_id: &str) -> Option<&AliasEntry> {
        self.entries
            .get(tenant_id)
            .or_else(|| self.entries.get(WILDCARD_TENANT))
    }

    fn absolute(&self, location: &str) -> PathBuf {
        let path = Path::new(location);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Resolve an entry to a directory and load its manifest.
    pub fn resolve_entry(&self, entry: &AliasEntry) -> Result<LocatedBundle, BundleError> {
        let path = self.absolute(entry.location());
        if !path.is_dir() {
            return Err(BundleError::BundleMetadata {
                detail: format!("bundle path missing: {}", path.display()),
            });
        }
        let manifest = BundleManifest::load(&path)?;
        let (bundle_id, digest) = match entry {
            AliasEntry::LegacyPath(_) => (manifest.bundle_id.clone(), None),
            AliasEntry::Structured {
                bundle_id, digest, ..
            } => (
                bundle_id.clone().unwrap_or_else(|| manifest.bundle_id.clone()),
                digest.clone(),
            ),
        };
        let content_digest = digest.or_else(|| manifest.content_digest.clone());
        Ok(LocatedBundle {
            bundle_id,
            path,
            manifest,
            content_digest,
        })
    }

    /// Find the entry whose resolved bundle id is `bundle_id`.
    ///
    /// Entries that fail to resolve are skipped.
    #[must_use]
    pub fn find_bundle(&self, bundle_id: &str) -> Option<LocatedBundle> {
        self.entries.iter().find_map(|(key, entry)| {
            match self.resolve_entry(entry) {
                Ok(located) if located.bundle_id == bundle_id => Some(located),
                Ok(_) => None,
                Err(e) => {
                    tracing::debug!(tenant = %key, error = %e, "skipping unresolvable catalog entry");
                    None
                },
            }
        })
    }
}
