//! Per-tenant alias state persistence.
//!
//! One file per tenant, `<root>/<tenant_id>.json`. Mutations run under an
//! exclusive lock on `<root>/.locks/<tenant_id>.lock` and land through
//! [`fs_safe::atomic_write`]. A mutation that leaves the state unchanged
//! performs no write.

use std::path::PathBuf;

use super::state::{AliasDocument, AliasState};
use crate::error::BundleError;
use crate::{fs_safe, ids};

const MAX_STATE_FILE_SIZE: u64 = 64 * 1024;
const LOCKS_DIR: &str = ".locks";

/// Filesystem-backed alias state store.
#[derive(Debug, Clone)]
pub struct AliasStateStore {
    root: PathBuf,
}

impl AliasStateStore {
    /// Create a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn state_path(&self, tenant_id: &str) -> PathBuf {
        self.root.join(format!("{tenant_id}.json"))
    }

    /// Current state for `tenant_id`; empty when none was ever written.
    pub fn load(&self, tenant_id: &str) -> Result<AliasState, BundleError> {
        ids::tenant(tenant_id)?;
        let path = self.state_path(tenant_id);
        let Some(bytes) = fs_safe::read_bounded(&path, MAX_STATE_FILE_SIZE)? else {
            return Ok(AliasState::default());
        };
        let doc: AliasDocument = serde_json::from_slice(&bytes).map_err(|e| {
            BundleError::storage(format_args!("corrupt alias state {}", path.display()), e)
        })?;
        if doc.tenant_id != tenant_id {
            return Err(BundleError::Storage {
                detail: format!(
                    "alias state {} belongs to tenant {}",
                    path.display(),
                    doc.tenant_id
                ),
            });
        }
        Ok(doc.aliases)
    }

    /// Read-modify-write under the tenant lock.
    ///
    /// `mutate` sees the current state and returns the next one; returning
    /// an error aborts without writing.
    pub fn update<F>(&self, tenant_id: &str, mutate: F) -> Result<AliasState, BundleError>
    where
        F: FnOnce(&AliasState) -> Result<AliasState, BundleError>,
    {
        ids::tenant(tenant_id)?;
        let _lock = fs_safe::TenantLock::acquire(
            &self.root.join(LOCKS_DIR).join(format!("{tenant_id}.lock")),
        )?;

        let before = self.load(tenant_id)?;
        let after = mutate(&before)?;
        if after == before {
            tracing::debug!(tenant_id, "alias state unchanged, skipping write");
            return Ok(after);
        }

        let doc = AliasDocument {
            tenant_id: tenant_id.to_string(),
            aliases: after,
        };
        let bytes = serde_json::to_vec_pretty(&doc)
            .map_err(|e| BundleError::storage("cannot serialize alias state", e))?;
        fs_safe::atomic_write(&self.state_path(tenant_id), &bytes)?;
        Ok(doc.aliases)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::alias::state::BundleRef;

    #[test]
    fn test_missing_state_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = AliasStateStore::new(dir.path());
        assert_eq!(store.load("tenant_a").unwrap(), AliasState::default());
    }

    #[test]
    fn test_update_persists_and_skips_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = AliasStateStore::new(dir.path());
        let set = |s: &AliasState| -> Result<AliasState, BundleError> {
            Ok(AliasState {
                candidate: Some(BundleRef::new("b1")),
                ..s.clone()
            })
        };
        store.update("tenant_a", set).unwrap();
        let path = dir.path().join("tenant_a.json");
        let first = fs::metadata(&path).unwrap().modified().unwrap();

        // A rewrite would rename a fresh temp file over the state file.
        let ino_before = inode(&path);
        store.update("tenant_a", set).unwrap();
        assert_eq!(inode(&path), ino_before);
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), first);
        assert_eq!(
            store.load("tenant_a").unwrap().candidate,
            Some(BundleRef::new("b1"))
        );
    }

    #[cfg(unix)]
    fn inode(path: &std::path::Path) -> u64 {
        use std::os::unix::fs::MetadataExt;
        fs::metadata(path).unwrap().ino()
    }

    #[cfg(not(unix))]
    fn inode(_path: &std::path::Path) -> u64 {
        0
    }

    #[test]
    fn test_failed_mutation_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = AliasStateStore::new(dir.path());
        let err = store
            .update("tenant_a", |_| {
                Err(BundleError::NoCandidate {
                    tenant_id: "tenant_a".into(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, BundleError::NoCandidate { .. }));
        assert!(!dir.path().join("tenant_a.json").exists());
    }

    #[test]
    fn test_tenants_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = AliasStateStore::new(dir.path());
        store
            .update("tenant_a", |_| {
                Ok(AliasState {
                    candidate: None,
                    current: Some(BundleRef::new("b1")),
                })
            })
            .unwrap();
        assert_eq!(store.load("tenant_b").unwrap(), AliasState::default());
        assert!(store.load("../tenant_a").is_err());
    }

    #[test]
    fn test_foreign_document_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("tenant_a.json"),
            r#"{"tenant_id": "tenant_b", "aliases": {}}"#,
        )
        .unwrap();
        let store = AliasStateStore::new(dir.path());
        assert!(matches!(
            store.load("tenant_a"),
            Err(BundleError::Storage { .. })
        ));
    }
}
