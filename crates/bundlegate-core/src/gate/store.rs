//! Append-only gate result store.
//!
//! Layout: `<root>/<tenant_id>/<bundle_id>/<gate_id>.json`. Records are
//! created with no-clobber semantics and never rewritten.
//!
//! Each `(tenant, bundle)` directory also holds a `sequence` counter and a
//! `.lock` file. Appends take the lock, bump the counter, then write the
//! record, so sequence numbers are unique and increase in append order.

use std::fs;
use std::path::{Path, PathBuf};

use super::result::GateResult;
use crate::error::BundleError;
use crate::{fs_safe, ids};

/// Maximum number of records returned by [`GateResultStore::history`].
pub const GATE_HISTORY_LIMIT: usize = 20;

const MAX_RESULT_FILE_SIZE: u64 = 8 * 1024 * 1024;
const RESULT_EXTENSION: &str = "json";
const SEQUENCE_FILE: &str = "sequence";
const LOCK_FILE: &str = ".lock";

/// Filesystem-backed gate result store.
#[derive(Debug, Clone)]
pub struct GateResultStore {
    root: PathBuf,
}

impl GateResultStore {
    /// Create a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bundle_dir(&self, tenant_id: &str, bundle_id: &str) -> Result<PathBuf, BundleError> {
        ids::tenant(tenant_id)?;
        ids::bundle(bundle_id)?;
        Ok(self.root.join(tenant_id).join(bundle_id))
    }

    fn read_sequence(dir: &Path) -> Result<u64, BundleError> {
        let path = dir.join(SEQUENCE_FILE);
        let Some(bytes) = fs_safe::read_bounded(&path, 32)? else {
            return Ok(0);
        };
        std::str::from_utf8(&bytes)
            .ok()
            .and_then(|text| text.trim().parse().ok())
            .ok_or_else(|| BundleError::Storage {
                detail: format!("corrupt sequence counter {}", path.display()),
            })
    }

    /// Persist a new result and return it with its `sequence` assigned.
    /// Fails if a record with the same `gate_id` already exists.
    pub fn append(&self, mut result: GateResult) -> Result<GateResult, BundleError> {
        ids::validate("gate_id", &result.gate_id)?;
        let dir = self.bundle_dir(&result.tenant_id, &result.bundle_id)?;
        let path = dir.join(format!("{}.{RESULT_EXTENSION}", result.gate_id));

        let _lock = fs_safe::TenantLock::acquire(&dir.join(LOCK_FILE))?;
        if path.exists() {
            return Err(BundleError::Storage {
                detail: format!("{} already exists", path.display()),
            });
        }
        // The counter lands first: a crash before the record is written
        // leaves a gap, never a reused number.
        result.sequence = Self::read_sequence(&dir)? + 1;
        fs_safe::atomic_write(&dir.join(SEQUENCE_FILE), result.sequence.to_string().as_bytes())?;

        let bytes = serde_json::to_vec_pretty(&result)
            .map_err(|e| BundleError::storage("cannot serialize gate result", e))?;
        fs_safe::write_new(&path, &bytes)?;
        tracing::debug!(
            tenant_id = %result.tenant_id,
            bundle_id = %result.bundle_id,
            gate_id = %result.gate_id,
            sequence = result.sequence,
            "gate result persisted"
        );
        Ok(result)
    }

    fn read(path: &Path) -> Result<Option<GateResult>, BundleError> {
        let Some(bytes) = fs_safe::read_bounded(path, MAX_RESULT_FILE_SIZE)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| BundleError::storage(format_args!("corrupt gate result {}", path.display()), e))
    }

    /// Read one result.
    pub fn get(&self, tenant_id: &str, bundle_id: &str, gate_id: &str) -> Result<GateResult, BundleError> {
        ids::validate("gate_id", gate_id)?;
        let path = self
            .bundle_dir(tenant_id, bundle_id)?
            .join(format!("{gate_id}.{RESULT_EXTENSION}"));
        Self::read(&path)?.ok_or_else(|| BundleError::GateNotFound {
            gate_id: gate_id.to_string(),
        })
    }

    fn load_all(&self, tenant_id: &str, bundle_id: &str) -> Result<Vec<GateResult>, BundleError> {
        let dir = self.bundle_dir(tenant_id, bundle_id)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BundleError::storage(
                    format_args!("cannot list {}", dir.display()),
                    e,
                ));
            },
        };

        let mut results = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| BundleError::storage(format_args!("cannot list {}", dir.display()), e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RESULT_EXTENSION) {
                continue;
            }
            if let Some(result) = Self::read(&path)? {
                results.push(result);
            }
        }
        Ok(results)
    }

    /// Results for `(tenant, bundle)`, newest first, at most
    /// [`GATE_HISTORY_LIMIT`].
    ///
    /// Ordering is by `sequence`, descending. Records written without a
    /// sequence (`0`) sort last, by `created_at` then `gate_id`.
    pub fn history(&self, tenant_id: &str, bundle_id: &str) -> Result<Vec<GateResult>, BundleError> {
        let mut results = self.load_all(tenant_id, bundle_id)?;
        results.sort_by(|a, b| {
            b.sequence
                .cmp(&a.sequence)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| b.gate_id.cmp(&a.gate_id))
        });
        results.truncate(GATE_HISTORY_LIMIT);
        Ok(results)
    }

    /// Whether any passing result exists for `(tenant, bundle)`.
    pub fn has_passing(&self, tenant_id: &str, bundle_id: &str) -> Result<bool, BundleError> {
        Ok(self
            .load_all(tenant_id, bundle_id)?
            .iter()
            .any(|r| r.tenant_id == tenant_id && r.bundle_id == bundle_id && r.is_pass()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::result::{GateCriteria, GateOutcome, GateStatus, GateSummary};

    fn result(gate_id: &str, created_at: &str, outcome: GateOutcome) -> GateResult {
        GateResult {
            gate_id: gate_id.into(),
            sequence: 0,
            request_id: "req".into(),
            tenant_id: "tenant_a".into(),
            bundle_id: "b1".into(),
            status: GateStatus::Completed,
            outcome,
            created_at: created_at.into(),
            criteria: GateCriteria::default(),
            summary: GateSummary::default(),
            suites: vec![],
        }
    }

    #[test]
    fn test_write_get_and_no_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let store = GateResultStore::new(dir.path());
        let r = result("g1", "2026-01-01T00:00:00Z", GateOutcome::Pass);
        let stored = store.append(r.clone()).unwrap();
        assert_eq!(stored.sequence, 1);
        assert_eq!(store.get("tenant_a", "b1", "g1").unwrap(), stored);
        assert!(store.append(r).is_err());
        assert_eq!(store.history("tenant_a", "b1").unwrap().len(), 1);
        assert!(matches!(
            store.get("tenant_a", "b1", "missing"),
            Err(BundleError::GateNotFound { .. })
        ));
        assert!(matches!(
            store.get("tenant_b", "b1", "g1"),
            Err(BundleError::GateNotFound { .. })
        ));
    }

    #[test]
    fn test_history_newest_first_and_capped() {
        let dir = tempfile::tempdir().unwrap();
        let store = GateResultStore::new(dir.path());
        // Same timestamp and gate ids that sort against append order.
        let appended: Vec<String> = (0..25)
            .map(|i| {
                store
                    .append(result(
                        &format!("g{:02}", 99 - i),
                        "2026-01-01T00:00:00Z",
                        GateOutcome::Fail,
                    ))
                    .unwrap()
                    .gate_id
            })
            .collect();

        let history = store.history("tenant_a", "b1").unwrap();
        assert_eq!(history.len(), GATE_HISTORY_LIMIT);
        let listed: Vec<&str> = history.iter().map(|r| r.gate_id.as_str()).collect();
        let newest: Vec<&str> = appended
            .iter()
            .rev()
            .take(GATE_HISTORY_LIMIT)
            .map(String::as_str)
            .collect();
        assert_eq!(listed, newest);
        assert_eq!(history[0].sequence, 25);
        assert_eq!(history[19].sequence, 6);
    }

    #[test]
    fn test_sequence_is_per_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let store = GateResultStore::new(dir.path());
        store.append(result("g1", "2026-01-01T00:00:00Z", GateOutcome::Fail)).unwrap();
        let mut other = result("g2", "2026-01-01T00:00:00Z", GateOutcome::Fail);
        other.bundle_id = "b2".into();
        assert_eq!(store.append(other).unwrap().sequence, 1);
        let second = store.append(result("g3", "2026-01-01T00:00:00Z", GateOutcome::Fail)).unwrap();
        assert_eq!(second.sequence, 2);
    }

    #[test]
    fn test_unsequenced_records_sort_last() {
        let dir = tempfile::tempdir().unwrap();
        let store = GateResultStore::new(dir.path());
        let bundle_dir = dir.path().join("tenant_a").join("b1");
        fs::create_dir_all(&bundle_dir).unwrap();
        let legacy = result("legacy", "2026-06-01T00:00:00Z", GateOutcome::Pass);
        fs::write(
            bundle_dir.join("legacy.json"),
            serde_json::to_vec(&legacy).unwrap(),
        )
        .unwrap();
        store.append(result("fresh", "2026-01-01T00:00:00Z", GateOutcome::Fail)).unwrap();

        let history = store.history("tenant_a", "b1").unwrap();
        assert_eq!(history[0].gate_id, "fresh");
        assert_eq!(history[1].gate_id, "legacy");
    }

    #[test]
    fn test_has_passing() {
        let dir = tempfile::tempdir().unwrap();
        let store = GateResultStore::new(dir.path());
        assert!(!store.has_passing("tenant_a", "b1").unwrap());
        store
            .append(result("g1", "2026-01-01T00:00:00Z", GateOutcome::Error))
            .unwrap();
        store
            .append(result("g2", "2026-01-01T00:00:01Z", GateOutcome::Fail))
            .unwrap();
        assert!(!store.has_passing("tenant_a", "b1").unwrap());
        store
            .append(result("g3", "2026-01-01T00:00:02Z", GateOutcome::Pass))
            .unwrap();
        assert!(store.has_passing("tenant_a", "b1").unwrap());
        assert!(!store.has_passing("tenant_b", "b1").unwrap());
    }

    #[test]
    fn test_rejects_unsafe_identifiers() {
        let dir = tempfile::tempdir().unwrap();
        let store = GateResultStore::new(dir.path());
        assert!(matches!(
            store.get("tenant_a", "b1", "../x"),
            Err(BundleError::InvalidIdentifier { .. })
        ));
        assert!(matches!(
            store.history("..", "b1"),
            Err(BundleError::InvalidIdentifier { .. })
        ));
    }
}
