//! Golden suites shipped inside bundles.
//!
//! A suite is `<bundle>/suites/<suite_id>.json`: a non-empty JSON array of
//! `{tenant_id, question, expected_answer}` objects, every field a non-empty
//! string. Parsing is strict; anything else is `InvalidSuite`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BundleError;
use crate::{fs_safe, ids};

/// Directory inside a bundle that holds suites.
pub const SUITES_DIR: &str = "suites";

const SUITE_EXTENSION: &str = "json";

/// Upper bound on a single suite file.
const MAX_SUITE_FILE_SIZE: u64 = 4 * 1024 * 1024;

/// One golden case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteCase {
    /// Tenant the case is written for.
    pub tenant_id: String,
    /// Question sent to the runtime.
    pub question: String,
    /// Exact answer the runtime must report.
    pub expected_answer: String,
}

/// An ordered suite of cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suite {
    /// Suite id (file stem).
    pub suite_id: String,
    /// Cases in file order.
    pub cases: Vec<SuiteCase>,
}

impl Suite {
    /// Parse suite JSON.
    pub fn parse(suite_id: &str, bytes: &[u8]) -> Result<Self, BundleError> {
        let invalid = |detail: String| BundleError::InvalidSuite {
            detail: format!("{suite_id}: {detail}"),
        };
        let root: Value =
            serde_json::from_slice(bytes).map_err(|e| invalid(format!("unparsable JSON: {e}")))?;
        let items = root
            .as_array()
            .ok_or_else(|| invalid("expected an array of cases".to_string()))?;
        if items.is_empty() {
            return Err(invalid("suite has no cases".to_string()));
        }

        let mut cases = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let obj = item
                .as_object()
                .ok_or_else(|| invalid(format!("case {index} is not an object")))?;
            let field = |name: &str| {
                obj.get(name)
                    .and_then(Value::as_str)
                    .filter(|s| !s.trim().is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| invalid(format!("case {index} missing non-empty {name}")))
            };
            cases.push(SuiteCase {
                tenant_id: field("tenant_id")?,
                question: field("question")?,
                expected_answer: field("expected_answer")?,
            });
        }
        Ok(Self {
            suite_id: suite_id.to_string(),
            cases,
        })
    }

    /// Reject the suite if any case targets a tenant other than `tenant_id`.
    pub fn ensure_tenant(&self, tenant_id: &str) -> Result<(), BundleError> {
        match self
            .cases
            .iter()
            .enumerate()
            .find(|(_, case)| case.tenant_id != tenant_id)
        {
            Some((case_index, case)) => Err(BundleError::CrossTenantCase {
                suite_id: self.suite_id.clone(),
                case_index,
                tenant_id: tenant_id.to_string(),
                case_tenant: case.tenant_id.clone(),
            }),
            None => Ok(()),
        }
    }
}

fn read_suite(path: &Path, suite_id: &str) -> Result<Suite, BundleError> {
    let bytes = fs_safe::read_bounded(path, MAX_SUITE_FILE_SIZE)?.ok_or_else(|| {
        BundleError::Storage {
            detail: format!("suite vanished: {}", path.display()),
        }
    })?;
    Suite::parse(suite_id, &bytes)
}

/// Load exactly one suite from a bundle.
pub fn load_suite(bundle_dir: &Path, bundle_id: &str, suite_id: &str) -> Result<Suite, BundleError> {
    ids::validate("suite_id", suite_id)?;
    let path = bundle_dir
        .join(SUITES_DIR)
        .join(format!("{suite_id}.{SUITE_EXTENSION}"));
    if !path.is_file() {
        return Err(BundleError::SuiteNotFound {
            bundle_id: bundle_id.to_string(),
            suite_id: suite_id.to_string(),
        });
    }
    read_suite(&path, suite_id)
}

/// Load every suite shipped with a bundle, ordered by suite id.
pub fn load_all(bundle_dir: &Path, bundle_id: &str) -> Result<Vec<Suite>, BundleError> {
    let dir = bundle_dir.join(SUITES_DIR);
    let mut found = Vec::new();
    match fs::read_dir(&dir) {
        Ok(entries) => {
            for entry in entries {
                let entry = entry.map_err(|e| {
                    BundleError::storage(format_args!("cannot list {}", dir.display()), e)
                })?;
                let path = entry.path();
                if !path.is_file()
                    || path.extension().and_then(|e| e.to_str()) != Some(SUITE_EXTENSION)
                {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    found.push((stem.to_string(), path));
                }
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => {
            return Err(BundleError::storage(
                format_args!("cannot list {}", dir.display()),
                e,
            ));
        },
    }

    if found.is_empty() {
        return Err(BundleError::NoSuites {
            bundle_id: bundle_id.to_string(),
        });
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    found
        .iter()
        .map(|(suite_id, path)| read_suite(path, suite_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"[
        {"tenant_id": "tenant_a", "question": "q1", "expected_answer": "a1"},
        {"tenant_id": "tenant_a", "question": "q2", "expected_answer": "a2"}
    ]"#;

    #[test]
    fn test_parse_preserves_order() {
        let suite = Suite::parse("golden", GOOD.as_bytes()).unwrap();
        assert_eq!(suite.cases.len(), 2);
        assert_eq!(suite.cases[0].question, "q1");
        assert_eq!(suite.cases[1].expected_answer, "a2");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "[]",
            "{}",
            "not json",
            r#"[{"tenant_id": "t", "question": "q"}]"#,
            r#"[{"tenant_id": "t", "question": "", "expected_answer": "a"}]"#,
            r#"[{"tenant_id": "t", "question": 3, "expected_answer": "a"}]"#,
            r#"["just a string"]"#,
        ] {
            assert!(
                matches!(
                    Suite::parse("s", bad.as_bytes()),
                    Err(BundleError::InvalidSuite { .. })
                ),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_cross_tenant_case_detected() {
        let suite = Suite::parse(
            "mixed",
            br#"[
                {"tenant_id": "tenant_a", "question": "q1", "expected_answer": "a1"},
                {"tenant_id": "tenant_b", "question": "q2", "expected_answer": "a2"}
            ]"#,
        )
        .unwrap();
        match suite.ensure_tenant("tenant_a") {
            Err(BundleError::CrossTenantCase {
                case_index,
                case_tenant,
                ..
            }) => {
                assert_eq!(case_index, 1);
                assert_eq!(case_tenant, "tenant_b");
            },
            other => panic!("expected cross-tenant rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_load_all_and_load_one() {
        let dir = tempfile::tempdir().unwrap();
        let suites = dir.path().join(SUITES_DIR);
        fs::create_dir_all(&suites).unwrap();
        fs::write(suites.join("b_second.json"), GOOD).unwrap();
        fs::write(suites.join("a_first.json"), GOOD).unwrap();
        fs::write(suites.join("README.md"), "ignored").unwrap();

        let all = load_all(dir.path(), "bundle").unwrap();
        let ids: Vec<_> = all.iter().map(|s| s.suite_id.as_str()).collect();
        assert_eq!(ids, ["a_first", "b_second"]);

        assert_eq!(
            load_suite(dir.path(), "bundle", "b_second").unwrap().suite_id,
            "b_second"
        );
        assert!(matches!(
            load_suite(dir.path(), "bundle", "missing"),
            Err(BundleError::SuiteNotFound { .. })
        ));
    }

    #[test]
    fn test_no_suites_is_internal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_all(dir.path(), "bundle"),
            Err(BundleError::NoSuites { .. })
        ));
    }
}
