//! End-to-end tests for the bundle rollout lifecycle.
//!
//! Wires the public API together the way the control plane does:
//!
//! ```text
//! set_candidate -> run_gate -> promote -> resolve_current
//!                                  |
//!                                  v
//!                 RuntimeBundleResolver -> BundleCache
//! ```
//!
//! The runtime is replaced by a table-driven executor and the origin by an
//! in-memory archive source.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bundlegate_core::alias::{AliasLifecycleManager, AliasStateStore};
use bundlegate_core::auth::AuthenticatedTenant;
use bundlegate_core::bundle::{AliasCatalog, FsBundleLocator};
use bundlegate_core::cache::{BundleCache, BundleOrigin, CacheStatus, ContentDigest};
use bundlegate_core::gate::{
    ExecutionOutcome, ExecutionRequest, GATE_HISTORY_LIMIT, GateOutcome, GateResultStore,
    QualityGateEngine, RuntimeExecutor, TransportFault,
};
use bundlegate_core::resolution::ResolutionService;
use bundlegate_core::runtime::{
    ControlPlaneClient, ControlPlaneReply, ResolutionSource, RuntimeBundleResolver,
    RuntimeVersion,
};
use bundlegate_core::{BundleError, ErrorClass};

// ============================================================================
// Test Helpers
// ============================================================================

/// Answers questions from a fixed table; unknown questions get a 200 with
/// no answer.
struct TableExecutor {
    answers: HashMap<String, String>,
    calls: AtomicUsize,
}

impl TableExecutor {
    fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            answers: pairs
                .iter()
                .map(|(q, a)| ((*q).to_string(), (*a).to_string()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl RuntimeExecutor for TableExecutor {
    fn execute(&self, request: &ExecutionRequest<'_>) -> Result<ExecutionOutcome, TransportFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ExecutionOutcome {
            http_status: 200,
            answer: self.answers.get(request.question).cloned(),
        })
    }
}

struct Plane {
    _dir: tempfile::TempDir,
    bundles: PathBuf,
    lifecycle: AliasLifecycleManager,
    engine: QualityGateEngine,
    resolution: ResolutionService,
    executor: Arc<TableExecutor>,
}

fn write_bundle(bundles: &Path, bundle_id: &str, min_version: &str, suite: &str) {
    let dir = bundles.join(bundle_id);
    fs::create_dir_all(dir.join("suites")).unwrap();
    fs::create_dir_all(dir.join("data")).unwrap();
    fs::write(
        dir.join("manifest.yaml"),
        format!("bundle_id: {bundle_id}\nruntime_compatibility:\n  min_version: '{min_version}'\n"),
    )
    .unwrap();
    fs::write(dir.join("data/faq.json"), "[]").unwrap();
    fs::write(dir.join("suites/golden.json"), suite).unwrap();
}

fn two_case_suite(tenant: &str) -> String {
    format!(
        r#"[
            {{"tenant_id": "{tenant}", "question": "hours?", "expected_answer": "9 to 5"}},
            {{"tenant_id": "{tenant}", "question": "refunds?", "expected_answer": "30 days"}}
        ]"#
    )
}

fn plane(answers: &[(&str, &str)]) -> Plane {
    let dir = tempfile::tempdir().unwrap();
    let bundles = dir.path().join("bundles");
    fs::create_dir_all(&bundles).unwrap();

    let catalog = Arc::new(AliasCatalog::default());
    let locator = Arc::new(FsBundleLocator::new(vec![bundles.clone()], catalog.clone()));
    let aliases = AliasStateStore::new(dir.path().join("aliases"));
    let gates = GateResultStore::new(dir.path().join("gates"));
    let executor = Arc::new(TableExecutor::new(answers));

    Plane {
        lifecycle: AliasLifecycleManager::new(aliases.clone(), gates.clone(), locator.clone()),
        engine: QualityGateEngine::new(locator.clone(), gates, executor.clone()),
        resolution: ResolutionService::new(aliases, catalog, locator),
        executor,
        bundles,
        _dir: dir,
    }
}

const GOOD_ANSWERS: &[(&str, &str)] = &[("hours?", "9 to 5"), ("refunds?", "30 days")];

fn tenant_a() -> AuthenticatedTenant {
    AuthenticatedTenant::trusted("tenant_a")
}

/// Serves a resolution payload produced by a real [`ResolutionService`].
struct InProcessControlPlane {
    service: ResolutionService,
}

impl ControlPlaneClient for InProcessControlPlane {
    async fn resolve_current(
        &self,
        tenant_id: &str,
        _request_id: &str,
    ) -> Result<ControlPlaneReply, BundleError> {
        match self.service.resolve_current(tenant_id) {
            Ok(resolution) => Ok(ControlPlaneReply {
                status: 200,
                body: serde_json::to_vec(&resolution).unwrap(),
            }),
            Err(e) => Ok(ControlPlaneReply {
                status: e.class().http_status(),
                body: Vec::new(),
            }),
        }
    }
}

struct ArchiveOrigin {
    archives: HashMap<String, Vec<u8>>,
    fetches: AtomicUsize,
}

impl BundleOrigin for ArchiveOrigin {
    async fn fetch(&self, bundle_id: &str) -> Result<Vec<u8>, BundleError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.archives
            .get(bundle_id)
            .cloned()
            .ok_or_else(|| BundleError::OriginUnavailable {
                bundle_id: bundle_id.to_string(),
                detail: "404".to_string(),
            })
    }
}

/// Pack a bundle directory as `<bundle_id>/...` inside a gzipped tar.
fn pack(bundle_dir: &Path, bundle_id: &str) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(bundle_id, bundle_dir).unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_candidate_gate_promote_resolve() {
    let p = plane(GOOD_ANSWERS);
    write_bundle(&p.bundles, "bundle-1", "1.0.0", &two_case_suite("tenant_a"));
    let auth = tenant_a();

    let state = p.lifecycle.set_candidate(&auth, "tenant_a", "bundle-1").unwrap();
    assert_eq!(state.candidate.unwrap().bundle_id, "bundle-1");
    assert!(state.current.is_none());

    let gate = p
        .engine
        .run_gate(&auth, "tenant_a", "bundle-1", None, "req-1")
        .unwrap();
    assert_eq!(gate.outcome, GateOutcome::Pass);
    assert_eq!(
        (gate.summary.total, gate.summary.passed, gate.summary.failed),
        (2, 2, 0)
    );

    let promoted = p.lifecycle.promote(&auth, "tenant_a").unwrap();
    assert_eq!(promoted.current.unwrap().bundle_id, "bundle-1");

    let resolved = p.resolution.resolve_current("tenant_a").unwrap();
    assert_eq!(resolved.bundle_id, "bundle-1");
    assert_eq!(resolved.runtime_compatibility.min_version, "1.0.0");
}

#[test]
fn test_promote_without_candidate_conflicts() {
    let p = plane(GOOD_ANSWERS);
    let err = p.lifecycle.promote(&tenant_a(), "tenant_a").unwrap_err();
    assert!(matches!(err, BundleError::NoCandidate { .. }));
    assert_eq!(err.class(), ErrorClass::Conflict);
}

#[test]
fn test_failing_gate_blocks_promotion() {
    let p = plane(&[("hours?", "9 to 5"), ("refunds?", "never")]);
    write_bundle(&p.bundles, "bundle-1", "1.0.0", &two_case_suite("tenant_a"));
    let auth = tenant_a();

    p.lifecycle.set_candidate(&auth, "tenant_a", "bundle-1").unwrap();
    let gate = p
        .engine
        .run_gate(&auth, "tenant_a", "bundle-1", None, "req-1")
        .unwrap();
    assert_eq!(gate.outcome, GateOutcome::Fail);
    assert_eq!(gate.summary.failed, 1);

    let err = p.lifecycle.promote(&auth, "tenant_a").unwrap_err();
    assert!(matches!(err, BundleError::GateNotPassed { .. }));
    assert!(
        p.lifecycle
            .aliases(&auth, "tenant_a")
            .unwrap()
            .current
            .is_none()
    );
}

#[test]
fn test_cross_tenant_suite_runs_nothing() {
    let p = plane(GOOD_ANSWERS);
    let mixed = r#"[
        {"tenant_id": "tenant_a", "question": "hours?", "expected_answer": "9 to 5"},
        {"tenant_id": "tenant_b", "question": "refunds?", "expected_answer": "30 days"}
    ]"#;
    write_bundle(&p.bundles, "bundle-1", "1.0.0", mixed);

    let err = p
        .engine
        .run_gate(&tenant_a(), "tenant_a", "bundle-1", None, "req-1")
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Invalid);
    assert_eq!(p.executor.calls.load(Ordering::SeqCst), 0);
    assert!(
        p.engine
            .store()
            .history("tenant_a", "bundle-1")
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_rollback_to_previously_gated_bundle() {
    let p = plane(GOOD_ANSWERS);
    write_bundle(&p.bundles, "bundle-1", "1.0.0", &two_case_suite("tenant_a"));
    write_bundle(&p.bundles, "bundle-2", "1.0.0", &two_case_suite("tenant_a"));
    write_bundle(&p.bundles, "bundle-3", "1.0.0", &two_case_suite("tenant_a"));
    let auth = tenant_a();

    for bundle in ["bundle-1", "bundle-2"] {
        p.lifecycle.set_candidate(&auth, "tenant_a", bundle).unwrap();
        p.engine
            .run_gate(&auth, "tenant_a", bundle, None, "req")
            .unwrap();
        p.lifecycle.promote(&auth, "tenant_a").unwrap();
    }

    let state = p.lifecycle.rollback(&auth, "tenant_a", "bundle-1").unwrap();
    assert_eq!(state.current.unwrap().bundle_id, "bundle-1");
    assert_eq!(state.candidate.unwrap().bundle_id, "bundle-2");

    // Never gated.
    assert!(matches!(
        p.lifecycle.rollback(&auth, "tenant_a", "bundle-3"),
        Err(BundleError::GateNotPassed { .. })
    ));
}

#[test]
fn test_lifecycle_operations_are_idempotent() {
    let p = plane(GOOD_ANSWERS);
    write_bundle(&p.bundles, "bundle-1", "1.0.0", &two_case_suite("tenant_a"));
    let auth = tenant_a();

    let first = p.lifecycle.set_candidate(&auth, "tenant_a", "bundle-1").unwrap();
    let second = p.lifecycle.set_candidate(&auth, "tenant_a", "bundle-1").unwrap();
    assert_eq!(first, second);

    p.engine
        .run_gate(&auth, "tenant_a", "bundle-1", None, "req")
        .unwrap();
    let first = p.lifecycle.promote(&auth, "tenant_a").unwrap();
    let second = p.lifecycle.promote(&auth, "tenant_a").unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_other_tenant_cannot_touch_aliases() {
    let p = plane(GOOD_ANSWERS);
    write_bundle(&p.bundles, "bundle-1", "1.0.0", &two_case_suite("tenant_a"));
    let intruder = AuthenticatedTenant::trusted("tenant_b");

    for err in [
        p.lifecycle
            .set_candidate(&intruder, "tenant_a", "bundle-1")
            .unwrap_err(),
        p.lifecycle.promote(&intruder, "tenant_a").unwrap_err(),
        p.lifecycle
            .rollback(&intruder, "tenant_a", "bundle-1")
            .unwrap_err(),
        p.lifecycle.aliases(&intruder, "tenant_a").unwrap_err(),
        p.engine
            .run_gate(&intruder, "tenant_a", "bundle-1", None, "req")
            .unwrap_err(),
    ] {
        assert_eq!(err.class(), ErrorClass::Forbidden);
    }
    assert_eq!(p.executor.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_gate_history_newest_first() {
    let p = plane(GOOD_ANSWERS);
    write_bundle(&p.bundles, "bundle-1", "1.0.0", &two_case_suite("tenant_a"));
    let auth = tenant_a();

    // Back-to-back runs land within the same second; listing order must
    // still follow run order.
    for round in 0..5 {
        let mut ids = Vec::new();
        for i in 0..3 {
            let gate = p
                .engine
                .run_gate(&auth, "tenant_a", "bundle-1", Some("golden"), &format!("req-{round}-{i}"))
                .unwrap();
            ids.push(gate.gate_id);
        }
        let history = p.engine.store().history("tenant_a", "bundle-1").unwrap();
        let listed: Vec<&str> = history.iter().take(3).map(|g| g.gate_id.as_str()).collect();
        let expected: Vec<&str> = ids.iter().rev().map(String::as_str).collect();
        assert_eq!(listed, expected, "round {round}");
        assert_eq!(history[0].request_id, format!("req-{round}-2"));
    }
}

#[test]
fn test_gate_history_cap_keeps_newest() {
    let p = plane(GOOD_ANSWERS);
    write_bundle(&p.bundles, "bundle-1", "1.0.0", &two_case_suite("tenant_a"));
    let auth = tenant_a();

    let runs = GATE_HISTORY_LIMIT + 5;
    let ids: Vec<String> = (0..runs)
        .map(|i| {
            p.engine
                .run_gate(&auth, "tenant_a", "bundle-1", Some("golden"), &format!("req-{i}"))
                .unwrap()
                .gate_id
        })
        .collect();

    let history = p.engine.store().history("tenant_a", "bundle-1").unwrap();
    assert_eq!(history.len(), GATE_HISTORY_LIMIT);
    let listed: Vec<&str> = history.iter().map(|g| g.gate_id.as_str()).collect();
    let newest: Vec<&str> = ids
        .iter()
        .rev()
        .take(GATE_HISTORY_LIMIT)
        .map(String::as_str)
        .collect();
    assert_eq!(listed, newest);
    assert_eq!(history[0].request_id, format!("req-{}", runs - 1));

    // Trimmed runs are still retrievable individually.
    let oldest = p.engine.store().get("tenant_a", "bundle-1", &ids[0]).unwrap();
    assert_eq!(oldest.sequence, 1);
}

// ============================================================================
// Runtime resolution against the control plane
// ============================================================================

#[tokio::test]
async fn test_runtime_follows_promotion() {
    let p = plane(GOOD_ANSWERS);
    write_bundle(&p.bundles, "bundle-1", "1.2.0", &two_case_suite("tenant_a"));
    let auth = tenant_a();
    p.lifecycle.set_candidate(&auth, "tenant_a", "bundle-1").unwrap();
    p.engine
        .run_gate(&auth, "tenant_a", "bundle-1", None, "req")
        .unwrap();
    p.lifecycle.promote(&auth, "tenant_a").unwrap();

    let origin = ArchiveOrigin {
        archives: HashMap::from([(
            "bundle-1".to_string(),
            pack(&p.bundles.join("bundle-1"), "bundle-1"),
        )]),
        fetches: AtomicUsize::new(0),
    };
    let cache_dir = tempfile::tempdir().unwrap();
    let resolver = RuntimeBundleResolver::new(
        BundleCache::new(cache_dir.path()),
        Arc::new(AliasCatalog::default()),
        "2.0.0".parse::<RuntimeVersion>().unwrap(),
    )
    .with_control_plane(InProcessControlPlane {
        service: p.resolution.clone(),
    })
    .with_origin(origin);

    let first = resolver.resolve_and_ensure("tenant_a", "req-2").await.unwrap();
    assert_eq!(first.bundle_id, "bundle-1");
    assert_eq!(first.source, ResolutionSource::ControlPlane);
    assert_eq!(first.cache_status, Some(CacheStatus::Miss));
    assert_eq!(first.control_plane_status, Some(200));
    assert!(first.path.join("data/faq.json").is_file());

    let second = resolver.resolve_and_ensure("tenant_a", "req-3").await.unwrap();
    assert_eq!(second.cache_status, Some(CacheStatus::Hit));
}

#[tokio::test]
async fn test_old_runtime_rejects_newer_bundle() {
    let p = plane(GOOD_ANSWERS);
    write_bundle(&p.bundles, "bundle-1", "1.3.0", &two_case_suite("tenant_a"));
    let auth = tenant_a();
    p.lifecycle.set_candidate(&auth, "tenant_a", "bundle-1").unwrap();
    p.engine
        .run_gate(&auth, "tenant_a", "bundle-1", None, "req")
        .unwrap();
    p.lifecycle.promote(&auth, "tenant_a").unwrap();

    let cache_dir = tempfile::tempdir().unwrap();
    let origin = ArchiveOrigin {
        archives: HashMap::new(),
        fetches: AtomicUsize::new(0),
    };
    let resolver = RuntimeBundleResolver::new(
        BundleCache::new(cache_dir.path()),
        Arc::new(AliasCatalog::default()),
        "1.2.0".parse::<RuntimeVersion>().unwrap(),
    )
    .with_control_plane(InProcessControlPlane {
        service: p.resolution.clone(),
    })
    .with_origin(origin);

    let err = resolver
        .resolve_and_ensure("tenant_a", "req-2")
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Incompatible);
}

#[tokio::test]
async fn test_unknown_tenant_surfaces_control_plane_status() {
    let p = plane(GOOD_ANSWERS);
    let cache_dir = tempfile::tempdir().unwrap();
    let resolver: RuntimeBundleResolver<InProcessControlPlane, ArchiveOrigin> =
        RuntimeBundleResolver::new(
            BundleCache::new(cache_dir.path()),
            Arc::new(AliasCatalog::default()),
            "1.0.0".parse::<RuntimeVersion>().unwrap(),
        )
        .with_control_plane(InProcessControlPlane {
            service: p.resolution.clone(),
        });

    match resolver.resolve_and_ensure("tenant_z", "req").await {
        Err(BundleError::ControlPlaneUnavailable { status, .. }) => {
            assert_eq!(status, Some(404));
        },
        other => panic!("expected control plane error, got {other:?}"),
    }
}

// ============================================================================
// Cache integrity
// ============================================================================

#[tokio::test]
async fn test_digest_mismatch_leaves_no_entry() {
    let p = plane(GOOD_ANSWERS);
    write_bundle(&p.bundles, "bundle-1", "1.0.0", &two_case_suite("tenant_a"));
    let archive = pack(&p.bundles.join("bundle-1"), "bundle-1");
    let origin = ArchiveOrigin {
        archives: HashMap::from([("bundle-1".to_string(), archive.clone())]),
        fetches: AtomicUsize::new(0),
    };

    let cache_dir = tempfile::tempdir().unwrap();
    let cache = BundleCache::new(cache_dir.path().join("cache"));
    let wrong = ContentDigest::of(b"something else").to_hex();

    let err = cache
        .ensure_local("bundle-1", Some(&wrong), Some(&origin))
        .await
        .unwrap_err();
    assert!(matches!(err, BundleError::DigestMismatch { .. }));
    assert_eq!(err.class(), ErrorClass::Internal);
    assert!(cache.lookup("bundle-1").unwrap().is_none());

    let right = ContentDigest::of(&archive).to_hex();
    let installed = cache
        .ensure_local("bundle-1", Some(&format!("sha256:{right}")), Some(&origin))
        .await
        .unwrap();
    assert_eq!(installed.status, CacheStatus::Miss);
    assert_eq!(origin.fetches.load(Ordering::SeqCst), 2);
}
