//! Quality gate engine.
//!
//! A gate run is all-or-nothing on validation: every suite requested is
//! parsed and tenant-checked before the first case executes. Execution is
//! sequential, suite order then case order, and the run-wide case index
//! feeds the derived request id `"{request_id}:case:{index}"`.
//!
//! A 5xx status or a transport fault from the executor aborts the run. The
//! aborted run is still persisted, with outcome `error` and only the cases
//! that completed, and the caller receives [`BundleError::RuntimeFault`].
//! If that record cannot be written the caller receives
//! [`BundleError::Storage`] naming both failures instead.

use std::path::Path;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::result::{
    CaseOutcome, CaseResult, GateCriteria, GateOutcome, GateResult, GateStatus, GateSummary,
    SuiteResult,
};
use super::store::GateResultStore;
use super::suite::{self, Suite};
use crate::auth::{AuthenticatedTenant, require_tenant};
use crate::bundle::BundleLocator;
use crate::error::BundleError;
use crate::ids;

/// One case handed to the runtime.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    /// Tenant under test.
    pub tenant_id: &'a str,
    /// Bundle under test.
    pub bundle_id: &'a str,
    /// Directory of the bundle under test.
    pub bundle_path: &'a Path,
    /// Case question.
    pub question: &'a str,
    /// Derived per-case request id.
    pub request_id: &'a str,
}

/// What the runtime reported for one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// HTTP-equivalent status.
    pub http_status: u16,
    /// Reported answer, if any.
    pub answer: Option<String>,
}

/// The runtime could not be reached at all.
#[derive(Debug, Error)]
#[error("runtime transport fault: {0}")]
pub struct TransportFault(pub String);

/// Runtime execution interface used by gate runs.
pub trait RuntimeExecutor: Send + Sync {
    /// Execute one case.
    fn execute(&self, request: &ExecutionRequest<'_>) -> Result<ExecutionOutcome, TransportFault>;
}

/// Runs golden suites and persists [`GateResult`]s.
#[derive(Clone)]
pub struct QualityGateEngine {
    locator: Arc<dyn BundleLocator>,
    store: GateResultStore,
    executor: Arc<dyn RuntimeExecutor>,
}

impl std::fmt::Debug for QualityGateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityGateEngine")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

enum CaseStep {
    Done(CaseResult),
    Fatal(String),
}

impl QualityGateEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        locator: Arc<dyn BundleLocator>,
        store: GateResultStore,
        executor: Arc<dyn RuntimeExecutor>,
    ) -> Self {
        Self {
            locator,
            store,
            executor,
        }
    }

    /// The result store backing this engine.
    #[must_use]
    pub const fn store(&self) -> &GateResultStore {
        &self.store
    }

    /// Run a gate for `(tenant_id, bundle_id)`.
    ///
    /// With `suite_id` only that suite runs; otherwise every suite shipped
    /// with the bundle runs in file-name order.
    pub fn run_gate(
        &self,
        auth: &AuthenticatedTenant,
        tenant_id: &str,
        bundle_id: &str,
        suite_id: Option<&str>,
        request_id: &str,
    ) -> Result<GateResult, BundleError> {
        require_tenant(auth, tenant_id)?;
        ids::tenant(tenant_id)?;
        ids::bundle(bundle_id)?;

        let located = self.locator.locate(bundle_id)?;
        let suites = match suite_id {
            Some(suite_id) => vec![suite::load_suite(&located.path, bundle_id, suite_id)?],
            None => suite::load_all(&located.path, bundle_id)?,
        };
        for suite in &suites {
            suite.ensure_tenant(tenant_id)?;
        }

        let gate_id = Uuid::new_v4().to_string();
        tracing::info!(
            tenant_id,
            bundle_id,
            gate_id = %gate_id,
            suites = suites.len(),
            "gate run started"
        );

        let mut summary = GateSummary::default();
        let mut suite_results = Vec::with_capacity(suites.len());
        let mut next_index = 0usize;
        let mut fault = None;

        for suite in &suites {
            let (suite_result, fatal) =
                self.run_suite(suite, tenant_id, bundle_id, &located.path, request_id, &mut next_index);
            summary.absorb(suite_result.summary());
            suite_results.push(suite_result);
            if let Some(detail) = fatal {
                fault = Some(detail);
                break;
            }
        }

        let outcome = if fault.is_some() {
            GateOutcome::Error
        } else if summary.failed == 0 {
            GateOutcome::Pass
        } else {
            GateOutcome::Fail
        };

        let result = GateResult {
            gate_id: gate_id.clone(),
            sequence: 0,
            request_id: request_id.to_string(),
            tenant_id: tenant_id.to_string(),
            bundle_id: bundle_id.to_string(),
            status: GateStatus::Completed,
            outcome,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            criteria: GateCriteria::default(),
            summary,
            suites: suite_results,
        };

        if let Some(detail) = fault {
            let case_index = next_index;
            if let Err(e) = self.store.append(result) {
                tracing::error!(
                    tenant_id,
                    bundle_id,
                    gate_id = %gate_id,
                    case_index,
                    detail = %detail,
                    error = %e,
                    "gate run aborted by runtime fault and not recorded"
                );
                return Err(BundleError::Storage {
                    detail: format!(
                        "gate run {gate_id} aborted at case {case_index} ({detail}) and was not recorded: {e}"
                    ),
                });
            }
            tracing::error!(
                tenant_id,
                bundle_id,
                gate_id = %gate_id,
                case_index,
                detail = %detail,
                "gate run aborted by runtime fault"
            );
            return Err(BundleError::RuntimeFault {
                gate_id,
                case_index,
                detail,
            });
        }

        let result = self.store.append(result)?;
        tracing::info!(
            tenant_id,
            bundle_id,
            gate_id = %result.gate_id,
            sequence = result.sequence,
            outcome = ?result.outcome,
            total = result.summary.total,
            failed = result.summary.failed,
            "gate run completed"
        );
        Ok(result)
    }

    /// Run one suite. Returns the suite aggregate and, on a fatal fault,
    /// its detail; `next_index` is left at the faulting case.
    fn run_suite(
        &self,
        suite: &Suite,
        tenant_id: &str,
        bundle_id: &str,
        bundle_path: &Path,
        request_id: &str,
        next_index: &mut usize,
    ) -> (SuiteResult, Option<String>) {
        let mut totals = GateSummary::default();
        let mut cases = Vec::with_capacity(suite.cases.len());
        let mut fatal = None;

        for case in &suite.cases {
            let case_index = *next_index;
            let case_request_id = format!("{request_id}:case:{case_index}");
            let request = ExecutionRequest {
                tenant_id,
                bundle_id,
                bundle_path,
                question: &case.question,
                request_id: &case_request_id,
            };
            match self.execute_case(&request, case_index, &case.expected_answer) {
                CaseStep::Done(case_result) => {
                    totals.record(case_result.outcome);
                    cases.push(case_result);
                    *next_index += 1;
                },
                CaseStep::Fatal(detail) => {
                    fatal = Some(detail);
                    break;
                },
            }
        }

        let outcome = if fatal.is_some() {
            GateOutcome::Error
        } else if totals.failed == 0 {
            GateOutcome::Pass
        } else {
            GateOutcome::Fail
        };
        (
            SuiteResult {
                suite_id: suite.suite_id.clone(),
                total: totals.total,
                passed: totals.passed,
                failed: totals.failed,
                outcome,
                cases,
            },
            fatal,
        )
    }

    fn execute_case(
        &self,
        request: &ExecutionRequest<'_>,
        case_index: usize,
        expected_answer: &str,
    ) -> CaseStep {
        let reply = match self.executor.execute(request) {
            Ok(reply) => reply,
            Err(fault) => return CaseStep::Fatal(fault.to_string()),
        };
        if reply.http_status >= 500 {
            return CaseStep::Fatal(format!("runtime returned status {}", reply.http_status));
        }
        let success = (200..300).contains(&reply.http_status);
        let outcome = if success && reply.answer.as_deref() == Some(expected_answer) {
            CaseOutcome::Pass
        } else {
            CaseOutcome::Fail
        };
        tracing::debug!(
            request_id = %request.request_id,
            case_index,
            status = reply.http_status,
            outcome = ?outcome,
            "gate case executed"
        );
        CaseStep::Done(CaseResult {
            case_index,
            tenant_id: request.tenant_id.to_string(),
            request_id: request.request_id.to_string(),
            outcome,
            http_status: reply.http_status,
        })
    }
}
