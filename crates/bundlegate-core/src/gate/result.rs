//! Gate result record.
//!
//! One record per gate run, immutable once written. The JSON shape is the
//! wire format returned by the control plane.

use serde::{Deserialize, Serialize};

/// Outcome of a whole gate run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOutcome {
    /// Every case passed.
    Pass,
    /// At least one case failed.
    Fail,
    /// The run was aborted by a runtime fault.
    Error,
}

/// Outcome of a single case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseOutcome {
    /// Success status and exact answer match.
    Pass,
    /// Non-success status or answer mismatch.
    Fail,
}

/// Run status; every persisted record is completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    /// The run finished (with any outcome).
    Completed,
}

/// Pass criteria recorded with every result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateCriteria {
    /// Rule name.
    pub pass_rule: String,
    /// Failures tolerated.
    pub max_failures: u32,
}

impl Default for GateCriteria {
    fn default() -> Self {
        Self {
            pass_rule: "all_cases_must_pass".to_string(),
            max_failures: 0,
        }
    }
}

/// Totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSummary {
    /// Cases executed.
    pub total: u32,
    /// Cases passed.
    pub passed: u32,
    /// Cases failed.
    pub failed: u32,
}

impl GateSummary {
    pub(crate) fn record(&mut self, outcome: CaseOutcome) {
        self.total += 1;
        match outcome {
            CaseOutcome::Pass => self.passed += 1,
            CaseOutcome::Fail => self.failed += 1,
        }
    }

    pub(crate) fn absorb(&mut self, other: Self) {
        self.total += other.total;
        self.passed += other.passed;
        self.failed += other.failed;
    }
}

/// Result of one executed case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResult {
    /// Run-wide case index.
    pub case_index: usize,
    /// Tenant the case ran under.
    pub tenant_id: String,
    /// Derived request id `"{request_id}:case:{case_index}"`.
    pub request_id: String,
    /// Case outcome.
    pub outcome: CaseOutcome,
    /// Status reported by the runtime.
    pub http_status: u16,
}

/// Per-suite aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteResult {
    /// Suite id.
    pub suite_id: String,
    /// Cases executed.
    pub total: u32,
    /// Cases passed.
    pub passed: u32,
    /// Cases failed.
    pub failed: u32,
    /// `pass` iff no case failed.
    pub outcome: GateOutcome,
    /// Case results in execution order.
    pub cases: Vec<CaseResult>,
}

impl SuiteResult {
    pub(crate) fn summary(&self) -> GateSummary {
        GateSummary {
            total: self.total,
            passed: self.passed,
            failed: self.failed,
        }
    }
}

/// Persisted gate run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResult {
    /// Unique run id.
    pub gate_id: String,
    /// Position of this run among the runs of `(tenant_id, bundle_id)`,
    /// starting at 1. Assigned by the store when the record is appended.
    #[serde(default)]
    pub sequence: u64,
    /// Request that triggered the run.
    pub request_id: String,
    /// Tenant under test.
    pub tenant_id: String,
    /// Bundle under test.
    pub bundle_id: String,
    /// Always `completed`.
    pub status: GateStatus,
    /// Overall outcome.
    pub outcome: GateOutcome,
    /// RFC 3339 UTC timestamp.
    pub created_at: String,
    /// Pass criteria.
    #[serde(default)]
    pub criteria: GateCriteria,
    /// Overall totals.
    #[serde(default)]
    pub summary: GateSummary,
    /// Per-suite results in execution order.
    #[serde(default)]
    pub suites: Vec<SuiteResult>,
}

impl GateResult {
    /// Whether this run authorizes promotion/rollback.
    #[must_use]
    pub fn is_pass(&self) -> bool {
        self.outcome == GateOutcome::Pass && self.status == GateStatus::Completed
    }
}
