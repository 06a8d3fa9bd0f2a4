//! Quality gates: golden suites, gate results, their store and the engine
//! that runs suites against a [`RuntimeExecutor`].

mod engine;
mod result;
mod store;
pub mod suite;

pub use engine::{
    ExecutionOutcome, ExecutionRequest, QualityGateEngine, RuntimeExecutor, TransportFault,
};
pub use result::{
    CaseOutcome, CaseResult, GateCriteria, GateOutcome, GateResult, GateStatus, GateSummary,
    SuiteResult,
};
pub use store::{GATE_HISTORY_LIMIT, GateResultStore};
pub use suite::{Suite, SuiteCase};
