//! Fuzz harness for `Suite::parse`.
//!
//! Suites ship inside operator-supplied bundles. Parsing must never panic,
//! and an accepted suite must be non-empty with every field non-empty.

#![no_main]
use bundlegate_core::gate::Suite;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(suite) = Suite::parse("golden", data) {
        assert!(!suite.cases.is_empty());
        for case in &suite.cases {
            assert!(!case.tenant_id.is_empty());
            assert!(!case.question.is_empty());
            assert!(!case.expected_answer.is_empty());
        }
    }
});
