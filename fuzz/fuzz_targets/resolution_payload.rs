//! Fuzz harness for `ResolutionResponse::from_payload`.
//!
//! The runtime treats control-plane bodies as untrusted. An accepted payload
//! must carry a path-safe bundle id and a parsable minimum version, and must
//! survive a serialize/parse cycle unchanged.

#![no_main]
use bundlegate_core::ids;
use bundlegate_core::resolution::ResolutionResponse;
use bundlegate_core::runtime::RuntimeVersion;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(resolution) = ResolutionResponse::from_payload(data) else {
        return;
    };
    assert!(ids::bundle(&resolution.bundle_id).is_ok());
    assert!(
        resolution
            .runtime_compatibility
            .min_version
            .parse::<RuntimeVersion>()
            .is_ok()
    );

    let reencoded = serde_json::to_vec(&resolution).expect("resolution serializes");
    let reparsed = ResolutionResponse::from_payload(&reencoded).expect("re-encoded payload parses");
    assert_eq!(reparsed, resolution);
});
