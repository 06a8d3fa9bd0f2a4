//! One audit event per request.
//!
//! A handler opens an [`AuditScope`] before doing any work, fills in what it
//! learns along the way and closes it with [`AuditScope::finish`], which
//! stamps status and latency and emits the event. If the sink fails the
//! request fails with it, even when the operation itself succeeded.

use std::sync::Arc;
use std::time::Instant;

use bundlegate_core::BundleError;
use bundlegate_core::audit::{Actor, AuditEvent, AuditSink};

use crate::api_error::ApiError;

/// Audit record under construction for one request.
pub struct AuditScope {
    sink: Arc<dyn AuditSink>,
    event: AuditEvent,
    started: Instant,
}

impl AuditScope {
    /// Open a scope; the tenant is filled in once authenticated.
    #[must_use]
    pub fn begin(
        sink: Arc<dyn AuditSink>,
        service: &'static str,
        event: &'static str,
        request_id: &str,
        actor: Actor,
    ) -> Self {
        Self {
            sink,
            event: AuditEvent::new(service, event, "", request_id, actor),
            started: Instant::now(),
        }
    }

    /// Record the authenticated tenant.
    pub fn set_tenant(&mut self, tenant_id: &str) {
        tenant_id.clone_into(&mut self.event.tenant_id);
    }

    /// Record the initiator.
    pub fn set_actor(&mut self, actor: Actor) {
        self.event.actor = actor;
    }

    /// Record the bundle involved.
    pub fn set_bundle(&mut self, bundle_id: &str) {
        self.event.bundle_id = Some(bundle_id.to_string());
    }

    /// Record the gate run involved.
    pub fn set_gate(&mut self, gate_id: &str) {
        self.event.gate_id = Some(gate_id.to_string());
    }

    /// Attach an operation-specific field.
    pub fn detail(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.event.details.insert(key.to_string(), value.into());
    }

    /// Stamp the outcome, emit the event and hand the result back.
    pub fn finish<T>(self, result: Result<T, BundleError>) -> Result<T, ApiError> {
        let (status, code) = match &result {
            Ok(_) => (200, None),
            Err(e) => (e.class().http_status(), Some(e.class().code())),
        };
        let mut event = self.event.with_status(status, code);
        event.latency_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if let Err(e) = self.sink.emit(&event) {
            tracing::error!(
                event = event.event,
                request_id = %event.request_id,
                error = %e,
                "audit sink failure"
            );
            return Err(ApiError(BundleError::from(e)));
        }
        result.map_err(ApiError)
    }
}

#[cfg(test)]
mod tests {
    use bundlegate_core::ErrorClass;
    use bundlegate_core::audit::{AuditError, MemoryAuditSink};

    use super::*;

    struct BrokenSink;

    impl AuditSink for BrokenSink {
        fn emit(&self, _event: &AuditEvent) -> Result<(), AuditError> {
            Err(AuditError::Write(std::io::Error::other("disk full")))
        }
    }

    #[test]
    fn test_finish_records_outcome() {
        let sink = Arc::new(MemoryAuditSink::default());
        let mut scope = AuditScope::begin(sink.clone(), "control_plane", "promote", "req-1", Actor::Operator);
        scope.set_tenant("tenant_a");
        let err = scope
            .finish::<()>(Err(BundleError::NoCandidate {
                tenant_id: "tenant_a".into(),
            }))
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Conflict);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tenant_id, "tenant_a");
        assert_eq!(events[0].http_status, 409);
        assert_eq!(events[0].outcome, "error");
        assert_eq!(events[0].error_code, Some("conflict"));
    }

    #[test]
    fn test_sink_failure_fails_request() {
        let scope = AuditScope::begin(Arc::new(BrokenSink), "runtime", "execute", "req-1", Actor::ExternalClient);
        let err = scope.finish(Ok(42)).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Internal);
    }
}
