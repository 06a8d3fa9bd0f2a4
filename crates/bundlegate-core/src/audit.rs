//! Audit events and sinks.
//!
//! Every top-level operation emits exactly one [`AuditEvent`], success or
//! failure. Events are flat JSON objects written one per line. A sink
//! failure is reported to the caller as [`BundleError::Audit`] so an
//! operation is never acknowledged without its audit record.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::error::BundleError;

/// Audit sink failure.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The sink could not be opened.
    #[error("cannot open audit file {path}: {source}")]
    Open {
        /// Audit file.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// An event could not be written.
    #[error("audit write failed: {0}")]
    Write(#[source] io::Error),
    /// An event could not be serialized.
    #[error("audit serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<AuditError> for BundleError {
    fn from(err: AuditError) -> Self {
        Self::Audit {
            detail: err.to_string(),
        }
    }
}

/// Who initiated the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    /// An authenticated tenant via the public API.
    ExternalClient,
    /// An operator via the control-plane API.
    Operator,
    /// Another bundlegate service (runtime → control plane).
    Service,
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    /// RFC 3339 UTC, second precision.
    pub ts_utc: String,
    /// Emitting service (`control_plane` or `runtime`).
    pub service: &'static str,
    /// Operation name.
    pub event: &'static str,
    /// Tenant, empty when authentication failed before one was known.
    pub tenant_id: String,
    /// Request id.
    pub request_id: String,
    /// Initiator.
    pub actor: Actor,
    /// `ok` or `error`.
    pub outcome: &'static str,
    /// Status returned to the caller.
    pub http_status: u16,
    /// Wall time of the operation.
    pub latency_ms: u64,
    /// Error class code on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    /// Bundle involved, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    /// Gate run involved, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_id: Option<String>,
    /// Operation-specific fields, flattened into the record.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl AuditEvent {
    /// Start an event stamped with the current time.
    #[must_use]
    pub fn new(
        service: &'static str,
        event: &'static str,
        tenant_id: impl Into<String>,
        request_id: impl Into<String>,
        actor: Actor,
    ) -> Self {
        Self {
            ts_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            service,
            event,
            tenant_id: tenant_id.into(),
            request_id: request_id.into(),
            actor,
            outcome: "ok",
            http_status: 200,
            latency_ms: 0,
            error_code: None,
            bundle_id: None,
            gate_id: None,
            details: Map::new(),
        }
    }

    /// Record the final status; 4xx/5xx mark the event as an error.
    #[must_use]
    pub fn with_status(mut self, http_status: u16, error_code: Option<&'static str>) -> Self {
        self.http_status = http_status;
        self.outcome = if http_status < 400 { "ok" } else { "error" };
        self.error_code = error_code;
        self
    }

    /// Attach an operation-specific field.
    #[must_use]
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// SHA-256 hex of free text, used to audit questions without storing them.
#[must_use]
pub fn text_sha256(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    /// Record one event.
    fn emit(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// JSON-lines sink over any writer (stdout or an append-only file).
pub struct JsonLinesAuditSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for JsonLinesAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesAuditSink").finish_non_exhaustive()
    }
}

impl JsonLinesAuditSink {
    /// Sink writing to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::from_writer(Box::new(io::stdout()))
    }

    /// Sink appending to `path`, creating it and its parent if missing.
    pub fn file(path: &Path) -> Result<Self, AuditError> {
        let open_err = |source| AuditError::Open {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(open_err)?;
        }
        let file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(open_err)?;
        Ok(Self::from_writer(Box::new(file)))
    }

    /// Sink over an arbitrary writer.
    #[must_use]
    pub fn from_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl AuditSink for JsonLinesAuditSink {
    fn emit(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        out.write_all(&line).map_err(AuditError::Write)?;
        out.flush().map_err(AuditError::Write)
    }
}

/// Sink that drops every event (`[audit] enabled = false`).
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledAuditSink;

impl AuditSink for DisabledAuditSink {
    fn emit(&self, _event: &AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Sink retaining events in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Snapshot of recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_shape() {
        let event = AuditEvent::new("runtime", "execute", "tenant_a", "req-1", Actor::ExternalClient)
            .with_status(503, Some("unavailable"))
            .with_detail("control_plane_status", 500);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["outcome"], "error");
        assert_eq!(json["actor"], "external_client");
        assert_eq!(json["error_code"], "unavailable");
        assert_eq!(json["control_plane_status"], 500);
        assert!(json.get("bundle_id").is_none());
        assert!(json["ts_utc"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_file_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("events.log.jsonl");
        let sink = JsonLinesAuditSink::file(&path).unwrap();
        for id in ["r1", "r2"] {
            sink.emit(&AuditEvent::new("control_plane", "promote", "t", id, Actor::Operator))
                .unwrap();
        }
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["request_id"], "r2");
    }

    #[test]
    fn test_question_hash() {
        assert_eq!(
            text_sha256("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
