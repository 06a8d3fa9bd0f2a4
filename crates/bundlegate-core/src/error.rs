//! Error taxonomy shared by the control plane and the runtime.
//!
//! Every [`BundleError`] variant belongs to exactly one [`ErrorClass`], and
//! every class maps to one stable HTTP status and one stable machine code so
//! callers can branch between retry, operator alert, and configuration fix.
//!
//! Variants carry detail for logs. [`BundleError::public_message`] is what
//! leaves the process: it never includes filesystem paths or IO errors.

use thiserror::Error;

/// Stable classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Tenant, bundle, gate or suite absent.
    NotFound,
    /// Promote without candidate, promote/rollback without a passing gate.
    Conflict,
    /// Malformed suite, cross-tenant case, malformed response or identifier.
    Invalid,
    /// Origin or control plane unreachable or erroring. Retryable.
    Unavailable,
    /// Local runtime version below the bundle minimum.
    Incompatible,
    /// Storage failure, configuration error, integrity failure.
    Internal,
    /// Missing or unknown credentials.
    Unauthorized,
    /// Authenticated identity does not match the requested tenant.
    Forbidden,
    /// Rate limit or quota exceeded. Retryable after the window resets.
    RateLimited,
}

impl ErrorClass {
    /// HTTP status code for this class.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Invalid => 422,
            Self::Unavailable => 503,
            Self::Incompatible => 412,
            Self::Internal => 500,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::RateLimited => 429,
        }
    }

    /// Machine-readable error code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Invalid => "invalid",
            Self::Unavailable => "unavailable",
            Self::Incompatible => "incompatible",
            Self::Internal => "internal",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::RateLimited => "rate_limited",
        }
    }

    /// Whether a caller may retry the same request unchanged.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Unavailable | Self::RateLimited)
    }
}

/// Errors produced by bundle lifecycle, gate, resolution and cache
/// operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BundleError {
    /// No alias or catalog entry exists for the tenant.
    #[error("no alias configured for tenant {tenant_id}")]
    TenantNotFound {
        /// Tenant that was looked up.
        tenant_id: String,
    },

    /// The bundle cannot be located.
    #[error("bundle {bundle_id} not found")]
    BundleNotFound {
        /// Requested bundle.
        bundle_id: String,
    },

    /// The requested suite is not shipped with the bundle.
    #[error("suite {suite_id} not found in bundle {bundle_id}")]
    SuiteNotFound {
        /// Bundle searched.
        bundle_id: String,
        /// Requested suite.
        suite_id: String,
    },

    /// No gate result with this id exists.
    #[error("gate {gate_id} not found")]
    GateNotFound {
        /// Requested gate.
        gate_id: String,
    },

    /// Promote was requested but the tenant has no candidate.
    #[error("tenant {tenant_id} has no candidate to promote")]
    NoCandidate {
        /// Tenant.
        tenant_id: String,
    },

    /// Promote/rollback target has no passing gate result.
    #[error("bundle {bundle_id} has no passing gate for tenant {tenant_id}")]
    GateNotPassed {
        /// Tenant.
        tenant_id: String,
        /// Bundle that lacks a passing gate.
        bundle_id: String,
    },

    /// A suite file or case is malformed.
    #[error("suite invalid: {detail}")]
    InvalidSuite {
        /// What is wrong.
        detail: String,
    },

    /// A suite case targets another tenant.
    #[error("suite {suite_id} case {case_index} targets tenant {case_tenant}, not {tenant_id}")]
    CrossTenantCase {
        /// Suite holding the case.
        suite_id: String,
        /// Position of the case within its suite.
        case_index: usize,
        /// Tenant under test.
        tenant_id: String,
        /// Tenant named by the case.
        case_tenant: String,
    },

    /// An identifier is empty, too long, or not path-safe.
    #[error("invalid {kind}: {value:?}")]
    InvalidIdentifier {
        /// Identifier kind (`tenant_id`, `bundle_id`, ...).
        kind: &'static str,
        /// Offending value.
        value: String,
    },

    /// A resolution response is malformed.
    #[error("control plane response invalid: {detail}")]
    InvalidResolution {
        /// What is wrong.
        detail: String,
    },

    /// An expected digest is not a SHA-256 hex string.
    #[error("invalid content digest: {detail}")]
    InvalidDigest {
        /// What is wrong.
        detail: String,
    },

    /// A request body could not be decoded.
    #[error("invalid request: {detail}")]
    InvalidRequest {
        /// What is wrong.
        detail: String,
    },

    /// The control plane could not be reached or answered non-2xx.
    #[error("control plane unavailable: {detail}")]
    ControlPlaneUnavailable {
        /// Transport or status detail.
        detail: String,
        /// HTTP status, when one was received.
        status: Option<u16>,
    },

    /// The origin could not be reached or does not hold the archive.
    #[error("origin unavailable for bundle {bundle_id}: {detail}")]
    OriginUnavailable {
        /// Bundle being fetched.
        bundle_id: String,
        /// Transport or status detail.
        detail: String,
    },

    /// Local runtime version is below the bundle minimum.
    #[error("runtime {runtime_version} incompatible with bundle minimum {min_version}")]
    Incompatible {
        /// Local runtime version.
        runtime_version: String,
        /// Minimum required by the bundle.
        min_version: String,
    },

    /// Fetched archive digest differs from the expected digest.
    #[error("bundle {bundle_id} digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch {
        /// Bundle being installed.
        bundle_id: String,
        /// Expected digest.
        expected: String,
        /// Digest of the fetched bytes.
        computed: String,
    },

    /// A digest is required by policy but the resolution carried none.
    #[error("bundle {bundle_id} has no content digest and digests are required")]
    DigestRequired {
        /// Bundle being installed.
        bundle_id: String,
    },

    /// Unpacked archive lacks required structure.
    #[error("bundle {bundle_id} structure invalid: {detail}")]
    StructureInvalid {
        /// Bundle being installed.
        bundle_id: String,
        /// What is missing or wrong.
        detail: String,
    },

    /// Bundle location or manifest missing or lacking required fields.
    #[error("bundle metadata invalid: {detail}")]
    BundleMetadata {
        /// What is wrong.
        detail: String,
    },

    /// A bundle ships no suites at all.
    #[error("bundle {bundle_id} ships no suites")]
    NoSuites {
        /// Bundle under test.
        bundle_id: String,
    },

    /// The runtime failed fatally while executing a gate case.
    #[error("runtime fault on case {case_index} of gate {gate_id}: {detail}")]
    RuntimeFault {
        /// Gate run that was aborted.
        gate_id: String,
        /// Run-wide index of the case.
        case_index: usize,
        /// Status or transport detail.
        detail: String,
    },

    /// Configuration missing or invalid.
    #[error("configuration error: {detail}")]
    Config {
        /// What is wrong.
        detail: String,
    },

    /// Filesystem failure.
    #[error("storage error: {detail}")]
    Storage {
        /// Detail including the path.
        detail: String,
    },

    /// Audit sink rejected an event.
    #[error("audit sink failure: {detail}")]
    Audit {
        /// Sink error.
        detail: String,
    },

    /// Credentials missing or unknown.
    #[error("unauthorized")]
    Unauthorized,

    /// Authenticated tenant does not match the requested tenant.
    #[error("forbidden: {detail}")]
    Forbidden {
        /// Why access was refused.
        detail: String,
    },

    /// Rate limit or quota exceeded.
    #[error("{bucket} exceeded for tenant {tenant_id}")]
    RateLimited {
        /// Tenant.
        tenant_id: String,
        /// `"rate limit"` or `"quota"`.
        bucket: &'static str,
        /// Configured maximum.
        limit: u32,
        /// Unix second at which the window resets.
        reset: u64,
        /// Seconds until a retry may succeed.
        retry_after_secs: u64,
    },
}

impl BundleError {
    /// Classification of this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::TenantNotFound { .. }
            | Self::BundleNotFound { .. }
            | Self::SuiteNotFound { .. }
            | Self::GateNotFound { .. } => ErrorClass::NotFound,
            Self::NoCandidate { .. } | Self::GateNotPassed { .. } => ErrorClass::Conflict,
            Self::InvalidSuite { .. }
            | Self::CrossTenantCase { .. }
            | Self::InvalidIdentifier { .. }
            | Self::InvalidResolution { .. }
            | Self::InvalidDigest { .. }
            | Self::InvalidRequest { .. } => ErrorClass::Invalid,
            Self::ControlPlaneUnavailable { .. } | Self::OriginUnavailable { .. } => {
                ErrorClass::Unavailable
            },
            Self::Incompatible { .. } => ErrorClass::Incompatible,
            Self::DigestMismatch { .. }
            | Self::DigestRequired { .. }
            | Self::StructureInvalid { .. }
            | Self::BundleMetadata { .. }
            | Self::NoSuites { .. }
            | Self::RuntimeFault { .. }
            | Self::Config { .. }
            | Self::Storage { .. }
            | Self::Audit { .. } => ErrorClass::Internal,
            Self::Unauthorized => ErrorClass::Unauthorized,
            Self::Forbidden { .. } => ErrorClass::Forbidden,
            Self::RateLimited { .. } => ErrorClass::RateLimited,
        }
    }

    /// Message safe to return to a remote caller.
    ///
    /// Storage and configuration errors collapse to a generic message; the
    /// full detail is only logged.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Storage { .. } => "Internal server error".to_string(),
            Self::Config { .. } => "Runtime configuration error".to_string(),
            Self::Audit { .. } => "Audit sink failure".to_string(),
            Self::DigestMismatch { .. } => "Bundle digest mismatch".to_string(),
            Self::DigestRequired { .. } => "Bundle digest required".to_string(),
            Self::StructureInvalid { .. } => "Bundle structure invalid".to_string(),
            Self::BundleMetadata { .. } => "Bundle metadata missing".to_string(),
            Self::NoSuites { .. } => "Bundle ships no suites".to_string(),
            Self::RuntimeFault { gate_id, .. } => format!("Runtime fault during gate {gate_id}"),
            Self::InvalidSuite { .. } | Self::CrossTenantCase { .. } => "Suite invalid".to_string(),
            Self::OriginUnavailable { .. } => "Bundle not found in origin".to_string(),
            Self::ControlPlaneUnavailable {
                status: Some(status),
                ..
            } => format!("Control Plane error: {status}"),
            Self::ControlPlaneUnavailable { status: None, .. } => {
                "Control Plane unreachable".to_string()
            },
            Self::Incompatible { .. } => "Runtime incompatible with bundle".to_string(),
            Self::Unauthorized => "Unauthorized".to_string(),
            Self::Forbidden { .. } => "Forbidden".to_string(),
            Self::RateLimited { bucket, .. } => {
                if *bucket == QUOTA_BUCKET {
                    "Quota exceeded".to_string()
                } else {
                    "Rate limit exceeded".to_string()
                }
            },
            other => other.to_string(),
        }
    }

    pub(crate) fn storage(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Self::Storage {
            detail: format!("{context}: {err}"),
        }
    }
}

/// Bucket name reported by [`BundleError::RateLimited`] for quota exhaustion.
pub const QUOTA_BUCKET: &str = "quota";

/// Bucket name reported by [`BundleError::RateLimited`] for rate limiting.
pub const RATE_LIMIT_BUCKET: &str = "rate limit";
