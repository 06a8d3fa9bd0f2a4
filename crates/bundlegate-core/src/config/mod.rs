//! Configuration parsing and validation.
//!
//! One TOML file (`bundlegate.toml`) configures both daemons:
//!
//! ```toml
//! [control_plane]
//! listen = "127.0.0.1:8081"
//! alias_state_root = "/var/lib/bundlegate/aliases"
//! gate_root = "/var/lib/bundlegate/gates"
//! bundle_roots = ["/srv/bundles"]
//!
//! [runtime]
//! control_plane_url = "http://127.0.0.1:8081"
//! origin_url = "http://origin.internal/bundles"
//! cache_dir = "/var/cache/bundlegate"
//!
//! [limits]
//! rate_limit = { window_secs = 60, max_requests = 60 }
//! quota = { window_secs = 86400, max_requests = 10000 }
//! ```
//!
//! Validation is fail-closed: zero timeouts, zero windows or limits, a
//! malformed runtime version and a file audit sink without a path are all
//! rejected at load time.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::limits::{BucketPolicy, LimitPolicy, TenantLimits};
use crate::runtime::RuntimeVersion;

/// Default bound on a control-plane resolution call.
pub const DEFAULT_CONTROL_PLANE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default bound on an origin archive fetch.
pub const DEFAULT_ORIGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundlegateConfig {
    /// Control-plane daemon.
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,

    /// Runtime daemon.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Audit sink.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Runtime rate limit and quota.
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl BundlegateConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check every cross-field and range constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.runtime.validate()?;
        self.audit.validate()?;
        self.limits.validate()?;
        if self.control_plane.bundle_roots.is_empty() {
            tracing::debug!("no bundle roots configured; bundles resolve through the catalog only");
        }
        Ok(())
    }
}

/// Control-plane daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlPlaneConfig {
    /// Listen address.
    #[serde(default = "default_control_plane_listen")]
    pub listen: SocketAddr,

    /// Directory of per-tenant alias state files.
    #[serde(default = "default_alias_state_root")]
    pub alias_state_root: PathBuf,

    /// Directory of gate results.
    #[serde(default = "default_gate_root")]
    pub gate_root: PathBuf,

    /// Directories searched for `<root>/<bundle_id>/manifest.yaml`.
    #[serde(default)]
    pub bundle_roots: Vec<PathBuf>,

    /// Static tenant → bundle catalog.
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,

    /// Tenant token file.
    #[serde(default = "default_tokens_path")]
    pub tokens_path: PathBuf,

    /// Environment variable holding the service token runtimes present on
    /// the resolve route.
    #[serde(default)]
    pub service_token_env: Option<String>,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            listen: default_control_plane_listen(),
            alias_state_root: default_alias_state_root(),
            gate_root: default_gate_root(),
            bundle_roots: Vec::new(),
            catalog_path: default_catalog_path(),
            tokens_path: default_tokens_path(),
            service_token_env: None,
        }
    }
}

/// Runtime daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Listen address.
    #[serde(default = "default_runtime_listen")]
    pub listen: SocketAddr,

    /// Control-plane base URL. Absent: resolve from the static catalog.
    #[serde(default)]
    pub control_plane_url: Option<String>,

    /// Bound on a resolution call, in milliseconds (> 0).
    #[serde(default = "default_control_plane_timeout_ms")]
    pub control_plane_timeout_ms: u64,

    /// Environment variable holding the service token sent to the control
    /// plane.
    #[serde(default)]
    pub control_plane_token_env: Option<String>,

    /// Base URL archives are fetched from (`<origin_url>/<bundle_id>.tar.gz`).
    #[serde(default)]
    pub origin_url: Option<String>,

    /// Bound on an origin fetch, in milliseconds (> 0).
    #[serde(default = "default_origin_timeout_ms")]
    pub origin_timeout_ms: u64,

    /// Bundle cache directory.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Static tenant → bundle catalog.
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,

    /// Tenant API key file.
    #[serde(default = "default_tokens_path")]
    pub tokens_path: PathBuf,

    /// Local runtime version; defaults to the build version.
    #[serde(default)]
    pub runtime_version: Option<String>,

    /// Reject control-plane resolutions without a content digest.
    #[serde(default)]
    pub require_digest: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            listen: default_runtime_listen(),
            control_plane_url: None,
            control_plane_timeout_ms: default_control_plane_timeout_ms(),
            control_plane_token_env: None,
            origin_url: None,
            origin_timeout_ms: default_origin_timeout_ms(),
            cache_dir: default_cache_dir(),
            catalog_path: default_catalog_path(),
            tokens_path: default_tokens_path(),
            runtime_version: None,
            require_digest: false,
        }
    }
}

impl RuntimeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.control_plane_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "runtime.control_plane_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.origin_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "runtime.origin_timeout_ms must be greater than zero".to_string(),
            ));
        }
        for (key, url) in [
            ("control_plane_url", &self.control_plane_url),
            ("origin_url", &self.origin_url),
        ] {
            if let Some(url) = url {
                if !url.starts_with("http://") {
                    return Err(ConfigError::Validation(format!(
                        "runtime.{key} must be an http:// URL, got {url:?}"
                    )));
                }
            }
        }
        self.version()?;
        Ok(())
    }

    /// Bound on a resolution call.
    #[must_use]
    pub const fn control_plane_timeout(&self) -> Duration {
        Duration::from_millis(self.control_plane_timeout_ms)
    }

    /// Bound on an origin fetch.
    #[must_use]
    pub const fn origin_timeout(&self) -> Duration {
        Duration::from_millis(self.origin_timeout_ms)
    }

    /// Effective local runtime version.
    pub fn version(&self) -> Result<RuntimeVersion, ConfigError> {
        self.runtime_version
            .as_deref()
            .unwrap_or(crate::BUILD_VERSION)
            .parse()
            .map_err(|_| {
                ConfigError::Validation(format!(
                    "runtime.runtime_version {:?} is not MAJOR.MINOR.PATCH",
                    self.runtime_version
                ))
            })
    }
}

/// Audit sink kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkKind {
    /// JSON lines on stdout.
    #[default]
    Stdout,
    /// JSON lines appended to `file_path`.
    File,
}

/// Audit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Emit audit events.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sink kind.
    #[serde(default)]
    pub sink: AuditSinkKind,

    /// File for the `file` sink.
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sink: AuditSinkKind::Stdout,
            file_path: None,
        }
    }
}

impl AuditConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let has_path = self
            .file_path
            .as_ref()
            .is_some_and(|p| !p.as_os_str().is_empty());
        if self.enabled && self.sink == AuditSinkKind::File && !has_path {
            return Err(ConfigError::Validation(
                "audit.file_path is required for the file sink".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-tenant limit override; an absent bucket inherits the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantLimitsOverride {
    /// Rate limit override.
    #[serde(default)]
    pub rate_limit: Option<BucketPolicy>,
    /// Quota override.
    #[serde(default)]
    pub quota: Option<BucketPolicy>,
}

/// Rate limit and quota settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Default rate limit.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: BucketPolicy,

    /// Default quota.
    #[serde(default = "default_quota")]
    pub quota: BucketPolicy,

    /// Per-tenant overrides.
    #[serde(default)]
    pub tenants: HashMap<String, TenantLimitsOverride>,

    /// Hard cap on tracked counter keys.
    #[serde(default = "default_max_tracked_keys")]
    pub max_tracked_keys: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            rate_limit: default_rate_limit(),
            quota: default_quota(),
            tenants: HashMap::new(),
            max_tracked_keys: default_max_tracked_keys(),
        }
    }
}

impl LimitsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let check = |name: &str, bucket: &BucketPolicy| {
            if bucket.window_secs == 0 || bucket.max_requests == 0 {
                Err(ConfigError::Validation(format!(
                    "limits {name}: window_secs and max_requests must be greater than zero"
                )))
            } else {
                Ok(())
            }
        };
        check("rate_limit", &self.rate_limit)?;
        check("quota", &self.quota)?;
        for (tenant, limits) in &self.tenants {
            if let Some(bucket) = &limits.rate_limit {
                check(&format!("tenants.{tenant}.rate_limit"), bucket)?;
            }
            if let Some(bucket) = &limits.quota {
                check(&format!("tenants.{tenant}.quota"), bucket)?;
            }
        }
        if self.max_tracked_keys == 0 {
            return Err(ConfigError::Validation(
                "limits.max_tracked_keys must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Policy consumed by the limiter.
    #[must_use]
    pub fn to_policy(&self) -> LimitPolicy {
        let default = TenantLimits {
            rate_limit: self.rate_limit,
            quota: self.quota,
        };
        LimitPolicy {
            default,
            tenants: self
                .tenants
                .iter()
                .map(|(tenant, o)| {
                    (
                        tenant.clone(),
                        TenantLimits {
                            rate_limit: o.rate_limit.unwrap_or(default.rate_limit),
                            quota: o.quota.unwrap_or(default.quota),
                        },
                    )
                })
                .collect(),
            max_tracked_keys: self.max_tracked_keys,
        }
    }
}

fn default_control_plane_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

fn default_runtime_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_alias_state_root() -> PathBuf {
    PathBuf::from("/var/lib/bundlegate/aliases")
}

fn default_gate_root() -> PathBuf {
    PathBuf::from("/var/lib/bundlegate/gates")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/var/cache/bundlegate")
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("/etc/bundlegate/catalog.json")
}

fn default_tokens_path() -> PathBuf {
    PathBuf::from("/etc/bundlegate/tokens.json")
}

#[allow(clippy::cast_possible_truncation)]
const fn default_control_plane_timeout_ms() -> u64 {
    DEFAULT_CONTROL_PLANE_TIMEOUT.as_millis() as u64
}

#[allow(clippy::cast_possible_truncation)]
const fn default_origin_timeout_ms() -> u64 {
    DEFAULT_ORIGIN_TIMEOUT.as_millis() as u64
}

const fn default_true() -> bool {
    true
}

const fn default_rate_limit() -> BucketPolicy {
    BucketPolicy {
        window_secs: 60,
        max_requests: 60,
    }
}

const fn default_quota() -> BucketPolicy {
    BucketPolicy {
        window_secs: 86_400,
        max_requests: 10_000,
    }
}

const fn default_max_tracked_keys() -> usize {
    10_000
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading the file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range or inconsistent.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
