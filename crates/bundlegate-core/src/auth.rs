//! Tenant authentication interface.
//!
//! Authentication is an external collaborator: this crate only needs an
//! [`AuthenticatedTenant`] and trusts it verbatim. [`StaticTokenAuthenticator`]
//! is the shipped backend, a JSON file of per-tenant tokens compared in
//! constant time.
//!
//! Every tenant-scoped operation calls [`require_tenant`] before reading any
//! state, so a caller authenticated as one tenant never observes another
//! tenant's aliases or gates.

use std::collections::HashMap;
use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use subtle::ConstantTimeEq;

use crate::error::BundleError;
use crate::fs_safe;

const MAX_TOKENS_FILE_SIZE: u64 = 256 * 1024;

/// Raw request credentials.
#[derive(Debug, Default)]
pub struct Credentials {
    /// Claimed tenant (`X-Tenant-Id`).
    pub tenant_id: Option<String>,
    /// Bearer token or API key.
    pub token: Option<SecretString>,
}

impl Credentials {
    /// Build credentials from header values, trimming whitespace and
    /// treating empty values as absent.
    #[must_use]
    pub fn from_headers(tenant_id: Option<&str>, token: Option<&str>) -> Self {
        let clean = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);
        Self {
            tenant_id: clean(tenant_id),
            token: clean(token).map(SecretString::from),
        }
    }
}

/// A tenant identity vouched for by an authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthenticatedTenant(String);

impl AuthenticatedTenant {
    /// Wrap an identity produced by an authentication backend.
    #[must_use]
    pub fn trusted(tenant_id: impl Into<String>) -> Self {
        Self(tenant_id.into())
    }

    /// Tenant id.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.0
    }
}

/// Authentication backend.
pub trait TenantAuthenticator: Send + Sync {
    /// Authenticate credentials. Missing credentials are `Unauthorized`;
    /// unknown tenants or wrong tokens are `Forbidden`.
    fn authenticate(&self, credentials: &Credentials) -> Result<AuthenticatedTenant, BundleError>;
}

/// Fail `Forbidden` unless the authenticated tenant is `path_tenant`.
pub fn require_tenant(auth: &AuthenticatedTenant, path_tenant: &str) -> Result<(), BundleError> {
    if auth.tenant_id() == path_tenant {
        Ok(())
    } else {
        tracing::warn!(
            authenticated = %auth.tenant_id(),
            requested = %path_tenant,
            "tenant mismatch"
        );
        Err(BundleError::Forbidden {
            detail: "authenticated tenant does not match requested tenant".to_string(),
        })
    }
}

/// Compare a presented token against an expected one in constant time.
#[must_use]
pub fn token_matches(presented: &SecretString, expected: &SecretString) -> bool {
    presented
        .expose_secret()
        .as_bytes()
        .ct_eq(expected.expose_secret().as_bytes())
        .into()
}

/// Per-tenant static tokens.
///
/// Accepts `{"tenants": {"t": {"token": "..."}}}` or the flat form
/// `{"t": "..."}`.
#[derive(Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, SecretString>,
}

impl std::fmt::Debug for StaticTokenAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenAuthenticator")
            .field("tenants", &self.tokens.len())
            .finish()
    }
}

impl StaticTokenAuthenticator {
    /// Parse a tokens document.
    pub fn from_json(text: &str) -> Result<Self, BundleError> {
        let invalid = |detail: &str| BundleError::Config {
            detail: format!("tenant tokens invalid: {detail}"),
        };
        let root: Value = serde_json::from_str(text).map_err(|_| invalid("unparsable JSON"))?;
        let map = root
            .get("tenants")
            .unwrap_or(&root)
            .as_object()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| invalid("expected a non-empty tenant map"))?;

        let mut tokens = HashMap::with_capacity(map.len());
        for (tenant, entry) in map {
            let tenant = tenant.trim();
            let token = match entry {
                Value::String(token) => Some(token.as_str()),
                Value::Object(obj) => obj.get("token").and_then(Value::as_str),
                _ => None,
            }
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| invalid("every tenant needs a non-empty token"))?;
            if tenant.is_empty() {
                return Err(invalid("empty tenant id"));
            }
            if tokens
                .insert(tenant.to_string(), SecretString::from(token.to_string()))
                .is_some()
            {
                return Err(invalid("duplicate tenant id"));
            }
        }
        Ok(Self { tokens })
    }

    /// Load a tokens file. A missing file is a configuration error.
    pub fn load(path: &Path) -> Result<Self, BundleError> {
        let bytes = fs_safe::read_bounded(path, MAX_TOKENS_FILE_SIZE)?.ok_or_else(|| {
            BundleError::Config {
                detail: format!("tenant tokens missing at {}", path.display()),
            }
        })?;
        let text = String::from_utf8(bytes).map_err(|_| BundleError::Config {
            detail: "tenant tokens are not UTF-8".to_string(),
        })?;
        Self::from_json(&text)
    }
}

impl TenantAuthenticator for StaticTokenAuthenticator {
    fn authenticate(&self, credentials: &Credentials) -> Result<AuthenticatedTenant, BundleError> {
        let (Some(tenant_id), Some(token)) = (&credentials.tenant_id, &credentials.token) else {
            return Err(BundleError::Unauthorized);
        };
        match self.tokens.get(tenant_id) {
            Some(expected) if token_matches(token, expected) => {
                Ok(AuthenticatedTenant::trusted(tenant_id.clone()))
            },
            _ => Err(BundleError::Forbidden {
                detail: "unknown tenant or token".to_string(),
            }),
        }
    }
}
