//! Path-safe identifier validation.
//!
//! Tenant, bundle, suite and gate identifiers become file and directory
//! names, so they are validated before any filesystem access.

use crate::error::BundleError;

/// Maximum identifier length in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Wildcard tenant key in static catalogs. Never a valid tenant id.
pub const WILDCARD_TENANT: &str = "*";

/// Validate an identifier: 1..=128 chars of `[A-Za-z0-9._-]`, not starting
/// with `.`.
pub fn validate(kind: &'static str, value: &str) -> Result<(), BundleError> {
    let well_formed = !value.is_empty()
        && value.len() <= MAX_IDENTIFIER_LEN
        && !value.starts_with('.')
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if well_formed {
        Ok(())
    } else {
        Err(BundleError::InvalidIdentifier {
            kind,
            value: value.chars().take(MAX_IDENTIFIER_LEN).collect(),
        })
    }
}

/// Validate a tenant id.
pub fn tenant(value: &str) -> Result<(), BundleError> {
    validate("tenant_id", value)
}

/// Validate a bundle id.
pub fn bundle(value: &str) -> Result<(), BundleError> {
    validate("bundle_id", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_typical_ids() {
        for id in ["tenant_a", "demo-faq-0001", "bundle.v2", "A1"] {
            assert!(validate("bundle_id", id).is_ok(), "{id}");
        }
    }

    #[test]
    fn test_rejects_path_tricks() {
        for id in ["", ".", "..", "../etc", "a/b", "a\\b", ".hidden", "*", "a b"] {
            assert!(validate("bundle_id", id).is_err(), "{id:?}");
        }
        assert!(validate("bundle_id", &"x".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
    }
}
