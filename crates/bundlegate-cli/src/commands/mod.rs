//! CLI command implementations.

pub mod alias;
pub mod gate;

use bundlegate_core::ids;

/// Clap value parser for tenant ids.
pub fn parse_tenant_id(value: &str) -> Result<String, String> {
    ids::tenant(value)
        .map(|()| value.to_string())
        .map_err(|e| e.to_string())
}

/// Clap value parser for bundle ids.
pub fn parse_bundle_id(value: &str) -> Result<String, String> {
    ids::bundle(value)
        .map(|()| value.to_string())
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_parsers() {
        assert_eq!(parse_tenant_id("tenant_a").unwrap(), "tenant_a");
        assert!(parse_tenant_id("../etc").is_err());
        assert!(parse_bundle_id("").is_err());
        assert_eq!(parse_bundle_id("faq-0001").unwrap(), "faq-0001");
    }
}
