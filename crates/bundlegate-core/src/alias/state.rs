//! Alias state document.

use serde::{Deserialize, Serialize};

/// Reference to a bundle by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRef {
    /// Bundle id.
    pub bundle_id: String,
}

impl BundleRef {
    /// Reference `bundle_id`.
    #[must_use]
    pub fn new(bundle_id: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
        }
    }
}

/// The `{candidate, current}` pointer pair of one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasState {
    /// Bundle awaiting promotion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<BundleRef>,
    /// Bundle serving the tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<BundleRef>,
}

/// On-disk and wire shape: `{"tenant_id": .., "aliases": {..}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasDocument {
    /// Owner of the state.
    pub tenant_id: String,
    /// The pointer pair.
    #[serde(default)]
    pub aliases: AliasState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_pointers_are_omitted() {
        let doc = AliasDocument {
            tenant_id: "tenant_a".into(),
            aliases: AliasState {
                candidate: Some(BundleRef::new("b1")),
                current: None,
            },
        };
        let json = serde_json::to_string(&doc).unwrap();
        assert_eq!(
            json,
            r#"{"tenant_id":"tenant_a","aliases":{"candidate":{"bundle_id":"b1"}}}"#
        );
        let back: AliasDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
    }
}
