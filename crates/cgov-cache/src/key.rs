//! Cache keys and request fingerprints.

use std::fmt;

use cgov_core::{sha256_raw, BundleVersion, ContentDigest, Namespace};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Data classes with independent TTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataClass {
    /// Compiled bundles. Long-lived.
    Bundle,
    /// Enforcement decisions. Short-lived.
    Decision,
}

/// Key of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum CacheKey {
    /// A compiled bundle by version.
    Bundle {
        /// Namespace.
        namespace: Namespace,
        /// Bundle version.
        version: BundleVersion,
    },
    /// A decision by request-context fingerprint.
    Decision {
        /// Namespace.
        namespace: Namespace,
        /// See [`decision_fingerprint`].
        fingerprint: ContentDigest,
    },
}

impl CacheKey {
    /// Namespace the entry belongs to.
    pub fn namespace(&self) -> &Namespace {
        match self {
            Self::Bundle { namespace, .. } | Self::Decision { namespace, .. } => namespace,
        }
    }

    /// Data class of the entry.
    pub fn class(&self) -> DataClass {
        match self {
            Self::Bundle { .. } => DataClass::Bundle,
            Self::Decision { .. } => DataClass::Decision,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bundle { namespace, version } => write!(f, "bundle:{namespace}:{version}"),
            Self::Decision {
                namespace,
                fingerprint,
            } => write!(f, "decision:{namespace}:{}", fingerprint.short()),
        }
    }
}

/// Fingerprint of a request context: SHA-256 over the compact JSON of
/// namespace, category and input. `serde_json` maps keep keys sorted, so
/// key order in the request does not matter.
pub fn decision_fingerprint(namespace: &Namespace, category: Option<&str>, input: &Value) -> ContentDigest {
    let doc = serde_json::json!({
        "namespace": namespace.as_str(),
        "category": category,
        "input": input,
    });
    sha256_raw(doc.to_string().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ns(s: &str) -> Namespace {
        Namespace::new(s).unwrap()
    }

    #[test]
    fn fingerprint_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"user": "u1", "hour": 3}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"hour": 3, "user": "u1"}"#).unwrap();
        assert_eq!(
            decision_fingerprint(&ns("ops"), None, &a),
            decision_fingerprint(&ns("ops"), None, &b)
        );
    }

    #[test]
    fn fingerprint_separates_namespace_and_category() {
        let input = json!({"user": "u1"});
        let base = decision_fingerprint(&ns("ops"), None, &input);
        assert_ne!(base, decision_fingerprint(&ns("hr"), None, &input));
        assert_ne!(base, decision_fingerprint(&ns("ops"), Some("access"), &input));
    }

    #[test]
    fn display_and_class() {
        let k = CacheKey::Bundle {
            namespace: ns("ops"),
            version: BundleVersion(4),
        };
        assert_eq!(k.to_string(), "bundle:ops:v4");
        assert_eq!(k.class(), DataClass::Bundle);
    }
}
