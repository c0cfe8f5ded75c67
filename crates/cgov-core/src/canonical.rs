//! # Canonical Serialization
//!
//! [`CanonicalBytes`] is the only construction path for bytes that feed a
//! content digest. The inner buffer is private, so a digest can never be
//! computed over an ad-hoc serialization.
//!
//! ## Rules
//!
//! 1. Reject floats — priorities, versions and counts are integers.
//! 2. Sort object keys lexicographically (`serde_json::Map` without
//!    `preserve_order` is a `BTreeMap`).
//! 3. Compact separators, no whitespace.

use serde::Serialize;
use serde_json::Value;

use crate::error::CanonicalizationError;

/// Bytes produced exclusively by canonical JSON serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalBytes(Vec<u8>);

impl CanonicalBytes {
    /// Construct canonical bytes from any serializable value.
    pub fn new(obj: &impl Serialize) -> Result<Self, CanonicalizationError> {
        let value = serde_json::to_value(obj)?;
        reject_floats(&value)?;
        Ok(Self(serde_json::to_vec(&value)?))
    }

    /// Access the canonical bytes for digest computation.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume and return the inner byte vector.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for CanonicalBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

fn reject_floats(value: &Value) -> Result<(), CanonicalizationError> {
    match value {
        Value::Number(n) if n.is_f64() => Err(CanonicalizationError::FloatRejected(
            n.as_f64().unwrap_or(f64::NAN),
        )),
        Value::Array(items) => items.iter().try_for_each(reject_floats),
        Value::Object(map) => map.values().try_for_each(reject_floats),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn keys_are_sorted_regardless_of_insertion_order() {
        let mut a = HashMap::new();
        a.insert("zeta", 1);
        a.insert("alpha", 2);
        let cb = CanonicalBytes::new(&a).unwrap();
        assert_eq!(cb.as_bytes(), br#"{"alpha":2,"zeta":1}"#);
    }

    #[test]
    fn nested_floats_are_rejected() {
        let v = serde_json::json!({"outer": {"inner": [1, 2.5]}});
        let err = CanonicalBytes::new(&v).unwrap_err();
        assert!(matches!(err, CanonicalizationError::FloatRejected(f) if f == 2.5));
    }

    #[test]
    fn integers_and_strings_pass_through() {
        let v = serde_json::json!({"priority": 10, "id": "r1", "ok": true, "none": null});
        let cb = CanonicalBytes::new(&v).unwrap();
        assert_eq!(
            cb.into_bytes(),
            br#"{"id":"r1","none":null,"ok":true,"priority":10}"#.to_vec()
        );
    }
}
