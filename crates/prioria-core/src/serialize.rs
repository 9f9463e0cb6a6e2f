//! Canonical serialization.
//!
//! Every hash and signature in the system is computed over sorted-key,
//! whitespace-free JSON. Two nodes that agree on a value therefore agree on
//! its bytes, whatever order the fields were built in.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::crypto::{content_hash, Digest};
use crate::error::CoreError;

/// Serialize to canonical (sorted-key, compact) JSON bytes
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    let value = serde_json::to_value(value).map_err(|e| CoreError::Serialization(e.to_string()))?;
    serde_json::to_vec(&canonicalize(value)).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Serialize to a canonical JSON string
pub fn to_canonical_string<T: Serialize>(value: &T) -> Result<String, CoreError> {
    let bytes = to_canonical_bytes(value)?;
    String::from_utf8(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Content hash of the canonical JSON encoding
pub fn hash_canonical<T: Serialize>(value: &T) -> Result<Digest, CoreError> {
    Ok(content_hash(&to_canonical_bytes(value)?))
}

/// Rebuild every object with its keys in sorted order.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestStruct {
        zeta: u64,
        alpha: String,
    }

    #[test]
    fn test_keys_are_sorted() {
        let value = TestStruct {
            zeta: 1,
            alpha: "a".to_string(),
        };
        let s = to_canonical_string(&value).unwrap();
        assert_eq!(s, r#"{"alpha":"a","zeta":1}"#);
    }

    #[test]
    fn test_nested_objects_sorted() {
        let value = json!({"b": {"y": 1, "x": 2}, "a": [ {"d": 1, "c": 2} ]});
        let s = to_canonical_string(&value).unwrap();
        assert_eq!(s, r#"{"a":[{"c":2,"d":1}],"b":{"x":2,"y":1}}"#);
    }

    #[test]
    fn test_hash_independent_of_construction_order() {
        let a = json!({"x": 1, "y": 2});
        let b = json!({"y": 2, "x": 1});
        assert_eq!(hash_canonical(&a).unwrap(), hash_canonical(&b).unwrap());
    }
}
