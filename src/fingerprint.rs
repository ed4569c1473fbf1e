//! Parameter fingerprints
//!
//! A fingerprint is the SHA-256 of the canonical JSON encoding of a
//! parameter point. `Params` is a `BTreeMap` and `serde_json::Map` keeps
//! keys sorted, so nested objects are canonical as well.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::params::Params;

/// Canonical JSON text of a parameter point (sorted keys, no whitespace).
#[must_use]
pub fn canonical_json(params: &Params) -> String {
    let map: Map<String, Value> = params
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Value::Object(map).to_string()
}

/// Stable hexadecimal fingerprint of a parameter point.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use trueno_eval::fingerprint::fingerprint;
/// use trueno_eval::params::Params;
///
/// let mut a = Params::new();
/// a.insert("k".into(), json!(5));
/// a.insert("window".into(), json!(100));
///
/// let mut b = Params::new();
/// b.insert("window".into(), json!(100));
/// b.insert("k".into(), json!(5));
///
/// assert_eq!(fingerprint(&a), fingerprint(&b));
/// ```
#[must_use]
pub fn fingerprint(params: &Params) -> String {
    let digest = Sha256::digest(canonical_json(params).as_bytes());
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_params_fingerprint_is_stable() {
        let empty = Params::new();
        assert_eq!(canonical_json(&empty), "{}");
        assert_eq!(fingerprint(&empty), fingerprint(&Params::new()));
        assert_eq!(fingerprint(&empty).len(), 64);
    }

    #[test]
    fn test_value_change_changes_fingerprint() {
        let mut a = Params::new();
        a.insert("k".into(), json!(5));
        let mut b = a.clone();
        b.insert("k".into(), json!(6));
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_nested_objects_are_canonical() {
        let mut a = Params::new();
        a.insert("inner".into(), json!({"b": 1, "a": 2}));
        let mut b = Params::new();
        b.insert("inner".into(), json!({"a": 2, "b": 1}));
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }
}
