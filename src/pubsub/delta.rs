//! Compact JSON deltas for the node update ring.
//!
//! A delta describes how to rewrite one JSON value into another. Only
//! object-to-object transitions have a compact form:
//!
//! ```json
//! { "set": { "a": 1 }, "delete": ["b"] }
//! ```
//!
//! Any other transition (scalars, arrays, type changes) has no delta and
//! forces a full resend of the node value. [`diff`] additionally refuses
//! deltas whose serialized size exceeds the caller's byte budget, so the
//! ring never stores a delta that is not meaningfully smaller than the data
//! itself.

use serde_json::{Map, Value};

/// Serialized size of a JSON value, in bytes.
pub(crate) fn json_size(value: &Value) -> usize {
    // Value serialization is infallible.
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

/// Compute a delta that rewrites `from` into `to`.
///
/// Returns `None` when no compact delta exists or the delta would serialize
/// to more than `max_size` bytes.
#[must_use]
pub fn diff(from: &Value, to: &Value, max_size: usize) -> Option<Value> {
    let (Value::Object(from), Value::Object(to)) = (from, to) else {
        return None;
    };

    let mut set = Map::new();
    let mut delete = Vec::new();

    for (key, new_value) in to {
        if from.get(key) != Some(new_value) {
            set.insert(key.clone(), new_value.clone());
        }
    }

    for key in from.keys() {
        if !to.contains_key(key) {
            delete.push(Value::String(key.clone()));
        }
    }

    let mut patch = Map::new();
    if !set.is_empty() {
        patch.insert("set".to_string(), Value::Object(set));
    }
    if !delete.is_empty() {
        patch.insert("delete".to_string(), Value::Array(delete));
    }

    let patch = Value::Object(patch);
    (json_size(&patch) <= max_size).then_some(patch)
}

/// Apply a delta produced by [`diff`] to a base value.
///
/// Unknown patch shapes and non-object bases are returned unchanged; a
/// client holding a version the ring no longer covers receives the full
/// value instead of a delta, so this only sees well-formed input in
/// practice.
#[must_use]
pub fn apply(base: &Value, patch: &Value) -> Value {
    let (Value::Object(base_map), Value::Object(patch_map)) = (base, patch) else {
        return base.clone();
    };

    let mut result = base_map.clone();

    if let Some(Value::Array(keys)) = patch_map.get("delete") {
        for key in keys {
            if let Value::String(key) = key {
                result.remove(key);
            }
        }
    }

    if let Some(Value::Object(set)) = patch_map.get("set") {
        for (key, value) in set {
            result.insert(key.clone(), value.clone());
        }
    }

    Value::Object(result)
}
