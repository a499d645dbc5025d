//! Recursive merge of JSON documents.

use serde_json::Value;

/// Merge `source` into `target`.
///
/// For each key of `source`: when both sides hold an object at that key the
/// objects are merged recursively, otherwise the incoming value overwrites.
/// Keys of `target` that `source` does not mention are left untouched.
pub fn deep_merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, incoming) in source_map {
                match target_map.get_mut(key) {
                    Some(existing) if existing.is_object() && incoming.is_object() => {
                        deep_merge(existing, incoming);
                    }
                    _ => {
                        target_map.insert(key.clone(), incoming.clone());
                    }
                }
            }
        }
        (target, source) => *target = source.clone(),
    }
}

/// Remove `null` entries recursively. TOML has no null, so this runs before writing.
pub fn strip_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .filter(|v| !v.is_null())
                .map(strip_nulls)
                .collect(),
        ),
        other => other.clone(),
    }
}
