// src/core/patch/merge.rs

//! Strategic merge over YAML values, plus the redaction pass for the
//! display copy of rendered configs.

use serde_yaml::Value;

/// Merges `patch` into `base` strategically: mappings merge per key,
/// a null patch value deletes the key, everything else replaces.
pub fn strategic_merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Mapping(base_map), Value::Mapping(patch_map)) => {
            for (key, patch_value) in patch_map {
                if patch_value.is_null() {
                    base_map.remove(&key);
                    continue;
                }
                match base_map.get_mut(&key) {
                    Some(base_value) => strategic_merge(base_value, patch_value),
                    None => {
                        base_map.insert(key, patch_value);
                    }
                }
            }
        }
        (base, patch) => *base = patch,
    }
}

/// Keys whose values are stripped from the redacted display copy.
fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.contains("token")
        || key.contains("secret")
        || key.contains("password")
        || key == "key"
        || key == "crt"
        || key == "ca"
        || key == "kubeconfig"
}

const REDACTED: &str = "******";

/// Produces the sanitized copy of a rendered config: every value under a
/// sensitive key is replaced, recursively.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::with_capacity(map.len());
            for (key, val) in map {
                let redacted = match key.as_str() {
                    Some(name) if is_sensitive_key(name) => Value::String(REDACTED.to_string()),
                    _ => redact(val),
                };
                out.insert(key.clone(), redacted);
            }
            Value::Mapping(out)
        }
        Value::Sequence(seq) => Value::Sequence(seq.iter().map(redact).collect()),
        other => other.clone(),
    }
}
