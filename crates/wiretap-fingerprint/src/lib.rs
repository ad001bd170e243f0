//! Canonical-JSON content fingerprinting.
//!
//! A fingerprint is the lowercase hex SHA-256 of the canonical JSON
//! serialization of an ordered list of message objects: object keys are
//! sorted, a small exclusion set of keys is dropped at every depth, and
//! array order is preserved. The fingerprint carries no identity of its
//! own, only equality semantics -- it exists so the session index can
//! recognize "this is the same conversation state I've seen before".

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Keys dropped from every object before hashing, regardless of depth.
const EXCLUDED_KEYS: &[&str] = &["cache_control"];

/// Recursively rewrites `value` into canonical form: sorted object keys,
/// excluded keys removed, arrays preserved in order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map
                .keys()
                .filter(|k| !EXCLUDED_KEYS.contains(&k.as_str()))
                .collect();
            keys.sort();

            let mut sorted = Map::with_capacity(keys.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Fingerprints an already-parsed JSON value (typically a `messages` array).
pub fn fingerprint_value(value: &Value) -> String {
    let canonical = canonicalize(value);
    // `to_vec` never fails on a `Value` built from valid JSON.
    let serialized = serde_json::to_vec(&canonical).unwrap_or_default();
    hash_bytes(&serialized)
}

/// Fingerprints a slice of messages, e.g. `request.messages[..n]`.
pub fn fingerprint_messages(messages: &[Value]) -> String {
    fingerprint_value(&Value::Array(messages.to_vec()))
}

/// Fingerprints raw (not-yet-parsed) bytes. Falls back to hashing the raw
/// bytes verbatim if they are not valid JSON, so a fingerprint always exists.
pub fn fingerprint_raw(raw: &[u8]) -> String {
    match serde_json::from_slice::<Value>(raw) {
        Ok(value) => fingerprint_value(&value),
        Err(_) => hash_bytes(raw),
    }
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insensitive_to_key_order() {
        let a = json!([{"role": "user", "content": "hi"}]);
        let b = json!([{"content": "hi", "role": "user"}]);
        assert_eq!(fingerprint_value(&a), fingerprint_value(&b));
    }

    #[test]
    fn insensitive_to_whitespace() {
        let compact = r#"[{"role":"user","content":"hi"}]"#;
        let spaced = "[\n  { \"role\" : \"user\" ,  \"content\" : \"hi\" }\n]";
        assert_eq!(fingerprint_raw(compact.as_bytes()), fingerprint_raw(spaced.as_bytes()));
    }

    #[test]
    fn sensitive_to_message_order() {
        let a = json!([{"role": "user", "content": "a"}, {"role": "assistant", "content": "b"}]);
        let b = json!([{"role": "assistant", "content": "b"}, {"role": "user", "content": "a"}]);
        assert_ne!(fingerprint_value(&a), fingerprint_value(&b));
    }

    #[test]
    fn sensitive_to_content_and_role() {
        let a = json!([{"role": "user", "content": "hello"}]);
        let b = json!([{"role": "user", "content": "goodbye"}]);
        let c = json!([{"role": "assistant", "content": "hello"}]);
        assert_ne!(fingerprint_value(&a), fingerprint_value(&b));
        assert_ne!(fingerprint_value(&a), fingerprint_value(&c));
    }

    #[test]
    fn insensitive_to_cache_control_presence() {
        let without = json!([{"role": "user", "content": [{"type": "text", "text": "hi"}]}]);
        let with_cc = json!([{
            "role": "user",
            "content": [{"type": "text", "text": "hi", "cache_control": {"type": "ephemeral"}}],
        }]);
        assert_eq!(fingerprint_value(&without), fingerprint_value(&with_cc));
    }

    #[test]
    fn insensitive_to_nested_cache_control() {
        let a = json!([{"role": "user", "cache_control": {"type": "ephemeral"}, "content": "hi"}]);
        let b = json!([{"role": "user", "content": "hi"}]);
        assert_eq!(fingerprint_value(&a), fingerprint_value(&b));
    }

    #[test]
    fn invalid_json_hashes_raw_bytes() {
        let raw = b"not json at all";
        let fp1 = fingerprint_raw(raw);
        let fp2 = fingerprint_raw(raw);
        assert_eq!(fp1, fp2);
        assert_eq!(fp1.len(), 64);
    }

    #[test]
    fn fingerprint_messages_matches_array_wrapping() {
        let messages = vec![json!({"role": "user", "content": "hi"})];
        let direct = fingerprint_messages(&messages);
        let wrapped = fingerprint_value(&Value::Array(messages));
        assert_eq!(direct, wrapped);
    }
}
