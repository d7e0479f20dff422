//! Content-addressed document identity.
//!
//! An id is the SHA-256 digest of the canonical metadata JSON followed by the
//! document text, truncated to 16 bytes and rendered as grouped hex
//! (`8-4-4-4-12`, the same shape as a UUID).
//!
//! Canonical metadata JSON is compact and has object keys sorted at every
//! nesting level. An empty map renders as `{}` and is always hashed; because
//! a JSON object is self-delimiting, the hash input is unambiguous.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::types::Metadata;

/// Generate the content-addressed id for `(text, metadata)`.
pub fn generate_id(text: &str, metadata: &Metadata) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_metadata(metadata).as_bytes());
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();

    format!(
        "{}-{}-{}-{}-{}",
        hex::encode(&digest[0..4]),
        hex::encode(&digest[4..6]),
        hex::encode(&digest[6..8]),
        hex::encode(&digest[8..10]),
        hex::encode(&digest[10..16]),
    )
}

/// Render metadata as compact JSON with sorted keys.
pub fn canonical_metadata(metadata: &Metadata) -> String {
    let mut keys: Vec<&String> = metadata.keys().collect();
    keys.sort();

    let mut object = Map::new();
    for key in keys {
        object.insert(key.clone(), canonicalize(&metadata[key]));
    }
    Value::Object(object).to_string()
}

// Rebuild objects in key order so the output is sorted even when serde_json
// is compiled with `preserve_order`.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
