//! Configuration fingerprints for stale-write detection

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Key nodes use to echo the digest inside a config
pub const DIGEST_KEY: &str = "digest";

/// SHA-256 over the canonical JSON form of a config
///
/// Keys are visited in sorted order and any embedded `digest` key is ignored,
/// so the same logical config always yields the same fingerprint.
pub fn config_digest(config: &BTreeMap<String, Value>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in config {
        if key == DIGEST_KEY {
            continue;
        }
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hash_value(&mut hasher, value);
        hasher.update([0xffu8]);
    }
    hex::encode(hasher.finalize())
}

fn hash_value(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for key in keys {
                hasher.update(key.as_bytes());
                hasher.update([0u8]);
                hash_value(hasher, &map[key]);
                hasher.update(b",");
            }
            hasher.update(b"}");
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                hash_value(hasher, item);
                hasher.update(b",");
            }
            hasher.update(b"]");
        }
        scalar => hasher.update(scalar.to_string().as_bytes()),
    }
}

/// Apply a change set: `null` deletes a key, anything else sets it
pub fn apply_changes(config: &mut BTreeMap<String, Value>, changes: &BTreeMap<String, Value>) {
    for (key, value) in changes {
        if value.is_null() {
            config.remove(key);
        } else {
            config.insert(key.clone(), value.clone());
        }
    }
}
