//! Canonical JSON serialization.
//!
//! Every value that is signed or compared across nodes goes through this
//! module. The encoding is deterministic: object keys are emitted in sorted
//! order at every nesting level and no insignificant whitespace is produced,
//! so two structurally equal values encode to byte-identical output on every
//! replica.

use serde_json::Value;

use crate::error::TransactionError;

/// Serialize a JSON value to canonical bytes.
pub fn to_canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out.into_bytes()
}

/// Serialize a JSON value to a canonical string.
///
/// Used as a total-order key for vote tallying and tie-breaks.
pub fn to_canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Parse bytes into a JSON value.
pub fn from_bytes(bytes: &[u8]) -> Result<Value, TransactionError> {
    serde_json::from_slice(bytes)
        .map_err(|e| TransactionError::Malformed(format!("invalid JSON: {e}")))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // serde_json handles string escaping
                out.push_str(&serde_json::to_string(key).expect("string serialization"));
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        // Scalars already have a single JSON form.
        scalar => out.push_str(&serde_json::to_string(scalar).expect("scalar serialization")),
    }
}
