//! Canonical JSON serialization.
//!
//! One serialization used everywhere a stable byte form matters: dedup
//! fingerprints, embedding input, and volatile-payload flattening in the
//! indexed event log. Object keys are sorted lexicographically at every
//! nesting level, separators are minimal, and non-ASCII text is preserved
//! unescaped. `canonical(canonical(x)) == canonical(x)` holds because the
//! output is itself parseable JSON with already-sorted keys.

use serde_json::Value;

/// Serialize a JSON value canonically.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Canonical fingerprint of a JSON object, used for memory deduplication.
///
/// Two payloads are duplicates exactly when their fingerprints are equal.
pub fn fingerprint(value: &Value) -> String {
    canonical_json(value)
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                if let Some(child) = map.get(*key) {
                    write_value(out, child);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::String(s) => write_string(out, s),
        // serde_json already renders null/bool/number minimally.
        other => out.push_str(&other.to_string()),
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            // Non-ASCII is written as-is; no \u escaping.
            c => out.push(c),
        }
    }
    out.push('"');
}
