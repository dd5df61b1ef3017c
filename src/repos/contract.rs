//! Return-spec contract checks shared by every memory backend.
//!
//! Contract validation happens before lock acquisition so malformed writes
//! never hold a lock. The type labels are deliberately loose: an unknown
//! label accepts any value, matching how planners describe shapes in
//! free text.

use serde_json::Value;

use crate::repos::MemoryError;
use crate::types::JsonMap;

/// Reject labels containing `:`.
///
/// Labels are combined into `tenant:session:task:label` keys; a colon in
/// the label would make the composite ambiguous.
pub fn validate_label(key: &str) -> Result<(), MemoryError> {
    if key.contains(':') {
        return Err(MemoryError::InvalidLabel);
    }
    Ok(())
}

/// Build the canonical memory address.
pub fn build_namespaced_key(tenant_id: &str, session_id: &str, task_id: &str, key: &str) -> String {
    format!("{tenant_id}:{session_id}:{task_id}:{key}")
}

/// Check a payload against a return-spec shape.
///
/// Every field named in the shape must exist in the payload, and when the
/// shape value is a recognized type-label string the payload value must
/// satisfy it.
pub fn matches_return_spec(value: &JsonMap, shape: &JsonMap) -> bool {
    for (field, expected) in shape {
        match value.get(field) {
            Some(actual) => {
                if !matches_type_label(actual, expected) {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

/// Check whether a concrete value satisfies an expected type label.
///
/// Non-string expectations (nested shapes, nulls) are accepted as-is.
pub fn matches_type_label(value: &Value, expected: &Value) -> bool {
    let Some(label) = expected.as_str() else {
        return true;
    };
    let normalized = label.trim().to_lowercase();
    match normalized.as_str() {
        "string" => value.is_string(),
        "int" | "integer" => value.is_i64() || value.is_u64(),
        "float" | "number" => value.is_number(),
        "bool" | "boolean" => value.is_boolean(),
        "object" | "dict" | "map" => value.is_object(),
        other if other.starts_with("array") => value.is_array(),
        _ => true,
    }
}

/// Infer a type label from a concrete value.
///
/// Used to derive a return spec when a memory tool caller does not supply
/// one.
pub fn infer_type_label(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        _ => "string",
    }
}

/// Derive a full return-spec shape from a payload.
pub fn derive_return_spec(value: &JsonMap) -> JsonMap {
    value
        .iter()
        .map(|(field, v)| (field.clone(), Value::String(infer_type_label(v).to_owned())))
        .collect()
}
