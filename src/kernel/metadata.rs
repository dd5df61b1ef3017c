//! Memory-usage evidence aggregation and user disclosure.
//!
//! Streamed tool responses arrive incrementally; usage evidence is merged
//! monotonically (once used, always used; latest timestamp wins; first
//! non-empty summary wins) and rendered as a disclosure prefix on the
//! final response.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::agents::llm::FunctionResponse;

/// Days after which applied memory earns a staleness note.
const STALENESS_THRESHOLD_DAYS: i64 = 30;

/// Aggregated memory-usage evidence for one request.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MemoryUsageMetadata {
    /// Whether any memory search returned results.
    pub used: bool,
    /// Latest `created_at` among applied memories (ISO-8601).
    pub latest_timestamp: Option<String>,
    /// First usable summary of the applied memory.
    pub summary: Option<String>,
}

/// Merge two evidence snapshots monotonically.
pub fn merge_memory_metadata(
    left: MemoryUsageMetadata,
    right: MemoryUsageMetadata,
) -> MemoryUsageMetadata {
    MemoryUsageMetadata {
        used: left.used || right.used,
        latest_timestamp: max_iso_timestamp(left.latest_timestamp, right.latest_timestamp),
        summary: left.summary.or(right.summary),
    }
}

/// Extract evidence from a batch of tool responses.
///
/// Only `search_relevant_memory` responses influence disclosure state.
pub fn extract_memory_usage_metadata(
    function_responses: &[FunctionResponse],
) -> MemoryUsageMetadata {
    let mut output = MemoryUsageMetadata::default();
    for item in function_responses {
        if item.name != "search_relevant_memory" {
            continue;
        }
        let Some(payload) = item.response.as_object() else {
            continue;
        };

        if payload
            .get("count")
            .and_then(Value::as_i64)
            .map(|count| count > 0)
            .unwrap_or(false)
        {
            output.used = true;
        }

        let Some(results) = payload.get("results").and_then(Value::as_array) else {
            continue;
        };
        for result in results {
            let Some(result) = result.as_object() else {
                continue;
            };
            if let Some(created_at) = result.get("created_at").and_then(Value::as_str) {
                if !created_at.is_empty() {
                    output.latest_timestamp = max_iso_timestamp(
                        output.latest_timestamp.take(),
                        Some(created_at.to_owned()),
                    );
                }
            }
            if output.summary.is_none() {
                output.summary = extract_memory_summary(result);
            }
        }
    }
    output
}

fn extract_memory_summary(result: &serde_json::Map<String, Value>) -> Option<String> {
    let value = result.get("value")?.as_object()?;

    if let Some(blob) = value.get("blob_json").and_then(Value::as_str) {
        let parsed: Value = serde_json::from_str(blob).ok()?;
        let parsed = parsed.as_object()?;
        return summarize_memory_value(parsed);
    }

    summarize_memory_value(value)
}

fn summarize_memory_value(value: &serde_json::Map<String, Value>) -> Option<String> {
    if let Some(memory_text) = value.get("memory_text").and_then(Value::as_str) {
        if !memory_text.is_empty() {
            return Some(memory_text.to_owned());
        }
    }

    let mut fields: Vec<String> = Vec::new();
    for field_name in ["domain", "intent"] {
        if let Some(field_value) = value.get(field_name).and_then(Value::as_str) {
            if !field_value.is_empty() {
                fields.push(format!("{field_name}: {field_value}"));
            }
        }
    }
    if let Some(entities) = value.get("entities").and_then(Value::as_array) {
        if !entities.is_empty() {
            let rendered: Vec<String> = entities
                .iter()
                .take(5)
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            fields.push(format!("entities: {}", rendered.join(", ")));
        }
    }

    if fields.is_empty() {
        None
    } else {
        Some(fields.join("; "))
    }
}

fn max_iso_timestamp(left: Option<String>, right: Option<String>) -> Option<String> {
    match (left, right) {
        (None, right) => right,
        (left, None) => left,
        (Some(l), Some(r)) => {
            if r > l {
                Some(r)
            } else {
                Some(l)
            }
        }
    }
}

/// Prepend the memory disclosure to a response.
pub fn apply_memory_disclosure(
    response: &str,
    metadata: &MemoryUsageMetadata,
    memory_disabled_by_user: bool,
) -> String {
    if memory_disabled_by_user {
        return format!(
            "Note: I did not use memory for this response because you asked to skip memory.\n\n{response}"
        );
    }

    if !metadata.used {
        return response.to_owned();
    }

    let timestamp = metadata.latest_timestamp.as_deref().unwrap_or("unknown time");
    let summary = metadata
        .summary
        .as_deref()
        .unwrap_or("a previously saved preference");
    let mut prefix = format!(
        "Note: I used saved memory from {timestamp} to tailor this response. Applied memory: {summary}."
    );
    if let Some(stale) = staleness_note(metadata.latest_timestamp.as_deref()) {
        prefix.push(' ');
        prefix.push_str(&stale);
    }
    format!("{prefix}\n\n{response}")
}

fn staleness_note(timestamp: Option<&str>) -> Option<String> {
    let timestamp = timestamp?;
    let created_at = DateTime::parse_from_rfc3339(timestamp).ok()?;
    let age_days = (Utc::now() - created_at.with_timezone(&Utc)).num_days();
    if age_days >= STALENESS_THRESHOLD_DAYS {
        Some(format!(
            "Memory may be stale (saved about {age_days} days ago)."
        ))
    } else {
        None
    }
}
