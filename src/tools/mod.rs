//! Built-in tool adapters and their dispatch table.
//!
//! Tools are plain async functions over the request's
//! [`ToolRuntimeContext`]; they return structured JSON values and never
//! panic. Dispatch normalizes any error into the standard
//! `{status: "failed", tool_name, reason}` shape. Tools not found here are
//! resolved against the request's MCP toolsets by the graph runner.

pub mod exec_python;
pub mod large_response;
pub mod memory;
pub mod slack;
pub mod smtp;

use serde_json::{json, Value};

use crate::agents::llm::ToolDecl;
use crate::kernel::context::ToolRuntimeContext;
use crate::kernel::policy::PolicyEngine;
use crate::types::JsonMap;

/// Dispatch a built-in tool by name.
///
/// Returns `None` when the name is not a built-in (the caller should try
/// MCP toolsets next).
pub async fn dispatch_builtin(
    name: &str,
    args: &JsonMap,
    ctx: &ToolRuntimeContext,
) -> Option<Value> {
    let outcome = match name {
        "write_memory" => memory::write_memory(ctx, args).await,
        "read_memory" => memory::read_memory(ctx, args).await,
        "save_user_memory" => memory::save_user_memory(ctx, args).await,
        "save_action_memory" => memory::save_action_memory(ctx, args).await,
        "search_relevant_memory" => memory::search_relevant_memory(ctx, args).await,
        "write_temp" => {
            let data = args.get("data").and_then(Value::as_str).unwrap_or_default();
            ctx.large_response.write_temp(data).await
        }
        "read_lines" => {
            let file_id = args
                .get("file_id")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let start = args.get("start").and_then(Value::as_u64).unwrap_or(0) as usize;
            let n = args.get("n").and_then(Value::as_u64).unwrap_or(20) as usize;
            Ok(ctx.large_response.read_lines(file_id, start, n).await)
        }
        "exec_python" => {
            let script = args
                .get("script")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let file_id = args
                .get("file_id")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(ctx.large_response.exec_python(script, file_id).await)
        }
        "send_slack_message" => slack::send_slack_message(ctx, args).await,
        "read_slack_messages" => slack::read_slack_messages(ctx, args).await,
        "send_email_smtp" => smtp::send_email_smtp(ctx, args).await,
        _ => return None,
    };

    Some(match outcome {
        Ok(value) => value,
        Err(reason) => PolicyEngine::normalize_tool_error(name, &reason),
    })
}

/// Tool declarations for the memory specialist.
pub fn memory_tool_decls() -> Vec<ToolDecl> {
    vec![
        ToolDecl::new(
            "search_relevant_memory",
            "Semantic search over stored memory by query text.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "scope": {"type": "string", "enum": ["session", "user"]},
                    "top_k": {"type": "integer"},
                },
                "required": ["query"],
            }),
        ),
        ToolDecl::new(
            "save_user_memory",
            "Save durable cross-session user memory from a JSON object string.",
            json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string"},
                    "memory_json": {"type": "string"},
                    "return_spec_json": {"type": "string"},
                },
                "required": ["key", "memory_json"],
            }),
        ),
        ToolDecl::new(
            "save_action_memory",
            "Save session-scoped action memory from a JSON object string.",
            json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string"},
                    "memory_json": {"type": "string"},
                    "return_spec_json": {"type": "string"},
                },
                "required": ["key", "memory_json"],
            }),
        ),
        ToolDecl::new(
            "read_memory",
            "Read previously stored memory by namespaced key.",
            json!({
                "type": "object",
                "properties": {"namespaced_key": {"type": "string"}},
                "required": ["namespaced_key"],
            }),
        ),
        ToolDecl::new(
            "write_memory",
            "Persist structured session-scoped data under a logical key with a return spec.",
            json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string"},
                    "data": {"type": "object"},
                    "return_spec": {"type": "object"},
                },
                "required": ["key", "data", "return_spec"],
            }),
        ),
    ]
}

/// Tool declarations for the executor's large-response handling.
pub fn large_response_tool_decls() -> Vec<ToolDecl> {
    vec![
        ToolDecl::new(
            "write_temp",
            "Spill a large text payload to a temp file; returns its file_id.",
            json!({
                "type": "object",
                "properties": {"data": {"type": "string"}},
                "required": ["data"],
            }),
        ),
        ToolDecl::new(
            "read_lines",
            "Read a slice of lines from a spilled temp file.",
            json!({
                "type": "object",
                "properties": {
                    "file_id": {"type": "string"},
                    "start": {"type": "integer"},
                    "n": {"type": "integer"},
                },
                "required": ["file_id"],
            }),
        ),
        ToolDecl::new(
            "exec_python",
            "Run a sandboxed extraction script against a spilled JSON file; \
             the script must assign the final object to `result`.",
            json!({
                "type": "object",
                "properties": {
                    "script": {"type": "string"},
                    "file_id": {"type": "string"},
                },
                "required": ["script", "file_id"],
            }),
        ),
    ]
}

/// Tool declarations for the communicator.
pub fn communication_tool_decls() -> Vec<ToolDecl> {
    vec![
        ToolDecl::new(
            "send_slack_message",
            "Send a Slack message, optionally with Block Kit blocks and a threaded file upload.",
            json!({
                "type": "object",
                "properties": {
                    "channel": {"type": "string"},
                    "text": {"type": "string"},
                    "blocks_json": {"type": "string"},
                    "file_path": {"type": "string"},
                    "file_name": {"type": "string"},
                    "thread_ts": {"type": "string"},
                },
                "required": ["channel", "text"],
            }),
        ),
        ToolDecl::new(
            "read_slack_messages",
            "Read recent messages from a Slack channel.",
            json!({
                "type": "object",
                "properties": {
                    "channel": {"type": "string"},
                    "limit": {"type": "integer"},
                    "include_files": {"type": "boolean"},
                },
                "required": ["channel"],
            }),
        ),
        ToolDecl::new(
            "send_email_smtp",
            "Send an email with optional HTML body and attachments through configured SMTP.",
            json!({
                "type": "object",
                "properties": {
                    "to_emails": {"type": "string"},
                    "subject": {"type": "string"},
                    "body_text": {"type": "string"},
                    "body_html": {"type": "string"},
                    "cc_emails": {"type": "string"},
                    "bcc_emails": {"type": "string"},
                    "attachment_paths_json": {"type": "string"},
                },
                "required": ["to_emails", "subject", "body_text"],
            }),
        ),
    ]
}
