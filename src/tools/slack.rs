//! Slack Web API tool adapters: post messages (with optional blocks and a
//! threaded file upload) and read channel history.

use std::path::Path;

use serde_json::{json, Value};
use tracing::instrument;

use crate::config::{load_communication_config, resolve_slack_config, ResolvedSlackConfig};
use crate::kernel::context::ToolRuntimeContext;
use crate::types::JsonMap;

/// History reads are clamped to this many messages.
const MAX_HISTORY_LIMIT: u64 = 200;

fn resolve_config(ctx: &ToolRuntimeContext) -> ResolvedSlackConfig {
    let config = load_communication_config(ctx.communication_config_path.as_deref());
    resolve_slack_config(&config)
}

fn opt_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

async fn call_slack(
    config: &ResolvedSlackConfig,
    token: &str,
    method: &str,
    body: Value,
) -> Result<Value, String> {
    let url = format!("{}/{}", config.base_url.trim_end_matches('/'), method);
    let response = reqwest::Client::new()
        .post(&url)
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .map_err(|e| format!("slack_request_failed:{e}"))?;
    response
        .json::<Value>()
        .await
        .map_err(|e| format!("slack_request_failed:{e}"))
}

/// Post a message, optionally with Block Kit blocks and a threaded file
/// upload.
///
/// `args`: `channel`, `text`, optional `blocks_json`, `file_path`,
/// `file_name`, `thread_ts`.
#[instrument(skip(ctx, args), fields(tool = "send_slack_message"))]
pub async fn send_slack_message(ctx: &ToolRuntimeContext, args: &JsonMap) -> Result<Value, String> {
    let channel = opt_str(args.get("channel")).unwrap_or_default();
    let text = opt_str(args.get("text")).unwrap_or_default();
    let config = resolve_config(ctx);

    let Some(token) = config.bot_token.clone() else {
        return Ok(json!({
            "status": "not_configured",
            "reason": "slack_token_missing",
            "channel": channel,
        }));
    };

    let parsed_blocks = match opt_str(args.get("blocks_json")) {
        Some(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(items)) => Some(
                items
                    .into_iter()
                    .filter(|item| item.is_object())
                    .collect::<Vec<Value>>(),
            ),
            Ok(_) => {
                return Ok(json!({
                    "status": "failed",
                    "reason": "blocks_json_must_be_array",
                    "channel": channel,
                }));
            }
            Err(_) => {
                return Ok(json!({
                    "status": "failed",
                    "reason": "invalid_blocks_json",
                    "channel": channel,
                }));
            }
        },
        None => None,
    };
    let thread_ts = opt_str(args.get("thread_ts"));

    let mut body = json!({"channel": channel, "text": text});
    if let Some(blocks) = parsed_blocks {
        body["blocks"] = Value::Array(blocks);
    }
    if let Some(ts) = &thread_ts {
        body["thread_ts"] = json!(ts);
    }

    let posted = call_slack(&config, &token, "chat.postMessage", body).await?;
    if posted.get("ok").and_then(Value::as_bool) != Some(true) {
        return Ok(json!({
            "status": "failed",
            "reason": "slack_api_error",
            "channel": channel,
            "error": posted.get("error").cloned().unwrap_or(Value::Null),
        }));
    }
    let message_ts = opt_str(posted.get("ts"));

    let mut file_upload = Value::Null;
    if let Some(file_path) = opt_str(args.get("file_path")) {
        let path = Path::new(&file_path);
        if !path.is_file() {
            return Ok(json!({
                "status": "failed",
                "reason": "file_not_found",
                "channel": channel,
                "path": file_path,
            }));
        }
        let filename = opt_str(args.get("file_name")).unwrap_or_else(|| {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_owned())
        });
        let bytes =
            std::fs::read(path).map_err(|e| format!("slack_file_read_failed:{e}"))?;

        let upload_thread = thread_ts.clone().or_else(|| message_ts.clone());
        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(filename.clone()),
            )
            .text("channels", channel.clone())
            .text("filename", filename.clone())
            .text("title", filename.clone());
        if let Some(ts) = upload_thread {
            form = form.text("thread_ts", ts);
        }

        let url = format!("{}/files.upload", config.base_url.trim_end_matches('/'));
        let uploaded = reqwest::Client::new()
            .post(&url)
            .bearer_auth(&token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| format!("slack_request_failed:{e}"))?
            .json::<Value>()
            .await
            .map_err(|e| format!("slack_request_failed:{e}"))?;

        if uploaded.get("ok").and_then(Value::as_bool) != Some(true) {
            return Ok(json!({
                "status": "failed",
                "reason": "slack_api_error",
                "channel": channel,
                "error": uploaded.get("error").cloned().unwrap_or(Value::Null),
            }));
        }
        file_upload = json!({
            "status": "ok",
            "file": uploaded.get("file").cloned().unwrap_or(Value::Null),
        });
    }

    let message_text = posted
        .pointer("/message/text")
        .and_then(Value::as_str)
        .unwrap_or(&text);
    Ok(json!({
        "status": "ok",
        "channel": channel,
        "message_ts": message_ts,
        "message": {
            "ts": message_ts,
            "channel": opt_str(posted.get("channel")),
            "text": message_text,
        },
        "file_upload": file_upload,
    }))
}

/// Read recent channel messages, normalized to
/// `{ts, thread_ts, user, text, files?}`.
#[instrument(skip(ctx, args), fields(tool = "read_slack_messages"))]
pub async fn read_slack_messages(
    ctx: &ToolRuntimeContext,
    args: &JsonMap,
) -> Result<Value, String> {
    let channel = opt_str(args.get("channel")).unwrap_or_default();
    let config = resolve_config(ctx);

    let Some(token) = config.bot_token.clone() else {
        return Ok(json!({
            "status": "not_configured",
            "reason": "slack_token_missing",
            "channel": channel,
        }));
    };

    let limit = args
        .get("limit")
        .and_then(Value::as_u64)
        .unwrap_or(20)
        .clamp(1, MAX_HISTORY_LIMIT);
    let include_files = args
        .get("include_files")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    let body = json!({"channel": channel, "limit": limit});
    let response = call_slack(&config, &token, "conversations.history", body).await?;
    if response.get("ok").and_then(Value::as_bool) != Some(true) {
        return Ok(json!({
            "status": "failed",
            "reason": "slack_api_error",
            "channel": channel,
            "error": response.get("error").cloned().unwrap_or(Value::Null),
        }));
    }

    let mut normalized = Vec::new();
    if let Some(messages) = response.get("messages").and_then(Value::as_array) {
        for raw in messages {
            let Some(raw) = raw.as_object() else {
                continue;
            };
            let mut item = json!({
                "ts": opt_str(raw.get("ts")),
                "thread_ts": opt_str(raw.get("thread_ts")),
                "user": opt_str(raw.get("user")),
                "text": opt_str(raw.get("text")).unwrap_or_default(),
            });
            if include_files {
                item["files"] = Value::Array(normalize_file_entries(raw.get("files")));
            }
            normalized.push(item);
        }
    }

    Ok(json!({
        "status": "ok",
        "channel": channel,
        "count": normalized.len(),
        "messages": normalized,
    }))
}

fn normalize_file_entries(raw_files: Option<&Value>) -> Vec<Value> {
    let Some(Value::Array(items)) = raw_files else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .map(|item| {
            json!({
                "id": opt_str(item.get("id")),
                "name": opt_str(item.get("name")),
                "title": opt_str(item.get("title")),
                "filetype": opt_str(item.get("filetype")),
                "mimetype": opt_str(item.get("mimetype")),
                "size": item.get("size").cloned().unwrap_or(Value::Null),
            })
        })
        .collect()
}
