//! Memory tool adapters exposed to the agent graph.
//!
//! All five tools resolve the memory repository from the request context
//! and answer `not_configured` when none is wired. The save tools dedupe
//! by canonical fingerprint against a same-scope search before writing.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::kernel::context::ToolRuntimeContext;
use crate::repos::contract::derive_return_spec;
use crate::repos::{MemorySearchQuery, MemoryWriteRequest};
use crate::types::canonical::fingerprint;
use crate::types::{JsonMap, MemoryRecord, MemoryScope};

/// Candidates inspected per dedup check.
const DEDUP_SEARCH_TOP_K: usize = 10;

fn not_configured(key_field: &str, key: &str) -> Value {
    json!({
        "status": "not_configured",
        "reason": "memory_repository_not_configured",
        key_field: key,
    })
}

fn tool_task_id(plan_id: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{plan_id}:{}", &hex[..8])
}

fn arg_str<'a>(args: &'a JsonMap, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

fn record_to_result(record: &MemoryRecord) -> Value {
    json!({
        "namespaced_key": record.namespaced_key,
        "tenant_id": record.tenant_id,
        "session_id": record.session_id,
        "scope": record.scope.as_str(),
        "key": record.key,
        "value": Value::Object(record.value.clone()),
        "created_at": record.created_at.to_rfc3339(),
        "updated_at": record.updated_at.to_rfc3339(),
    })
}

/// Persist structured session-scoped data under a logical key.
///
/// `args`: `key` (string), `data` (object), `return_spec` (object; its
/// presence is enforced upstream by the policy engine).
pub async fn write_memory(ctx: &ToolRuntimeContext, args: &JsonMap) -> Result<Value, String> {
    let key = arg_str(args, "key").unwrap_or_default().to_owned();
    let Some(memory_repo) = &ctx.memory_repo else {
        return Ok(not_configured("key", &key));
    };
    let data = args
        .get("data")
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| "write_memory requires an object 'data' argument".to_owned())?;
    let return_spec = args
        .get("return_spec")
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| "write_memory requires an object 'return_spec' argument".to_owned())?;
    let shape = return_spec
        .get("shape")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or(return_spec);

    let namespaced_key = memory_repo
        .write(MemoryWriteRequest {
            tenant_id: ctx.tenant_id.clone(),
            session_id: ctx.session_id.clone(),
            task_id: tool_task_id(&ctx.plan_id),
            key,
            value: data.clone(),
            return_spec_shape: shape,
            scope: MemoryScope::Session,
        })
        .await
        .map_err(|e| e.to_string())?;

    Ok(json!({
        "status": "ok",
        "namespaced_key": namespaced_key,
        "scope": "session",
        "data": Value::Object(data),
    }))
}

/// Read previously stored memory by namespaced key.
pub async fn read_memory(ctx: &ToolRuntimeContext, args: &JsonMap) -> Result<Value, String> {
    let namespaced_key = arg_str(args, "namespaced_key").unwrap_or_default().to_owned();
    let Some(memory_repo) = &ctx.memory_repo else {
        return Ok(not_configured("key", &namespaced_key));
    };

    let value = memory_repo
        .read(&namespaced_key, false)
        .await
        .map_err(|e| e.to_string())?;
    Ok(match value {
        Some(data) => json!({
            "status": "ok",
            "key": namespaced_key,
            "data": Value::Object(data),
        }),
        None => json!({
            "status": "not_found",
            "key": namespaced_key,
            "data": Value::Null,
        }),
    })
}

/// Save durable cross-session user memory from JSON text.
pub async fn save_user_memory(ctx: &ToolRuntimeContext, args: &JsonMap) -> Result<Value, String> {
    save_scoped_memory(ctx, args, MemoryScope::User, "user_memory").await
}

/// Save session-scoped action memory from JSON text.
pub async fn save_action_memory(ctx: &ToolRuntimeContext, args: &JsonMap) -> Result<Value, String> {
    save_scoped_memory(ctx, args, MemoryScope::Session, "action_memory").await
}

async fn save_scoped_memory(
    ctx: &ToolRuntimeContext,
    args: &JsonMap,
    scope: MemoryScope,
    memory_type: &str,
) -> Result<Value, String> {
    let key = arg_str(args, "key").unwrap_or_default().to_owned();
    let Some(memory_repo) = &ctx.memory_repo else {
        return Ok(not_configured("key", &key));
    };

    let Some(parsed_memory) = arg_str(args, "memory_json")
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .and_then(|v| v.as_object().cloned())
    else {
        return Ok(json!({
            "status": "failed",
            "reason": "invalid_memory_json",
            "key": key,
        }));
    };

    let parsed_spec = arg_str(args, "return_spec_json")
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .and_then(|v| v.as_object().cloned());
    let effective_spec = parsed_spec.unwrap_or_else(|| derive_return_spec(&parsed_memory));

    if let Some(existing_key) = find_duplicate(ctx, &parsed_memory, scope).await {
        return Ok(json!({
            "status": "duplicate_skipped",
            "memory_type": memory_type,
            "scope": scope.as_str(),
            "namespaced_key": existing_key,
            "reason": "similar_memory_exists",
        }));
    }

    let namespaced_key = memory_repo
        .write(MemoryWriteRequest {
            tenant_id: ctx.tenant_id.clone(),
            session_id: ctx.session_id.clone(),
            task_id: tool_task_id(&ctx.plan_id),
            key,
            value: parsed_memory,
            return_spec_shape: effective_spec,
            scope,
        })
        .await
        .map_err(|e| e.to_string())?;

    Ok(json!({
        "status": "ok",
        "memory_type": memory_type,
        "scope": scope.as_str(),
        "namespaced_key": namespaced_key,
    }))
}

/// Semantic search over stored memory by query text.
pub async fn search_relevant_memory(
    ctx: &ToolRuntimeContext,
    args: &JsonMap,
) -> Result<Value, String> {
    let query = arg_str(args, "query").unwrap_or_default().to_owned();
    let Some(memory_repo) = &ctx.memory_repo else {
        return Ok(json!({
            "status": "not_configured",
            "reason": "memory_repository_not_configured",
            "query": query,
            "results": [],
        }));
    };

    let scope = MemoryScope::parse(arg_str(args, "scope").unwrap_or("user"));
    let top_k = args
        .get("top_k")
        .and_then(Value::as_u64)
        .unwrap_or(5)
        .max(1) as usize;

    let results = memory_repo
        .search(MemorySearchQuery {
            tenant_id: ctx.tenant_id.clone(),
            user_id: ctx.user_id.clone(),
            session_id: ctx.session_id.clone(),
            query_text: query.clone(),
            scope,
            top_k,
        })
        .await
        .map_err(|e| e.to_string())?;

    let rendered: Vec<Value> = results.iter().map(record_to_result).collect();
    Ok(json!({
        "status": "ok",
        "query": query,
        "scope": scope.as_str(),
        "results": rendered,
        "count": rendered.len(),
    }))
}

/// Dedup check: same-scope search by `memory_text` (or the fingerprint
/// itself), then fingerprint equality against each candidate's value.
async fn find_duplicate(
    ctx: &ToolRuntimeContext,
    parsed_memory: &JsonMap,
    scope: MemoryScope,
) -> Option<String> {
    let memory_repo = ctx.memory_repo.as_ref()?;
    let target_fp = fingerprint(&Value::Object(parsed_memory.clone()));

    let query_text = parsed_memory
        .get("memory_text")
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| target_fp.clone());

    let candidates = memory_repo
        .search(MemorySearchQuery {
            tenant_id: ctx.tenant_id.clone(),
            user_id: ctx.user_id.clone(),
            session_id: ctx.session_id.clone(),
            query_text,
            scope,
            top_k: DEDUP_SEARCH_TOP_K,
        })
        .await
        .ok()?;

    candidates
        .iter()
        .find(|candidate| fingerprint(&Value::Object(candidate.value.clone())) == target_fp)
        .map(|candidate| candidate.namespaced_key.clone())
}
