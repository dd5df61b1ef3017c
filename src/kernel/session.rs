//! Session bootstrap and post-run indexing.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::repos::{SessionRepository, StorageError};
use crate::types::{AgentRunRequest, JsonMap, SessionRecord};

/// Ensure the session exists; returns `true` when it was just created.
///
/// The first-turn signal drives the planner-first and memory-precheck
/// policies for the request.
pub async fn ensure_session(
    sessions: &Arc<dyn SessionRepository>,
    request: &AgentRunRequest,
) -> Result<bool, StorageError> {
    let existing = sessions
        .get(&request.tenant_id, &request.user_id, &request.session_id)
        .await?;
    if existing.is_some() {
        return Ok(false);
    }

    let now = Utc::now();
    let mut state = JsonMap::new();
    state.insert("tenant_id".into(), Value::String(request.tenant_id.clone()));
    state.insert("user_id".into(), Value::String(request.user_id.clone()));
    state.insert(
        "session_id".into(),
        Value::String(request.session_id.clone()),
    );
    sessions
        .upsert(SessionRecord {
            tenant_id: request.tenant_id.clone(),
            user_id: request.user_id.clone(),
            session_id: request.session_id.clone(),
            state,
            created_at: now,
            updated_at: now,
        })
        .await?;
    Ok(true)
}

/// Persist the finished turn into the session record so future turns can
/// search it cross-session.
pub async fn index_session(
    sessions: &Arc<dyn SessionRepository>,
    request: &AgentRunRequest,
    response_text: &str,
) -> Result<(), StorageError> {
    let Some(mut record) = sessions
        .get(&request.tenant_id, &request.user_id, &request.session_id)
        .await?
    else {
        return Ok(());
    };

    record
        .state
        .insert("last_message".into(), Value::String(request.message.clone()));
    record.state.insert(
        "last_response".into(),
        Value::String(response_text.to_owned()),
    );
    record.updated_at = Utc::now();
    sessions.upsert(record).await
}
