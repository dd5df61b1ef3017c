//! Request/response DTOs for the HTTP surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /agent/run`.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentRunPayload {
    /// Owning tenant (overridable by `X-Tenant-Id`).
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Requesting user (overridable by `X-User-Id`).
    #[serde(default)]
    pub user_id: Option<String>,
    /// Session identifier (overridable by `X-Session-Id`).
    #[serde(default)]
    pub session_id: Option<String>,
    /// The user's message.
    pub message: String,
    /// Streaming is not supported; accepted and ignored when `false`.
    #[serde(default)]
    pub stream: bool,
}

/// Body of a successful `POST /agent/run`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRunResult {
    /// Terminal status.
    pub status: String,
    /// User-facing response text.
    pub response: String,
    /// Correlation identifier for plan/trace lookups.
    pub plan_id: String,
}

/// Body of `PUT /agent/souls/{tenant_id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct SoulPayload {
    /// Optional per-user scoping.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Persona/policy fields, stored as given.
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

/// Query of `GET /agent/memory/query`.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryQueryParams {
    /// Owning tenant.
    pub tenant_id: String,
    /// Free-text query to embed.
    pub query: String,
    /// Scope filter (`session` or `user`, default `user`).
    #[serde(default)]
    pub scope: Option<String>,
    /// Maximum results (default 5).
    #[serde(default)]
    pub top_k: Option<usize>,
}
