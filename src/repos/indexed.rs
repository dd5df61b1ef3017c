//! SQLite-backed repositories with embeddings, kNN search, and retention.
//!
//! This is the durable realization of the repository traits. Documents are
//! validated against a local schema before insertion so malformed payloads
//! fail fast as `storage_schema_error` instead of corrupting an index.
//! Memory rows carry an embedding of the canonical value JSON; `knn_search`
//! scores cosine similarity over tenant+scope pre-filtered rows. Event rows
//! flatten volatile nested maps into canonical-JSON sibling strings and are
//! subject to an age-based retention sweep.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::repos::contract::{build_namespaced_key, matches_return_spec, validate_label};
use crate::repos::embedding::Embedder;
use crate::repos::lock::WriteLockTable;
use crate::repos::{
    EventRepository, MemoryError, MemoryRepository, MemorySearchQuery, MemoryWriteRequest,
    PlanRepository, SessionRepository, SoulRepository, StorageError,
};
use crate::types::canonical::canonical_json;
use crate::types::{EventRecord, JsonMap, MemoryRecord, MemoryScope, Plan, SessionRecord};

/// Default retention window for trace events.
pub const DEFAULT_EVENTS_RETENTION_DAYS: i64 = 30;

/// Shared SQLite handle for the indexed backend.
#[derive(Debug, Clone)]
pub struct IndexedBackend {
    pool: SqlitePool,
}

impl IndexedBackend {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// Pass `:memory:` for an ephemeral database.
    pub async fn connect(path: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let backend = Self { pool };
        backend.ensure_schema().await?;
        Ok(backend)
    }

    /// Apply the schema migration. Idempotent.
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        sqlx::raw_sql(include_str!("../../migrations/001_schema.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Underlying pool, exposed for tests.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn ts_string(ts: DateTime<Utc>) -> String {
    // Fixed-width UTC form; lexicographic order equals chronological order.
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(format!("bad timestamp '{raw}': {e}")))
}

fn parse_object(raw: &str) -> Result<JsonMap, StorageError> {
    let value: Value = serde_json::from_str(raw)?;
    value
        .as_object()
        .cloned()
        .ok_or_else(|| StorageError::Serialization("expected JSON object".to_owned()))
}

// ── Local document validation ───────────────────────────────────

/// Per-index document schema: required fields, then optional fields.
///
/// The union of the two sets is the allowed set; anything else in a
/// document is rejected, matching the strict-dynamic index mappings.
fn document_schema(index: &str) -> Option<(&'static [(&'static str, &'static str)], &'static [(&'static str, &'static str)])> {
    match index {
        "agent_memory" => Some((
            &[
                ("namespaced_key", "string"),
                ("tenant_id", "string"),
                ("session_id", "string"),
                ("task_id", "string"),
                ("scope", "string"),
                ("key", "string"),
                ("value", "object"),
                ("return_spec_shape", "object"),
                ("created_at", "string"),
                ("updated_at", "string"),
            ],
            &[("embedding", "array")],
        )),
        "agent_events" => Some((
            &[
                ("event_type", "string"),
                ("tenant_id", "string"),
                ("session_id", "string"),
                ("payload", "object"),
                ("ts", "string"),
            ],
            &[("plan_id", "string_or_null"), ("task_id", "string_or_null")],
        )),
        "agent_plans" => Some((
            &[
                ("plan_id", "string"),
                ("tenant_id", "string"),
                ("session_id", "string"),
                ("user_id", "string"),
                ("status", "string"),
                ("replan_count", "integer"),
                ("steps", "array"),
                ("replan_history", "array"),
                ("created_at", "string"),
            ],
            &[("completed_at", "string_or_null")],
        )),
        "agent_souls" => Some((
            &[
                ("tenant_id", "string"),
                ("payload", "object"),
                ("updated_at", "string"),
            ],
            &[("user_id", "string_or_null")],
        )),
        "agent_sessions" => Some((
            &[
                ("session_id", "string"),
                ("tenant_id", "string"),
                ("user_id", "string"),
                ("state", "object"),
                ("created_at", "string"),
                ("updated_at", "string"),
            ],
            &[],
        )),
        _ => None,
    }
}

fn type_label_matches(value: &Value, kind: &str) -> bool {
    match kind {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        // Labels like string_or_null accept any value.
        _ => true,
    }
}

/// Check a document against its index schema before persisting it.
///
/// Three passes, in order: every required field must be present, every
/// document field must belong to the allowed (required + optional) set,
/// and present fields must satisfy their type labels.
///
/// # Errors
///
/// [`StorageError::Schema`] naming the index and the offending field.
pub fn validate_document(index: &str, document: &JsonMap) -> Result<(), StorageError> {
    let Some((required, optional)) = document_schema(index) else {
        return Err(StorageError::Schema(format!("unknown index '{index}'")));
    };

    for (field, _) in required {
        if !document.contains_key(*field) {
            return Err(StorageError::Schema(format!(
                "index '{index}' missing required field '{field}'"
            )));
        }
    }

    for field_name in document.keys() {
        let allowed = required.iter().chain(optional).any(|(field, _)| field == field_name);
        if !allowed {
            return Err(StorageError::Schema(format!(
                "index '{index}' received unexpected field '{field_name}'"
            )));
        }
    }

    for (field, kind) in required.iter().chain(optional) {
        if let Some(value) = document.get(*field) {
            if !type_label_matches(value, kind) {
                return Err(StorageError::Schema(format!(
                    "index '{index}' field '{field}' must be {kind}"
                )));
            }
        }
    }
    Ok(())
}

/// Replace volatile nested maps with canonical-JSON sibling strings.
///
/// Dynamic tool arguments and responses vary per call; storing them as
/// opaque strings keeps the event index mapping strict.
pub fn flatten_volatile_payload(payload: &JsonMap) -> JsonMap {
    let mut flattened = payload.clone();

    if let Some(args) = flattened.remove("tool_args") {
        if args.is_object() {
            flattened.insert(
                "tool_args_json".to_owned(),
                Value::String(canonical_json(&args)),
            );
        } else {
            flattened.insert("tool_args".to_owned(), args);
        }
    }

    for (list_field, volatile_field, sibling) in [
        ("function_calls", "args", "args_json"),
        ("function_responses", "response", "response_json"),
    ] {
        if let Some(Value::Array(items)) = flattened.get_mut(list_field) {
            for item in items.iter_mut() {
                if let Value::Object(entry) = item {
                    if let Some(nested) = entry.remove(volatile_field) {
                        if nested.is_object() {
                            entry.insert(
                                sibling.to_owned(),
                                Value::String(canonical_json(&nested)),
                            );
                        } else {
                            entry.insert(volatile_field.to_owned(), nested);
                        }
                    }
                }
            }
        }
    }

    flattened
}

// ── Plans ───────────────────────────────────────────────────────

/// SQLite plan repository storing the full plan document as JSON.
#[derive(Debug, Clone)]
pub struct IndexedPlanRepository {
    pool: SqlitePool,
}

impl IndexedPlanRepository {
    /// Create a repository over the shared backend.
    pub fn new(backend: &IndexedBackend) -> Self {
        Self {
            pool: backend.pool.clone(),
        }
    }
}

#[async_trait]
impl PlanRepository for IndexedPlanRepository {
    async fn save(&self, plan: &Plan) -> Result<(), StorageError> {
        let document_value = serde_json::to_value(plan)?;
        let document = document_value
            .as_object()
            .cloned()
            .ok_or_else(|| StorageError::Serialization("plan must serialize to object".into()))?;
        validate_document("agent_plans", &document)?;

        sqlx::query(
            "INSERT INTO agent_plans (plan_id, tenant_id, session_id, status, document_json) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(plan_id) DO UPDATE SET \
               tenant_id = excluded.tenant_id, \
               session_id = excluded.session_id, \
               status = excluded.status, \
               document_json = excluded.document_json",
        )
        .bind(&plan.plan_id)
        .bind(&plan.tenant_id)
        .bind(&plan.session_id)
        .bind(plan.status.as_str())
        .bind(serde_json::to_string(&document_value)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, plan_id: &str) -> Result<Option<Plan>, StorageError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT document_json FROM agent_plans WHERE plan_id = ?")
                .bind(plan_id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((document_json,)) => Ok(Some(serde_json::from_str(&document_json)?)),
            None => Ok(None),
        }
    }
}

// ── Memory ──────────────────────────────────────────────────────

/// SQLite memory repository with embeddings and kNN search.
pub struct IndexedMemoryRepository {
    pool: SqlitePool,
    locks: WriteLockTable,
    embedder: Option<Arc<dyn Embedder>>,
}

impl std::fmt::Debug for IndexedMemoryRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedMemoryRepository")
            .field("embedder", &self.embedder.is_some())
            .finish()
    }
}

impl IndexedMemoryRepository {
    /// Create a repository; pass an embedder to enable vector storage.
    pub fn new(backend: &IndexedBackend, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self {
            pool: backend.pool.clone(),
            locks: WriteLockTable::default(),
            embedder,
        }
    }

    /// Override lock budgets, for contention tests.
    pub fn with_lock_budgets(mut self, wait_timeout: Duration, ttl: Duration) -> Self {
        self.locks = WriteLockTable::new(wait_timeout, ttl);
        self
    }

    async fn compute_embedding(&self, value: &JsonMap) -> Result<Option<Vec<f32>>, MemoryError> {
        let Some(embedder) = &self.embedder else {
            return Ok(None);
        };
        let text = canonical_json(&Value::Object(value.clone()));
        let vector = embedder
            .embed(&text)
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        let expected = embedder.dimensions();
        if vector.len() != expected {
            return Err(MemoryError::EmbeddingDimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        Ok(Some(vector))
    }

    fn row_to_record(row: MemoryRow) -> Result<MemoryRecord, StorageError> {
        let embedding = match row.embedding_json {
            Some(raw) => Some(
                serde_json::from_str::<Vec<f32>>(&raw)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?,
            ),
            None => None,
        };
        Ok(MemoryRecord {
            namespaced_key: row.namespaced_key,
            tenant_id: row.tenant_id,
            session_id: row.session_id,
            task_id: row.task_id,
            scope: MemoryScope::parse(&row.scope),
            key: row.key,
            value: parse_object(&row.value_json)?,
            return_spec_shape: parse_object(&row.return_spec_json)?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
            embedding,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MemoryRow {
    namespaced_key: String,
    tenant_id: String,
    session_id: String,
    task_id: String,
    scope: String,
    key: String,
    value_json: String,
    return_spec_json: String,
    created_at: String,
    updated_at: String,
    embedding_json: Option<String>,
}

const MEMORY_COLUMNS: &str = "namespaced_key, tenant_id, session_id, task_id, scope, key, \
     value_json, return_spec_json, created_at, updated_at, embedding_json";

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl MemoryRepository for IndexedMemoryRepository {
    async fn write(&self, request: MemoryWriteRequest) -> Result<String, MemoryError> {
        validate_label(&request.key)?;
        if !matches_return_spec(&request.value, &request.return_spec_shape) {
            return Err(MemoryError::ContractViolation);
        }

        let namespaced_key = build_namespaced_key(
            &request.tenant_id,
            &request.session_id,
            &request.task_id,
            &request.key,
        );
        self.locks.acquire(&namespaced_key, &request.task_id).await?;

        let embedding = self.compute_embedding(&request.value).await?;
        let now = ts_string(Utc::now());

        let mut document = JsonMap::new();
        document.insert("namespaced_key".into(), Value::String(namespaced_key.clone()));
        document.insert("tenant_id".into(), Value::String(request.tenant_id.clone()));
        document.insert("session_id".into(), Value::String(request.session_id.clone()));
        document.insert("task_id".into(), Value::String(request.task_id.clone()));
        document.insert("scope".into(), Value::String(request.scope.as_str().into()));
        document.insert("key".into(), Value::String(request.key.clone()));
        document.insert("value".into(), Value::Object(request.value.clone()));
        document.insert(
            "return_spec_shape".into(),
            Value::Object(request.return_spec_shape.clone()),
        );
        document.insert("created_at".into(), Value::String(now.clone()));
        document.insert("updated_at".into(), Value::String(now.clone()));
        if let Some(vector) = &embedding {
            let rendered = serde_json::to_value(vector)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            document.insert("embedding".into(), rendered);
        }
        validate_document("agent_memory", &document)?;

        let embedding_json = match &embedding {
            Some(vector) => Some(
                serde_json::to_string(vector)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?,
            ),
            None => None,
        };

        sqlx::query(
            "INSERT INTO agent_memory (namespaced_key, tenant_id, session_id, task_id, scope, \
               key, value_json, return_spec_json, created_at, updated_at, embedding_json) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(namespaced_key) DO UPDATE SET \
               value_json = excluded.value_json, \
               return_spec_json = excluded.return_spec_json, \
               scope = excluded.scope, \
               updated_at = excluded.updated_at, \
               embedding_json = excluded.embedding_json",
        )
        .bind(&namespaced_key)
        .bind(&request.tenant_id)
        .bind(&request.session_id)
        .bind(&request.task_id)
        .bind(request.scope.as_str())
        .bind(&request.key)
        .bind(
            serde_json::to_string(&Value::Object(request.value))
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
        )
        .bind(
            serde_json::to_string(&Value::Object(request.return_spec_shape))
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
        )
        .bind(&now)
        .bind(&now)
        .bind(embedding_json)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;

        Ok(namespaced_key)
    }

    async fn read(
        &self,
        namespaced_key: &str,
        release_lock: bool,
    ) -> Result<Option<JsonMap>, MemoryError> {
        if release_lock {
            self.locks.release(namespaced_key).await;
        }
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value_json FROM agent_memory WHERE namespaced_key = ?")
                .bind(namespaced_key)
                .fetch_optional(&self.pool)
                .await
                .map_err(StorageError::from)?;
        match row {
            Some((value_json,)) => Ok(Some(parse_object(&value_json)?)),
            None => Ok(None),
        }
    }

    async fn search(&self, query: MemorySearchQuery) -> Result<Vec<MemoryRecord>, MemoryError> {
        // With embeddings available, text search is kNN over the query
        // embedding with the same tenant + scope pre-filter; substring
        // matching is the fallback.
        if let Some(embedder) = &self.embedder {
            if !query.query_text.trim().is_empty() {
                let vector = embedder
                    .embed(&query.query_text)
                    .await
                    .map_err(|e| MemoryError::Embedding(e.to_string()))?;
                let candidates = self
                    .knn_search(&query.tenant_id, query.scope, &vector, query.top_k.max(1) * 4)
                    .await?;
                return Ok(candidates
                    .into_iter()
                    .filter(|record| {
                        query.scope != MemoryScope::Session
                            || record.session_id == query.session_id
                    })
                    .take(query.top_k)
                    .collect());
            }
        }

        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM agent_memory \
             WHERE tenant_id = ? AND scope = ? ORDER BY rowid"
        );
        let rows: Vec<MemoryRow> = sqlx::query_as(&sql)
            .bind(&query.tenant_id)
            .bind(query.scope.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        let lowered = query.query_text.trim().to_lowercase();
        let mut results = Vec::new();
        for row in rows {
            let record = Self::row_to_record(row)?;
            if query.scope == MemoryScope::Session && record.session_id != query.session_id {
                continue;
            }
            let value_text = canonical_json(&Value::Object(record.value.clone()));
            let haystack = format!("{} {}", record.key, value_text).to_lowercase();
            if !lowered.is_empty() && !haystack.contains(&lowered) {
                continue;
            }
            results.push(record);
            if results.len() >= query.top_k {
                break;
            }
        }
        Ok(results)
    }

    async fn knn_search(
        &self,
        tenant_id: &str,
        scope: MemoryScope,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM agent_memory \
             WHERE tenant_id = ? AND scope = ? AND embedding_json IS NOT NULL"
        );
        let rows: Vec<MemoryRow> = sqlx::query_as(&sql)
            .bind(tenant_id)
            .bind(scope.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        let mut scored: Vec<(f32, MemoryRecord)> = Vec::new();
        for row in rows {
            let record = Self::row_to_record(row)?;
            let score = record
                .embedding
                .as_deref()
                .map(|e| cosine_similarity(e, vector))
                .unwrap_or(0.0);
            scored.push((score, record));
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(_, record)| record)
            .collect())
    }
}

// ── Events ──────────────────────────────────────────────────────

/// SQLite append-only event log with retention.
#[derive(Debug)]
pub struct IndexedEventRepository {
    pool: SqlitePool,
    retention_days: i64,
    last_ts: Mutex<Option<DateTime<Utc>>>,
}

impl IndexedEventRepository {
    /// Create a log with the given retention window.
    pub fn new(backend: &IndexedBackend, retention_days: i64) -> Self {
        Self {
            pool: backend.pool.clone(),
            retention_days,
            last_ts: Mutex::new(None),
        }
    }

    /// Delete events older than the retention window; returns rows removed.
    pub async fn sweep_expired(&self) -> Result<u64, StorageError> {
        let cutoff = ts_string(Utc::now() - ChronoDuration::days(self.retention_days));
        let result = sqlx::query("DELETE FROM agent_events WHERE ts < ?")
            .bind(&cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl EventRepository for IndexedEventRepository {
    async fn append(&self, mut event: EventRecord) -> Result<(), StorageError> {
        {
            let mut last = self.last_ts.lock().await;
            if let Some(previous) = *last {
                if event.ts <= previous {
                    event.ts = previous + ChronoDuration::microseconds(1);
                }
            }
            *last = Some(event.ts);
        }

        let flattened = flatten_volatile_payload(&event.payload);
        let ts = ts_string(event.ts);

        let mut document = JsonMap::new();
        document.insert("event_type".into(), Value::String(event.event_type.clone()));
        document.insert("tenant_id".into(), Value::String(event.tenant_id.clone()));
        document.insert("session_id".into(), Value::String(event.session_id.clone()));
        document.insert(
            "plan_id".into(),
            event.plan_id.clone().map(Value::String).unwrap_or(Value::Null),
        );
        document.insert(
            "task_id".into(),
            event.task_id.clone().map(Value::String).unwrap_or(Value::Null),
        );
        document.insert("payload".into(), Value::Object(flattened.clone()));
        document.insert("ts".into(), Value::String(ts.clone()));
        validate_document("agent_events", &document)?;

        sqlx::query(
            "INSERT INTO agent_events (event_id, event_type, tenant_id, session_id, plan_id, \
               task_id, payload_json, ts) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(format!("evt_{}", Uuid::new_v4().simple()))
        .bind(&event.event_type)
        .bind(&event.tenant_id)
        .bind(&event.session_id)
        .bind(&event.plan_id)
        .bind(&event.task_id)
        .bind(serde_json::to_string(&Value::Object(flattened))?)
        .bind(&ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_by_plan(&self, plan_id: &str) -> Result<Vec<EventRecord>, StorageError> {
        let rows: Vec<(String, String, String, Option<String>, Option<String>, String, String)> =
            sqlx::query_as(
                "SELECT event_type, tenant_id, session_id, plan_id, task_id, payload_json, ts \
                 FROM agent_events WHERE plan_id = ? ORDER BY rowid",
            )
            .bind(plan_id)
            .fetch_all(&self.pool)
            .await?;

        let mut events = Vec::with_capacity(rows.len());
        for (event_type, tenant_id, session_id, plan_id, task_id, payload_json, ts) in rows {
            events.push(EventRecord {
                event_type,
                tenant_id,
                session_id,
                plan_id,
                task_id,
                payload: parse_object(&payload_json)?,
                ts: parse_ts(&ts)?,
            });
        }
        Ok(events)
    }
}

// ── Souls ───────────────────────────────────────────────────────

/// SQLite persona store.
#[derive(Debug, Clone)]
pub struct IndexedSoulRepository {
    pool: SqlitePool,
}

impl IndexedSoulRepository {
    /// Create a repository over the shared backend.
    pub fn new(backend: &IndexedBackend) -> Self {
        Self {
            pool: backend.pool.clone(),
        }
    }
}

fn soul_key(tenant_id: &str, user_id: Option<&str>) -> String {
    format!("{tenant_id}:{}", user_id.unwrap_or("*"))
}

#[async_trait]
impl SoulRepository for IndexedSoulRepository {
    async fn upsert(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        payload: JsonMap,
    ) -> Result<(), StorageError> {
        let updated_at = ts_string(Utc::now());
        let mut document = JsonMap::new();
        document.insert("tenant_id".into(), Value::String(tenant_id.to_owned()));
        document.insert(
            "user_id".into(),
            user_id.map(|u| Value::String(u.to_owned())).unwrap_or(Value::Null),
        );
        document.insert("payload".into(), Value::Object(payload.clone()));
        document.insert("updated_at".into(), Value::String(updated_at.clone()));
        validate_document("agent_souls", &document)?;

        sqlx::query(
            "INSERT INTO agent_souls (soul_key, tenant_id, user_id, payload_json, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(soul_key) DO UPDATE SET \
               payload_json = excluded.payload_json, \
               updated_at = excluded.updated_at",
        )
        .bind(soul_key(tenant_id, user_id))
        .bind(tenant_id)
        .bind(user_id)
        .bind(serde_json::to_string(&Value::Object(payload))?)
        .bind(&updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
    ) -> Result<Option<JsonMap>, StorageError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT payload_json FROM agent_souls WHERE soul_key = ?")
                .bind(soul_key(tenant_id, user_id))
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((payload_json,)) => Ok(Some(parse_object(&payload_json)?)),
            None => Ok(None),
        }
    }
}

// ── Sessions ────────────────────────────────────────────────────

/// SQLite session store.
#[derive(Debug, Clone)]
pub struct IndexedSessionRepository {
    pool: SqlitePool,
}

impl IndexedSessionRepository {
    /// Create a repository over the shared backend.
    pub fn new(backend: &IndexedBackend) -> Self {
        Self {
            pool: backend.pool.clone(),
        }
    }
}

fn session_key(tenant_id: &str, user_id: &str, session_id: &str) -> String {
    format!("{tenant_id}:{user_id}:{session_id}")
}

#[async_trait]
impl SessionRepository for IndexedSessionRepository {
    async fn get(
        &self,
        tenant_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<SessionRecord>, StorageError> {
        let row: Option<(String, String, String)> = sqlx::query_as(
            "SELECT state_json, created_at, updated_at FROM agent_sessions \
             WHERE session_key = ?",
        )
        .bind(session_key(tenant_id, user_id, session_id))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((state_json, created_at, updated_at)) => Ok(Some(SessionRecord {
                tenant_id: tenant_id.to_owned(),
                user_id: user_id.to_owned(),
                session_id: session_id.to_owned(),
                state: parse_object(&state_json)?,
                created_at: parse_ts(&created_at)?,
                updated_at: parse_ts(&updated_at)?,
            })),
            None => Ok(None),
        }
    }

    async fn upsert(&self, record: SessionRecord) -> Result<(), StorageError> {
        let mut document = JsonMap::new();
        document.insert("tenant_id".into(), Value::String(record.tenant_id.clone()));
        document.insert("user_id".into(), Value::String(record.user_id.clone()));
        document.insert("session_id".into(), Value::String(record.session_id.clone()));
        document.insert("state".into(), Value::Object(record.state.clone()));
        document.insert(
            "created_at".into(),
            Value::String(ts_string(record.created_at)),
        );
        document.insert(
            "updated_at".into(),
            Value::String(ts_string(record.updated_at)),
        );
        validate_document("agent_sessions", &document)?;

        sqlx::query(
            "INSERT INTO agent_sessions (session_key, tenant_id, user_id, session_id, \
               state_json, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(session_key) DO UPDATE SET \
               state_json = excluded.state_json, \
               updated_at = excluded.updated_at",
        )
        .bind(session_key(
            &record.tenant_id,
            &record.user_id,
            &record.session_id,
        ))
        .bind(&record.tenant_id)
        .bind(&record.user_id)
        .bind(&record.session_id)
        .bind(serde_json::to_string(&Value::Object(record.state))?)
        .bind(ts_string(record.created_at))
        .bind(ts_string(record.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
