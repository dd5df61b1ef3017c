//! Repository boundaries for plans, memory, events, souls, and sessions.
//!
//! Orchestration code depends on these traits only, so storage semantics
//! can change without touching execution flow. Two families implement
//! them: [`in_memory`] (process-local, always available) and [`indexed`]
//! (SQLite-backed with embeddings, kNN search, and event retention).

pub mod contract;
pub mod embedding;
pub mod in_memory;
pub mod indexed;
pub mod lock;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{EventRecord, JsonMap, MemoryRecord, MemoryScope, Plan, SessionRecord};

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A document failed local schema validation before indexing.
    #[error("storage_schema_error: {0}")]
    Schema(String),

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization failure while persisting or loading a document.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Errors raised by the memory store.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Value does not satisfy the declared return-spec shape.
    #[error("contract_violation")]
    ContractViolation,

    /// A foreign task holds the write lock and the wait budget elapsed.
    #[error("memory_lock_timeout")]
    LockTimeout,

    /// Label contained `:`; callers must pass short labels, not namespaced
    /// keys.
    #[error("memory labels must not contain ':'")]
    InvalidLabel,

    /// Embedding vector length differs from the configured dimension.
    #[error("embedding_dimension_mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch {
        /// Configured dimensionality.
        expected: usize,
        /// Length actually produced.
        actual: usize,
    },

    /// Embedding provider failure.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// kNN search requested on a backend without embeddings.
    #[error("knn_search requires an indexed backend with embeddings")]
    KnnUnsupported,

    /// Underlying storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Parameters for one memory write.
#[derive(Debug, Clone)]
pub struct MemoryWriteRequest {
    /// Owning tenant.
    pub tenant_id: String,
    /// Originating session.
    pub session_id: String,
    /// Writing task; also the lock owner identity.
    pub task_id: String,
    /// Short label (no `:`).
    pub key: String,
    /// Payload to store.
    pub value: JsonMap,
    /// Shape the payload must satisfy.
    pub return_spec_shape: JsonMap,
    /// Visibility scope.
    pub scope: MemoryScope,
}

/// Parameters for one memory search.
#[derive(Debug, Clone)]
pub struct MemorySearchQuery {
    /// Owning tenant (always filtered).
    pub tenant_id: String,
    /// Requesting user.
    pub user_id: String,
    /// Session filter, applied when `scope` is [`MemoryScope::Session`].
    pub session_id: String,
    /// Free-text query.
    pub query_text: String,
    /// Scope filter.
    pub scope: MemoryScope,
    /// Maximum results.
    pub top_k: usize,
}

/// Plan persistence boundary.
#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// Upsert a plan by `plan_id`.
    async fn save(&self, plan: &Plan) -> Result<(), StorageError>;

    /// Fetch a plan by `plan_id`.
    async fn get(&self, plan_id: &str) -> Result<Option<Plan>, StorageError>;
}

/// Memory persistence boundary with write locks and scoped search.
#[async_trait]
pub trait MemoryRepository: Send + Sync {
    /// Validate and store a payload, returning the namespaced key.
    ///
    /// The write lock acquired here stays held until a
    /// `read(.., release_lock = true)` or TTL expiry.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidLabel`] for labels containing `:`,
    /// [`MemoryError::ContractViolation`] before lock acquisition when the
    /// value misses the shape, [`MemoryError::LockTimeout`] when a foreign
    /// lock outlasts the wait budget.
    async fn write(&self, request: MemoryWriteRequest) -> Result<String, MemoryError>;

    /// Read a stored value; optionally release the write lock to confirm
    /// consumption.
    async fn read(
        &self,
        namespaced_key: &str,
        release_lock: bool,
    ) -> Result<Option<JsonMap>, MemoryError>;

    /// Case-insensitive substring search over `label ++ " " ++ value`,
    /// filtered by tenant, scope, and (for session scope) session.
    async fn search(&self, query: MemorySearchQuery) -> Result<Vec<MemoryRecord>, MemoryError>;

    /// Nearest-neighbor search over stored embeddings with the same
    /// tenant + scope pre-filter. Only indexed backends support this.
    async fn knn_search(
        &self,
        _tenant_id: &str,
        _scope: MemoryScope,
        _vector: &[f32],
        _top_k: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        Err(MemoryError::KnnUnsupported)
    }
}

/// Append-only event log boundary.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Append one event. Timestamps are kept monotonic per log.
    async fn append(&self, event: EventRecord) -> Result<(), StorageError>;

    /// List events for a plan in insertion order.
    async fn list_by_plan(&self, plan_id: &str) -> Result<Vec<EventRecord>, StorageError>;
}

/// Persona/policy ("soul") persistence boundary.
#[async_trait]
pub trait SoulRepository: Send + Sync {
    /// Upsert the persona payload for a tenant (optionally per user).
    async fn upsert(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        payload: JsonMap,
    ) -> Result<(), StorageError>;

    /// Fetch the persona payload for a tenant (optionally per user).
    async fn get(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
    ) -> Result<Option<JsonMap>, StorageError>;
}

/// Session persistence boundary.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Fetch a session by its composite identity.
    async fn get(
        &self,
        tenant_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<SessionRecord>, StorageError>;

    /// Insert or update a session record.
    async fn upsert(&self, record: SessionRecord) -> Result<(), StorageError>;
}
