//! Process-local repository implementations.
//!
//! These back the default deployment and every integration test. Lock and
//! contract semantics are identical to the indexed backend so orchestration
//! bugs surface before any external storage is wired.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::repos::contract::{build_namespaced_key, matches_return_spec, validate_label};
use crate::repos::lock::WriteLockTable;
use crate::repos::{
    EventRepository, MemoryError, MemoryRepository, MemorySearchQuery, MemoryWriteRequest,
    PlanRepository, SessionRepository, SoulRepository, StorageError,
};
use crate::types::canonical::canonical_json;
use crate::types::{EventRecord, JsonMap, MemoryRecord, MemoryScope, Plan, SessionRecord};

/// In-memory plan store keyed by `plan_id`.
#[derive(Debug, Default)]
pub struct InMemoryPlanRepository {
    plans: RwLock<HashMap<String, Plan>>,
}

impl InMemoryPlanRepository {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanRepository for InMemoryPlanRepository {
    async fn save(&self, plan: &Plan) -> Result<(), StorageError> {
        self.plans
            .write()
            .await
            .insert(plan.plan_id.clone(), plan.clone());
        Ok(())
    }

    async fn get(&self, plan_id: &str) -> Result<Option<Plan>, StorageError> {
        Ok(self.plans.read().await.get(plan_id).cloned())
    }
}

/// In-memory memory store with full lock and contract semantics.
#[derive(Debug)]
pub struct InMemoryMemoryRepository {
    records: RwLock<Vec<MemoryRecord>>,
    locks: WriteLockTable,
}

impl Default for InMemoryMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMemoryRepository {
    /// Create a store with default lock budgets (5 s wait, 30 s TTL).
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            locks: WriteLockTable::default(),
        }
    }

    /// Create a store with explicit lock budgets, for contention tests.
    pub fn with_lock_budgets(wait_timeout: Duration, ttl: Duration) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            locks: WriteLockTable::new(wait_timeout, ttl),
        }
    }

    /// Whether an unexpired write lock is held for `namespaced_key`.
    pub async fn lock_held(&self, namespaced_key: &str) -> bool {
        self.locks.is_held(namespaced_key).await
    }
}

#[async_trait]
impl MemoryRepository for InMemoryMemoryRepository {
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

        let now = Utc::now();
        let mut records = self.records.write().await;
        if let Some(existing) = records
            .iter_mut()
            .find(|r| r.namespaced_key == namespaced_key)
        {
            existing.value = request.value;
            existing.return_spec_shape = request.return_spec_shape;
            existing.scope = request.scope;
            existing.updated_at = now;
        } else {
            records.push(MemoryRecord {
                namespaced_key: namespaced_key.clone(),
                tenant_id: request.tenant_id,
                session_id: request.session_id,
                task_id: request.task_id,
                scope: request.scope,
                key: request.key,
                value: request.value,
                return_spec_shape: request.return_spec_shape,
                created_at: now,
                updated_at: now,
                embedding: None,
            });
        }
        Ok(namespaced_key)
    }

    async fn read(
        &self,
        namespaced_key: &str,
        release_lock: bool,
    ) -> Result<Option<JsonMap>, MemoryError> {
        if release_lock {
            // Release first so a missing record still clears a stale lock.
            self.locks.release(namespaced_key).await;
        }
        let records = self.records.read().await;
        Ok(records
            .iter()
            .find(|r| r.namespaced_key == namespaced_key)
            .map(|r| r.value.clone()))
    }

    async fn search(&self, query: MemorySearchQuery) -> Result<Vec<MemoryRecord>, MemoryError> {
        let lowered = query.query_text.trim().to_lowercase();
        let records = self.records.read().await;
        let mut results = Vec::new();
        for record in records.iter() {
            if record.tenant_id != query.tenant_id || record.scope != query.scope {
                continue;
            }
            if query.scope == MemoryScope::Session && record.session_id != query.session_id {
                continue;
            }
            let value_text = canonical_json(&serde_json::Value::Object(record.value.clone()));
            let haystack = format!("{} {}", record.key, value_text).to_lowercase();
            if !lowered.is_empty() && !haystack.contains(&lowered) {
                continue;
            }
            results.push(record.clone());
            if results.len() >= query.top_k {
                break;
            }
        }
        Ok(results)
    }
}

/// In-memory append-only event log with monotonic timestamps.
#[derive(Debug, Default)]
pub struct InMemoryEventRepository {
    events: Mutex<Vec<EventRecord>>,
}

impl InMemoryEventRepository {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every appended event, in order.
    pub async fn all(&self) -> Vec<EventRecord> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn append(&self, mut event: EventRecord) -> Result<(), StorageError> {
        let mut events = self.events.lock().await;
        if let Some(last) = events.last() {
            if event.ts <= last.ts {
                event.ts = last.ts + ChronoDuration::microseconds(1);
            }
        }
        events.push(event);
        Ok(())
    }

    async fn list_by_plan(&self, plan_id: &str) -> Result<Vec<EventRecord>, StorageError> {
        let events = self.events.lock().await;
        Ok(events
            .iter()
            .filter(|e| e.plan_id.as_deref() == Some(plan_id))
            .cloned()
            .collect())
    }
}

/// In-memory persona store keyed by `tenant:user`.
#[derive(Debug, Default)]
pub struct InMemorySoulRepository {
    souls: RwLock<HashMap<String, JsonMap>>,
}

impl InMemorySoulRepository {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn soul_key(tenant_id: &str, user_id: Option<&str>) -> String {
    format!("{tenant_id}:{}", user_id.unwrap_or("*"))
}

#[async_trait]
impl SoulRepository for InMemorySoulRepository {
    async fn upsert(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        payload: JsonMap,
    ) -> Result<(), StorageError> {
        self.souls
            .write()
            .await
            .insert(soul_key(tenant_id, user_id), payload);
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
    ) -> Result<Option<JsonMap>, StorageError> {
        Ok(self
            .souls
            .read()
            .await
            .get(&soul_key(tenant_id, user_id))
            .cloned())
    }
}

/// In-memory session store keyed by `tenant:user:session`.
#[derive(Debug, Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemorySessionRepository {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn session_key(tenant_id: &str, user_id: &str, session_id: &str) -> String {
    format!("{tenant_id}:{user_id}:{session_id}")
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn get(
        &self,
        tenant_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<SessionRecord>, StorageError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(&session_key(tenant_id, user_id, session_id))
            .cloned())
    }

    async fn upsert(&self, record: SessionRecord) -> Result<(), StorageError> {
        let key = session_key(&record.tenant_id, &record.user_id, &record.session_id);
        self.sessions.write().await.insert(key, record);
        Ok(())
    }
}
