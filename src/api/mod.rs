//! HTTP surface: dependency container, router, and handlers.
//!
//! Thin by design. Handlers translate between HTTP and the kernel's
//! request engines; the only logic here is header overrides, request-id
//! echoing, and failure-shape mapping (422 for plan validation and replan
//! exhaustion, 500 otherwise).

pub mod schemas;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::agents::llm::{ChatHttpClient, LlmClient};
use crate::agents::mock::{MockExecutorAgent, MockPlannerAgent, ScriptedLlmClient};
use crate::config::{resolve_agent_models, RuntimeEngine, Settings, StorageBackend};
use crate::kernel::pipeline::PipelineEngine;
use crate::kernel::runtime::{GraphRuntime, GraphRuntimeConfig};
use crate::kernel::RunError;
use crate::repos::embedding::{Embedder, HttpEmbedder};
use crate::repos::in_memory::{
    InMemoryEventRepository, InMemoryMemoryRepository, InMemoryPlanRepository,
    InMemorySessionRepository, InMemorySoulRepository,
};
use crate::repos::indexed::{
    IndexedBackend, IndexedEventRepository, IndexedMemoryRepository, IndexedPlanRepository,
    IndexedSessionRepository, IndexedSoulRepository,
};
use crate::repos::{
    EventRepository, MemoryRepository, PlanRepository, SessionRepository, SoulRepository,
};
use crate::tools::large_response::LargeResponsePipeline;
use crate::types::{AgentRunRequest, MemoryScope};

/// Shared dependencies for the HTTP surface.
pub struct Container {
    /// Resolved settings.
    pub settings: Settings,
    /// Plan store.
    pub plan_repo: Arc<dyn PlanRepository>,
    /// Memory store.
    pub memory_repo: Arc<dyn MemoryRepository>,
    /// Event log.
    pub event_repo: Arc<dyn EventRepository>,
    /// Persona store.
    pub soul_repo: Arc<dyn SoulRepository>,
    /// Session store.
    pub session_repo: Arc<dyn SessionRepository>,
    /// Embedding provider, when configured.
    pub embedder: Option<Arc<dyn Embedder>>,
    /// Model-driven request engine.
    pub graph_runtime: Arc<GraphRuntime>,
    /// Deterministic request engine.
    pub pipeline: Arc<PipelineEngine>,
    /// Spill/extract pipeline (shared with background sweepers).
    pub large_response: Arc<LargeResponsePipeline>,
    /// Indexed event log handle for the retention sweeper, when indexed.
    pub indexed_events: Option<Arc<IndexedEventRepository>>,
}

impl Container {
    /// Build the container from settings: pick the storage backend, wire
    /// embedder and LLM client, and construct both engines.
    pub async fn build(settings: Settings) -> anyhow::Result<Self> {
        let embedder: Option<Arc<dyn Embedder>> = settings.embedding_url.as_deref().map(|url| {
            Arc::new(HttpEmbedder::new(
                &settings.embedding_model,
                url,
                settings.embedding_dims,
            )) as Arc<dyn Embedder>
        });

        let mut indexed_events = None;
        let (plan_repo, memory_repo, event_repo, soul_repo, session_repo): (
            Arc<dyn PlanRepository>,
            Arc<dyn MemoryRepository>,
            Arc<dyn EventRepository>,
            Arc<dyn SoulRepository>,
            Arc<dyn SessionRepository>,
        ) = match settings.storage_backend {
            StorageBackend::InMemory => (
                Arc::new(InMemoryPlanRepository::new()),
                Arc::new(InMemoryMemoryRepository::new()),
                Arc::new(InMemoryEventRepository::new()),
                Arc::new(InMemorySoulRepository::new()),
                Arc::new(InMemorySessionRepository::new()),
            ),
            StorageBackend::Indexed => {
                let backend = IndexedBackend::connect(&settings.indexed_db_path).await?;
                let events = Arc::new(IndexedEventRepository::new(
                    &backend,
                    settings.events_retention_days,
                ));
                indexed_events = Some(Arc::clone(&events));
                (
                    Arc::new(IndexedPlanRepository::new(&backend)),
                    Arc::new(IndexedMemoryRepository::new(&backend, embedder.clone())),
                    events,
                    Arc::new(IndexedSoulRepository::new(&backend)),
                    Arc::new(IndexedSessionRepository::new(&backend)),
                )
            }
        };

        let llm: Arc<dyn LlmClient> = match &settings.llm_base_url {
            Some(base_url) => Arc::new(ChatHttpClient::new(
                base_url,
                settings.llm_api_key.clone(),
            )),
            // No model endpoint configured: the graph degrades to a
            // deterministic scaffold response instead of failing boot.
            None => Arc::new(ScriptedLlmClient::new(Vec::new())),
        };

        let large_response = Arc::new(LargeResponsePipeline::default());
        let agent_models = resolve_agent_models(
            &settings.model_name,
            settings.agent_models_config_path.as_deref(),
        );

        let graph_runtime = Arc::new(GraphRuntime::new(
            GraphRuntimeConfig {
                agent_models,
                max_turns: crate::agents::graph::DEFAULT_MAX_TURNS,
                mcp_config_path: settings.mcp_config_path.clone(),
                skill_service_url: settings.skill_service_url.clone(),
                skill_service_key: settings.skill_service_key.clone(),
                mcp_session_timeout: std::time::Duration::from_secs(
                    settings.mcp_session_timeout_secs,
                ),
                communication_config_path: settings.communication_config_path.clone(),
            },
            llm,
            Some(Arc::clone(&event_repo)),
            Some(Arc::clone(&memory_repo)),
            Arc::clone(&session_repo),
            embedder.clone(),
            Arc::clone(&large_response),
        ));

        let pipeline = Arc::new(PipelineEngine::new(
            Arc::new(MockPlannerAgent),
            Arc::new(MockExecutorAgent::new()),
            Arc::clone(&plan_repo),
            Arc::clone(&memory_repo),
            Arc::clone(&event_repo),
            settings.max_plan_steps,
            settings.max_replans,
        ));

        Ok(Self {
            settings,
            plan_repo,
            memory_repo,
            event_repo,
            soul_repo,
            session_repo,
            embedder,
            graph_runtime,
            pipeline,
            large_response,
            indexed_events,
        })
    }
}

/// Build the application router.
pub fn build_router(container: Arc<Container>) -> Router {
    Router::new()
        .route("/agent/run", post(run_agent))
        .route("/agent/plans/{plan_id}", get(get_plan))
        .route("/agent/plans/{plan_id}/trace", get(get_trace))
        .route("/agent/souls/{tenant_id}", put(upsert_soul))
        .route("/agent/memory/query", get(query_memory))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(container)
}

async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("X-Request-Id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("X-Request-Id", value);
    }
    response
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn run_error_response(error: RunError) -> Response {
    match &error {
        RunError::PlanValidation { .. } | RunError::ReplanExhausted { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(error.failure_response())).into_response()
        }
        RunError::Internal(reason) => {
            tracing::error!(reason = %reason, "agent run failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(error.failure_response())).into_response()
        }
    }
}

async fn run_agent(
    State(container): State<Arc<Container>>,
    headers: HeaderMap,
    Json(payload): Json<schemas::AgentRunPayload>,
) -> Response {
    let request = AgentRunRequest {
        tenant_id: header_value(&headers, "X-Tenant-Id")
            .or(payload.tenant_id)
            .unwrap_or_default(),
        user_id: header_value(&headers, "X-User-Id")
            .or(payload.user_id)
            .unwrap_or_default(),
        session_id: header_value(&headers, "X-Session-Id")
            .or(payload.session_id)
            .unwrap_or_default(),
        message: payload.message,
    };

    let request_headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect();

    let outcome = match container.settings.runtime_engine {
        RuntimeEngine::Graph => {
            container
                .graph_runtime
                .run(&request, &request_headers)
                .await
        }
        RuntimeEngine::Pipeline => container.pipeline.run(&request).await,
    };

    match outcome {
        Ok(result) => Json(schemas::AgentRunResult {
            status: result.status,
            response: result.response,
            plan_id: result.plan_id,
        })
        .into_response(),
        Err(error) => run_error_response(error),
    }
}

async fn get_plan(
    State(container): State<Arc<Container>>,
    Path(plan_id): Path<String>,
) -> Response {
    match container.plan_repo.get(&plan_id).await {
        Ok(Some(plan)) => Json(serde_json::to_value(&plan).unwrap_or(Value::Null)).into_response(),
        Ok(None) => {
            (StatusCode::NOT_FOUND, Json(json!({"detail": "Plan not found"}))).into_response()
        }
        Err(error) => {
            tracing::error!(%error, "plan lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "failed", "reason": "internal_error"})),
            )
                .into_response()
        }
    }
}

async fn get_trace(
    State(container): State<Arc<Container>>,
    Path(plan_id): Path<String>,
) -> Response {
    match container.event_repo.list_by_plan(&plan_id).await {
        Ok(events) => Json(json!({
            "plan_id": plan_id,
            "events": events,
        }))
        .into_response(),
        Err(error) => {
            tracing::error!(%error, "trace lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "failed", "reason": "internal_error"})),
            )
                .into_response()
        }
    }
}

async fn upsert_soul(
    State(container): State<Arc<Container>>,
    Path(tenant_id): Path<String>,
    Json(payload): Json<schemas::SoulPayload>,
) -> Response {
    let mut stored = payload.fields.clone();
    if let Some(user_id) = &payload.user_id {
        stored.insert("user_id".into(), json!(user_id));
    }
    match container
        .soul_repo
        .upsert(&tenant_id, payload.user_id.as_deref(), stored)
        .await
    {
        Ok(()) => Json(json!({"status": "ok"})).into_response(),
        Err(error) => {
            tracing::error!(%error, "soul upsert failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "failed", "reason": "internal_error"})),
            )
                .into_response()
        }
    }
}

async fn query_memory(
    State(container): State<Arc<Container>>,
    Query(params): Query<schemas::MemoryQueryParams>,
) -> Response {
    let Some(embedder) = &container.embedder else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "failed", "reason": "memory_query_unavailable"})),
        )
            .into_response();
    };

    let vector = match embedder.embed(&params.query).await {
        Ok(vector) => vector,
        Err(error) => {
            tracing::error!(%error, "memory query embedding failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "failed", "reason": "internal_error"})),
            )
                .into_response();
        }
    };

    let scope = MemoryScope::parse(params.scope.as_deref().unwrap_or("user"));
    let top_k = params.top_k.unwrap_or(5).max(1);
    match container
        .memory_repo
        .knn_search(&params.tenant_id, scope, &vector, top_k)
        .await
    {
        Ok(results) => Json(json!({
            "status": "ok",
            "query": params.query,
            "scope": scope.as_str(),
            "count": results.len(),
            "results": results,
        }))
        .into_response(),
        Err(crate::repos::MemoryError::KnnUnsupported) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "failed", "reason": "memory_query_unavailable"})),
        )
            .into_response(),
        Err(error) => {
            tracing::error!(%error, "memory query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "failed", "reason": "internal_error"})),
            )
                .into_response()
        }
    }
}
