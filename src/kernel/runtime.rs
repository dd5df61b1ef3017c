//! Model-driven graph runtime: the per-request lifecycle around the
//! coordinator agent graph.
//!
//! One request flows through: session bootstrap -> policy flag derivation
//! from the message -> context binding -> MCP resolution -> event streaming
//! through the policy engine -> response selection, sanitization, and
//! memory disclosure -> session indexing. Contexts are plain values owned
//! by this function; they die on every exit path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tracing::{error, instrument};
use uuid::Uuid;

use crate::agents::llm::LlmClient;
use crate::agents::roles;
use crate::agents::graph::{build_agent_graph, AgentEvent, GraphRunner, DEFAULT_MAX_TURNS};
use crate::config::AgentModels;
use crate::kernel::context::{ToolRuntimeContext, TraceContext};
use crate::kernel::message_policy::{
    message_disables_memory_usage, message_requests_memory_lookup, sanitize_user_response,
};
use crate::kernel::metadata::{
    apply_memory_disclosure, extract_memory_usage_metadata, merge_memory_metadata,
    MemoryUsageMetadata,
};
use crate::kernel::policy::PolicyEngine;
use crate::kernel::session::{ensure_session, index_session};
use crate::kernel::RunError;
use crate::mcp::config::{
    build_runtime_env_overrides, load_config_or_fallback, normalize_headers,
    resolve_mcp_endpoint, resolve_mcp_endpoints, select_planner_endpoint_config,
    ResolvedMcpEndpoint,
};
use crate::mcp::toolset::McpToolset;
use crate::repos::embedding::Embedder;
use crate::repos::{EventRepository, MemoryRepository, SessionRepository};
use crate::tools::large_response::LargeResponsePipeline;
use crate::types::{event_types, AgentRunRequest, AgentRunResponse, EventRecord, JsonMap};

/// Fixed response when a tool failed and the coordinator never concluded.
const TOOL_FAILURE_RESPONSE: &str =
    "I ran into a tool failure while working on this request, so I can't provide the full \
     result right now. Please try again.";

/// Fixed response when activity happened but no final text was produced.
const NO_FINAL_RESPONSE: &str =
    "The request was processed, but no final response was produced.";

/// Fixed response when nothing ran and nothing was said.
const NO_OUTPUT_PLACEHOLDER: &str = "No response was produced for this request.";

/// Static wiring for the graph runtime.
#[derive(Debug, Clone)]
pub struct GraphRuntimeConfig {
    /// Per-role models.
    pub agent_models: AgentModels,
    /// Model-turn ceiling per request.
    pub max_turns: usize,
    /// Path to `mcp_config.json`.
    pub mcp_config_path: Option<PathBuf>,
    /// Skill-service URL override for MCP env fallback.
    pub skill_service_url: Option<String>,
    /// Skill-service key override for MCP env fallback.
    pub skill_service_key: Option<String>,
    /// MCP session establishment timeout.
    pub mcp_session_timeout: Duration,
    /// Path to `communication_config.json`.
    pub communication_config_path: Option<PathBuf>,
}

impl Default for GraphRuntimeConfig {
    fn default() -> Self {
        Self {
            agent_models: AgentModels::uniform(crate::config::DEFAULT_MODEL_NAME),
            max_turns: DEFAULT_MAX_TURNS,
            mcp_config_path: None,
            skill_service_url: None,
            skill_service_key: None,
            mcp_session_timeout: Duration::from_secs(
                crate::config::DEFAULT_MCP_SESSION_TIMEOUT_SECS,
            ),
            communication_config_path: None,
        }
    }
}

/// The graph runtime.
pub struct GraphRuntime {
    config: GraphRuntimeConfig,
    llm: Arc<dyn LlmClient>,
    event_repo: Option<Arc<dyn EventRepository>>,
    memory_repo: Option<Arc<dyn MemoryRepository>>,
    session_repo: Arc<dyn SessionRepository>,
    embedder: Option<Arc<dyn Embedder>>,
    large_response: Arc<LargeResponsePipeline>,
    executor_allowed_skills: RwLock<Vec<String>>,
}

struct TextEvent {
    author: String,
    is_final: bool,
    text: String,
}

#[derive(Default)]
struct CollectedRun {
    texts: Vec<TextEvent>,
    metadata: MemoryUsageMetadata,
    non_planner_activity: bool,
    tool_failure_seen: bool,
}

impl GraphRuntime {
    /// Wire a runtime over shared repositories and the model capability.
    pub fn new(
        config: GraphRuntimeConfig,
        llm: Arc<dyn LlmClient>,
        event_repo: Option<Arc<dyn EventRepository>>,
        memory_repo: Option<Arc<dyn MemoryRepository>>,
        session_repo: Arc<dyn SessionRepository>,
        embedder: Option<Arc<dyn Embedder>>,
        large_response: Arc<LargeResponsePipeline>,
    ) -> Self {
        Self {
            config,
            llm,
            event_repo,
            memory_repo,
            session_repo,
            embedder,
            large_response,
            executor_allowed_skills: RwLock::new(Vec::new()),
        }
    }

    /// Restrict executor toolsets to the skills the planner selected for
    /// the current step.
    pub async fn configure_executor_step_tools(&self, allowed_skills: Vec<String>) {
        tracing::info!(?allowed_skills, "executor_step_tools_configured");
        *self.executor_allowed_skills.write().await = allowed_skills;
    }

    /// Handle one request end to end.
    #[instrument(skip(self, request, request_headers), fields(tenant = %request.tenant_id, session = %request.session_id))]
    pub async fn run(
        &self,
        request: &AgentRunRequest,
        request_headers: &HashMap<String, String>,
    ) -> Result<AgentRunResponse, RunError> {
        let is_first_turn = ensure_session(&self.session_repo, request).await?;
        let plan_id = {
            let hex = Uuid::new_v4().simple().to_string();
            format!("plan_adk_{}", &hex[..12])
        };

        let memory_disabled_by_user = message_disables_memory_usage(&request.message);
        let requires_memory_precheck = !memory_disabled_by_user
            && (is_first_turn || message_requests_memory_lookup(&request.message));

        let headers = normalize_headers(request_headers);
        let planner_endpoint = self
            .resolve_planner_endpoint(&headers)
            .map_err(|e| RunError::Internal(e.to_string()))?;
        let executor_endpoints = self
            .resolve_executor_endpoints(&headers)
            .map_err(|e| RunError::Internal(e.to_string()))?;

        let planner_expected_tools = planner_endpoint
            .as_ref()
            .map(|endpoint| endpoint.planner_tools.clone())
            .unwrap_or_default();

        let trace = TraceContext::new(
            self.event_repo.clone(),
            &request.tenant_id,
            &request.session_id,
            &plan_id,
            is_first_turn,
            !memory_disabled_by_user,
            requires_memory_precheck,
            planner_expected_tools,
        );
        let tool_ctx = ToolRuntimeContext {
            tenant_id: request.tenant_id.clone(),
            user_id: request.user_id.clone(),
            session_id: request.session_id.clone(),
            plan_id: plan_id.clone(),
            memory_repo: self.memory_repo.clone(),
            embedder: self.embedder.clone(),
            communication_config_path: self.config.communication_config_path.clone(),
            large_response: Arc::clone(&self.large_response),
        };

        let allowed_skills = self.executor_allowed_skills.read().await.clone();
        let runner = GraphRunner {
            graph: build_agent_graph(&self.config.agent_models),
            llm: Arc::clone(&self.llm),
            policy: PolicyEngine,
            planner_toolset: planner_endpoint
                .map(|endpoint| {
                    Arc::new(McpToolset::planner(endpoint, self.config.mcp_session_timeout))
                }),
            executor_toolsets: executor_endpoints
                .into_iter()
                .map(|endpoint| {
                    Arc::new(McpToolset::executor(
                        endpoint,
                        allowed_skills.clone(),
                        self.config.mcp_session_timeout,
                    ))
                })
                .collect(),
            max_turns: self.config.max_turns,
        };

        let (sink, mut events) = mpsc::channel::<AgentEvent>(64);
        let runner_future = async {
            let outcome = runner.run(&trace, &tool_ctx, &request.message, &sink).await;
            drop(sink);
            outcome
        };
        let collector_future = async {
            let mut collected = CollectedRun::default();
            while let Some(event) = events.recv().await {
                self.absorb_event(request, &plan_id, &mut collected, &event)
                    .await;
            }
            collected
        };
        let (run_outcome, collected) = tokio::join!(runner_future, collector_future);
        if let Err(agent_error) = run_outcome {
            error!(
                plan_id = %plan_id,
                error = %agent_error,
                "graph runtime run failed"
            );
            return Err(agent_error.into());
        }

        let response = select_response(&collected);
        let response = sanitize_user_response(&response);
        let response = apply_memory_disclosure(
            &response,
            &collected.metadata,
            memory_disabled_by_user,
        );

        index_session(&self.session_repo, request, &response).await?;

        Ok(AgentRunResponse {
            status: "complete".to_owned(),
            response,
            plan_id,
        })
    }

    async fn absorb_event(
        &self,
        request: &AgentRunRequest,
        plan_id: &str,
        collected: &mut CollectedRun,
        event: &AgentEvent,
    ) {
        if !event.text.is_empty() {
            collected.texts.push(TextEvent {
                author: event.author.clone(),
                is_final: event.is_final_response,
                text: event.text.clone(),
            });
        }

        collected.metadata = merge_memory_metadata(
            std::mem::take(&mut collected.metadata),
            extract_memory_usage_metadata(&event.function_responses),
        );

        let has_activity = !event.function_calls.is_empty() || !event.function_responses.is_empty();
        if has_activity && event.author != roles::PLANNER {
            collected.non_planner_activity = true;
        }
        for response in &event.function_responses {
            let status = response.response.get("status").and_then(Value::as_str);
            if matches!(status, Some("failed") | Some("blocked")) {
                collected.tool_failure_seen = true;
            }
        }

        self.mirror_event(request, plan_id, event).await;
    }

    async fn mirror_event(&self, request: &AgentRunRequest, plan_id: &str, event: &AgentEvent) {
        let Some(event_repo) = &self.event_repo else {
            return;
        };
        let function_calls: Vec<Value> = event
            .function_calls
            .iter()
            .map(|call| json!({"name": call.name, "args": Value::Object(call.args.clone())}))
            .collect();
        let function_responses: Vec<Value> = event
            .function_responses
            .iter()
            .map(|resp| json!({"name": resp.name, "response": resp.response}))
            .collect();

        let mut payload = JsonMap::new();
        payload.insert("author".into(), json!(event.author));
        payload.insert("event_id".into(), json!(event.id));
        payload.insert("text_preview".into(), json!(event.text));
        payload.insert("is_final_response".into(), json!(event.is_final_response));
        payload.insert("function_calls".into(), Value::Array(function_calls));
        payload.insert("function_responses".into(), Value::Array(function_responses));

        let record = EventRecord::new(
            event_types::ADK_EVENT,
            &request.tenant_id,
            &request.session_id,
            Some(plan_id),
            Some(&event.invocation_id),
            payload,
        );
        if let Err(error) = event_repo.append(record).await {
            tracing::warn!(%error, "adk event mirror failed");
        }
    }

    fn resolve_planner_endpoint(
        &self,
        headers: &HashMap<String, String>,
    ) -> Result<Option<ResolvedMcpEndpoint>, crate::mcp::McpError> {
        let env_values = build_runtime_env_overrides(
            self.config.skill_service_url.as_deref(),
            self.config.skill_service_key.as_deref(),
        );
        let endpoint_config =
            select_planner_endpoint_config(self.config.mcp_config_path.as_deref(), &env_values)?;
        endpoint_config
            .map(|config| resolve_mcp_endpoint(&config, headers, &env_values))
            .transpose()
    }

    fn resolve_executor_endpoints(
        &self,
        headers: &HashMap<String, String>,
    ) -> Result<Vec<ResolvedMcpEndpoint>, crate::mcp::McpError> {
        let env_values = build_runtime_env_overrides(
            self.config.skill_service_url.as_deref(),
            self.config.skill_service_key.as_deref(),
        );
        let config = load_config_or_fallback(self.config.mcp_config_path.as_deref(), &env_values)?;
        match config {
            Some(config) => resolve_mcp_endpoints(&config, headers, &env_values),
            None => Ok(self
                .resolve_planner_endpoint(headers)?
                .into_iter()
                .collect()),
        }
    }
}

/// Pick the user-facing response from accumulated text events.
fn select_response(collected: &CollectedRun) -> String {
    if let Some(final_text) = collected
        .texts
        .iter()
        .rev()
        .find(|t| t.author == roles::COORDINATOR && t.is_final && !t.text.is_empty())
    {
        return final_text.text.clone();
    }

    if collected.non_planner_activity {
        return if collected.tool_failure_seen {
            TOOL_FAILURE_RESPONSE.to_owned()
        } else {
            NO_FINAL_RESPONSE.to_owned()
        };
    }

    collected
        .texts
        .last()
        .map(|t| t.text.clone())
        .unwrap_or_else(|| NO_OUTPUT_PLACEHOLDER.to_owned())
}
