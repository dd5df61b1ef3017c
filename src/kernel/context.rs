//! Request-scoped contexts for tools and policy.
//!
//! Both contexts are explicit values created at request start and dropped
//! on every exit path; nothing here is task-local or shared across
//! requests. The trace context carries the mutable policy flags that
//! enforce cross-step delegation contracts.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::repos::embedding::Embedder;
use crate::repos::{EventRepository, MemoryRepository};
use crate::tools::large_response::LargeResponsePipeline;

/// Everything a tool adapter may need during one request.
pub struct ToolRuntimeContext {
    /// Owning tenant.
    pub tenant_id: String,
    /// Requesting user.
    pub user_id: String,
    /// Session identifier.
    pub session_id: String,
    /// Trace correlation identifier for this request.
    pub plan_id: String,
    /// Memory store, when configured.
    pub memory_repo: Option<Arc<dyn MemoryRepository>>,
    /// Embedding provider, when configured.
    pub embedder: Option<Arc<dyn Embedder>>,
    /// Path to `communication_config.json`, when configured.
    pub communication_config_path: Option<PathBuf>,
    /// Shared spill/extract pipeline for oversized tool output.
    pub large_response: Arc<LargeResponsePipeline>,
}

impl std::fmt::Debug for ToolRuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRuntimeContext")
            .field("tenant_id", &self.tenant_id)
            .field("session_id", &self.session_id)
            .field("plan_id", &self.plan_id)
            .field("memory_repo", &self.memory_repo.is_some())
            .field("embedder", &self.embedder.is_some())
            .finish()
    }
}

/// Mutable delegation-contract state, updated as transfers and tool calls
/// stream through the policy engine.
#[derive(Debug, Default, Clone)]
pub struct PolicyFlags {
    /// A successful transfer to the memory sub-agent happened.
    pub memory_precheck_seen: bool,
    /// A successful transfer to the planner happened.
    pub planner_transfer_seen: bool,
    /// The planner called `find_relevant_skill`.
    pub planner_find_called: bool,
    /// The planner called `load_instruction(s)`.
    pub planner_load_called: bool,
    /// Skill discovery returned an empty result set.
    pub planner_no_skills_found: bool,
    /// Tools the planner actually saw, recorded at prompt time.
    pub planner_available_tools: Option<Vec<String>>,
}

/// Per-request trace and policy state.
pub struct TraceContext {
    /// Event mirror target, when tracing is enabled.
    pub event_repo: Option<Arc<dyn EventRepository>>,
    /// Owning tenant.
    pub tenant_id: String,
    /// Session identifier.
    pub session_id: String,
    /// Trace correlation identifier.
    pub plan_id: String,
    /// First-turn requests must visit the planner before the executor.
    pub require_planner_first: bool,
    /// Whether memory usage is allowed at all this request.
    pub allow_memory: bool,
    /// Whether a memory pre-check must precede planning/execution.
    pub require_memory_precheck: bool,
    /// Tools the planner endpoint is expected to expose.
    pub planner_expected_tools: Vec<String>,
    flags: Mutex<PolicyFlags>,
}

impl std::fmt::Debug for TraceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceContext")
            .field("tenant_id", &self.tenant_id)
            .field("session_id", &self.session_id)
            .field("plan_id", &self.plan_id)
            .field("require_planner_first", &self.require_planner_first)
            .field("allow_memory", &self.allow_memory)
            .field("require_memory_precheck", &self.require_memory_precheck)
            .finish()
    }
}

impl TraceContext {
    /// Create a fresh context with cleared flags.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_repo: Option<Arc<dyn EventRepository>>,
        tenant_id: &str,
        session_id: &str,
        plan_id: &str,
        require_planner_first: bool,
        allow_memory: bool,
        require_memory_precheck: bool,
        planner_expected_tools: Vec<String>,
    ) -> Self {
        Self {
            event_repo,
            tenant_id: tenant_id.to_owned(),
            session_id: session_id.to_owned(),
            plan_id: plan_id.to_owned(),
            require_planner_first,
            allow_memory,
            require_memory_precheck,
            planner_expected_tools,
            flags: Mutex::new(PolicyFlags::default()),
        }
    }

    /// Run `mutate` against the policy flags under the lock.
    pub async fn with_flags<T>(&self, mutate: impl FnOnce(&mut PolicyFlags) -> T) -> T {
        let mut flags = self.flags.lock().await;
        mutate(&mut flags)
    }

    /// Snapshot the current flags.
    pub async fn flags(&self) -> PolicyFlags {
        self.flags.lock().await.clone()
    }
}
