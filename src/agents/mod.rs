//! Agent capabilities: LLM-backed graph roles and plan-level planner /
//! executor seams.
//!
//! Two layers of abstraction live here. [`llm::LlmClient`] is the opaque
//! model capability (prompt + tools in, text or one tool call out) driving
//! the coordinator graph. [`PlannerAgent`] / [`ExecutorAgent`] are the
//! higher-level capabilities the deterministic pipeline engine runs
//! against; mock variants keep the whole execution path testable without
//! any model.

pub mod graph;
pub mod llm;
pub mod mock;
pub mod prompts;

use async_trait::async_trait;
use thiserror::Error;

use crate::agents::llm::LlmError;
use crate::types::{AgentRunRequest, Plan, PlannerOutput, PlanStep, StepExecutionResult};

/// Fixed agent-graph role names.
pub mod roles {
    /// The coordinator that owns delegation.
    pub const COORDINATOR: &str = "orchestrator_manager";
    /// Planning specialist.
    pub const PLANNER: &str = "planner_subagent_a";
    /// Execution worker.
    pub const EXECUTOR: &str = "executor_subagent_b";
    /// Memory intelligence specialist.
    pub const MEMORY: &str = "memory_subagent_c";
    /// Outbound communication specialist.
    pub const COMMUNICATOR: &str = "communicator_subagent_d";
}

/// Errors from agent capabilities.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Planner produced an unusable result.
    #[error("planner failed: {0}")]
    Planner(String),

    /// Executor produced an unusable result.
    #[error("executor failed: {0}")]
    Executor(String),

    /// Underlying model call failed.
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Plan-producing capability.
#[async_trait]
pub trait PlannerAgent: Send + Sync {
    /// Produce an initial plan for the request.
    async fn create_plan(
        &self,
        request: &AgentRunRequest,
        max_steps: usize,
    ) -> Result<PlannerOutput, AgentError>;

    /// Surgically revise a failed step, given the completed prefix.
    async fn replan(
        &self,
        request: &AgentRunRequest,
        completed_steps: &[PlanStep],
        failed_step: &PlanStep,
        reason: &str,
        max_steps: usize,
    ) -> Result<PlannerOutput, AgentError>;
}

/// Step-executing capability.
#[async_trait]
pub trait ExecutorAgent: Send + Sync {
    /// Execute one plan step and report the outcome.
    async fn execute_step(
        &self,
        request: &AgentRunRequest,
        plan: &Plan,
        step: &PlanStep,
    ) -> Result<StepExecutionResult, AgentError>;
}
