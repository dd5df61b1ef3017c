//! Core domain types: plans, steps, memory records, trace events.
//!
//! Everything here is plain data. Behavior (transitions, validation,
//! locking) lives in `kernel` and `repos`; keeping the model inert makes
//! serialization round-trips trivial to verify.

pub mod canonical;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// JSON object payload used for tool arguments, memory values, and event
/// payloads.
pub type JsonMap = Map<String, Value>;

/// Lifecycle status of a whole plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    /// Created but not yet handed to the planner.
    Pending,
    /// Planner is producing steps.
    Planning,
    /// Steps are being executed in order.
    Executing,
    /// A failed step is being revised.
    Replanning,
    /// All steps completed.
    Complete,
    /// Terminal failure (validation or replan budget exhausted).
    Failed,
}

impl PlanStatus {
    /// String form used in event payloads and API projections.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Replanning => "replanning",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

/// Lifecycle status of a single plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Not yet started.
    Pending,
    /// Currently executing.
    Running,
    /// Finished with validated output in memory.
    Complete,
    /// Finished with a recorded failure reason.
    Failed,
}

impl StepStatus {
    /// String form used in event payloads and API projections.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

/// Declared output contract for a step.
///
/// `shape` maps field names to type labels (`string`, `integer`, `array`,
/// ...). The memory store refuses writes whose value does not satisfy the
/// shape, so a completed step always has a conforming payload on record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnSpec {
    /// Required output fields and their type labels.
    pub shape: JsonMap,
    /// Why downstream steps need this shape.
    pub reason: String,
}

/// One unit of work inside a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// 1-based ordinal, unique within the plan.
    pub step_index: u32,
    /// Natural-language task description.
    pub task: String,
    /// Skill (tool) names the executor may use for this step.
    pub skills: Vec<String>,
    /// Output contract gating the memory write.
    pub return_spec: ReturnSpec,
    /// Optional upstream step whose output this step consumes.
    #[serde(default)]
    pub input_from_step: Option<u32>,
    /// Current lifecycle status.
    #[serde(default = "default_step_status")]
    pub status: StepStatus,
    /// Assigned exactly once on the pending -> running transition; also the
    /// owner identity for the step's memory write lock.
    #[serde(default)]
    pub task_id: Option<String>,
    /// Namespaced memory key, set iff the step completed.
    #[serde(default)]
    pub memory_key: Option<String>,
    /// Whether the output passed the return-spec gate.
    #[serde(default)]
    pub validated: bool,
    /// Failure reason recorded on the running -> failed transition.
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// Stamped on the pending -> running transition.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Stamped on the running -> complete/failed transition.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

fn default_step_status() -> StepStatus {
    StepStatus::Pending
}

impl PlanStep {
    /// Create a pending step with the given contract.
    pub fn new(step_index: u32, task: &str, skills: Vec<String>, return_spec: ReturnSpec) -> Self {
        Self {
            step_index,
            task: task.to_owned(),
            skills,
            return_spec,
            input_from_step: None,
            status: StepStatus::Pending,
            task_id: None,
            memory_key: None,
            validated: false,
            failure_reason: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// What caused a replan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplanTrigger {
    /// Executor reported a hard failure.
    StepFailed,
    /// Executor reported the step cannot complete as scoped.
    Insufficient,
    /// Step output violated its return spec.
    ContractViolation,
}

impl ReplanTrigger {
    /// String form used in replan history payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StepFailed => "step_failed",
            Self::Insufficient => "insufficient",
            Self::ContractViolation => "contract_violation",
        }
    }
}

/// One recorded replan attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplanEvent {
    /// 1-based attempt counter, equal to `replan_count` at append time.
    pub attempt: u32,
    /// What triggered the replan.
    pub trigger: ReplanTrigger,
    /// Index of the step that failed.
    pub failed_step: u32,
    /// Failure reason carried from the step.
    pub reason: String,
    /// When the revised plan was merged.
    pub revised_at: DateTime<Utc>,
}

/// An ordered, replannable sequence of steps for one user request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Short unique identifier (`plan_` + 12 hex chars).
    pub plan_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Requesting user.
    pub user_id: String,
    /// Session the plan belongs to.
    pub session_id: String,
    /// Plan-level lifecycle status.
    pub status: PlanStatus,
    /// Ordered steps; indices unique, completed prefix stable across replans.
    pub steps: Vec<PlanStep>,
    /// Number of replans performed; always equals `replan_history.len()`.
    pub replan_count: u32,
    /// One entry per replan, in order.
    pub replan_history: Vec<ReplanEvent>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Set when the plan reaches `Complete`.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Plan {
    /// Create a pending plan with a fresh `plan_<12 hex>` identifier.
    pub fn new(tenant_id: &str, user_id: &str, session_id: &str, steps: Vec<PlanStep>) -> Self {
        Self {
            plan_id: new_plan_id(),
            tenant_id: tenant_id.to_owned(),
            user_id: user_id.to_owned(),
            session_id: session_id.to_owned(),
            status: PlanStatus::Pending,
            steps,
            replan_count: 0,
            replan_history: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Generate a plan identifier: `plan_` + 12 hex chars (17 chars, inside the
/// 20-char identifier budget).
pub fn new_plan_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("plan_{}", &hex[..12])
}

/// Generate a step task identifier: `task_` + 10 hex chars.
pub fn new_task_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("task_{}", &hex[..10])
}

/// Visibility scope of a stored memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    /// Transient, visible only inside the originating session.
    Session,
    /// Durable, visible across the user's sessions.
    User,
}

impl MemoryScope {
    /// String form stored in backends and returned by tools.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::User => "user",
        }
    }

    /// Parse from a stored/requested string value.
    ///
    /// Unknown scopes fall back to `Session`, the least-durable choice.
    pub fn parse(s: &str) -> Self {
        match s {
            "user" => Self::User,
            _ => Self::Session,
        }
    }
}

/// A stored memory record addressed by its namespaced key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// `tenant:session:task:label` composite key.
    pub namespaced_key: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Originating session.
    pub session_id: String,
    /// Task that wrote the record (lock owner).
    pub task_id: String,
    /// Visibility scope.
    pub scope: MemoryScope,
    /// User-supplied label (never contains `:`).
    pub key: String,
    /// The stored payload.
    pub value: JsonMap,
    /// The return-spec shape the payload was validated against.
    pub return_spec_shape: JsonMap,
    /// First write timestamp.
    pub created_at: DateTime<Utc>,
    /// Last write timestamp.
    pub updated_at: DateTime<Utc>,
    /// Embedding vector, present on indexed backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// A durable trace event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event type constant (see [`event_types`]).
    pub event_type: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Originating session.
    pub session_id: String,
    /// Plan correlation, when known.
    #[serde(default)]
    pub plan_id: Option<String>,
    /// Task correlation, when known.
    #[serde(default)]
    pub task_id: Option<String>,
    /// Structured payload.
    pub payload: JsonMap,
    /// Append timestamp; repositories keep this monotonic per log.
    pub ts: DateTime<Utc>,
}

impl EventRecord {
    /// Build an event stamped with the current time.
    pub fn new(
        event_type: &str,
        tenant_id: &str,
        session_id: &str,
        plan_id: Option<&str>,
        task_id: Option<&str>,
        payload: JsonMap,
    ) -> Self {
        Self {
            event_type: event_type.to_owned(),
            tenant_id: tenant_id.to_owned(),
            session_id: session_id.to_owned(),
            plan_id: plan_id.map(str::to_owned),
            task_id: task_id.map(str::to_owned),
            payload,
            ts: Utc::now(),
        }
    }
}

/// Well-known trace event types.
pub mod event_types {
    /// A user message entered the pipeline.
    pub const USER_MESSAGE_RECEIVED: &str = "user_message.received";
    /// A plan was persisted after validation.
    pub const PLAN_PERSISTED: &str = "plan.persisted";
    /// A step moved to running.
    pub const STEP_STARTED: &str = "step.started";
    /// A step completed with a validated memory write.
    pub const STEP_COMPLETE: &str = "step.complete";
    /// A step failed hard.
    pub const STEP_FAILED: &str = "step.failed";
    /// A step reported it cannot complete as scoped.
    pub const STEP_INSUFFICIENT: &str = "step.insufficient";
    /// A step's output violated its return spec.
    pub const STEP_CONTRACT_VIOLATION: &str = "step.contract_violation";
    /// A replan attempt began.
    pub const REPLAN_TRIGGERED: &str = "replan.triggered";
    /// A model prompt was issued.
    pub const ADK_PROMPT: &str = "adk.prompt";
    /// A model response arrived.
    pub const ADK_LLM_RESPONSE: &str = "adk.llm_response";
    /// A raw agent-graph event was mirrored.
    pub const ADK_EVENT: &str = "adk.event";
    /// A sandboxed extraction ran against a spilled response.
    pub const LARGE_RESPONSE_EXEC: &str = "large_response.exec_python";
}

/// A session record persisted for cross-session memory search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Owning tenant.
    pub tenant_id: String,
    /// Owning user.
    pub user_id: String,
    /// Session identifier.
    pub session_id: String,
    /// Free-form session state.
    pub state: JsonMap,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// One inbound user request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRunRequest {
    /// Owning tenant.
    pub tenant_id: String,
    /// Requesting user.
    pub user_id: String,
    /// Session identifier.
    pub session_id: String,
    /// The user's message.
    pub message: String,
}

/// Final response for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRunResponse {
    /// `complete` or a terminal plan status.
    pub status: String,
    /// User-facing response text.
    pub response: String,
    /// Correlation identifier for plan/trace lookups.
    pub plan_id: String,
}

/// Executor outcome for one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepExecutionResult {
    /// `ok`, `insufficient`, or `failed`.
    pub status: StepOutcome,
    /// Structured output, present on `ok`.
    pub data: Option<JsonMap>,
    /// Failure or insufficiency reason.
    pub reason: Option<String>,
    /// Planner hint for revision.
    pub suggestion: Option<String>,
}

/// Executor outcome discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Step produced data.
    Ok,
    /// Step cannot complete as scoped; replan with a split.
    Insufficient,
    /// Step failed hard.
    Failed,
}

impl StepExecutionResult {
    /// Successful outcome carrying data.
    pub fn ok(data: JsonMap) -> Self {
        Self {
            status: StepOutcome::Ok,
            data: Some(data),
            reason: None,
            suggestion: None,
        }
    }

    /// Insufficient outcome with a reason and optional revision hint.
    pub fn insufficient(reason: &str, suggestion: Option<&str>) -> Self {
        Self {
            status: StepOutcome::Insufficient,
            data: None,
            reason: Some(reason.to_owned()),
            suggestion: suggestion.map(str::to_owned),
        }
    }

    /// Hard failure outcome.
    pub fn failed(reason: &str) -> Self {
        Self {
            status: StepOutcome::Failed,
            data: None,
            reason: Some(reason.to_owned()),
            suggestion: None,
        }
    }
}

/// Ordered steps returned by a planner.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerOutput {
    /// Proposed steps, validated before merging into a plan.
    pub steps: Vec<PlanStep>,
}
