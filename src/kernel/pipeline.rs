//! Deterministic plan execution engine.
//!
//! Runs a validated plan step by step against planner/executor
//! capabilities: start the step, execute, gate the output against the
//! return spec, persist it through the memory store, and hand failures to
//! the replan manager. The final response is synthesized from persisted
//! memory outputs, never from transient executor data.

use std::sync::Arc;

use serde_json::json;
use tracing::instrument;

use crate::agents::{ExecutorAgent, PlannerAgent};
use crate::kernel::replan::ReplanManager;
use crate::kernel::state::{advance_plan, StepStateMachine};
use crate::kernel::synthesizer::ResponseSynthesizer;
use crate::kernel::validator::validate_plan_steps;
use crate::kernel::RunError;
use crate::repos::contract::matches_return_spec;
use crate::repos::{
    EventRepository, MemoryError, MemoryRepository, MemoryWriteRequest, PlanRepository,
};
use crate::types::{
    event_types, AgentRunRequest, AgentRunResponse, EventRecord, JsonMap, MemoryScope, Plan,
    PlanStatus, ReplanTrigger, StepOutcome,
};

/// Plan-driven execution engine.
pub struct PipelineEngine {
    planner: Arc<dyn PlannerAgent>,
    executor: Arc<dyn ExecutorAgent>,
    plan_repo: Arc<dyn PlanRepository>,
    memory_repo: Arc<dyn MemoryRepository>,
    event_repo: Arc<dyn EventRepository>,
    max_steps: usize,
    state: StepStateMachine,
    replan: ReplanManager,
    synthesizer: ResponseSynthesizer,
}

impl PipelineEngine {
    /// Wire an engine over shared repositories and capabilities.
    pub fn new(
        planner: Arc<dyn PlannerAgent>,
        executor: Arc<dyn ExecutorAgent>,
        plan_repo: Arc<dyn PlanRepository>,
        memory_repo: Arc<dyn MemoryRepository>,
        event_repo: Arc<dyn EventRepository>,
        max_steps: usize,
        max_replans: u32,
    ) -> Self {
        let replan = ReplanManager::new(
            Arc::clone(&planner),
            Arc::clone(&plan_repo),
            Arc::clone(&event_repo),
            max_steps,
            max_replans,
        );
        let synthesizer = ResponseSynthesizer::new(Arc::clone(&memory_repo));
        Self {
            planner,
            executor,
            plan_repo,
            memory_repo,
            event_repo,
            max_steps,
            state: StepStateMachine,
            replan,
            synthesizer,
        }
    }

    /// Handle one end-to-end run from user message to final response.
    #[instrument(skip(self, request), fields(tenant = %request.tenant_id, session = %request.session_id))]
    pub async fn run(&self, request: &AgentRunRequest) -> Result<AgentRunResponse, RunError> {
        let mut payload = JsonMap::new();
        payload.insert("message_size".into(), json!(request.message.len()));
        self.event_repo
            .append(EventRecord::new(
                event_types::USER_MESSAGE_RECEIVED,
                &request.tenant_id,
                &request.session_id,
                None,
                None,
                payload,
            ))
            .await?;

        let planner_output = self.planner.create_plan(request, self.max_steps).await?;
        validate_plan_steps(&planner_output.steps, self.max_steps)?;

        let mut plan = Plan::new(
            &request.tenant_id,
            &request.user_id,
            &request.session_id,
            planner_output.steps,
        );
        advance_plan(&mut plan, PlanStatus::Executing)?;
        self.plan_repo.save(&plan).await?;

        let mut payload = JsonMap::new();
        payload.insert("steps".into(), json!(plan.steps.len()));
        payload.insert("status".into(), json!(plan.status.as_str()));
        self.append_plan_event(request, &plan, event_types::PLAN_PERSISTED, None, payload)
            .await?;

        let response = self.execute_plan(request, &mut plan).await?;
        Ok(AgentRunResponse {
            status: plan.status.as_str().to_owned(),
            response,
            plan_id: plan.plan_id.clone(),
        })
    }

    async fn execute_plan(
        &self,
        request: &AgentRunRequest,
        plan: &mut Plan,
    ) -> Result<String, RunError> {
        let mut position = 0usize;
        while position < plan.steps.len() {
            self.state.mark_running(&mut plan.steps[position])?;
            let step_snapshot = plan.steps[position].clone();

            let mut payload = JsonMap::new();
            payload.insert("step_index".into(), json!(step_snapshot.step_index));
            payload.insert("skills".into(), json!(step_snapshot.skills));
            self.append_plan_event(
                request,
                plan,
                event_types::STEP_STARTED,
                step_snapshot.task_id.as_deref(),
                payload,
            )
            .await?;
            self.plan_repo.save(plan).await?;

            let execution = self
                .executor
                .execute_step(request, plan, &step_snapshot)
                .await?;

            position = match execution.status {
                StepOutcome::Ok => match execution.data {
                    Some(data) => self.handle_success(request, plan, position, data).await?,
                    None => {
                        self.handle_setback(
                            request,
                            plan,
                            position,
                            "executor_returned_no_data",
                            None,
                            event_types::STEP_FAILED,
                            ReplanTrigger::StepFailed,
                        )
                        .await?
                    }
                },
                StepOutcome::Insufficient => {
                    let reason = execution.reason.as_deref().unwrap_or("insufficient");
                    self.handle_setback(
                        request,
                        plan,
                        position,
                        reason,
                        execution.suggestion.as_deref(),
                        event_types::STEP_INSUFFICIENT,
                        ReplanTrigger::Insufficient,
                    )
                    .await?
                }
                StepOutcome::Failed => {
                    let reason = execution.reason.as_deref().unwrap_or("unknown_failure");
                    self.handle_setback(
                        request,
                        plan,
                        position,
                        reason,
                        execution.suggestion.as_deref(),
                        event_types::STEP_FAILED,
                        ReplanTrigger::StepFailed,
                    )
                    .await?
                }
            };
        }

        advance_plan(plan, PlanStatus::Complete)?;
        self.plan_repo.save(plan).await?;
        Ok(self.synthesizer.synthesize(plan).await?)
    }

    /// Success branch: contract gate, memory write, completion bookkeeping.
    /// Returns the next position to execute.
    async fn handle_success(
        &self,
        request: &AgentRunRequest,
        plan: &mut Plan,
        position: usize,
        data: JsonMap,
    ) -> Result<usize, RunError> {
        let shape = plan.steps[position].return_spec.shape.clone();
        if !matches_return_spec(&data, &shape) {
            self.state
                .mark_failed(&mut plan.steps[position], "contract_violation")?;
            let step = plan.steps[position].clone();

            let mut expected: Vec<&String> = shape.keys().collect();
            expected.sort();
            let mut actual: Vec<&String> = data.keys().collect();
            actual.sort();
            let mut payload = JsonMap::new();
            payload.insert("step_index".into(), json!(step.step_index));
            payload.insert("expected_keys".into(), json!(expected));
            payload.insert("actual_keys".into(), json!(actual));
            self.append_plan_event(
                request,
                plan,
                event_types::STEP_CONTRACT_VIOLATION,
                step.task_id.as_deref(),
                payload,
            )
            .await?;

            self.replan
                .replan_or_fail(request, plan, position, ReplanTrigger::ContractViolation)
                .await?;
            return Ok(self.state.next_pending_step_index(plan));
        }

        let step_snapshot = plan.steps[position].clone();
        let task_id = step_snapshot
            .task_id
            .clone()
            .ok_or_else(|| RunError::Internal("step task_id missing before memory write".into()))?;

        let write_result = self
            .memory_repo
            .write(MemoryWriteRequest {
                tenant_id: request.tenant_id.clone(),
                session_id: request.session_id.clone(),
                task_id,
                key: format!("step_{}_output", step_snapshot.step_index),
                value: data,
                return_spec_shape: shape,
                scope: MemoryScope::Session,
            })
            .await;

        let memory_key = match write_result {
            Ok(memory_key) => memory_key,
            Err(error @ (MemoryError::ContractViolation | MemoryError::LockTimeout)) => {
                // Contract and lock errors abort the step and feed the
                // replan manager rather than the whole request.
                let reason = error.to_string();
                return self
                    .handle_setback(
                        request,
                        plan,
                        position,
                        &reason,
                        None,
                        event_types::STEP_FAILED,
                        ReplanTrigger::StepFailed,
                    )
                    .await;
            }
            Err(other) => return Err(other.into()),
        };

        self.state.mark_complete(&mut plan.steps[position])?;
        plan.steps[position].validated = true;
        plan.steps[position].memory_key = Some(memory_key.clone());

        let step = plan.steps[position].clone();
        let mut payload = JsonMap::new();
        payload.insert("step_index".into(), json!(step.step_index));
        payload.insert("memory_key".into(), json!(memory_key));
        self.append_plan_event(
            request,
            plan,
            event_types::STEP_COMPLETE,
            step.task_id.as_deref(),
            payload,
        )
        .await?;
        self.plan_repo.save(plan).await?;
        Ok(position + 1)
    }

    /// Shared failure/insufficiency branch. Returns the resume position
    /// after the replan merge.
    #[allow(clippy::too_many_arguments)]
    async fn handle_setback(
        &self,
        request: &AgentRunRequest,
        plan: &mut Plan,
        position: usize,
        reason: &str,
        suggestion: Option<&str>,
        event_type: &str,
        trigger: ReplanTrigger,
    ) -> Result<usize, RunError> {
        self.state.mark_failed(&mut plan.steps[position], reason)?;
        let step = plan.steps[position].clone();

        let mut payload = JsonMap::new();
        payload.insert("step_index".into(), json!(step.step_index));
        payload.insert("reason".into(), json!(step.failure_reason));
        payload.insert("suggestion".into(), json!(suggestion));
        self.append_plan_event(request, plan, event_type, step.task_id.as_deref(), payload)
            .await?;

        self.replan
            .replan_or_fail(request, plan, position, trigger)
            .await?;
        Ok(self.state.next_pending_step_index(plan))
    }

    async fn append_plan_event(
        &self,
        request: &AgentRunRequest,
        plan: &Plan,
        event_type: &str,
        task_id: Option<&str>,
        payload: JsonMap,
    ) -> Result<(), RunError> {
        self.event_repo
            .append(EventRecord::new(
                event_type,
                &request.tenant_id,
                &request.session_id,
                Some(&plan.plan_id),
                task_id,
                payload,
            ))
            .await?;
        Ok(())
    }

    /// Shared memory store, exposed for response-path reuse.
    pub fn memory_repo(&self) -> &Arc<dyn MemoryRepository> {
        &self.memory_repo
    }
}
