//! Bounded replanning: surgical revision of a failed step.
//!
//! The merge discipline is fixed: completed steps keep their order and
//! records, the failed step is dropped, the planner's revision slots in,
//! and the remaining pending steps follow. The budget check happens before
//! any planner call so exhaustion is cheap and deterministic.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use crate::agents::{AgentError, PlannerAgent};
use crate::kernel::state::{advance_plan, StateError};
use crate::kernel::validator::{validate_plan_steps, PlanValidationError};
use crate::repos::{EventRepository, PlanRepository, StorageError};
use crate::types::{
    event_types, AgentRunRequest, EventRecord, Plan, PlanStatus, ReplanEvent, ReplanTrigger,
    StepStatus,
};

/// Default replan budget.
pub const DEFAULT_MAX_REPLANS: u32 = 3;

/// Replanning failures.
#[derive(Debug, Error)]
pub enum ReplanError {
    /// Budget exhausted; carries the shaped failure object for the HTTP
    /// boundary.
    #[error("max replan attempts reached")]
    LimitReached {
        /// Structured failure body.
        failure: Value,
    },

    /// Revised steps failed validation.
    #[error(transparent)]
    Validation(#[from] PlanValidationError),

    /// Planner call failed.
    #[error(transparent)]
    Planner(#[from] AgentError),

    /// Plan persistence failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Plan status bookkeeping failed.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Owns the replanning policy and plan-merge behavior.
pub struct ReplanManager {
    planner: Arc<dyn PlannerAgent>,
    plan_repo: Arc<dyn PlanRepository>,
    event_repo: Arc<dyn EventRepository>,
    max_steps: usize,
    max_replans: u32,
}

impl ReplanManager {
    /// Create a manager with explicit budgets.
    pub fn new(
        planner: Arc<dyn PlannerAgent>,
        plan_repo: Arc<dyn PlanRepository>,
        event_repo: Arc<dyn EventRepository>,
        max_steps: usize,
        max_replans: u32,
    ) -> Self {
        Self {
            planner,
            plan_repo,
            event_repo,
            max_steps,
            max_replans,
        }
    }

    /// Attempt a surgical replan around the failed step at
    /// `failed_step_position` (index into `plan.steps`).
    ///
    /// # Errors
    ///
    /// [`ReplanError::LimitReached`] when the budget is spent; the plan is
    /// marked failed and persisted before returning.
    pub async fn replan_or_fail(
        &self,
        request: &AgentRunRequest,
        plan: &mut Plan,
        failed_step_position: usize,
        trigger: ReplanTrigger,
    ) -> Result<(), ReplanError> {
        let failed_step = plan
            .steps
            .get(failed_step_position)
            .cloned()
            .ok_or_else(|| ReplanError::Validation(PlanValidationError::EmptyPlan))?;
        let failure_reason = failed_step
            .failure_reason
            .clone()
            .unwrap_or_else(|| "unknown_failure".to_owned());

        if plan.replan_count >= self.max_replans {
            plan.status = PlanStatus::Failed;
            self.plan_repo.save(plan).await?;

            let completed_steps: Vec<Value> = plan
                .steps
                .iter()
                .filter(|step| step.status == StepStatus::Complete)
                .map(|step| {
                    json!({
                        "step_index": step.step_index,
                        "task": step.task,
                        "status": step.status.as_str(),
                        "memory_key": step.memory_key,
                    })
                })
                .collect();
            return Err(ReplanError::LimitReached {
                failure: json!({
                    "status": "failed",
                    "reason": "max replan attempts reached",
                    "completed_steps": completed_steps,
                    "last_failure": {
                        "step": failed_step.step_index,
                        "reason": failure_reason,
                    },
                }),
            });
        }

        plan.replan_count += 1;
        advance_plan(plan, PlanStatus::Replanning)?;

        let completed: Vec<_> = plan
            .steps
            .iter()
            .filter(|step| step.status == StepStatus::Complete)
            .cloned()
            .collect();
        let remaining: Vec<_> = plan
            .steps
            .iter()
            .enumerate()
            .filter(|(position, step)| {
                step.status != StepStatus::Complete && *position != failed_step_position
            })
            .map(|(_, step)| step.clone())
            .collect();

        let mut payload = crate::types::JsonMap::new();
        payload.insert("attempt".into(), json!(plan.replan_count));
        payload.insert("failed_step".into(), json!(failed_step.step_index));
        payload.insert("reason".into(), json!(failure_reason));
        self.event_repo
            .append(EventRecord::new(
                event_types::REPLAN_TRIGGERED,
                &request.tenant_id,
                &request.session_id,
                Some(&plan.plan_id),
                failed_step.task_id.as_deref(),
                payload,
            ))
            .await?;

        let revised = self
            .planner
            .replan(
                request,
                &completed,
                &failed_step,
                &failure_reason,
                self.max_steps,
            )
            .await?;
        validate_plan_steps(&revised.steps, self.max_steps)?;

        info!(
            plan_id = %plan.plan_id,
            attempt = plan.replan_count,
            failed_step = failed_step.step_index,
            trigger = trigger.as_str(),
            revised_steps = revised.steps.len(),
            "replan_merged"
        );

        plan.replan_history.push(ReplanEvent {
            attempt: plan.replan_count,
            trigger,
            failed_step: failed_step.step_index,
            reason: failure_reason,
            revised_at: Utc::now(),
        });
        plan.steps = completed
            .into_iter()
            .chain(revised.steps)
            .chain(remaining)
            .collect();
        advance_plan(plan, PlanStatus::Executing)?;
        self.plan_repo.save(plan).await?;
        Ok(())
    }
}
