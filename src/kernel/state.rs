//! Centralized step and plan state transitions.
//!
//! Status is never mutated ad hoc: every move goes through these
//! functions, which stamp timestamps, assign task identity, and fail fast
//! on illegal transitions. That keeps execution loops auditable when
//! replanning rewrites the step list mid-flight.

use thiserror::Error;

use chrono::Utc;

use crate::types::{new_task_id, Plan, PlanStatus, PlanStep, StepStatus};

/// Illegal transition errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// A step transition outside the legal set was requested.
    #[error("invalid step transition to {target} from {from}")]
    InvalidStepTransition {
        /// Current status.
        from: &'static str,
        /// Requested status.
        target: &'static str,
    },

    /// A plan transition outside the legal set was requested.
    #[error("invalid plan transition to {target} from {from}")]
    InvalidPlanTransition {
        /// Current status.
        from: &'static str,
        /// Requested status.
        target: &'static str,
    },
}

/// Owns step lifecycle transitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct StepStateMachine;

impl StepStateMachine {
    /// Move a pending step to running: stamp `started_at`, clear
    /// `finished_at`, and assign `task_id` exactly once.
    pub fn mark_running(&self, step: &mut PlanStep) -> Result<(), StateError> {
        if step.status != StepStatus::Pending {
            return Err(StateError::InvalidStepTransition {
                from: step.status.as_str(),
                target: "running",
            });
        }
        step.status = StepStatus::Running;
        step.started_at = Some(Utc::now());
        step.finished_at = None;
        if step.task_id.is_none() {
            step.task_id = Some(new_task_id());
        }
        Ok(())
    }

    /// Move a running step to complete and stamp `finished_at`.
    pub fn mark_complete(&self, step: &mut PlanStep) -> Result<(), StateError> {
        if step.status != StepStatus::Running {
            return Err(StateError::InvalidStepTransition {
                from: step.status.as_str(),
                target: "complete",
            });
        }
        step.status = StepStatus::Complete;
        step.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Move a running step to failed, preserving the reason.
    pub fn mark_failed(&self, step: &mut PlanStep, reason: &str) -> Result<(), StateError> {
        if step.status != StepStatus::Running {
            return Err(StateError::InvalidStepTransition {
                from: step.status.as_str(),
                target: "failed",
            });
        }
        step.status = StepStatus::Failed;
        step.failure_reason = Some(reason.to_owned());
        step.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Index of the first non-complete step, used to resume after a replan
    /// merge. Returns `plan.steps.len()` when every step completed.
    pub fn next_pending_step_index(&self, plan: &Plan) -> usize {
        plan.steps
            .iter()
            .position(|step| step.status != StepStatus::Complete)
            .unwrap_or(plan.steps.len())
    }
}

/// Move a plan to `target`, enforcing the legal status graph and stamping
/// `completed_at` on completion.
pub fn advance_plan(plan: &mut Plan, target: PlanStatus) -> Result<(), StateError> {
    use PlanStatus::{Complete, Executing, Failed, Pending, Planning, Replanning};

    let legal = matches!(
        (plan.status, target),
        (Pending, Planning)
            | (Pending, Executing)
            | (Planning, Executing)
            | (Planning, Failed)
            | (Executing, Replanning)
            | (Executing, Complete)
            | (Executing, Failed)
            | (Replanning, Executing)
            | (Replanning, Failed)
    );
    if !legal {
        return Err(StateError::InvalidPlanTransition {
            from: plan.status.as_str(),
            target: target.as_str(),
        });
    }
    plan.status = target;
    if target == Complete {
        plan.completed_at = Some(Utc::now());
    }
    Ok(())
}
