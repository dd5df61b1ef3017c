//! Plan validation: size, emptiness, and the subagent-spawning ban.

use serde_json::{json, Value};
use thiserror::Error;

use crate::types::PlanStep;

/// Default ceiling on plan size.
pub const DEFAULT_MAX_STEPS: usize = 10;

/// Skill-name fragments that indicate an attempt to spawn subagents.
const FORBIDDEN_SKILL_TOKENS: [&str; 4] =
    ["subagent", "spawn_subagent", "create_subagent", "agent/run"];

/// Plan validation failures, each carrying the shaped failure object that
/// surfaces at the HTTP boundary as a 422.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlanValidationError {
    /// Planner returned no steps.
    #[error("planner_returned_empty_plan")]
    EmptyPlan,

    /// Plan exceeds the step ceiling.
    #[error("plan_infeasible_over_max_steps")]
    OverMaxSteps {
        /// Configured ceiling.
        max_steps: usize,
        /// Steps actually proposed.
        actual_steps: usize,
    },

    /// A step's skills contain a subagent-spawning token.
    #[error("subagent_spawning_not_allowed")]
    ForbiddenSkill {
        /// Offending step.
        step_index: u32,
        /// Offending skill name as given.
        skill: String,
    },
}

impl PlanValidationError {
    /// The shaped failure object propagated to the HTTP boundary.
    pub fn failure_response(&self) -> Value {
        match self {
            Self::EmptyPlan => json!({
                "status": "failed",
                "reason": "planner_returned_empty_plan",
            }),
            Self::OverMaxSteps {
                max_steps,
                actual_steps,
            } => json!({
                "status": "failed",
                "reason": "plan_infeasible_over_max_steps",
                "max_steps": max_steps,
                "actual_steps": actual_steps,
            }),
            Self::ForbiddenSkill { step_index, skill } => json!({
                "status": "failed",
                "reason": "subagent_spawning_not_allowed",
                "step_index": step_index,
                "skill": skill,
            }),
        }
    }
}

/// Validate proposed steps before they are merged into a plan.
pub fn validate_plan_steps(
    steps: &[PlanStep],
    max_steps: usize,
) -> Result<(), PlanValidationError> {
    if steps.is_empty() {
        return Err(PlanValidationError::EmptyPlan);
    }
    if steps.len() > max_steps {
        return Err(PlanValidationError::OverMaxSteps {
            max_steps,
            actual_steps: steps.len(),
        });
    }
    for step in steps {
        for skill in &step.skills {
            let normalized = skill.trim().to_lowercase();
            if FORBIDDEN_SKILL_TOKENS
                .iter()
                .any(|token| normalized.contains(token))
            {
                return Err(PlanValidationError::ForbiddenSkill {
                    step_index: step.step_index,
                    skill: skill.clone(),
                });
            }
        }
    }
    Ok(())
}
