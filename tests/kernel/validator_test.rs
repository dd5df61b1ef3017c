//! Tests for `src/kernel/validator.rs`.

use armitage::kernel::validator::{validate_plan_steps, PlanValidationError};
use armitage::types::{PlanStep, ReturnSpec};

fn step_with_skills(index: u32, skills: Vec<&str>) -> PlanStep {
    PlanStep::new(
        index,
        "do something",
        skills.into_iter().map(str::to_owned).collect(),
        ReturnSpec {
            shape: serde_json::Map::new(),
            reason: "test".to_owned(),
        },
    )
}

#[test]
fn empty_plan_is_rejected() {
    let error = validate_plan_steps(&[], 10).expect_err("empty plan");
    assert!(matches!(error, PlanValidationError::EmptyPlan));
    let failure = error.failure_response();
    assert_eq!(failure["status"], "failed");
    assert_eq!(failure["reason"], "planner_returned_empty_plan");
}

#[test]
fn oversized_plan_is_rejected_with_counts() {
    let steps: Vec<PlanStep> = (1..=11)
        .map(|i| step_with_skills(i, vec!["skill_ok"]))
        .collect();
    let error = validate_plan_steps(&steps, 10).expect_err("over max");
    let failure = error.failure_response();
    assert_eq!(failure["reason"], "plan_infeasible_over_max_steps");
    assert_eq!(failure["max_steps"], 10);
    assert_eq!(failure["actual_steps"], 11);
}

#[test]
fn forbidden_spawn_tokens_are_rejected_case_insensitively() {
    for skill in [
        "subagent",
        "spawn_subagent",
        "create_subagent",
        "agent/run",
        "Run_SubAgent_Tool",
        "  AGENT/RUN  ",
    ] {
        let steps = vec![step_with_skills(1, vec![skill])];
        let error = validate_plan_steps(&steps, 10)
            .expect_err(&format!("skill '{skill}' should be rejected"));
        let failure = error.failure_response();
        assert_eq!(failure["reason"], "subagent_spawning_not_allowed");
        assert_eq!(failure["step_index"], 1);
        assert_eq!(failure["skill"], skill);
    }
}

#[test]
fn ordinary_skills_pass() {
    let steps = vec![
        step_with_skills(1, vec!["skill_cost_report"]),
        step_with_skills(2, vec!["skill_summarizer", "skill_formatter"]),
    ];
    validate_plan_steps(&steps, 10).expect("valid plan");
}
