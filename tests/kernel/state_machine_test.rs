//! Tests for `src/kernel/state.rs` — step and plan transitions.

use armitage::kernel::state::{advance_plan, StateError, StepStateMachine};
use armitage::types::{Plan, PlanStatus, PlanStep, ReturnSpec, StepStatus};

fn step(index: u32) -> PlanStep {
    PlanStep::new(
        index,
        "collect data",
        vec!["skill_collector".to_owned()],
        ReturnSpec {
            shape: serde_json::Map::new(),
            reason: "downstream".to_owned(),
        },
    )
}

fn plan_with_steps(steps: Vec<PlanStep>) -> Plan {
    Plan::new("acme", "u1", "s1", steps)
}

#[test]
fn running_transition_stamps_start_and_assigns_task_id() {
    let machine = StepStateMachine;
    let mut s = step(1);
    machine.mark_running(&mut s).expect("pending -> running");

    assert_eq!(s.status, StepStatus::Running);
    assert!(s.started_at.is_some());
    assert!(s.finished_at.is_none());
    let task_id = s.task_id.clone().expect("task id assigned");
    assert!(task_id.starts_with("task_"));
}

#[test]
fn complete_transition_stamps_finish() {
    let machine = StepStateMachine;
    let mut s = step(1);
    machine.mark_running(&mut s).expect("pending -> running");
    machine.mark_complete(&mut s).expect("running -> complete");

    assert_eq!(s.status, StepStatus::Complete);
    let started = s.started_at.expect("started");
    let finished = s.finished_at.expect("finished");
    assert!(started <= finished);
}

#[test]
fn failed_transition_records_reason() {
    let machine = StepStateMachine;
    let mut s = step(1);
    machine.mark_running(&mut s).expect("pending -> running");
    machine
        .mark_failed(&mut s, "simulated_failure")
        .expect("running -> failed");

    assert_eq!(s.status, StepStatus::Failed);
    assert_eq!(s.failure_reason.as_deref(), Some("simulated_failure"));
    assert!(s.finished_at.is_some());
}

#[test]
fn illegal_step_transitions_fail_fast() {
    let machine = StepStateMachine;

    let mut pending = step(1);
    assert!(matches!(
        machine.mark_complete(&mut pending),
        Err(StateError::InvalidStepTransition { from: "pending", .. })
    ));
    assert!(matches!(
        machine.mark_failed(&mut pending, "x"),
        Err(StateError::InvalidStepTransition { from: "pending", .. })
    ));

    let mut completed = step(2);
    machine.mark_running(&mut completed).expect("to running");
    machine.mark_complete(&mut completed).expect("to complete");
    assert!(matches!(
        machine.mark_running(&mut completed),
        Err(StateError::InvalidStepTransition { from: "complete", .. })
    ));
}

#[test]
fn task_id_is_assigned_exactly_once() {
    let machine = StepStateMachine;
    let mut s = step(1);
    machine.mark_running(&mut s).expect("to running");
    let first = s.task_id.clone();

    machine.mark_failed(&mut s, "boom").expect("to failed");
    // A fresh pending copy keeps the assigned id if it already has one.
    s.status = StepStatus::Pending;
    machine.mark_running(&mut s).expect("to running again");
    assert_eq!(s.task_id, first);
}

#[test]
fn next_pending_step_index_skips_completed_prefix() {
    let machine = StepStateMachine;
    let mut plan = plan_with_steps(vec![step(1), step(2), step(3)]);
    machine.mark_running(&mut plan.steps[0]).expect("run");
    machine.mark_complete(&mut plan.steps[0]).expect("complete");

    assert_eq!(machine.next_pending_step_index(&plan), 1);

    machine.mark_running(&mut plan.steps[1]).expect("run");
    machine.mark_complete(&mut plan.steps[1]).expect("complete");
    machine.mark_running(&mut plan.steps[2]).expect("run");
    machine.mark_complete(&mut plan.steps[2]).expect("complete");
    assert_eq!(machine.next_pending_step_index(&plan), 3);
}

#[test]
fn plan_transitions_follow_the_status_graph() {
    let mut plan = plan_with_steps(vec![step(1)]);
    assert_eq!(plan.status, PlanStatus::Pending);

    advance_plan(&mut plan, PlanStatus::Executing).expect("pending -> executing");
    advance_plan(&mut plan, PlanStatus::Replanning).expect("executing -> replanning");
    advance_plan(&mut plan, PlanStatus::Executing).expect("replanning -> executing");
    advance_plan(&mut plan, PlanStatus::Complete).expect("executing -> complete");
    assert!(plan.completed_at.is_some());

    assert!(matches!(
        advance_plan(&mut plan, PlanStatus::Executing),
        Err(StateError::InvalidPlanTransition { from: "complete", .. })
    ));
}

#[test]
fn pending_plan_cannot_complete_directly() {
    let mut plan = plan_with_steps(vec![step(1)]);
    assert!(matches!(
        advance_plan(&mut plan, PlanStatus::Complete),
        Err(StateError::InvalidPlanTransition { from: "pending", .. })
    ));
}

#[test]
fn plan_serialization_round_trips() {
    let mut plan = plan_with_steps(vec![step(1), step(2)]);
    let machine = StepStateMachine;
    advance_plan(&mut plan, PlanStatus::Executing).expect("to executing");
    machine.mark_running(&mut plan.steps[0]).expect("run");
    machine.mark_complete(&mut plan.steps[0]).expect("complete");
    plan.steps[0].memory_key = Some("acme:s1:task_ab:step_1_output".to_owned());
    plan.steps[0].validated = true;

    let encoded = serde_json::to_string(&plan).expect("serialize");
    let decoded: Plan = serde_json::from_str(&encoded).expect("deserialize");
    assert_eq!(decoded, plan);
}
