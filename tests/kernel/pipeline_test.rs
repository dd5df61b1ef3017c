//! End-to-end tests for the deterministic pipeline engine.

use std::sync::Arc;

use armitage::agents::mock::{MockExecutorAgent, MockPlannerAgent};
use armitage::kernel::pipeline::PipelineEngine;
use armitage::kernel::RunError;
use armitage::repos::in_memory::{
    InMemoryEventRepository, InMemoryMemoryRepository, InMemoryPlanRepository,
};
use armitage::repos::{EventRepository, MemoryRepository, PlanRepository};
use armitage::types::{AgentRunRequest, PlanStatus, StepStatus};

struct Harness {
    engine: PipelineEngine,
    plan_repo: Arc<InMemoryPlanRepository>,
    memory_repo: Arc<InMemoryMemoryRepository>,
    event_repo: Arc<InMemoryEventRepository>,
}

fn harness(max_replans: u32) -> Harness {
    let plan_repo = Arc::new(InMemoryPlanRepository::new());
    let memory_repo = Arc::new(InMemoryMemoryRepository::new());
    let event_repo = Arc::new(InMemoryEventRepository::new());
    let engine = PipelineEngine::new(
        Arc::new(MockPlannerAgent),
        Arc::new(MockExecutorAgent::new()),
        Arc::clone(&plan_repo) as Arc<dyn PlanRepository>,
        Arc::clone(&memory_repo) as Arc<dyn MemoryRepository>,
        Arc::clone(&event_repo) as Arc<dyn EventRepository>,
        10,
        max_replans,
    );
    Harness {
        engine,
        plan_repo,
        memory_repo,
        event_repo,
    }
}

fn request(message: &str) -> AgentRunRequest {
    AgentRunRequest {
        tenant_id: "acme".to_owned(),
        user_id: "u1".to_owned(),
        session_id: "s1".to_owned(),
        message: message.to_owned(),
    }
}

#[tokio::test]
async fn happy_path_completes_and_synthesizes_from_memory() {
    let h = harness(3);
    let result = h
        .engine
        .run(&request("what is the aws bill for yesterday?"))
        .await
        .expect("run succeeds");

    assert_eq!(result.status, "complete");
    assert_eq!(result.response, "Mock execution successful");

    let plan = h
        .plan_repo
        .get(&result.plan_id)
        .await
        .expect("lookup")
        .expect("plan saved");
    assert_eq!(plan.status, PlanStatus::Complete);
    assert!(plan.completed_at.is_some());
    assert_eq!(plan.steps.len(), 2);
    for step in &plan.steps {
        assert_eq!(step.status, StepStatus::Complete);
        assert!(step.validated);
        let memory_key = step.memory_key.as_deref().expect("memory key set");
        let stored = h
            .memory_repo
            .read(memory_key, false)
            .await
            .expect("read")
            .expect("memory record exists");
        assert!(!stored.is_empty());
    }
}

#[tokio::test]
async fn events_are_ordered_and_monotonic() {
    let h = harness(3);
    let result = h
        .engine
        .run(&request("summarize yesterday"))
        .await
        .expect("run succeeds");

    let events = h
        .event_repo
        .list_by_plan(&result.plan_id)
        .await
        .expect("events");
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec![
            "plan.persisted",
            "step.started",
            "step.complete",
            "step.started",
            "step.complete",
        ]
    );

    // step.started for step 2 strictly follows step.complete for step 1.
    for pair in events.windows(2) {
        assert!(pair[0].ts < pair[1].ts, "timestamps must be monotonic");
    }
    assert_eq!(events[1].payload["step_index"], 1);
    assert_eq!(events[3].payload["step_index"], 2);
}

#[tokio::test]
async fn contract_violation_triggers_surgical_replan_then_succeeds() {
    let h = harness(3);
    let result = h
        .engine
        .run(&request("produce something unexpected"))
        .await
        .expect("run succeeds after replan");

    assert_eq!(result.status, "complete");

    let plan = h
        .plan_repo
        .get(&result.plan_id)
        .await
        .expect("lookup")
        .expect("plan saved");
    assert_eq!(plan.replan_count, 1);
    assert_eq!(plan.replan_history.len(), 1);
    assert_eq!(
        plan.replan_history[0].trigger,
        armitage::types::ReplanTrigger::ContractViolation
    );
    assert_eq!(plan.replan_history[0].reason, "contract_violation");

    let events = h
        .event_repo
        .list_by_plan(&result.plan_id)
        .await
        .expect("events");
    let violation = events
        .iter()
        .find(|e| e.event_type == "step.contract_violation")
        .expect("contract violation recorded");
    assert_eq!(violation.payload["expected_keys"], serde_json::json!(["intent"]));
    assert_eq!(
        violation.payload["actual_keys"],
        serde_json::json!(["unexpected"])
    );
    assert!(events.iter().any(|e| e.event_type == "replan.triggered"));

    // Memory written exactly once per completed step.
    let completed: Vec<_> = plan
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Complete)
        .collect();
    assert_eq!(completed.len(), 2);
    for step in completed {
        assert!(step.memory_key.is_some());
    }
}

#[tokio::test]
async fn replan_exhaustion_surfaces_the_shaped_failure() {
    let h = harness(0);
    let error = h
        .engine
        .run(&request("this will fail"))
        .await
        .expect_err("exhaustion propagates");

    let RunError::ReplanExhausted { failure } = error else {
        panic!("expected ReplanExhausted, got {error:?}");
    };
    assert_eq!(failure["status"], "failed");
    assert_eq!(failure["reason"], "max replan attempts reached");
    assert_eq!(failure["completed_steps"], serde_json::json!([]));
    assert_eq!(failure["last_failure"]["step"], 1);
    assert_eq!(failure["last_failure"]["reason"], "simulated_failure");
}

#[tokio::test]
async fn insufficient_outcome_is_recorded_and_replanned() {
    let h = harness(0);
    let error = h
        .engine
        .run(&request("insufficient context"))
        .await
        .expect_err("budget 0 exhausts immediately");
    assert!(matches!(error, RunError::ReplanExhausted { .. }));

    // The step.insufficient event carries reason and suggestion.
    let all_plans_events = h.event_repo.all().await;
    let insufficient = all_plans_events
        .iter()
        .find(|e| e.event_type == "step.insufficient")
        .expect("insufficient recorded");
    assert_eq!(
        insufficient.payload["reason"],
        "single step cannot complete"
    );
    assert_eq!(insufficient.payload["suggestion"], "split task");
}
