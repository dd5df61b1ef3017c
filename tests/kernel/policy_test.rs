//! Tests for `src/kernel/policy.rs` — the veto table and tool-result
//! post-processing.

use std::sync::Arc;

use serde_json::{json, Value};

use armitage::kernel::context::TraceContext;
use armitage::kernel::policy::{result_indicates_no_skills, PolicyEngine};
use armitage::repos::in_memory::InMemoryEventRepository;
use armitage::repos::EventRepository;
use armitage::types::JsonMap;

const COORDINATOR: &str = "orchestrator_manager";
const PLANNER: &str = "planner_subagent_a";
const EXECUTOR: &str = "executor_subagent_b";
const MEMORY: &str = "memory_subagent_c";
const COMMUNICATOR: &str = "communicator_subagent_d";

fn trace(
    require_planner_first: bool,
    allow_memory: bool,
    require_memory_precheck: bool,
) -> TraceContext {
    TraceContext::new(
        None,
        "acme",
        "s1",
        "plan_adk_test",
        require_planner_first,
        allow_memory,
        require_memory_precheck,
        vec!["find_relevant_skill".to_owned(), "load_instructions".to_owned()],
    )
}

fn transfer_args(destination: &str) -> JsonMap {
    let mut args = JsonMap::new();
    args.insert("agent_name".into(), json!(destination));
    args
}

async fn check_transfer(
    trace: &TraceContext,
    source: &str,
    destination: &str,
) -> Option<Value> {
    PolicyEngine
        .before_tool(trace, source, "transfer_to_agent", &transfer_args(destination))
        .await
}

#[tokio::test]
async fn memory_tools_are_reserved_for_the_memory_subagent() {
    let trace = trace(false, true, false);
    for tool in [
        "write_memory",
        "read_memory",
        "save_user_memory",
        "save_action_memory",
        "search_relevant_memory",
    ] {
        let block = PolicyEngine
            .before_tool(&trace, EXECUTOR, tool, &JsonMap::new())
            .await
            .expect("blocked");
        assert_eq!(block["status"], "blocked");
        assert_eq!(block["reason"], "memory_tools_reserved_for_memory_subagent");
        assert_eq!(block["required_agent"], MEMORY);
    }

    // The memory sub-agent itself is allowed through.
    let allowed = PolicyEngine
        .before_tool(&trace, MEMORY, "search_relevant_memory", &JsonMap::new())
        .await;
    assert!(allowed.is_none());
}

#[tokio::test]
async fn write_memory_without_return_spec_is_a_contract_violation() {
    let trace = trace(false, true, false);
    let mut args = JsonMap::new();
    args.insert("key".into(), json!("step_output"));
    args.insert("data".into(), json!({"intent": "report"}));

    let block = PolicyEngine
        .before_tool(&trace, MEMORY, "write_memory", &args)
        .await
        .expect("blocked");
    assert_eq!(block["status"], "contract_violation");
    assert_eq!(block["reason"], "missing return_spec");

    args.insert("return_spec".into(), json!({"intent": "string"}));
    let allowed = PolicyEngine
        .before_tool(&trace, MEMORY, "write_memory", &args)
        .await;
    assert!(allowed.is_none());
}

#[tokio::test]
async fn memory_transfers_only_from_the_coordinator() {
    let trace = trace(false, true, false);
    let block = check_transfer(&trace, PLANNER, MEMORY).await.expect("blocked");
    assert_eq!(block["reason"], "memory_transfer_allowed_only_from_orchestrator");
    assert_eq!(block["required_agent"], COORDINATOR);

    assert!(check_transfer(&trace, COORDINATOR, MEMORY).await.is_none());
}

#[tokio::test]
async fn memory_subagent_must_return_to_the_coordinator() {
    let trace = trace(false, true, false);
    let block = check_transfer(&trace, MEMORY, PLANNER).await.expect("blocked");
    assert_eq!(block["reason"], "memory_subagent_must_return_to_orchestrator");

    assert!(check_transfer(&trace, MEMORY, COORDINATOR).await.is_none());
}

#[tokio::test]
async fn communicator_transfers_only_from_the_coordinator() {
    let trace = trace(false, true, false);
    let block = check_transfer(&trace, EXECUTOR, COMMUNICATOR)
        .await
        .expect("blocked");
    assert_eq!(
        block["reason"],
        "communicator_transfer_allowed_only_from_orchestrator"
    );

    assert!(check_transfer(&trace, COORDINATOR, COMMUNICATOR)
        .await
        .is_none());
}

#[tokio::test]
async fn memory_disabled_blocks_the_memory_transfer() {
    let trace = trace(false, false, false);
    let block = check_transfer(&trace, COORDINATOR, MEMORY)
        .await
        .expect("blocked");
    assert_eq!(block["reason"], "memory_usage_disabled_by_user");

    // A disabled-memory block must not count as a pre-check visit.
    assert!(!trace.flags().await.memory_precheck_seen);
}

#[tokio::test]
async fn memory_precheck_gates_planner_and_executor() {
    let trace = trace(false, true, true);

    let block = check_transfer(&trace, COORDINATOR, PLANNER)
        .await
        .expect("blocked");
    assert_eq!(block["reason"], "memory_precheck_required_before_execution");
    assert_eq!(block["required_agent"], MEMORY);

    // Visiting memory satisfies the pre-check.
    assert!(check_transfer(&trace, COORDINATOR, MEMORY).await.is_none());
    assert!(trace.flags().await.memory_precheck_seen);
    assert!(check_transfer(&trace, COORDINATOR, PLANNER).await.is_none());
}

#[tokio::test]
async fn planner_is_required_before_the_executor_on_first_turn() {
    let trace = trace(true, true, false);
    let block = check_transfer(&trace, COORDINATOR, EXECUTOR)
        .await
        .expect("blocked");
    assert_eq!(block["reason"], "planner_required_before_executor_first_turn");
    assert_eq!(block["required_agent"], PLANNER);
}

#[tokio::test]
async fn executor_requires_skill_discovery_then_loading() {
    let trace = trace(true, true, false);

    // Visit the planner; its local evidence resets.
    assert!(check_transfer(&trace, COORDINATOR, PLANNER).await.is_none());

    // No discovery call yet.
    let block = check_transfer(&trace, COORDINATOR, EXECUTOR)
        .await
        .expect("blocked");
    assert_eq!(block["reason"], "planner_must_discover_skills_before_executor");
    assert_eq!(block["required_tool"], "find_relevant_skill");

    // Discovery returning skills still requires a load.
    assert!(PolicyEngine
        .before_tool(&trace, PLANNER, "find_relevant_skill", &JsonMap::new())
        .await
        .is_none());
    PolicyEngine
        .after_tool(
            &trace,
            PLANNER,
            "find_relevant_skill",
            json!({"results": [{"skill_id": "s1"}]}),
        )
        .await;
    let block = check_transfer(&trace, COORDINATOR, EXECUTOR)
        .await
        .expect("blocked");
    assert_eq!(block["reason"], "planner_must_load_skills_before_executor");
    assert_eq!(
        block["required_tool"],
        "load_instruction_or_load_instructions"
    );

    // Loading instructions opens the gate.
    assert!(PolicyEngine
        .before_tool(&trace, PLANNER, "load_instruction", &JsonMap::new())
        .await
        .is_none());
    assert!(check_transfer(&trace, COORDINATOR, EXECUTOR).await.is_none());
}

#[tokio::test]
async fn empty_discovery_waives_the_load_requirement() {
    let trace = trace(true, true, false);
    assert!(check_transfer(&trace, COORDINATOR, PLANNER).await.is_none());
    assert!(PolicyEngine
        .before_tool(&trace, PLANNER, "find_relevant_skill", &JsonMap::new())
        .await
        .is_none());
    PolicyEngine
        .after_tool(&trace, PLANNER, "find_relevant_skill", json!({"results": []}))
        .await;

    assert!(check_transfer(&trace, COORDINATOR, EXECUTOR).await.is_none());
}

#[tokio::test]
async fn planner_revisit_resets_discovery_evidence() {
    let trace = trace(true, true, false);
    assert!(check_transfer(&trace, COORDINATOR, PLANNER).await.is_none());
    assert!(PolicyEngine
        .before_tool(&trace, PLANNER, "find_relevant_skill", &JsonMap::new())
        .await
        .is_none());
    PolicyEngine
        .after_tool(&trace, PLANNER, "find_relevant_skill", json!({"results": []}))
        .await;

    // Returning to the planner clears find/load/no-skills evidence.
    assert!(check_transfer(&trace, COORDINATOR, PLANNER).await.is_none());
    let block = check_transfer(&trace, COORDINATOR, EXECUTOR)
        .await
        .expect("blocked again");
    assert_eq!(block["reason"], "planner_must_discover_skills_before_executor");
}

#[tokio::test]
async fn after_tool_wraps_object_results_with_the_tool_name() {
    let trace = trace(false, true, false);
    let wrapped = PolicyEngine
        .after_tool(&trace, EXECUTOR, "skill_report", json!({"rows": 3}))
        .await;
    assert_eq!(wrapped["rows"], 3);
    assert_eq!(wrapped["tool_name"], "skill_report");

    let passthrough = PolicyEngine
        .after_tool(&trace, EXECUTOR, "skill_report", json!([1, 2, 3]))
        .await;
    assert_eq!(passthrough, json!([1, 2, 3]));
}

#[test]
fn tool_errors_normalize_to_the_failure_shape() {
    let failure = PolicyEngine::normalize_tool_error("skill_report", "connection reset");
    assert_eq!(failure["status"], "failed");
    assert_eq!(failure["tool_name"], "skill_report");
    assert_eq!(failure["reason"], "connection reset");
}

#[test]
fn no_skill_markers_are_detected_case_insensitively() {
    assert!(result_indicates_no_skills(&json!({"skills": []})));
    assert!(result_indicates_no_skills(&json!({"skill_ids": []})));
    assert!(result_indicates_no_skills(&json!({"matched_skills": []})));
    assert!(result_indicates_no_skills(&json!({"results": []})));
    assert!(result_indicates_no_skills(&json!("No Relevant Skill available")));
    assert!(result_indicates_no_skills(&json!("NO SKILLS FOUND")));

    assert!(!result_indicates_no_skills(
        &json!({"results": [{"skill_id": "s1"}]})
    ));
}

#[tokio::test]
async fn prompts_and_responses_are_mirrored_to_the_trace() {
    let event_repo = Arc::new(InMemoryEventRepository::new());
    let trace = TraceContext::new(
        Some(Arc::clone(&event_repo) as Arc<dyn EventRepository>),
        "acme",
        "s1",
        "plan_adk_mirror",
        false,
        true,
        false,
        vec![],
    );

    PolicyEngine
        .record_prompt(
            &trace,
            COORDINATOR,
            "models/test",
            "instruction",
            &["hello".to_owned()],
            &["transfer_to_agent".to_owned()],
            Some("inv_1"),
        )
        .await;
    PolicyEngine
        .record_llm_response(
            &trace,
            COORDINATOR,
            &armitage::agents::llm::LlmResponse::text("hi"),
            Some("inv_1"),
        )
        .await;

    let events = event_repo
        .list_by_plan("plan_adk_mirror")
        .await
        .expect("events");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, "adk.prompt");
    assert_eq!(events[0].payload["agent"], COORDINATOR);
    assert_eq!(events[0].payload["model"], "models/test");
    assert_eq!(events[1].event_type, "adk.llm_response");
    assert_eq!(events[1].payload["text_parts"], json!(["hi"]));
    assert_eq!(events[0].task_id.as_deref(), Some("inv_1"));
}
