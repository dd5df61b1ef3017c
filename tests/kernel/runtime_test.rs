//! Tests for the graph runtime: scripted end-to-end flows through the
//! policy engine, response selection, and disclosure.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use armitage::agents::llm::LlmResponse;
use armitage::agents::mock::{scripted_transfer, ScriptedLlmClient};
use armitage::kernel::runtime::{GraphRuntime, GraphRuntimeConfig};
use armitage::repos::in_memory::{
    InMemoryEventRepository, InMemoryMemoryRepository, InMemorySessionRepository,
};
use armitage::repos::{
    EventRepository, MemoryRepository, MemoryWriteRequest, SessionRepository,
};
use armitage::tools::large_response::LargeResponsePipeline;
use armitage::types::{AgentRunRequest, MemoryScope};

const MEMORY: &str = "memory_subagent_c";
const PLANNER: &str = "planner_subagent_a";
const EXECUTOR: &str = "executor_subagent_b";

struct Harness {
    runtime: GraphRuntime,
    event_repo: Arc<InMemoryEventRepository>,
}

fn harness(script: Vec<LlmResponse>, max_turns: usize) -> Harness {
    let event_repo = Arc::new(InMemoryEventRepository::new());
    let memory_repo = Arc::new(InMemoryMemoryRepository::new());
    let session_repo = Arc::new(InMemorySessionRepository::new());
    let runtime = GraphRuntime::new(
        GraphRuntimeConfig {
            max_turns,
            ..GraphRuntimeConfig::default()
        },
        Arc::new(ScriptedLlmClient::new(script)),
        Some(Arc::clone(&event_repo) as Arc<dyn EventRepository>),
        Some(Arc::clone(&memory_repo) as Arc<dyn MemoryRepository>),
        Arc::clone(&session_repo) as Arc<dyn SessionRepository>,
        None,
        Arc::new(LargeResponsePipeline::default()),
    );
    Harness { runtime, event_repo }
}

fn request(message: &str) -> AgentRunRequest {
    AgentRunRequest {
        tenant_id: "acme".to_owned(),
        user_id: "u1".to_owned(),
        session_id: "s1".to_owned(),
        message: message.to_owned(),
    }
}

async fn blocked_reasons(event_repo: &InMemoryEventRepository, plan_id: &str) -> Vec<String> {
    let events = event_repo.list_by_plan(plan_id).await.expect("events");
    let mut reasons = Vec::new();
    for event in &events {
        if event.event_type != "adk.event" {
            continue;
        }
        let Some(responses) = event.payload.get("function_responses").and_then(Value::as_array)
        else {
            continue;
        };
        for response in responses {
            let body = &response["response"];
            if body.get("status").and_then(Value::as_str) == Some("blocked") {
                if let Some(reason) = body.get("reason").and_then(Value::as_str) {
                    reasons.push(reason.to_owned());
                }
            }
        }
    }
    reasons
}

#[tokio::test]
async fn final_coordinator_text_is_selected_and_mirrored() {
    let h = harness(vec![LlmResponse::text("All done.")], 8);
    let result = h
        .runtime
        .run(&request("hello there"), &HashMap::new())
        .await
        .expect("run succeeds");

    assert_eq!(result.status, "complete");
    assert_eq!(result.response, "All done.");
    assert!(result.plan_id.starts_with("plan_adk_"));

    let events = h
        .event_repo
        .list_by_plan(&result.plan_id)
        .await
        .expect("events");
    // One prompt, one model response, one mirrored graph event at minimum.
    assert!(events.iter().any(|e| e.event_type == "adk.prompt"));
    assert!(events.iter().any(|e| e.event_type == "adk.llm_response"));
    let mirrored = events
        .iter()
        .find(|e| e.event_type == "adk.event")
        .expect("mirrored event");
    assert_eq!(mirrored.payload["author"], "orchestrator_manager");
    assert_eq!(mirrored.payload["is_final_response"], true);
}

#[tokio::test]
async fn first_turn_enforces_precheck_then_planner_then_discovery() {
    let script = vec![
        // Blocked: memory pre-check required on first turn.
        scripted_transfer(EXECUTOR),
        // Satisfy the pre-check.
        scripted_transfer(MEMORY),
        LlmResponse::text("no stored memory found"),
        // Blocked: planner required before executor.
        scripted_transfer(EXECUTOR),
        scripted_transfer(PLANNER),
        LlmResponse::call("find_relevant_skill", serde_json::Map::new()),
        LlmResponse::call("load_instructions", serde_json::Map::new()),
        LlmResponse::text("plan ready"),
        // Now permitted.
        scripted_transfer(EXECUTOR),
        LlmResponse::text("step executed"),
        LlmResponse::text("Here is the final answer."),
    ];
    let h = harness(script, 16);
    let result = h
        .runtime
        .run(&request("what is the aws bill for yesterday?"), &HashMap::new())
        .await
        .expect("run succeeds");

    assert_eq!(result.response, "Here is the final answer.");

    let reasons = blocked_reasons(&h.event_repo, &result.plan_id).await;
    assert!(reasons.contains(&"memory_precheck_required_before_execution".to_owned()));
    assert!(reasons.contains(&"planner_required_before_executor_first_turn".to_owned()));
    // The eventually-permitted transfer means no further blocks at the end.
    assert_eq!(reasons.len(), 2);
}

#[tokio::test]
async fn memory_search_results_produce_the_disclosure_prefix() {
    let memory_repo = Arc::new(InMemoryMemoryRepository::new());
    let mut value = serde_json::Map::new();
    value.insert(
        "memory_text".into(),
        json!("User prefers 7-day AWS cost report."),
    );
    let mut shape = serde_json::Map::new();
    shape.insert("memory_text".into(), json!("string"));
    memory_repo
        .write(MemoryWriteRequest {
            tenant_id: "acme".to_owned(),
            session_id: "s1".to_owned(),
            task_id: "task_seed01".to_owned(),
            key: "aws_pref".to_owned(),
            value,
            return_spec_shape: shape,
            scope: MemoryScope::User,
        })
        .await
        .expect("seed write");

    let script = vec![
        scripted_transfer(MEMORY),
        LlmResponse::call("search_relevant_memory", {
            let mut args = serde_json::Map::new();
            args.insert("query".into(), json!("aws cost"));
            args
        }),
        LlmResponse::text("found a saved preference"),
        LlmResponse::text("Here's your 7-day report."),
    ];

    let event_repo = Arc::new(InMemoryEventRepository::new());
    let session_repo = Arc::new(InMemorySessionRepository::new());
    let runtime = GraphRuntime::new(
        GraphRuntimeConfig::default(),
        Arc::new(ScriptedLlmClient::new(script)),
        Some(Arc::clone(&event_repo) as Arc<dyn EventRepository>),
        Some(Arc::clone(&memory_repo) as Arc<dyn MemoryRepository>),
        Arc::clone(&session_repo) as Arc<dyn SessionRepository>,
        None,
        Arc::new(LargeResponsePipeline::default()),
    );

    let result = runtime
        .run(&request("aws report based on my preference"), &HashMap::new())
        .await
        .expect("run succeeds");

    assert!(
        result.response.starts_with("Note: I used saved memory from "),
        "got: {}",
        result.response
    );
    assert!(result
        .response
        .contains("Applied memory: User prefers 7-day AWS cost report."));
    assert!(result.response.ends_with("Here's your 7-day report."));
}

#[tokio::test]
async fn memory_opt_out_blocks_memory_and_discloses_the_skip() {
    let script = vec![
        scripted_transfer(MEMORY),
        LlmResponse::text("Understood, answering without memory."),
    ];
    let h = harness(script, 8);
    let result = h
        .runtime
        .run(&request("skip memory and just answer"), &HashMap::new())
        .await
        .expect("run succeeds");

    assert!(result.response.starts_with(
        "Note: I did not use memory for this response because you asked to skip memory.\n\n"
    ));

    let reasons = blocked_reasons(&h.event_repo, &result.plan_id).await;
    assert_eq!(reasons, vec!["memory_usage_disabled_by_user".to_owned()]);
}

#[tokio::test]
async fn tool_failure_without_a_final_text_yields_the_fixed_message() {
    // One turn: the failed transfer consumes it and the run ends with no
    // coordinator conclusion.
    let script = vec![scripted_transfer("no_such_agent")];
    let h = harness(script, 1);
    let result = h
        .runtime
        .run(&request("do the thing"), &HashMap::new())
        .await
        .expect("run succeeds");

    assert_eq!(
        result.response,
        "I ran into a tool failure while working on this request, so I can't provide the full \
         result right now. Please try again."
    );
}

#[tokio::test]
async fn final_text_is_sanitized() {
    let script = vec![LlmResponse::text(
        "Try `get_cost_and_usage_comparisons` instead.",
    )];
    let h = harness(script, 4);
    let result = h
        .runtime
        .run(&request("compare costs"), &HashMap::new())
        .await
        .expect("run succeeds");

    assert_eq!(result.response, "Try the requested comparison instead.");
}

#[tokio::test]
async fn first_turn_policy_does_not_leak_into_the_next_turn() {
    let event_repo = Arc::new(InMemoryEventRepository::new());
    let memory_repo = Arc::new(InMemoryMemoryRepository::new());
    let session_repo = Arc::new(InMemorySessionRepository::new());

    let build = |script: Vec<LlmResponse>| {
        GraphRuntime::new(
            GraphRuntimeConfig::default(),
            Arc::new(ScriptedLlmClient::new(script)),
            Some(Arc::clone(&event_repo) as Arc<dyn EventRepository>),
            Some(Arc::clone(&memory_repo) as Arc<dyn MemoryRepository>),
            Arc::clone(&session_repo) as Arc<dyn SessionRepository>,
            None,
            Arc::new(LargeResponsePipeline::default()),
        )
    };

    // First turn: the executor transfer hits the pre-check gate.
    let first_runtime = build(vec![
        scripted_transfer(EXECUTOR),
        LlmResponse::text("first answer"),
    ]);
    let first = first_runtime
        .run(&request("first message"), &HashMap::new())
        .await
        .expect("first run");
    assert_eq!(
        blocked_reasons(&event_repo, &first.plan_id).await,
        vec!["memory_precheck_required_before_execution".to_owned()]
    );

    // Same session, next turn: the session already exists, the trace
    // context is fresh, and the same transfer is permitted.
    let second_runtime = build(vec![
        scripted_transfer(EXECUTOR),
        LlmResponse::text("step done"),
        LlmResponse::text("second answer"),
    ]);
    let second = second_runtime
        .run(&request("second message"), &HashMap::new())
        .await
        .expect("second run");
    assert_eq!(second.response, "second answer");
    assert!(blocked_reasons(&event_repo, &second.plan_id).await.is_empty());
}
