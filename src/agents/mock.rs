//! Deterministic agent and model implementations.
//!
//! The mock planner/executor make the pipeline engine fully runnable
//! without a model: the executor fabricates shape-conforming payloads and
//! reacts to `fail` / `insufficient` / `unexpected` markers in the user
//! message, which is exactly what failure-path tests need. The scripted
//! LLM client replays a queued sequence of responses for graph tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::agents::llm::{LlmClient, LlmError, LlmRequest, LlmResponse};
use crate::agents::{AgentError, ExecutorAgent, PlannerAgent};
use crate::types::{
    AgentRunRequest, JsonMap, Plan, PlannerOutput, PlanStep, ReturnSpec, StepExecutionResult,
};

/// Two-step deterministic planner.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockPlannerAgent;

#[async_trait]
impl PlannerAgent for MockPlannerAgent {
    async fn create_plan(
        &self,
        _request: &AgentRunRequest,
        max_steps: usize,
    ) -> Result<PlannerOutput, AgentError> {
        let mut shape_1 = JsonMap::new();
        shape_1.insert("intent".into(), json!("string"));
        let mut shape_2 = JsonMap::new();
        shape_2.insert("response_text".into(), json!("string"));

        let mut second = PlanStep::new(
            2,
            "Build actionable response",
            vec!["skill_response_builder".to_owned()],
            ReturnSpec {
                shape: shape_2,
                reason: "Final user output synthesis".to_owned(),
            },
        );
        second.input_from_step = Some(1);

        let steps = vec![
            PlanStep::new(
                1,
                "Analyze request intent",
                vec!["skill_intent_analyzer".to_owned()],
                ReturnSpec {
                    shape: shape_1,
                    reason: "Used in step 2".to_owned(),
                },
            ),
            second,
        ];
        Ok(PlannerOutput {
            steps: steps.into_iter().take(max_steps).collect(),
        })
    }

    async fn replan(
        &self,
        _request: &AgentRunRequest,
        _completed_steps: &[PlanStep],
        failed_step: &PlanStep,
        _reason: &str,
        max_steps: usize,
    ) -> Result<PlannerOutput, AgentError> {
        let mut revised = PlanStep::new(
            failed_step.step_index,
            &format!("Retry: {}", failed_step.task),
            failed_step.skills.clone(),
            failed_step.return_spec.clone(),
        );
        revised.input_from_step = failed_step.input_from_step;
        Ok(PlannerOutput {
            steps: vec![revised].into_iter().take(max_steps).collect(),
        })
    }
}

/// Message-driven deterministic executor.
///
/// `insufficient` in the message yields an insufficiency, `fail` a hard
/// failure, `unexpected` a payload violating the declared shape (but only
/// on the first attempt, so a replan then succeeds); anything else yields
/// a shape-conforming payload.
#[derive(Debug, Default)]
pub struct MockExecutorAgent {
    attempts: Mutex<u32>,
}

impl MockExecutorAgent {
    /// Create a fresh executor.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutorAgent for MockExecutorAgent {
    async fn execute_step(
        &self,
        request: &AgentRunRequest,
        _plan: &Plan,
        step: &PlanStep,
    ) -> Result<StepExecutionResult, AgentError> {
        let message = request.message.to_lowercase();
        if message.contains("insufficient") {
            return Ok(StepExecutionResult::insufficient(
                "single step cannot complete",
                Some("split task"),
            ));
        }
        if message.contains("fail") {
            return Ok(StepExecutionResult::failed("simulated_failure"));
        }
        if message.contains("unexpected") {
            let mut attempts = self.attempts.lock().await;
            *attempts += 1;
            if *attempts == 1 {
                let mut payload = JsonMap::new();
                payload.insert("unexpected".into(), json!("value"));
                return Ok(StepExecutionResult::ok(payload));
            }
        }

        let mut payload = JsonMap::new();
        for key in step.return_spec.shape.keys() {
            payload.insert(key.clone(), json!(format!("mock_{}", step.step_index)));
        }
        if payload.contains_key("response_text") {
            payload.insert("response_text".into(), json!("Mock execution successful"));
        }
        Ok(StepExecutionResult::ok(payload))
    }
}

/// LLM client replaying a queued sequence of responses.
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<LlmResponse>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlmClient {
    /// Queue a fixed response sequence.
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests observed so far, for assertions.
    pub async fn seen_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().await.push(request);
        let next = self.responses.lock().await.pop_front();
        Ok(next.unwrap_or_else(|| LlmResponse::text("(scripted sequence exhausted)")))
    }
}

/// Convenience: a `transfer_to_agent` scripted response.
pub fn scripted_transfer(destination: &str) -> LlmResponse {
    let mut args = JsonMap::new();
    args.insert("agent_name".into(), Value::String(destination.to_owned()));
    LlmResponse::call("transfer_to_agent", args)
}
