//! Policy and trace engine wrapped around every model call and tool
//! invocation.
//!
//! The engine never raises: a veto is returned as a structured
//! `{status: "blocked", reason}` tool result so the model can react, and
//! uncaught tool errors are normalized to `{status: "failed", tool_name,
//! reason}`. The veto table is evaluated in a fixed order; state updates
//! are interleaved at exact points so a blocked transfer never leaves
//! stale evidence behind.

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::agents::llm::LlmResponse;
use crate::agents::roles;
use crate::kernel::context::TraceContext;
use crate::types::{event_types, EventRecord, JsonMap};

/// Truncation limit for log previews.
const PROMPT_TEXT_LIMIT: usize = 2_000;

/// Truncation limit for persisted trace payload texts.
const TRACE_TEXT_LIMIT: usize = 12_000;

/// Tools reserved for the memory sub-agent.
const MEMORY_TOOL_NAMES: [&str; 5] = [
    "write_memory",
    "read_memory",
    "save_user_memory",
    "save_action_memory",
    "search_relevant_memory",
];

/// Markers indicating skill discovery found nothing.
const NO_SKILL_MARKERS: [&str; 6] = [
    "\"skills\": []",
    "\"skill_ids\": []",
    "\"matched_skills\": []",
    "\"results\": []",
    "no relevant skill",
    "no skills found",
];

fn truncate(value: &str, limit: usize) -> String {
    value.chars().take(limit).collect()
}

fn blocked(reason: &str) -> Value {
    json!({"status": "blocked", "reason": reason})
}

fn blocked_with_agent(reason: &str, required_agent: &str) -> Value {
    json!({"status": "blocked", "reason": reason, "required_agent": required_agent})
}

fn blocked_with_tool(reason: &str, required_tool: &str) -> Value {
    json!({"status": "blocked", "reason": reason, "required_tool": required_tool})
}

/// Guards transfers and tool calls; mirrors prompts and responses to the
/// event log.
#[derive(Debug, Default, Clone, Copy)]
pub struct PolicyEngine;

impl PolicyEngine {
    /// Evaluate the veto table for one tool call.
    ///
    /// Returns `Some(result)` to replace the tool's effect with a
    /// structured block, or `None` to let the call proceed. Flag updates
    /// for permitted transfers and planner tool usage happen here.
    pub async fn before_tool(
        &self,
        trace: &TraceContext,
        agent_name: &str,
        tool_name: &str,
        args: &JsonMap,
    ) -> Option<Value> {
        info!(
            tool_name,
            agent = agent_name,
            "tool_call_start"
        );

        if MEMORY_TOOL_NAMES.contains(&tool_name) && agent_name != roles::MEMORY {
            warn!(
                tool_name,
                agent = agent_name,
                reason = "memory_tools_reserved_for_memory_subagent",
                "tool_call_blocked"
            );
            return Some(blocked_with_agent(
                "memory_tools_reserved_for_memory_subagent",
                roles::MEMORY,
            ));
        }

        if tool_name == "write_memory" && !args.contains_key("return_spec") {
            return Some(json!({
                "status": "contract_violation",
                "reason": "missing return_spec",
            }));
        }

        if tool_name == "transfer_to_agent" {
            let destination = args.get("agent_name").and_then(Value::as_str);
            if let Some(destination) = destination {
                if let Some(block) = self
                    .check_transfer(trace, agent_name, destination)
                    .await
                {
                    warn!(
                        agent = agent_name,
                        destination,
                        reason = block
                            .get("reason")
                            .and_then(|v| v.as_str())
                            .unwrap_or("unknown"),
                        "transfer_blocked"
                    );
                    return Some(block);
                }
            }
        }

        if agent_name == roles::PLANNER {
            trace
                .with_flags(|flags| {
                    if tool_name == "find_relevant_skill" {
                        flags.planner_find_called = true;
                    }
                    if tool_name == "load_instruction" || tool_name == "load_instructions" {
                        flags.planner_load_called = true;
                    }
                })
                .await;
        }

        None
    }

    async fn check_transfer(
        &self,
        trace: &TraceContext,
        agent_name: &str,
        destination: &str,
    ) -> Option<Value> {
        if destination == roles::MEMORY && agent_name != roles::COORDINATOR {
            return Some(blocked_with_agent(
                "memory_transfer_allowed_only_from_orchestrator",
                roles::COORDINATOR,
            ));
        }

        if agent_name == roles::MEMORY && destination != roles::COORDINATOR {
            return Some(blocked_with_agent(
                "memory_subagent_must_return_to_orchestrator",
                roles::COORDINATOR,
            ));
        }

        if destination == roles::COMMUNICATOR && agent_name != roles::COORDINATOR {
            return Some(blocked_with_agent(
                "communicator_transfer_allowed_only_from_orchestrator",
                roles::COORDINATOR,
            ));
        }

        if destination == roles::MEMORY && !trace.allow_memory {
            return Some(blocked("memory_usage_disabled_by_user"));
        }

        if destination == roles::MEMORY {
            trace
                .with_flags(|flags| flags.memory_precheck_seen = true)
                .await;
        }

        let flags = trace.flags().await;
        if (destination == roles::PLANNER || destination == roles::EXECUTOR)
            && trace.require_memory_precheck
            && !flags.memory_precheck_seen
        {
            return Some(blocked_with_agent(
                "memory_precheck_required_before_execution",
                roles::MEMORY,
            ));
        }

        if destination == roles::PLANNER {
            trace
                .with_flags(|flags| {
                    flags.planner_transfer_seen = true;
                    flags.planner_find_called = false;
                    flags.planner_load_called = false;
                    flags.planner_no_skills_found = false;
                })
                .await;
        }

        let flags = trace.flags().await;
        if destination == roles::EXECUTOR
            && trace.require_planner_first
            && !flags.planner_transfer_seen
        {
            return Some(blocked_with_agent(
                "planner_required_before_executor_first_turn",
                roles::PLANNER,
            ));
        }

        if destination == roles::EXECUTOR && flags.planner_transfer_seen {
            if !flags.planner_find_called {
                warn!(
                    planner_expected_tools = ?trace.planner_expected_tools,
                    planner_available_tools = ?flags.planner_available_tools,
                    "transfer_blocked_planner_find_missing"
                );
                return Some(blocked_with_tool(
                    "planner_must_discover_skills_before_executor",
                    "find_relevant_skill",
                ));
            }
            if !flags.planner_load_called && !flags.planner_no_skills_found {
                warn!(
                    planner_expected_tools = ?trace.planner_expected_tools,
                    planner_available_tools = ?flags.planner_available_tools,
                    "transfer_blocked_planner_load_missing"
                );
                return Some(blocked_with_tool(
                    "planner_must_load_skills_before_executor",
                    "load_instruction_or_load_instructions",
                ));
            }
        }

        None
    }

    /// Record tool completion, update no-skills evidence, and enrich
    /// object results with the tool name. Non-object results pass through.
    pub async fn after_tool(
        &self,
        trace: &TraceContext,
        agent_name: &str,
        tool_name: &str,
        result: Value,
    ) -> Value {
        let preview = truncate(&result.to_string(), 1_000);
        info!(tool_name, agent = agent_name, result_preview = %preview, "tool_call_end");

        if agent_name == roles::PLANNER && tool_name == "find_relevant_skill" {
            let no_skills = result_indicates_no_skills(&result);
            trace
                .with_flags(|flags| flags.planner_no_skills_found = no_skills)
                .await;
        }

        match result {
            Value::Object(mut map) => {
                map.insert("tool_name".to_owned(), Value::String(tool_name.to_owned()));
                Value::Object(map)
            }
            other => other,
        }
    }

    /// Normalize an uncaught tool error into the consistent failure shape.
    pub fn normalize_tool_error(tool_name: &str, reason: &str) -> Value {
        tracing::error!(tool_name, error = reason, "tool_call_error");
        json!({
            "status": "failed",
            "tool_name": tool_name,
            "reason": reason,
        })
    }

    /// Mirror a model prompt to the trace, and record planner tool
    /// availability for later block diagnostics.
    pub async fn record_prompt(
        &self,
        trace: &TraceContext,
        agent_name: &str,
        model: &str,
        system_instruction: &str,
        content_texts: &[String],
        tool_names: &[String],
        task_id: Option<&str>,
    ) {
        if agent_name == roles::PLANNER {
            let names = tool_names.to_vec();
            trace
                .with_flags(|flags| flags.planner_available_tools = Some(names))
                .await;

            let has_find = tool_names.iter().any(|n| n == "find_relevant_skill");
            let has_load = tool_names
                .iter()
                .any(|n| n == "load_instruction" || n == "load_instructions");
            let expected = &trace.planner_expected_tools;
            let expected_find = expected.iter().any(|n| n == "find_relevant_skill");
            let expected_load = expected
                .iter()
                .any(|n| n == "load_instruction" || n == "load_instructions");

            info!(
                agent = agent_name,
                planner_expected_tools = ?expected,
                planner_available_tools = ?tool_names,
                has_find_relevant_skill = has_find,
                has_load_instruction = has_load,
                "planner_tool_availability"
            );
            if expected_load && !has_load {
                warn!(
                    agent = agent_name,
                    reason = "planner_tool_filter_mismatch_or_server_tool_absent",
                    "planner_load_tool_missing"
                );
            }
            if expected_find && !has_find {
                warn!(agent = agent_name, "planner_find_tool_missing");
            }
        }

        let last_preview = content_texts
            .last()
            .map(|t| truncate(t, PROMPT_TEXT_LIMIT))
            .unwrap_or_default();
        info!(
            agent = agent_name,
            model,
            content_count = content_texts.len(),
            last_content_preview = %last_preview,
            available_tools = ?tool_names,
            "llm_prompt"
        );

        let payload = json!({
            "agent": agent_name,
            "model": model,
            "system_instruction": truncate(system_instruction, TRACE_TEXT_LIMIT),
            "content_texts": content_texts
                .iter()
                .map(|t| Value::String(truncate(t, TRACE_TEXT_LIMIT)))
                .collect::<Vec<Value>>(),
            "content_count": content_texts.len(),
            "available_tools": tool_names,
        });
        self.append_trace_event(trace, event_types::ADK_PROMPT, task_id, payload)
            .await;
    }

    /// Mirror a model response to the trace.
    pub async fn record_llm_response(
        &self,
        trace: &TraceContext,
        agent_name: &str,
        response: &LlmResponse,
        task_id: Option<&str>,
    ) {
        let function_calls: Vec<Value> = response
            .function_call
            .iter()
            .map(|call| json!({"name": call.name, "args": Value::Object(call.args.clone())}))
            .collect();
        let text_preview = response
            .texts
            .first()
            .map(|t| truncate(t, PROMPT_TEXT_LIMIT))
            .unwrap_or_default();
        info!(
            agent = agent_name,
            model_version = response.model_version.as_deref().unwrap_or(""),
            text_preview = %text_preview,
            finish_reason = response.finish_reason.as_deref().unwrap_or(""),
            "llm_response"
        );

        let payload = json!({
            "agent": agent_name,
            "model_version": response.model_version,
            "text_parts": response
                .texts
                .iter()
                .map(|t| Value::String(truncate(t, TRACE_TEXT_LIMIT)))
                .collect::<Vec<Value>>(),
            "function_calls": function_calls,
            "finish_reason": response.finish_reason,
        });
        self.append_trace_event(trace, event_types::ADK_LLM_RESPONSE, task_id, payload)
            .await;
    }

    async fn append_trace_event(
        &self,
        trace: &TraceContext,
        event_type: &str,
        task_id: Option<&str>,
        payload: Value,
    ) {
        let Some(event_repo) = &trace.event_repo else {
            return;
        };
        let payload_map = payload.as_object().cloned().unwrap_or_default();
        let event = EventRecord::new(
            event_type,
            &trace.tenant_id,
            &trace.session_id,
            Some(&trace.plan_id),
            task_id,
            payload_map,
        );
        if let Err(error) = event_repo.append(event).await {
            warn!(%error, event_type, "trace_append_failed");
        }
    }
}

/// Whether a discovery result signals that no skills were found.
///
/// The planner may legitimately skip the load step in that case. The
/// spaced `"key": []` marker form requires pretty serialization here.
pub fn result_indicates_no_skills(result: &Value) -> bool {
    let serialized = serde_json::to_string_pretty(result)
        .unwrap_or_else(|_| result.to_string())
        .to_lowercase();
    NO_SKILL_MARKERS
        .iter()
        .any(|marker| serialized.contains(marker))
}
