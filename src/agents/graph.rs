//! Coordinator agent graph and its event-streaming runner.
//!
//! The graph is one coordinator plus four specialists. The runner drives
//! whichever agent currently holds control: prompt the model, surface its
//! text or single tool call as events, route tool calls through the
//! policy engine (which may replace them with a structured block), and
//! follow permitted `transfer_to_agent` calls. A text-only coordinator
//! response ends the run as the final response.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::agents::llm::{
    Content, ContentPart, FunctionCall, FunctionResponse, LlmClient, LlmRequest, ToolDecl,
};
use crate::agents::{prompts, roles, AgentError};
use crate::config::AgentModels;
use crate::kernel::context::{ToolRuntimeContext, TraceContext};
use crate::kernel::policy::PolicyEngine;
use crate::mcp::toolset::McpToolset;
use crate::tools;
use crate::types::JsonMap;

/// Default ceiling on model turns per request.
pub const DEFAULT_MAX_TURNS: usize = 32;

/// One agent role in the graph.
#[derive(Debug, Clone)]
pub struct AgentNode {
    /// Role name (also the transfer destination).
    pub name: String,
    /// Short description used in transfer tool docs.
    pub description: String,
    /// System instruction.
    pub instruction: String,
    /// Model identifier.
    pub model: String,
}

/// The coordinator and its specialists.
#[derive(Debug, Clone)]
pub struct AgentGraph {
    /// Orchestrator manager.
    pub coordinator: AgentNode,
    /// Planning specialist.
    pub planner: AgentNode,
    /// Execution worker.
    pub executor: AgentNode,
    /// Memory specialist.
    pub memory: AgentNode,
    /// Communication specialist.
    pub communicator: AgentNode,
}

impl AgentGraph {
    /// Look up a node by role name.
    pub fn node(&self, name: &str) -> Option<&AgentNode> {
        [
            &self.coordinator,
            &self.planner,
            &self.executor,
            &self.memory,
            &self.communicator,
        ]
        .into_iter()
        .find(|node| node.name == name)
    }

    /// Specialist names reachable from the coordinator.
    pub fn specialist_names(&self) -> Vec<&str> {
        vec![
            self.memory.name.as_str(),
            self.planner.name.as_str(),
            self.executor.name.as_str(),
            self.communicator.name.as_str(),
        ]
    }
}

/// Build the graph with per-role models.
pub fn build_agent_graph(models: &AgentModels) -> AgentGraph {
    AgentGraph {
        coordinator: AgentNode {
            name: roles::COORDINATOR.to_owned(),
            description: "Coordinator owning delegation and the final response".to_owned(),
            instruction: prompts::COORDINATOR_INSTRUCTION.to_owned(),
            model: models.coordinator.clone(),
        },
        planner: AgentNode {
            name: roles::PLANNER.to_owned(),
            description: "Planning specialist with skill discovery tools".to_owned(),
            instruction: prompts::PLANNER_INSTRUCTION.to_owned(),
            model: models.planner.clone(),
        },
        executor: AgentNode {
            name: roles::EXECUTOR.to_owned(),
            description: "Execution worker with step-scoped skills".to_owned(),
            instruction: prompts::EXECUTOR_INSTRUCTION.to_owned(),
            model: models.executor.clone(),
        },
        memory: AgentNode {
            name: roles::MEMORY.to_owned(),
            description: "Memory intelligence specialist".to_owned(),
            instruction: prompts::MEMORY_INSTRUCTION.to_owned(),
            model: models.memory.clone(),
        },
        communicator: AgentNode {
            name: roles::COMMUNICATOR.to_owned(),
            description: "Outbound communication specialist".to_owned(),
            instruction: prompts::COMMUNICATOR_INSTRUCTION.to_owned(),
            model: models.communicator.clone(),
        },
    }
}

/// One streamed graph event.
#[derive(Debug, Clone)]
pub struct AgentEvent {
    /// Event identifier.
    pub id: String,
    /// Request-level invocation identifier.
    pub invocation_id: String,
    /// Emitting agent.
    pub author: String,
    /// Whether this is the final user-facing response.
    pub is_final_response: bool,
    /// Text parts joined with newlines (may be empty).
    pub text: String,
    /// Tool calls issued in this event.
    pub function_calls: Vec<FunctionCall>,
    /// Tool results carried in this event.
    pub function_responses: Vec<FunctionResponse>,
}

impl AgentEvent {
    fn new(invocation_id: &str, author: &str) -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("evt_{}", &hex[..8]),
            invocation_id: invocation_id.to_owned(),
            author: author.to_owned(),
            is_final_response: false,
            text: String::new(),
            function_calls: Vec::new(),
            function_responses: Vec::new(),
        }
    }
}

/// Drives the graph for one request.
pub struct GraphRunner {
    /// The agent graph.
    pub graph: AgentGraph,
    /// Model capability.
    pub llm: Arc<dyn LlmClient>,
    /// Policy/trace engine.
    pub policy: PolicyEngine,
    /// Planner discovery toolset, when resolved.
    pub planner_toolset: Option<Arc<McpToolset>>,
    /// Executor toolsets filtered to the selected skills.
    pub executor_toolsets: Vec<Arc<McpToolset>>,
    /// Turn ceiling.
    pub max_turns: usize,
}

impl GraphRunner {
    /// Run the graph to completion, streaming events into `sink`.
    pub async fn run(
        &self,
        trace: &TraceContext,
        tool_ctx: &ToolRuntimeContext,
        message: &str,
        sink: &mpsc::Sender<AgentEvent>,
    ) -> Result<(), AgentError> {
        let invocation_id = {
            let hex = Uuid::new_v4().simple().to_string();
            format!("inv_{}", &hex[..12])
        };
        let mut conversation = vec![Content::user_text(message)];
        let mut current = self.graph.coordinator.name.clone();

        for _turn in 0..self.max_turns {
            let Some(node) = self.graph.node(&current).cloned() else {
                break;
            };
            let decls = self.tool_decls_for(&node).await;
            let tool_names: Vec<String> = decls.iter().map(|d| d.name.clone()).collect();

            let content_texts: Vec<String> = conversation
                .iter()
                .map(Content::joined_text)
                .filter(|t| !t.is_empty())
                .collect();
            self.policy
                .record_prompt(
                    trace,
                    &node.name,
                    &node.model,
                    &node.instruction,
                    &content_texts,
                    &tool_names,
                    Some(&invocation_id),
                )
                .await;

            let response = self
                .llm
                .generate(LlmRequest {
                    model: node.model.clone(),
                    system_instruction: node.instruction.clone(),
                    contents: conversation.clone(),
                    tools: decls,
                })
                .await?;
            self.policy
                .record_llm_response(trace, &node.name, &response, Some(&invocation_id))
                .await;

            let Some(call) = response.function_call.clone() else {
                // Text-only turn: final for the coordinator, a report back
                // to the coordinator for a specialist.
                let text = response.texts.join("\n");
                let mut event = AgentEvent::new(&invocation_id, &node.name);
                event.text = text.clone();
                if node.name == self.graph.coordinator.name {
                    event.is_final_response = true;
                    let _ = sink.send(event).await;
                    return Ok(());
                }
                let _ = sink.send(event).await;
                conversation.push(Content::model_text(&format!("[{}] {text}", node.name)));
                current = self.graph.coordinator.name.clone();
                continue;
            };

            let mut call_event = AgentEvent::new(&invocation_id, &node.name);
            call_event.text = response.texts.join("\n");
            call_event.function_calls = vec![call.clone()];
            let _ = sink.send(call_event).await;
            conversation.push(Content {
                role: "model".to_owned(),
                parts: vec![ContentPart::FunctionCall(call.clone())],
            });

            let veto = self
                .policy
                .before_tool(trace, &node.name, &call.name, &call.args)
                .await;
            let raw_result = match veto {
                Some(block) => block,
                None => {
                    if call.name == "transfer_to_agent" {
                        self.perform_transfer(&mut current, &call.args)
                    } else {
                        self.dispatch_tool(&node, &call.name, &call.args, tool_ctx)
                            .await
                    }
                }
            };
            let wrapped = self
                .policy
                .after_tool(trace, &node.name, &call.name, raw_result)
                .await;

            let function_response = FunctionResponse {
                name: call.name.clone(),
                response: wrapped,
            };
            let mut response_event = AgentEvent::new(&invocation_id, &node.name);
            response_event.function_responses = vec![function_response.clone()];
            let _ = sink.send(response_event).await;
            conversation.push(Content {
                role: "tool".to_owned(),
                parts: vec![ContentPart::FunctionResponse(function_response)],
            });
        }

        // Turn budget exhausted without a final coordinator response; the
        // runtime's response selection handles this shape.
        Ok(())
    }

    fn perform_transfer(&self, current: &mut String, args: &JsonMap) -> Value {
        let Some(destination) = args.get("agent_name").and_then(Value::as_str) else {
            return json!({"status": "failed", "reason": "missing_agent_name"});
        };
        if self.graph.node(destination).is_none() {
            return json!({"status": "failed", "reason": "unknown_agent", "agent_name": destination});
        }
        *current = destination.to_owned();
        json!({"status": "ok", "transferred_to": destination})
    }

    async fn dispatch_tool(
        &self,
        node: &AgentNode,
        tool_name: &str,
        args: &JsonMap,
        tool_ctx: &ToolRuntimeContext,
    ) -> Value {
        if let Some(result) = tools::dispatch_builtin(tool_name, args, tool_ctx).await {
            return result;
        }

        let toolsets: Vec<&Arc<McpToolset>> = if node.name == self.graph.planner.name {
            self.planner_toolset.iter().collect()
        } else if node.name == self.graph.executor.name {
            self.executor_toolsets.iter().collect()
        } else {
            Vec::new()
        };

        for toolset in toolsets {
            if !toolset.admits(tool_name) {
                continue;
            }
            return match toolset.call(tool_name, Value::Object(args.clone())).await {
                Ok(result) => result,
                Err(error) => PolicyEngine::normalize_tool_error(tool_name, &error.to_string()),
            };
        }

        PolicyEngine::normalize_tool_error(tool_name, "unknown_tool")
    }

    async fn tool_decls_for(&self, node: &AgentNode) -> Vec<ToolDecl> {
        let mut decls = Vec::new();

        if node.name == self.graph.coordinator.name {
            decls.push(transfer_decl(&self.graph.specialist_names()));
        } else {
            decls.push(transfer_decl(&[self.graph.coordinator.name.as_str()]));
        }

        if node.name == self.graph.memory.name {
            decls.extend(tools::memory_tool_decls());
        } else if node.name == self.graph.communicator.name {
            decls.extend(tools::communication_tool_decls());
        } else if node.name == self.graph.planner.name {
            if let Some(toolset) = &self.planner_toolset {
                for tool in toolset.tools().await {
                    decls.push(ToolDecl::new(
                        &tool.name,
                        tool.description.as_deref().unwrap_or(""),
                        tool.input_schema,
                    ));
                }
            }
        } else if node.name == self.graph.executor.name {
            decls.extend(tools::large_response_tool_decls());
            for toolset in &self.executor_toolsets {
                for tool in toolset.tools().await {
                    decls.push(ToolDecl::new(
                        &tool.name,
                        tool.description.as_deref().unwrap_or(""),
                        tool.input_schema,
                    ));
                }
            }
        }

        decls
    }
}

fn transfer_decl(destinations: &[&str]) -> ToolDecl {
    ToolDecl::new(
        "transfer_to_agent",
        "Hand control to another agent in the graph.",
        json!({
            "type": "object",
            "properties": {
                "agent_name": {"type": "string", "enum": destinations},
            },
            "required": ["agent_name"],
        }),
    )
}
