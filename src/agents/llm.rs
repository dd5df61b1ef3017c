//! Opaque LLM capability: prompt + available tools in, text parts or a
//! single tool call out.
//!
//! The runtime never inspects model internals; everything it needs is in
//! [`LlmResponse`]. The HTTP implementation targets an OpenAI-compatible
//! `/v1/chat/completions` surface so local gateways work unchanged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::types::JsonMap;

/// A tool made available to the model for one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDecl {
    /// Tool name the model must use to call it.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

impl ToolDecl {
    /// Convenience constructor.
    pub fn new(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            name: name.to_owned(),
            description: description.to_owned(),
            parameters,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Tool name.
    pub name: String,
    /// Arguments object.
    pub args: JsonMap,
}

/// A tool result fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    /// Tool name.
    pub name: String,
    /// Structured result.
    pub response: Value,
}

/// One part of a conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContentPart {
    /// Plain text.
    Text(String),
    /// A model-issued tool call.
    FunctionCall(FunctionCall),
    /// A tool result.
    FunctionResponse(FunctionResponse),
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// `user`, `model`, or `tool`.
    pub role: String,
    /// Ordered parts.
    pub parts: Vec<ContentPart>,
}

impl Content {
    /// A plain user text turn.
    pub fn user_text(text: &str) -> Self {
        Self {
            role: "user".to_owned(),
            parts: vec![ContentPart::Text(text.to_owned())],
        }
    }

    /// A plain model text turn.
    pub fn model_text(text: &str) -> Self {
        Self {
            role: "model".to_owned(),
            parts: vec![ContentPart::Text(text.to_owned())],
        }
    }

    /// Concatenate the text parts of this turn with newlines.
    pub fn joined_text(&self) -> String {
        let texts: Vec<&str> = self
            .parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(t) if !t.is_empty() => Some(t.as_str()),
                _ => None,
            })
            .collect();
        texts.join("\n")
    }
}

/// One model invocation.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Model identifier.
    pub model: String,
    /// Role instruction prepended as the system turn.
    pub system_instruction: String,
    /// Conversation so far.
    pub contents: Vec<Content>,
    /// Tools available for this call.
    pub tools: Vec<ToolDecl>,
}

/// Model output: text parts, or exactly one tool call.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    /// Text parts (may accompany a tool call).
    pub texts: Vec<String>,
    /// Requested tool call, if any.
    pub function_call: Option<FunctionCall>,
    /// Serving model version, when reported.
    pub model_version: Option<String>,
    /// Finish reason, when reported.
    pub finish_reason: Option<String>,
}

impl LlmResponse {
    /// A text-only response.
    pub fn text(text: &str) -> Self {
        Self {
            texts: vec![text.to_owned()],
            ..Self::default()
        }
    }

    /// A tool-call response.
    pub fn call(name: &str, args: JsonMap) -> Self {
        Self {
            function_call: Some(FunctionCall {
                name: name.to_owned(),
                args,
            }),
            ..Self::default()
        }
    }
}

/// Errors from model invocation.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP transport failure.
    #[error("llm request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Response did not match the expected format.
    #[error("llm response parse error: {0}")]
    Parse(String),

    /// Provider returned a non-success status.
    #[error("llm provider error {status}: {body}")]
    Provider {
        /// HTTP status code.
        status: u16,
        /// Response body preview.
        body: String,
    },
}

/// The model capability.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one generation.
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;
}

// ── OpenAI-compatible HTTP client ───────────────────────────────

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct ChatHttpClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for ChatHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatHttpClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ChatHttpClient {
    /// Create a client for `base_url` (the `/v1` root).
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn build_messages(request: &LlmRequest) -> Vec<Value> {
        let mut messages = Vec::new();
        if !request.system_instruction.is_empty() {
            messages.push(json!({"role": "system", "content": request.system_instruction}));
        }
        for content in &request.contents {
            for part in &content.parts {
                match part {
                    ContentPart::Text(text) => {
                        let role = if content.role == "model" {
                            "assistant"
                        } else {
                            "user"
                        };
                        messages.push(json!({"role": role, "content": text}));
                    }
                    ContentPart::FunctionCall(call) => {
                        messages.push(json!({
                            "role": "assistant",
                            "content": Value::Null,
                            "tool_calls": [{
                                "id": call.name,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": Value::Object(call.args.clone()).to_string(),
                                },
                            }],
                        }));
                    }
                    ContentPart::FunctionResponse(resp) => {
                        messages.push(json!({
                            "role": "tool",
                            "tool_call_id": resp.name,
                            "content": resp.response.to_string(),
                        }));
                    }
                }
            }
        }
        messages
    }

    fn build_tools(tools: &[ToolDecl]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    },
                })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatToolCall {
    function: ChatFunction,
}

#[derive(Debug, Deserialize)]
struct ChatFunction {
    name: String,
    arguments: String,
}

#[async_trait]
impl LlmClient for ChatHttpClient {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut body = json!({
            "model": request.model,
            "messages": Self::build_messages(&request),
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(Self::build_tools(&request.tools));
        }

        let mut http_request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }
        let response = http_request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider {
                status: status.as_u16(),
                body: body_text.chars().take(500).collect(),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Parse("empty choices".to_owned()))?;

        let function_call = match choice.message.tool_calls.and_then(|mut c| {
            if c.is_empty() {
                None
            } else {
                Some(c.remove(0))
            }
        }) {
            Some(call) => {
                let args: Value = serde_json::from_str(&call.function.arguments)
                    .map_err(|e| LlmError::Parse(format!("bad tool arguments: {e}")))?;
                Some(FunctionCall {
                    name: call.function.name,
                    args: args.as_object().cloned().unwrap_or_default(),
                })
            }
            None => None,
        };

        let texts = choice
            .message
            .content
            .filter(|c| !c.is_empty())
            .map(|c| vec![c])
            .unwrap_or_default();

        Ok(LlmResponse {
            texts,
            function_call,
            model_version: parsed.model,
            finish_reason: choice.finish_reason,
        })
    }
}
