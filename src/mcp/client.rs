//! MCP JSON-RPC 2.0 clients: stdio child process and HTTP transports.
//!
//! Stdio speaks newline-delimited JSON over the child's pipes with the
//! `initialize` / `notifications/initialized` handshake, then
//! `tools/list` and `tools/call`. The HTTP client posts each JSON-RPC
//! message to the endpoint URL and accepts either a JSON body or an
//! SSE-framed body (`data:` lines).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::mcp::config::{McpTransport, ResolvedMcpEndpoint};
use crate::mcp::McpError;

/// Protocol revision sent in the handshake.
const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// A tool discovered via `tools/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolDef {
    /// Tool name as reported by the server.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// JSON Schema of the input arguments.
    #[serde(default = "empty_object", rename = "inputSchema")]
    pub input_schema: Value,
}

fn empty_object() -> Value {
    json!({})
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// One live MCP session over either transport.
pub enum McpConnection {
    /// Child process over stdin/stdout.
    Stdio(StdioConnection),
    /// HTTP (streamable or SSE-framed).
    Http(HttpConnection),
}

impl McpConnection {
    /// Establish a session, honoring `timeout` for the handshake.
    pub async fn connect(
        endpoint: &ResolvedMcpEndpoint,
        timeout: Duration,
    ) -> Result<Self, McpError> {
        match endpoint.transport {
            McpTransport::Stdio => {
                let command = endpoint
                    .command
                    .clone()
                    .ok_or(McpError::StdioCommandMissing)?;
                let connect = StdioConnection::spawn(&command, &endpoint.args, &endpoint.stdio_env);
                let mut connection = tokio::time::timeout(timeout, connect)
                    .await
                    .map_err(|_| McpError::Timeout)??;
                tokio::time::timeout(timeout, connection.initialize())
                    .await
                    .map_err(|_| McpError::Timeout)??;
                Ok(Self::Stdio(connection))
            }
            McpTransport::StreamableHttp | McpTransport::Sse => {
                let url = endpoint.url.clone().ok_or(McpError::EndpointUrlMissing)?;
                let mut connection = HttpConnection::new(&url, &endpoint.headers);
                tokio::time::timeout(timeout, connection.initialize())
                    .await
                    .map_err(|_| McpError::Timeout)??;
                Ok(Self::Http(connection))
            }
        }
    }

    /// Discover the server's tools.
    pub async fn list_tools(&mut self) -> Result<Vec<McpToolDef>, McpError> {
        let result = match self {
            Self::Stdio(c) => c.request("tools/list", None).await?,
            Self::Http(c) => c.request("tools/list", None).await?,
        };
        let tools = result
            .get("tools")
            .cloned()
            .ok_or_else(|| McpError::Protocol("tools/list missing 'tools'".to_owned()))?;
        Ok(serde_json::from_value(tools)?)
    }

    /// Invoke a tool and normalize its result content.
    pub async fn call_tool(&mut self, name: &str, args: Value) -> Result<Value, McpError> {
        let params = json!({"name": name, "arguments": args});
        let result = match self {
            Self::Stdio(c) => c.request("tools/call", Some(params)).await?,
            Self::Http(c) => c.request("tools/call", Some(params)).await?,
        };
        Ok(normalize_call_result(result))
    }
}

/// Fold an MCP `tools/call` result into a plain JSON value.
///
/// Prefers `structuredContent`; otherwise joins text content blocks and
/// re-parses them as JSON when possible. Server-side errors become
/// `{status: "failed", reason}` so they flow through tool-result handling
/// instead of raising.
fn normalize_call_result(result: Value) -> Value {
    if let Some(structured) = result.get("structuredContent") {
        return structured.clone();
    }

    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let joined = result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<&str>>()
                .join("\n")
        })
        .unwrap_or_default();

    if is_error {
        return json!({"status": "failed", "reason": joined});
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(&joined) {
        if parsed.is_object() || parsed.is_array() {
            return parsed;
        }
    }
    json!({"content": joined})
}

// ── Stdio transport ─────────────────────────────────────────────

/// JSON-RPC over a child process's pipes, one JSON object per line.
pub struct StdioConnection {
    _child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: AtomicU64,
}

impl StdioConnection {
    async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Protocol("child stdin unavailable".to_owned()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Protocol("child stdout unavailable".to_owned()))?;
        Ok(Self {
            _child: child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: AtomicU64::new(1),
        })
    }

    async fn initialize(&mut self) -> Result<(), McpError> {
        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": "armitage", "version": env!("CARGO_PKG_VERSION")},
        });
        self.request("initialize", Some(params)).await?;
        self.send_notification("notifications/initialized").await?;
        Ok(())
    }

    async fn send_notification(&mut self, method: &str) -> Result<(), McpError> {
        let message = json!({"jsonrpc": "2.0", "method": method});
        self.write_line(&message.to_string()).await
    }

    async fn write_line(&mut self, line: &str) -> Result<(), McpError> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Send one request and read lines until its response arrives.
    /// Server-initiated notifications in between are skipped.
    pub async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut message = json!({"jsonrpc": "2.0", "id": id, "method": method});
        if let Some(params) = params {
            message["params"] = params;
        }
        self.write_line(&message.to_string()).await?;

        loop {
            let mut line = String::new();
            let read = self.reader.read_line(&mut line).await?;
            if read == 0 {
                return Err(McpError::Protocol("server closed stdout".to_owned()));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(response) = serde_json::from_str::<JsonRpcResponse>(trimmed) else {
                continue;
            };
            if response.id.is_none() {
                // Notification; keep reading.
                continue;
            }
            if let Some(error) = response.error {
                return Err(McpError::ServerError {
                    code: error.code,
                    message: error.message,
                });
            }
            return response
                .result
                .ok_or_else(|| McpError::Protocol("response missing result".to_owned()));
        }
    }
}

// ── HTTP transport ──────────────────────────────────────────────

/// JSON-RPC over HTTP POST; responses may be plain JSON or SSE-framed.
pub struct HttpConnection {
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpConnection {
    fn new(url: &str, headers: &HashMap<String, String>) -> Self {
        Self {
            url: url.to_owned(),
            headers: headers.clone(),
            client: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn initialize(&mut self) -> Result<(), McpError> {
        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": "armitage", "version": env!("CARGO_PKG_VERSION")},
        });
        self.request("initialize", Some(params)).await?;
        self.post_raw(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await?;
        Ok(())
    }

    async fn post_raw(&self, body: Value) -> Result<reqwest::Response, McpError> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Accept", "application/json, text/event-stream")
            .json(&body);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        Ok(request.send().await?)
    }

    /// Send one request and parse the (possibly SSE-framed) response.
    pub async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut message = json!({"jsonrpc": "2.0", "id": id, "method": method});
        if let Some(params) = params {
            message["params"] = params;
        }

        let response = self.post_raw(message).await?;
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();
        let body = response.text().await?;

        let payload = if content_type.contains("text/event-stream") {
            body.lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(str::trim)
                .filter(|data| !data.is_empty())
                .last()
                .map(str::to_owned)
                .ok_or_else(|| McpError::Protocol("empty event stream".to_owned()))?
        } else {
            body
        };

        let parsed: JsonRpcResponse = serde_json::from_str(&payload)?;
        if let Some(error) = parsed.error {
            return Err(McpError::ServerError {
                code: error.code,
                message: error.message,
            });
        }
        parsed
            .result
            .ok_or_else(|| McpError::Protocol("response missing result".to_owned()))
    }
}
