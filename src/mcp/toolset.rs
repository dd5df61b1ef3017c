//! Filtered MCP toolsets for the planner and executor.
//!
//! A toolset owns one lazily established connection and a name filter: the
//! planner sees only its discovery tools, the executor sees only the
//! skills the planner selected for the current step. An empty filter
//! exposes nothing.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::mcp::client::{McpConnection, McpToolDef};
use crate::mcp::config::ResolvedMcpEndpoint;
use crate::mcp::McpError;

/// One endpoint with a tool-name filter.
pub struct McpToolset {
    endpoint: ResolvedMcpEndpoint,
    filter: Vec<String>,
    timeout: Duration,
    connection: Mutex<Option<McpConnection>>,
}

impl std::fmt::Debug for McpToolset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpToolset")
            .field("endpoint", &self.endpoint.name)
            .field("filter", &self.filter)
            .finish()
    }
}

impl McpToolset {
    /// Toolset exposing the endpoint's planner discovery tools.
    pub fn planner(endpoint: ResolvedMcpEndpoint, timeout: Duration) -> Self {
        let filter = endpoint.planner_tools.clone();
        Self {
            endpoint,
            filter,
            timeout,
            connection: Mutex::new(None),
        }
    }

    /// Toolset exposing only the allowed executor skills.
    pub fn executor(
        endpoint: ResolvedMcpEndpoint,
        allowed_skills: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            filter: allowed_skills,
            timeout,
            connection: Mutex::new(None),
        }
    }

    /// Endpoint name.
    pub fn endpoint_name(&self) -> &str {
        &self.endpoint.name
    }

    /// Whether the filter admits `name`.
    pub fn admits(&self, name: &str) -> bool {
        self.filter.iter().any(|allowed| allowed == name)
    }

    /// Discover the endpoint's tools, filtered.
    ///
    /// Connection failures resolve to an empty list with a warning so a
    /// dead endpoint degrades planning instead of failing the request.
    pub async fn tools(&self) -> Vec<McpToolDef> {
        if self.filter.is_empty() {
            return Vec::new();
        }
        match self.list_remote_tools().await {
            Ok(tools) => tools
                .into_iter()
                .filter(|tool| self.admits(&tool.name))
                .collect(),
            Err(error) => {
                warn!(
                    endpoint = %self.endpoint.name,
                    %error,
                    "mcp toolset discovery failed"
                );
                Vec::new()
            }
        }
    }

    async fn list_remote_tools(&self) -> Result<Vec<McpToolDef>, McpError> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(McpConnection::connect(&self.endpoint, self.timeout).await?);
        }
        match guard.as_mut() {
            Some(connection) => connection.list_tools().await,
            None => Ok(Vec::new()),
        }
    }

    /// Invoke a filtered tool.
    ///
    /// # Errors
    ///
    /// [`McpError::Protocol`] when the filter does not admit the name, or
    /// any transport error from the call.
    pub async fn call(&self, name: &str, args: Value) -> Result<Value, McpError> {
        if !self.admits(name) {
            return Err(McpError::Protocol(format!(
                "tool '{name}' not admitted by filter"
            )));
        }
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(McpConnection::connect(&self.endpoint, self.timeout).await?);
        }
        match guard.as_mut() {
            Some(connection) => connection.call_tool(name, args).await,
            None => Err(McpError::Protocol("connection unavailable".to_owned())),
        }
    }
}

/// Build the planner toolset when an endpoint resolved.
pub fn build_planner_toolset(
    endpoint: Option<ResolvedMcpEndpoint>,
    timeout: Duration,
) -> Option<McpToolset> {
    endpoint.map(|endpoint| McpToolset::planner(endpoint, timeout))
}

/// Build executor toolsets across all endpoints, filtered to the skills
/// the planner selected.
pub fn build_executor_toolsets(
    endpoints: Vec<ResolvedMcpEndpoint>,
    allowed_skills: &[String],
    timeout: Duration,
) -> Vec<McpToolset> {
    endpoints
        .into_iter()
        .map(|endpoint| McpToolset::executor(endpoint, allowed_skills.to_vec(), timeout))
        .collect()
}
