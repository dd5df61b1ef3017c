//! MCP endpoint configuration and resolution.
//!
//! `mcp_config.json` names the endpoints; resolution folds in request
//! headers (first) and env vars (second) for auth headers, and env vars
//! for URL indirection. With no config file at all, a default
//! `skill_service` endpoint is synthesized from
//! `AGENT_SKILL_SERVICE_URL` / `AGENT_SKILL_SERVICE_KEY` so local setups
//! run without a file.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::mcp::McpError;

/// Default planner tool filter.
pub const PLANNER_DISCOVERY_TOOLS: [&str; 2] = ["find_relevant_skill", "load_instructions"];

/// Default planner endpoint name.
const DEFAULT_PLANNER_ENDPOINT: &str = "skill_service";

/// Supported MCP transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpTransport {
    /// Streamable HTTP (default).
    StreamableHttp,
    /// Server-sent events.
    Sse,
    /// Local child process over stdin/stdout.
    Stdio,
}

impl McpTransport {
    /// Parse a transport name.
    ///
    /// # Errors
    ///
    /// [`McpError::TransportNotSupported`] on unknown names.
    pub fn parse(raw: Option<&str>) -> Result<Self, McpError> {
        match raw.map(|r| r.trim().to_lowercase()) {
            None => Ok(Self::StreamableHttp),
            Some(value) => match value.as_str() {
                "streamable_http" => Ok(Self::StreamableHttp),
                "sse" => Ok(Self::Sse),
                "stdio" => Ok(Self::Stdio),
                _ => Err(McpError::TransportNotSupported),
            },
        }
    }
}

/// One auth-header resolution rule.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthHeaderRule {
    /// Header name sent to the endpoint.
    pub name: String,
    /// Inbound request header to copy the value from (case-insensitive).
    #[serde(default)]
    pub request_header: Option<String>,
    /// Env var to fall back to.
    #[serde(default)]
    pub env: Option<String>,
}

/// One endpoint entry in `mcp_config.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct McpEndpointConfig {
    /// Endpoint name.
    #[serde(default)]
    pub name: Option<String>,
    /// Transport name (`streamable_http` default).
    #[serde(default)]
    pub transport: Option<String>,
    /// Literal URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Env var holding the URL.
    #[serde(default)]
    pub url_env: Option<String>,
    /// Stdio command.
    #[serde(default)]
    pub command: Option<String>,
    /// Stdio command arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra env for the stdio child.
    #[serde(default)]
    pub stdio_env: HashMap<String, String>,
    /// Planner tool filter override.
    #[serde(default)]
    pub planner_tool_filter: Option<Vec<String>>,
    /// Auth header rules.
    #[serde(default)]
    pub auth_headers: Vec<AuthHeaderRule>,
}

/// Parsed `mcp_config.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct McpConfig {
    /// Name of the endpoint serving planner discovery tools.
    #[serde(default)]
    pub planner_endpoint: Option<String>,
    /// All endpoints.
    #[serde(default)]
    pub endpoints: Vec<McpEndpointConfig>,
}

/// A fully resolved endpoint, ready to connect.
#[derive(Debug, Clone)]
pub struct ResolvedMcpEndpoint {
    /// Endpoint name.
    pub name: String,
    /// Transport.
    pub transport: McpTransport,
    /// URL for HTTP transports.
    pub url: Option<String>,
    /// Command for stdio.
    pub command: Option<String>,
    /// Stdio arguments.
    pub args: Vec<String>,
    /// Stdio child env.
    pub stdio_env: HashMap<String, String>,
    /// Planner tool filter.
    pub planner_tools: Vec<String>,
    /// Resolved auth headers.
    pub headers: HashMap<String, String>,
}

/// Load and parse the config file.
pub fn load_mcp_config(path: &Path) -> Result<McpConfig, McpError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| McpError::Config(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&raw).map_err(|e| McpError::Config(format!("{}: {e}", path.display())))
}

/// Lowercase inbound header names for case-insensitive matching.
pub fn normalize_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| (name.to_lowercase(), value.clone()))
        .collect()
}

/// Current process env plus explicit skill-service overrides.
pub fn build_runtime_env_overrides(
    skill_service_url: Option<&str>,
    skill_service_key: Option<&str>,
) -> HashMap<String, String> {
    let mut values: HashMap<String, String> = std::env::vars().collect();
    if let Some(url) = skill_service_url {
        values.insert("AGENT_SKILL_SERVICE_URL".to_owned(), url.to_owned());
    }
    if let Some(key) = skill_service_key {
        values.insert("AGENT_SKILL_SERVICE_KEY".to_owned(), key.to_owned());
    }
    values
}

/// The synthesized fallback endpoint for env-only setups.
pub fn default_skill_service_endpoint() -> McpEndpointConfig {
    McpEndpointConfig {
        name: Some(DEFAULT_PLANNER_ENDPOINT.to_owned()),
        url_env: Some("AGENT_SKILL_SERVICE_URL".to_owned()),
        planner_tool_filter: Some(
            PLANNER_DISCOVERY_TOOLS
                .iter()
                .map(|t| (*t).to_owned())
                .collect(),
        ),
        auth_headers: vec![AuthHeaderRule {
            name: "x-api-key".to_owned(),
            request_header: Some("x-skill-service-key".to_owned()),
            env: Some("AGENT_SKILL_SERVICE_KEY".to_owned()),
        }],
        ..McpEndpointConfig::default()
    }
}

/// Resolve one endpoint config against request headers and env values.
pub fn resolve_mcp_endpoint(
    endpoint_config: &McpEndpointConfig,
    request_headers: &HashMap<String, String>,
    env_values: &HashMap<String, String>,
) -> Result<ResolvedMcpEndpoint, McpError> {
    let transport = McpTransport::parse(endpoint_config.transport.as_deref())?;

    let mut url = None;
    let mut command = None;
    if transport == McpTransport::Stdio {
        command = endpoint_config
            .command
            .clone()
            .filter(|c| !c.is_empty());
        if command.is_none() {
            return Err(McpError::StdioCommandMissing);
        }
    } else {
        url = endpoint_config.url.clone().filter(|u| !u.is_empty());
        if url.is_none() {
            if let Some(url_env) = &endpoint_config.url_env {
                url = env_values.get(url_env).cloned().filter(|u| !u.is_empty());
            }
        }
        if url.is_none() {
            return Err(McpError::EndpointUrlMissing);
        }
    }

    let mut headers = HashMap::new();
    for rule in &endpoint_config.auth_headers {
        if rule.name.is_empty() {
            continue;
        }
        let mut value = rule
            .request_header
            .as_ref()
            .and_then(|header| request_headers.get(&header.to_lowercase()))
            .cloned();
        if value.is_none() {
            value = rule.env.as_ref().and_then(|env| env_values.get(env)).cloned();
        }
        if let Some(value) = value {
            headers.insert(rule.name.clone(), value);
        }
    }

    let planner_tools = match &endpoint_config.planner_tool_filter {
        Some(filter) if !filter.is_empty() => filter.clone(),
        _ => PLANNER_DISCOVERY_TOOLS
            .iter()
            .map(|t| (*t).to_owned())
            .collect(),
    };

    Ok(ResolvedMcpEndpoint {
        name: endpoint_config
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "unnamed".to_owned()),
        transport,
        url,
        command,
        args: endpoint_config.args.clone(),
        stdio_env: endpoint_config.stdio_env.clone(),
        planner_tools,
        headers,
    })
}

/// Select the planner endpoint config: the named entry from the config
/// file, or the env fallback when no file is configured.
///
/// Returns `Ok(None)` when neither source yields an endpoint.
pub fn select_planner_endpoint_config(
    config_path: Option<&Path>,
    env_values: &HashMap<String, String>,
) -> Result<Option<McpEndpointConfig>, McpError> {
    if let Some(path) = config_path {
        let config = load_mcp_config(path)?;
        let endpoint_name = config
            .planner_endpoint
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_PLANNER_ENDPOINT.to_owned());
        let endpoint = config
            .endpoints
            .iter()
            .find(|e| e.name.as_deref() == Some(endpoint_name.as_str()))
            .cloned();
        return endpoint.map(Some).ok_or(McpError::EndpointNotFound);
    }

    if env_values
        .get("AGENT_SKILL_SERVICE_URL")
        .filter(|u| !u.is_empty())
        .is_none()
    {
        return Ok(None);
    }
    Ok(Some(default_skill_service_endpoint()))
}

/// Load the full config, or synthesize the env-fallback config for the
/// executor path.
pub fn load_config_or_fallback(
    config_path: Option<&Path>,
    env_values: &HashMap<String, String>,
) -> Result<Option<McpConfig>, McpError> {
    if let Some(path) = config_path {
        return Ok(Some(load_mcp_config(path)?));
    }
    if env_values
        .get("AGENT_SKILL_SERVICE_URL")
        .filter(|u| !u.is_empty())
        .is_none()
    {
        return Ok(None);
    }
    let fallback = default_skill_service_endpoint();
    Ok(Some(McpConfig {
        planner_endpoint: fallback.name.clone(),
        endpoints: vec![fallback],
    }))
}

/// Resolve every endpoint in a config.
pub fn resolve_mcp_endpoints(
    config: &McpConfig,
    request_headers: &HashMap<String, String>,
    env_values: &HashMap<String, String>,
) -> Result<Vec<ResolvedMcpEndpoint>, McpError> {
    config
        .endpoints
        .iter()
        .map(|endpoint| resolve_mcp_endpoint(endpoint, request_headers, env_values))
        .collect()
}
