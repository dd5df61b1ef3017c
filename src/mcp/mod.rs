//! MCP integration: config resolution, transport clients, and filtered
//! toolsets for the planner and executor.

pub mod client;
pub mod config;
pub mod toolset;

use thiserror::Error;

/// MCP resolution and transport errors.
#[derive(Debug, Error)]
pub enum McpError {
    /// Endpoint has neither a literal `url` nor a resolvable `url_env`.
    #[error("mcp_endpoint_url_missing")]
    EndpointUrlMissing,

    /// Stdio endpoint missing its `command`.
    #[error("mcp_stdio_command_missing")]
    StdioCommandMissing,

    /// Unknown transport name.
    #[error("mcp_transport_not_supported")]
    TransportNotSupported,

    /// The configured planner endpoint name is absent from the config.
    #[error("mcp_endpoint_not_found")]
    EndpointNotFound,

    /// Config file unreadable or malformed.
    #[error("mcp config error: {0}")]
    Config(String),

    /// I/O failure talking to a stdio server.
    #[error("MCP I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("MCP JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport failure.
    #[error("MCP HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned a JSON-RPC error.
    #[error("MCP server error {code}: {message}")]
    ServerError {
        /// JSON-RPC error code.
        code: i64,
        /// Server-provided message.
        message: String,
    },

    /// Unexpected response shape.
    #[error("MCP protocol error: {0}")]
    Protocol(String),

    /// Session establishment exceeded the configured timeout.
    #[error("MCP session timeout")]
    Timeout,
}
