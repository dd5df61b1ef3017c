//! Endpoint resolution tests: transports, URL/env indirection, auth
//! headers, and planner endpoint selection.

use std::collections::HashMap;
use std::io::Write;

use serde_json::json;

use armitage::mcp::config::{
    load_config_or_fallback, load_mcp_config, normalize_headers, resolve_mcp_endpoint,
    resolve_mcp_endpoints, select_planner_endpoint_config, McpEndpointConfig, McpTransport,
};
use armitage::mcp::McpError;

fn endpoint_from_json(value: serde_json::Value) -> McpEndpointConfig {
    serde_json::from_value(value).expect("endpoint config parses")
}

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

fn config_file(contents: &serde_json::Value) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp config");
    file.write_all(contents.to_string().as_bytes())
        .expect("write config");
    file
}

#[test]
fn default_transport_is_streamable_http() {
    let endpoint = endpoint_from_json(json!({
        "name": "skills",
        "url": "https://skills.example.test/mcp",
    }));
    let resolved =
        resolve_mcp_endpoint(&endpoint, &HashMap::new(), &HashMap::new()).expect("resolves");
    assert_eq!(resolved.transport, McpTransport::StreamableHttp);
    assert_eq!(resolved.url.as_deref(), Some("https://skills.example.test/mcp"));
    assert_eq!(resolved.name, "skills");
}

#[test]
fn unknown_transports_are_rejected() {
    let endpoint = endpoint_from_json(json!({
        "name": "skills",
        "transport": "websocket",
        "url": "https://skills.example.test/mcp",
    }));
    let error =
        resolve_mcp_endpoint(&endpoint, &HashMap::new(), &HashMap::new()).expect_err("rejected");
    assert!(matches!(error, McpError::TransportNotSupported));
}

#[test]
fn url_falls_back_to_the_named_env_var() {
    let endpoint = endpoint_from_json(json!({
        "name": "skills",
        "url_env": "AGENT_SKILL_SERVICE_URL",
    }));

    let error = resolve_mcp_endpoint(&endpoint, &HashMap::new(), &HashMap::new())
        .expect_err("no url anywhere");
    assert!(matches!(error, McpError::EndpointUrlMissing));

    let resolved = resolve_mcp_endpoint(
        &endpoint,
        &HashMap::new(),
        &env(&[("AGENT_SKILL_SERVICE_URL", "https://env.example.test")]),
    )
    .expect("resolves via env");
    assert_eq!(resolved.url.as_deref(), Some("https://env.example.test"));
}

#[test]
fn stdio_requires_only_a_command() {
    let endpoint = endpoint_from_json(json!({
        "name": "local",
        "transport": "stdio",
        "command": "skill-server",
        "args": ["--port", "0"],
        "stdio_env": {"SKILL_MODE": "local"},
    }));
    let resolved =
        resolve_mcp_endpoint(&endpoint, &HashMap::new(), &HashMap::new()).expect("resolves");
    assert_eq!(resolved.transport, McpTransport::Stdio);
    assert_eq!(resolved.command.as_deref(), Some("skill-server"));
    assert_eq!(resolved.args, vec!["--port".to_owned(), "0".to_owned()]);
    assert_eq!(resolved.stdio_env.get("SKILL_MODE").map(String::as_str), Some("local"));

    let missing = endpoint_from_json(json!({"name": "local", "transport": "stdio"}));
    let error = resolve_mcp_endpoint(&missing, &HashMap::new(), &HashMap::new())
        .expect_err("command required");
    assert!(matches!(error, McpError::StdioCommandMissing));
}

#[test]
fn auth_headers_prefer_request_headers_over_env() {
    let endpoint = endpoint_from_json(json!({
        "name": "skills",
        "url": "https://skills.example.test/mcp",
        "auth_headers": [{
            "name": "x-api-key",
            "request_header": "X-Skill-Service-Key",
            "env": "AGENT_SKILL_SERVICE_KEY",
        }],
    }));

    // Request header wins, matched case-insensitively.
    let headers = normalize_headers(&env(&[("X-SKILL-SERVICE-KEY", "from-request")]));
    let resolved = resolve_mcp_endpoint(
        &endpoint,
        &headers,
        &env(&[("AGENT_SKILL_SERVICE_KEY", "from-env")]),
    )
    .expect("resolves");
    assert_eq!(
        resolved.headers.get("x-api-key").map(String::as_str),
        Some("from-request")
    );

    // Env fallback when the request header is absent.
    let resolved = resolve_mcp_endpoint(
        &endpoint,
        &HashMap::new(),
        &env(&[("AGENT_SKILL_SERVICE_KEY", "from-env")]),
    )
    .expect("resolves");
    assert_eq!(
        resolved.headers.get("x-api-key").map(String::as_str),
        Some("from-env")
    );

    // Neither source: the header is simply omitted.
    let resolved =
        resolve_mcp_endpoint(&endpoint, &HashMap::new(), &HashMap::new()).expect("resolves");
    assert!(resolved.headers.is_empty());
}

#[test]
fn planner_tool_filter_defaults_to_the_discovery_pair() {
    let bare = endpoint_from_json(json!({
        "name": "skills",
        "url": "https://skills.example.test/mcp",
    }));
    let resolved =
        resolve_mcp_endpoint(&bare, &HashMap::new(), &HashMap::new()).expect("resolves");
    assert_eq!(
        resolved.planner_tools,
        vec!["find_relevant_skill".to_owned(), "load_instructions".to_owned()]
    );

    let filtered = endpoint_from_json(json!({
        "name": "skills",
        "url": "https://skills.example.test/mcp",
        "planner_tool_filter": ["find_relevant_skill"],
    }));
    let resolved =
        resolve_mcp_endpoint(&filtered, &HashMap::new(), &HashMap::new()).expect("resolves");
    assert_eq!(resolved.planner_tools, vec!["find_relevant_skill".to_owned()]);
}

#[test]
fn planner_endpoint_is_selected_by_name_from_the_config() {
    let file = config_file(&json!({
        "planner_endpoint": "skills",
        "endpoints": [
            {"name": "aws_tools", "url": "https://aws.example.test/mcp"},
            {"name": "skills", "url": "https://skills.example.test/mcp"},
        ],
    }));

    let selected = select_planner_endpoint_config(Some(file.path()), &HashMap::new())
        .expect("selection succeeds")
        .expect("endpoint present");
    assert_eq!(selected.name.as_deref(), Some("skills"));

    let missing_file = config_file(&json!({
        "planner_endpoint": "absent",
        "endpoints": [{"name": "skills", "url": "https://skills.example.test/mcp"}],
    }));
    let error = select_planner_endpoint_config(Some(missing_file.path()), &HashMap::new())
        .expect_err("absent endpoint");
    assert!(matches!(error, McpError::EndpointNotFound));
}

#[test]
fn env_fallback_synthesizes_the_skill_service_endpoint() {
    // No config path and no env URL: nothing to resolve.
    let none = select_planner_endpoint_config(None, &HashMap::new()).expect("ok");
    assert!(none.is_none());

    let values = env(&[
        ("AGENT_SKILL_SERVICE_URL", "https://skills.example.test"),
        ("AGENT_SKILL_SERVICE_KEY", "secret"),
    ]);
    let fallback = select_planner_endpoint_config(None, &values)
        .expect("ok")
        .expect("fallback endpoint");
    assert_eq!(fallback.name.as_deref(), Some("skill_service"));

    let resolved = resolve_mcp_endpoint(&fallback, &HashMap::new(), &values).expect("resolves");
    assert_eq!(resolved.url.as_deref(), Some("https://skills.example.test"));
    assert_eq!(
        resolved.headers.get("x-api-key").map(String::as_str),
        Some("secret")
    );

    // The executor-path fallback config wraps the same endpoint.
    let config = load_config_or_fallback(None, &values)
        .expect("ok")
        .expect("fallback config");
    assert_eq!(config.planner_endpoint.as_deref(), Some("skill_service"));
    let resolved_all =
        resolve_mcp_endpoints(&config, &HashMap::new(), &values).expect("resolves");
    assert_eq!(resolved_all.len(), 1);
}

#[test]
fn malformed_config_files_error_cleanly() {
    let mut file = tempfile::NamedTempFile::new().expect("temp config");
    file.write_all(b"{ not json").expect("write");
    let error = load_mcp_config(file.path()).expect_err("malformed");
    assert!(matches!(error, McpError::Config(_)));
}
