//! Runtime configuration: environment settings, per-role model overrides,
//! and communication (Slack/SMTP) config resolution.
//!
//! Env vars use the `AGENT_` prefix. JSON config files are tolerated when
//! missing or malformed (the runtime boots with defaults and logs the
//! problem), except where a tool explicitly requires configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

/// Default model used for every role without an override.
pub const DEFAULT_MODEL_NAME: &str = "models/gemini-flash-lite-latest";

/// Default MCP session establishment timeout, seconds.
pub const DEFAULT_MCP_SESSION_TIMEOUT_SECS: u64 = 60;

/// Which repository family backs the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process-local stores.
    InMemory,
    /// SQLite-backed indexed stores.
    Indexed,
}

impl StorageBackend {
    /// Parse from the `AGENT_STORAGE_BACKEND` value.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "indexed" | "opensearch" => Self::Indexed,
            _ => Self::InMemory,
        }
    }
}

/// Which engine serves `/agent/run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEngine {
    /// Model-driven coordinator graph (default).
    Graph,
    /// Deterministic plan pipeline.
    Pipeline,
}

impl RuntimeEngine {
    /// Parse from the `AGENT_RUNTIME_ENGINE` value.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "pipeline" => Self::Pipeline,
            _ => Self::Graph,
        }
    }
}

/// Process-wide settings resolved from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Application name used in session scoping and logs.
    pub app_name: String,
    /// Log level default when `RUST_LOG` is unset.
    pub log_level: String,
    /// HTTP listen address.
    pub listen_addr: String,
    /// Engine behind `/agent/run`.
    pub runtime_engine: RuntimeEngine,
    /// Repository family.
    pub storage_backend: StorageBackend,
    /// SQLite path for the indexed backend.
    pub indexed_db_path: String,
    /// Default model identifier.
    pub model_name: String,
    /// Plan size ceiling.
    pub max_plan_steps: usize,
    /// Replan budget.
    pub max_replans: u32,
    /// Skill-service URL fallback for MCP resolution.
    pub skill_service_url: Option<String>,
    /// Skill-service API key fallback for MCP resolution.
    pub skill_service_key: Option<String>,
    /// Path to `mcp_config.json`.
    pub mcp_config_path: Option<PathBuf>,
    /// MCP session establishment timeout, seconds.
    pub mcp_session_timeout_secs: u64,
    /// Path to `communication_config.json`.
    pub communication_config_path: Option<PathBuf>,
    /// Path to `agent_models.json`.
    pub agent_models_config_path: Option<PathBuf>,
    /// Embedding endpoint base URL (enables the indexed memory vectors).
    pub embedding_url: Option<String>,
    /// Embedding model name.
    pub embedding_model: String,
    /// Expected embedding dimensionality.
    pub embedding_dims: usize,
    /// Chat-completions base URL for the model-backed LLM client.
    pub llm_base_url: Option<String>,
    /// API key for the model-backed LLM client.
    pub llm_api_key: Option<String>,
    /// Event retention window, days.
    pub events_retention_days: i64,
    /// Directory for rotated JSON logs.
    pub logs_dir: PathBuf,
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env_string(name) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, "unparseable env var, using default");
            default
        }),
        None => default,
    }
}

impl Settings {
    /// Resolve settings from the environment (after `dotenvy` loading).
    pub fn from_env() -> Self {
        Self {
            app_name: env_string("AGENT_APP_NAME").unwrap_or_else(|| "armitage".to_owned()),
            log_level: env_string("AGENT_LOG_LEVEL").unwrap_or_else(|| "info".to_owned()),
            listen_addr: env_string("AGENT_LISTEN_ADDR")
                .unwrap_or_else(|| "127.0.0.1:8080".to_owned()),
            runtime_engine: RuntimeEngine::parse(
                &env_string("AGENT_RUNTIME_ENGINE").unwrap_or_default(),
            ),
            storage_backend: StorageBackend::parse(
                &env_string("AGENT_STORAGE_BACKEND").unwrap_or_default(),
            ),
            indexed_db_path: env_string("AGENT_INDEXED_DB_PATH")
                .unwrap_or_else(|| "armitage.db".to_owned()),
            model_name: env_string("AGENT_MODEL_NAME")
                .unwrap_or_else(|| DEFAULT_MODEL_NAME.to_owned()),
            max_plan_steps: env_parse("AGENT_MAX_PLAN_STEPS", 10),
            max_replans: env_parse("AGENT_MAX_REPLANS", 3),
            skill_service_url: env_string("AGENT_SKILL_SERVICE_URL"),
            skill_service_key: env_string("AGENT_SKILL_SERVICE_KEY"),
            mcp_config_path: env_string("AGENT_MCP_CONFIG_PATH").map(PathBuf::from),
            mcp_session_timeout_secs: env_parse(
                "AGENT_MCP_SESSION_TIMEOUT",
                DEFAULT_MCP_SESSION_TIMEOUT_SECS,
            ),
            communication_config_path: env_string("AGENT_COMMUNICATION_CONFIG_PATH")
                .map(PathBuf::from),
            agent_models_config_path: env_string("AGENT_AGENT_MODELS_CONFIG_PATH")
                .map(PathBuf::from),
            embedding_url: env_string("AGENT_EMBEDDING_URL"),
            embedding_model: env_string("AGENT_EMBEDDING_MODEL")
                .unwrap_or_else(|| "nomic-embed-text".to_owned()),
            embedding_dims: env_parse("AGENT_EMBEDDING_DIMS", 768),
            llm_base_url: env_string("AGENT_LLM_BASE_URL"),
            llm_api_key: env_string("AGENT_LLM_API_KEY"),
            events_retention_days: env_parse("AGENT_EVENTS_RETENTION_DAYS", 30),
            logs_dir: env_string("AGENT_LOGS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs")),
        }
    }
}

// ── Per-role model overrides ────────────────────────────────────

/// Model identifier per agent role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentModels {
    /// Coordinator model.
    pub coordinator: String,
    /// Planner model.
    pub planner: String,
    /// Executor model.
    pub executor: String,
    /// Memory specialist model.
    pub memory: String,
    /// Communicator model.
    pub communicator: String,
}

impl AgentModels {
    /// Every role on the same model.
    pub fn uniform(model: &str) -> Self {
        Self {
            coordinator: model.to_owned(),
            planner: model.to_owned(),
            executor: model.to_owned(),
            memory: model.to_owned(),
            communicator: model.to_owned(),
        }
    }
}

/// Resolve per-role models: defaults everywhere, overridden by any valid
/// entries in `agent_models.json`. Missing or malformed config keeps the
/// runtime booting.
pub fn resolve_agent_models(default_model: &str, config_path: Option<&Path>) -> AgentModels {
    let mut models = AgentModels::uniform(default_model);
    let overrides = load_agent_model_overrides(config_path);
    for (role, model) in overrides {
        match role.as_str() {
            "coordinator" => models.coordinator = model,
            "planner" => models.planner = model,
            "executor" => models.executor = model,
            "memory" => models.memory = model,
            "communicator" => models.communicator = model,
            _ => {}
        }
    }
    models
}

fn load_agent_model_overrides(config_path: Option<&Path>) -> HashMap<String, String> {
    let Some(path) = config_path else {
        return HashMap::new();
    };
    if !path.exists() {
        warn!(path = %path.display(), "agent_models_config_missing");
        return HashMap::new();
    }
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(path = %path.display(), %error, "agent_models_config_unreadable");
            return HashMap::new();
        }
    };
    let parsed: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(parsed) => parsed,
        Err(error) => {
            warn!(path = %path.display(), %error, "agent_models_config_invalid_json");
            return HashMap::new();
        }
    };
    let Some(object) = parsed.as_object() else {
        warn!(path = %path.display(), "agent_models_config_invalid_shape");
        return HashMap::new();
    };

    let mut output = HashMap::new();
    for role in ["coordinator", "planner", "executor", "memory", "communicator"] {
        if let Some(model) = object.get(role).and_then(|v| v.as_str()) {
            let trimmed = model.trim();
            if !trimmed.is_empty() {
                output.insert(role.to_owned(), trimmed.to_owned());
            }
        }
    }
    output
}

// ── Communication config ────────────────────────────────────────

/// Raw `communication_config.json` shape.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommunicationConfig {
    /// Slack section.
    #[serde(default)]
    pub slack: Option<SlackSection>,
    /// SMTP section.
    #[serde(default)]
    pub smtp: Option<SmtpSection>,
}

/// Slack section of the communication config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackSection {
    /// Literal bot token.
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Env var holding the bot token.
    #[serde(default)]
    pub bot_token_env: Option<String>,
    /// API base URL override.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// SMTP section of the communication config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmtpSection {
    /// SMTP host.
    #[serde(default)]
    pub host: Option<String>,
    /// SMTP port.
    #[serde(default)]
    pub port: Option<u16>,
    /// Auth username.
    #[serde(default)]
    pub username: Option<String>,
    /// Literal password.
    #[serde(default)]
    pub password: Option<String>,
    /// Env var holding the password.
    #[serde(default)]
    pub password_env: Option<String>,
    /// STARTTLS toggle (default true).
    #[serde(default)]
    pub use_tls: Option<bool>,
    /// Implicit-TLS toggle (default false).
    #[serde(default)]
    pub use_ssl: Option<bool>,
    /// Sender address.
    #[serde(default)]
    pub from_email: Option<String>,
    /// Sender display name.
    #[serde(default)]
    pub from_name: Option<String>,
}

/// Slack settings after secret resolution.
#[derive(Debug, Clone)]
pub struct ResolvedSlackConfig {
    /// Bot token, when configured.
    pub bot_token: Option<String>,
    /// API base URL.
    pub base_url: String,
}

/// SMTP settings after secret resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolvedSmtpConfig {
    /// SMTP host.
    pub host: Option<String>,
    /// SMTP port.
    pub port: Option<u16>,
    /// Auth username.
    pub username: Option<String>,
    /// Auth password.
    pub password: Option<String>,
    /// STARTTLS toggle.
    pub use_tls: bool,
    /// Implicit-TLS toggle.
    pub use_ssl: bool,
    /// Sender address.
    pub from_email: Option<String>,
    /// Sender display name.
    pub from_name: Option<String>,
}

/// Load the communication config file; missing or malformed files resolve
/// to the empty config.
pub fn load_communication_config(path: Option<&Path>) -> CommunicationConfig {
    let path = path.unwrap_or_else(|| Path::new("config/communication_config.json"));
    if !path.exists() {
        return CommunicationConfig::default();
    }
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

fn resolve_secret(explicit: Option<&str>, env_name: &str) -> Option<String> {
    if let Some(value) = explicit {
        if !value.is_empty() {
            return Some(value.to_owned());
        }
    }
    env_string(env_name).map(|v| v.trim().to_owned())
}

/// Resolve the Slack section, falling back to `SLACK_BOT_TOKEN`.
pub fn resolve_slack_config(config: &CommunicationConfig) -> ResolvedSlackConfig {
    let section = config.slack.clone().unwrap_or_default();
    let env_name = section
        .bot_token_env
        .clone()
        .unwrap_or_else(|| "SLACK_BOT_TOKEN".to_owned());
    ResolvedSlackConfig {
        bot_token: resolve_secret(section.bot_token.as_deref(), &env_name),
        base_url: section
            .base_url
            .unwrap_or_else(|| "https://slack.com/api".to_owned()),
    }
}

/// Resolve the SMTP section, falling back to `SMTP_PASSWORD`.
pub fn resolve_smtp_config(config: &CommunicationConfig) -> ResolvedSmtpConfig {
    let section = config.smtp.clone().unwrap_or_default();
    let env_name = section
        .password_env
        .clone()
        .unwrap_or_else(|| "SMTP_PASSWORD".to_owned());
    ResolvedSmtpConfig {
        host: section.host,
        port: section.port,
        username: section.username,
        password: resolve_secret(section.password.as_deref(), &env_name),
        use_tls: section.use_tls.unwrap_or(true),
        use_ssl: section.use_ssl.unwrap_or(false),
        from_email: section.from_email,
        from_name: section.from_name,
    }
}
