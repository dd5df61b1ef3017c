//! Spill / sample / extract pipeline for oversized tool responses.
//!
//! Small responses are projected directly against the required fields.
//! Large responses spill to a registered temp file, get a 20-line sample,
//! and run through the sandboxed extractor; the extracted object must
//! carry exactly the required key set before it re-enters the contract
//! path. Temp files are always deleted, and a sweeper removes any
//! registry entries that outlive the configured age.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::warn;

use crate::tools::exec_python::run_exec_python;
use crate::types::{event_types, JsonMap};

/// Default spill threshold.
pub const DEFAULT_THRESHOLD_BYTES: usize = 50 * 1024;

/// Default sandbox wall-clock timeout.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on extracted output size.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 500 * 1024;

/// Default maximum temp-file age before the sweeper removes it.
pub const DEFAULT_SWEEP_MAX_AGE: Duration = Duration::from_secs(300);

/// Strategy label for the spill path.
const SPILL_STRATEGY: &str = "write_temp_read_lines_exec_python";

/// Lines sampled from the head of a spilled file.
const SAMPLE_LINES: usize = 20;

/// Tunables for the pipeline.
#[derive(Debug, Clone)]
pub struct LargeResponseConfig {
    /// Responses at or above this size spill to disk.
    pub threshold_bytes: usize,
    /// Sandbox wall-clock budget.
    pub exec_timeout: Duration,
    /// Cap on the JSON-encoded extraction result.
    pub max_output_bytes: usize,
    /// Registry entries older than this are swept.
    pub sweep_max_age: Duration,
}

impl Default for LargeResponseConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: DEFAULT_THRESHOLD_BYTES,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            sweep_max_age: DEFAULT_SWEEP_MAX_AGE,
        }
    }
}

/// Shared pipeline state: config, temp registry, and emitted events.
pub struct LargeResponsePipeline {
    config: LargeResponseConfig,
    temp_root: PathBuf,
    registry: Mutex<HashMap<String, DateTime<Utc>>>,
    events: Mutex<Vec<Value>>,
}

impl std::fmt::Debug for LargeResponsePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LargeResponsePipeline")
            .field("temp_root", &self.temp_root)
            .field("threshold_bytes", &self.config.threshold_bytes)
            .finish()
    }
}

impl Default for LargeResponsePipeline {
    fn default() -> Self {
        Self::new(LargeResponseConfig::default())
    }
}

impl LargeResponsePipeline {
    /// Create a pipeline spilling into the system temp directory.
    pub fn new(config: LargeResponseConfig) -> Self {
        Self {
            config,
            temp_root: std::env::temp_dir(),
            registry: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Create a pipeline spilling into an explicit directory (tests).
    pub fn with_temp_root(config: LargeResponseConfig, temp_root: PathBuf) -> Self {
        Self {
            config,
            temp_root,
            registry: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Write raw text to a registered temp file; returns `{file_id}`.
    pub async fn write_temp(&self, data: &str) -> Result<Value, String> {
        let file = tempfile::Builder::new()
            .prefix("armitage_")
            .suffix(".tmp")
            .tempfile_in(&self.temp_root)
            .map_err(|e| format!("temp file create failed: {e}"))?;
        let (mut handle, path) = file
            .keep()
            .map_err(|e| format!("temp file persist failed: {e}"))?;
        handle
            .write_all(data.as_bytes())
            .map_err(|e| format!("temp file write failed: {e}"))?;

        let file_id = path.to_string_lossy().into_owned();
        self.registry
            .lock()
            .await
            .insert(file_id.clone(), Utc::now());
        Ok(json!({"file_id": file_id}))
    }

    /// Read a slice of lines from a spilled file.
    pub async fn read_lines(&self, file_id: &str, start: usize, n: usize) -> Value {
        let Ok(contents) = std::fs::read_to_string(file_id) else {
            return json!({"lines": []});
        };
        let lines: Vec<&str> = contents.lines().skip(start).take(n).collect();
        json!({"lines": lines})
    }

    /// Run the sandboxed extractor against a spilled file.
    ///
    /// Successful extractions are recorded as `large_response.exec_python`
    /// pipeline events.
    pub async fn exec_python(&self, script: &str, file_id: &str) -> Value {
        let outcome = run_exec_python(
            script,
            file_id,
            &self.temp_root,
            self.config.exec_timeout,
            self.config.max_output_bytes,
        )
        .await;

        if outcome.get("status").and_then(Value::as_str) == Some("ok") {
            let script_hash = outcome
                .get("script_hash")
                .cloned()
                .unwrap_or(Value::Null);
            self.events.lock().await.push(json!({
                "event_type": event_types::LARGE_RESPONSE_EXEC,
                "payload": {
                    "script_hash": script_hash,
                    "strategy": SPILL_STRATEGY,
                },
                "ts": Utc::now().to_rfc3339(),
            }));
        }
        outcome
    }

    /// Normalize a response into the required fields.
    ///
    /// Small payloads are projected directly; large payloads go through
    /// spill + sandbox extraction with an exact-key contract gate.
    pub async fn handle(
        &self,
        response: &str,
        return_spec_shape: &JsonMap,
        extraction_script: Option<&str>,
    ) -> Value {
        let content_length = response.len();
        let required_fields: Vec<String> = return_spec_shape.keys().cloned().collect();

        if content_length < self.config.threshold_bytes {
            let data = project_direct(response, &required_fields);
            return json!({
                "status": "ok",
                "strategy": "direct",
                "large_response": false,
                "data": Value::Object(data),
                "content_length": content_length,
            });
        }

        let file_id = match self.write_temp(response).await {
            Ok(spilled) => spilled
                .get("file_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            Err(reason) => {
                return json!({
                    "status": "failed",
                    "strategy": SPILL_STRATEGY,
                    "large_response": true,
                    "content_length": content_length,
                    "reason": reason,
                });
            }
        };

        let sample = self.read_lines(&file_id, 0, SAMPLE_LINES).await;
        let sample_lines = sample.get("lines").cloned().unwrap_or(json!([]));
        let script = extraction_script
            .map(str::to_owned)
            .unwrap_or_else(|| default_extraction_script(&required_fields));

        let execution = self.exec_python(&script, &file_id).await;
        self.cleanup(&file_id).await;

        let script_hash = execution.get("script_hash").cloned().unwrap_or(Value::Null);
        if execution.get("status").and_then(Value::as_str) != Some("ok") {
            let reason = execution
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("exec_python_failed");
            return json!({
                "status": "failed",
                "strategy": SPILL_STRATEGY,
                "large_response": true,
                "content_length": content_length,
                "sample": sample_lines,
                "script_hash": script_hash,
                "reason": reason,
            });
        }

        let extracted = execution.get("result").cloned().unwrap_or(Value::Null);
        if !matches_required_fields(&extracted, &required_fields) {
            return json!({
                "status": "failed",
                "strategy": SPILL_STRATEGY,
                "large_response": true,
                "content_length": content_length,
                "sample": sample_lines,
                "script_hash": script_hash,
                "reason": "extraction_contract_violation",
            });
        }

        json!({
            "status": "ok",
            "strategy": SPILL_STRATEGY,
            "large_response": true,
            "content_length": content_length,
            "sample": sample_lines,
            "script_hash": script_hash,
            "data": extracted,
        })
    }

    /// Delete a spilled file and its registry entry.
    pub async fn cleanup(&self, file_id: &str) -> bool {
        let removed = std::fs::remove_file(file_id).is_ok();
        self.registry.lock().await.remove(file_id);
        removed
    }

    /// Remove registered temp files older than the configured age.
    pub async fn sweep(&self) -> Value {
        let now = Utc::now();
        let expired: Vec<String> = {
            let registry = self.registry.lock().await;
            registry
                .iter()
                .filter(|(_, created_at)| {
                    let age = now.signed_duration_since(**created_at);
                    age.num_seconds() >= self.config.sweep_max_age.as_secs() as i64
                })
                .map(|(file_id, _)| file_id.clone())
                .collect()
        };

        let mut removed = Vec::new();
        let mut failed = Vec::new();
        for file_id in expired {
            if std::path::Path::new(&file_id).exists() && std::fs::remove_file(&file_id).is_err() {
                warn!(file_id = %file_id, "temp sweep removal failed");
                failed.push(file_id);
                continue;
            }
            self.registry.lock().await.remove(&file_id);
            removed.push(file_id);
        }
        json!({"removed": removed, "failed": failed})
    }

    /// Pipeline events emitted so far (`large_response.exec_python`).
    pub async fn recent_events(&self) -> Vec<Value> {
        self.events.lock().await.clone()
    }

    /// Number of live registry entries, exposed for sweep tests.
    pub async fn registry_len(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Backdate a registry entry, exposed for sweep tests.
    pub async fn backdate_entry(&self, file_id: &str, age: Duration) {
        let mut registry = self.registry.lock().await;
        if let Some(created_at) = registry.get_mut(file_id) {
            *created_at = Utc::now()
                - chrono::Duration::seconds(age.as_secs() as i64)
                - chrono::Duration::seconds(1);
        }
    }
}

/// Build the default projection script for the required fields.
fn default_extraction_script(required_fields: &[String]) -> String {
    let projected: Vec<String> = required_fields
        .iter()
        .map(|field| format!("\"{field}\": payload.get(\"{field}\")"))
        .collect();
    format!(
        "payload = read_json_file(file_id)\nresult = {{{}}}",
        projected.join(", ")
    )
}

/// Direct projection for small responses.
fn project_direct(response: &str, required_fields: &[String]) -> JsonMap {
    let parsed: Option<JsonMap> = serde_json::from_str::<Value>(response)
        .ok()
        .and_then(|v| v.as_object().cloned());

    match parsed {
        Some(object) => required_fields
            .iter()
            .filter_map(|field| object.get(field).map(|v| (field.clone(), v.clone())))
            .collect(),
        None => {
            if required_fields.len() == 1 {
                let mut data = JsonMap::new();
                data.insert(
                    required_fields[0].clone(),
                    Value::String(response.to_owned()),
                );
                data
            } else {
                JsonMap::new()
            }
        }
    }
}

/// Exact-set equality between extracted keys and required fields.
fn matches_required_fields(data: &Value, required_fields: &[String]) -> bool {
    let Some(object) = data.as_object() else {
        return false;
    };
    if object.len() != required_fields.len() {
        return false;
    }
    required_fields.iter().all(|field| object.contains_key(field))
}
