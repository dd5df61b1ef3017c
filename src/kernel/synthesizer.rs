//! Final response synthesis from persisted step outputs.
//!
//! The response is built from memory, not from transient executor data:
//! reading each completed step's record with lock release doubles as the
//! confirmation that ends the write-lock lifecycle.

use std::sync::Arc;

use crate::repos::{MemoryError, MemoryRepository};
use crate::types::{JsonMap, Plan, StepStatus};

/// Fallback when steps completed but produced no readable outputs.
const EXECUTION_COMPLETE: &str = "Execution complete.";

/// Fallback when nothing completed.
const NO_STEPS_COMPLETED: &str = "No steps completed.";

/// Builds the final user response from memory outputs.
pub struct ResponseSynthesizer {
    memory_repo: Arc<dyn MemoryRepository>,
}

impl ResponseSynthesizer {
    /// Create a synthesizer over the shared memory store.
    pub fn new(memory_repo: Arc<dyn MemoryRepository>) -> Self {
        Self { memory_repo }
    }

    /// Read completed outputs in step order, releasing each write lock.
    pub async fn read_completed_outputs(&self, plan: &Plan) -> Result<Vec<JsonMap>, MemoryError> {
        let mut outputs = Vec::new();
        for step in &plan.steps {
            if step.status != StepStatus::Complete {
                continue;
            }
            let Some(memory_key) = &step.memory_key else {
                continue;
            };
            if let Some(value) = self.memory_repo.read(memory_key, true).await? {
                outputs.push(value);
            }
        }
        Ok(outputs)
    }

    /// Produce the final response text for a finished plan.
    ///
    /// Prefers the last output's `response_text`; otherwise appends the
    /// canonical JSON of the last output to a generic completion notice.
    pub async fn synthesize(&self, plan: &Plan) -> Result<String, MemoryError> {
        let has_completed = plan
            .steps
            .iter()
            .any(|step| step.status == StepStatus::Complete);
        let outputs = self.read_completed_outputs(plan).await?;

        let Some(final_output) = outputs.last() else {
            return Ok(if has_completed {
                EXECUTION_COMPLETE.to_owned()
            } else {
                NO_STEPS_COMPLETED.to_owned()
            });
        };

        if let Some(response_text) = final_output.get("response_text").and_then(|v| v.as_str()) {
            if !response_text.trim().is_empty() {
                return Ok(response_text.to_owned());
            }
        }

        let rendered = crate::types::canonical::canonical_json(&serde_json::Value::Object(
            final_output.clone(),
        ));
        Ok(format!("{EXECUTION_COMPLETE} {rendered}"))
    }
}
