//! Orchestration kernel: state machines, policy, replanning, and the two
//! request engines.
//!
//! [`pipeline::PipelineEngine`] drives plans deterministically against
//! planner/executor capabilities; [`runtime::GraphRuntime`] streams a
//! model-driven coordinator graph through the policy engine. Both share
//! the same repositories, trace events, and failure shapes.

pub mod context;
pub mod message_policy;
pub mod metadata;
pub mod pipeline;
pub mod policy;
pub mod replan;
pub mod runtime;
pub mod session;
pub mod state;
pub mod synthesizer;
pub mod validator;

use serde_json::{json, Value};
use thiserror::Error;

use crate::agents::AgentError;
use crate::kernel::replan::ReplanError;
use crate::kernel::state::StateError;
use crate::kernel::validator::PlanValidationError;
use crate::repos::{MemoryError, StorageError};

/// Request-level failures, mapped to HTTP statuses at the boundary.
#[derive(Debug, Error)]
pub enum RunError {
    /// Plan validation rejected the planner output (HTTP 422).
    #[error("plan validation failed")]
    PlanValidation {
        /// Shaped failure body.
        failure: Value,
    },

    /// Replan budget exhausted (HTTP 422).
    #[error("max replan attempts reached")]
    ReplanExhausted {
        /// Shaped failure body.
        failure: Value,
    },

    /// Anything else (HTTP 500).
    #[error("internal error: {0}")]
    Internal(String),
}

impl RunError {
    /// The structured body returned to the caller.
    pub fn failure_response(&self) -> Value {
        match self {
            Self::PlanValidation { failure } | Self::ReplanExhausted { failure } => {
                failure.clone()
            }
            Self::Internal(_) => json!({"status": "failed", "reason": "internal_error"}),
        }
    }
}

impl From<PlanValidationError> for RunError {
    fn from(e: PlanValidationError) -> Self {
        RunError::PlanValidation {
            failure: e.failure_response(),
        }
    }
}

impl From<ReplanError> for RunError {
    fn from(e: ReplanError) -> Self {
        match e {
            ReplanError::LimitReached { failure } => RunError::ReplanExhausted { failure },
            ReplanError::Validation(inner) => inner.into(),
            other => RunError::Internal(other.to_string()),
        }
    }
}

impl From<StorageError> for RunError {
    fn from(e: StorageError) -> Self {
        RunError::Internal(e.to_string())
    }
}

impl From<MemoryError> for RunError {
    fn from(e: MemoryError) -> Self {
        RunError::Internal(e.to_string())
    }
}

impl From<StateError> for RunError {
    fn from(e: StateError) -> Self {
        RunError::Internal(e.to_string())
    }
}

impl From<AgentError> for RunError {
    fn from(e: AgentError) -> Self {
        RunError::Internal(e.to_string())
    }
}
