//! Engine error taxonomy.

use std::time::Duration;

use thiserror::Error;

use crate::adapter::AdapterError;

/// Errors surfaced by tasks and the driver.
///
/// Task-scoped variants carry a `Kind/id` label so a failure is attributable
/// to a single task-list entry in the run log.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Parameter schema violation, malformed template, or malformed range.
    #[error("{task}: {reason}")]
    Validation { task: String, reason: String },

    /// A task refers to an id no earlier task has registered.
    #[error("{task}: unreferenced task id '{ref_id}'")]
    UnreferencedRef { task: String, ref_id: String },

    /// Two tasks tried to register objects under the same id.
    #[error("duplicate task id '{0}'")]
    DuplicateId(String),

    /// Registry lookup for an id that was never registered.
    #[error("unknown task id '{0}'")]
    UnknownId(String),

    /// Underlying cluster-API failure.
    #[error("{task}: {source}")]
    Adapter {
        task: String,
        #[source]
        source: AdapterError,
    },

    /// A pod phase or node label did not match the expectation.
    #[error("{task}: {detail}")]
    Mismatch { task: String, detail: String },

    /// A bounded wait ran out of time.
    #[error("{task}: timed out after {after:?}")]
    Timeout { task: String, after: Duration },

    /// The run was canceled from outside.
    #[error("{task}: canceled")]
    Canceled { task: String },
}

impl EngineError {
    pub fn validation(task: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            task: task.to_string(),
            reason: reason.into(),
        }
    }

    pub fn adapter(task: &str, source: AdapterError) -> Self {
        Self::Adapter {
            task: task.to_string(),
            source,
        }
    }

    pub fn mismatch(task: &str, detail: impl Into<String>) -> Self {
        Self::Mismatch {
            task: task.to_string(),
            detail: detail.into(),
        }
    }

    pub fn timeout(task: &str, after: Duration) -> Self {
        Self::Timeout {
            task: task.to_string(),
            after,
        }
    }

    pub fn canceled(task: &str) -> Self {
        Self::Canceled {
            task: task.to_string(),
        }
    }
}
