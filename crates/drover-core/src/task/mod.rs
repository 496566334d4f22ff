//! Task construction and the uniform execution capability.

mod check_obj;
mod check_pod;
mod delete_obj;
mod submit_obj;
mod update_nodes;
mod update_obj;
mod wait;

pub use check_obj::CheckObjTask;
pub use check_pod::CheckPodTask;
pub use delete_obj::DeleteObjTask;
pub use submit_obj::SubmitObjTask;
pub use update_nodes::UpdateNodesTask;
pub use update_obj::UpdateObjTask;
pub use wait::{PauseTask, SleepTask};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use drover_config::TaskKind;

use crate::error::EngineError;
use crate::render::Bindings;

/// Execution context handed to every task.
///
/// Carries the run's cancellation token; tasks performing bounded waits must
/// observe it and release any watch state before returning.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub cancel: CancellationToken,
}

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

/// The uniform capability implemented by every task kind.
///
/// Tasks are ephemeral: constructed by the engine's factory, executed once,
/// discarded.
#[async_trait]
pub trait Runnable: Send + Sync {
    /// `Kind/id` label used in logs and error prefixes.
    fn label(&self) -> &str;

    async fn exec(&self, ctx: &TaskContext) -> Result<(), EngineError>;
}

pub(crate) fn task_label(kind: TaskKind, id: &str) -> String {
    format!("{kind}/{id}")
}

/// Flatten an `overrides` mapping into rendering bindings. Scalar values
/// keep their YAML scalar form; structured values are carried as JSON text.
pub(crate) fn override_bindings(
    task: &str,
    overrides: &serde_yaml::Mapping,
) -> Result<Bindings, EngineError> {
    let mut bindings = Bindings::new();
    for (key, value) in overrides {
        let key = key
            .as_str()
            .ok_or_else(|| EngineError::validation(task, "override keys must be strings"))?;
        bindings.insert(key.to_string(), scalar_text(task, value)?);
    }
    Ok(bindings)
}

fn scalar_text(task: &str, value: &serde_yaml::Value) -> Result<String, EngineError> {
    use serde_yaml::Value;

    Ok(match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => {
            let json: serde_json::Value = serde_yaml::from_value(other.clone())
                .map_err(|err| EngineError::validation(task, format!("bad override value: {err}")))?;
            json.to_string()
        }
    })
}

/// Parse a rendered manifest into the JSON payload the adapter consumes.
pub(crate) fn manifest_to_json(task: &str, text: &str) -> Result<serde_json::Value, EngineError> {
    serde_yaml::from_str(text)
        .map_err(|err| EngineError::validation(task, format!("rendered manifest is not valid YAML: {err}")))
}
