//! Task-list configuration.
//!
//! A task list is a YAML document naming an ordered sequence of tasks to run
//! against a cluster. This crate owns the document format and its loader;
//! interpreting the per-task `params` blocks is the engine's job.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Task-list loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid task list: {0}")]
    Invalid(String),
}

/// The closed set of task kinds understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    SubmitObj,
    UpdateObj,
    CheckObj,
    DeleteObj,
    UpdateNodes,
    CheckPod,
    Sleep,
    Pause,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::SubmitObj => "SubmitObj",
            TaskKind::UpdateObj => "UpdateObj",
            TaskKind::CheckObj => "CheckObj",
            TaskKind::DeleteObj => "DeleteObj",
            TaskKind::UpdateNodes => "UpdateNodes",
            TaskKind::CheckPod => "CheckPod",
            TaskKind::Sleep => "Sleep",
            TaskKind::Pause => "Pause",
        };
        f.write_str(name)
    }
}

/// One entry of the task list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique identifier within the task list.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    /// Kind-specific parameter block, decoded by the task itself.
    #[serde(default)]
    pub params: serde_yaml::Value,
}

/// A named, ordered task list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
    /// Directory that template paths are resolved against. Set by the loader
    /// to the task-list file's directory; defaults to the working directory.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl TaskConfig {
    /// Parse and validate a task list from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: TaskConfig = serde_yaml::from_str(content)?;
        config.base_dir = PathBuf::from(".");
        validate(&config)?;
        Ok(config)
    }

    /// Load a task list from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                config.base_dir = dir.to_path_buf();
            }
        }
        Ok(config)
    }
}

fn validate(config: &TaskConfig) -> Result<(), ConfigError> {
    if config.name.trim().is_empty() {
        return Err(ConfigError::Invalid("name must not be empty".to_string()));
    }

    let mut seen = HashSet::new();
    for task in &config.tasks {
        if task.id.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "task of type {} has an empty id",
                task.kind
            )));
        }
        if !seen.insert(task.id.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate task id '{}'",
                task.id
            )));
        }
    }

    Ok(())
}
