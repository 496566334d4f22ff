//! The engine driver.
//!
//! Owns the object registry, builds tasks through the factory, and runs a
//! task list strictly in order: the first failing task aborts the
//! remainder, and `reset` runs exactly once regardless.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use drover_config::{TaskConfig, TaskKind, TaskSpec};

use crate::adapter::ClusterClient;
use crate::error::EngineError;
use crate::registry::ObjRegistry;
use crate::task::{
    CheckObjTask, CheckPodTask, DeleteObjTask, PauseTask, Runnable, SleepTask, SubmitObjTask,
    TaskContext, UpdateNodesTask, UpdateObjTask,
};

pub struct Engine {
    adapter: Arc<dyn ClusterClient>,
    registry: Arc<ObjRegistry>,
    base_dir: PathBuf,
}

impl Engine {
    pub fn new(adapter: Arc<dyn ClusterClient>) -> Self {
        Self {
            adapter,
            registry: Arc::new(ObjRegistry::new()),
            base_dir: PathBuf::from("."),
        }
    }

    /// Directory template paths are resolved against; normally the
    /// task-list file's directory.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn registry(&self) -> &Arc<ObjRegistry> {
        &self.registry
    }

    /// Run a task list to completion or first failure, then reset.
    ///
    /// The execution error wins over a reset error; otherwise whichever
    /// failed is surfaced.
    pub async fn run(
        &self,
        config: &TaskConfig,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        info!(name = %config.name, tasks = config.tasks.len(), "starting run");
        let ctx = TaskContext::with_cancel(cancel);

        let mut exec_result = Ok(());
        for spec in &config.tasks {
            if let Err(err) = self.run_task(spec, &ctx).await {
                exec_result = Err(err);
                break;
            }
        }

        let reset_result = self.reset().await;

        match exec_result {
            Err(err) => Err(err),
            Ok(()) => reset_result,
        }
    }

    pub async fn run_task(&self, spec: &TaskSpec, ctx: &TaskContext) -> Result<(), EngineError> {
        let task = self.build_task(spec)?;

        info!(task = %task.label(), "starting task");
        let start = Instant::now();
        match task.exec(ctx).await {
            Ok(()) => {
                info!(task = %task.label(), duration = ?start.elapsed(), "task completed");
                Ok(())
            }
            Err(err) => {
                error!(task = %task.label(), error = %err, "task failed");
                Err(err)
            }
        }
    }

    /// The factory: map a task-list entry to a validated task value.
    ///
    /// Tasks that refer to an earlier task's objects are rejected here,
    /// before anything executes, when the referenced id has not been
    /// registered yet. Ordering in the task list is therefore significant.
    pub fn build_task(&self, spec: &TaskSpec) -> Result<Box<dyn Runnable>, EngineError> {
        debug!(kind = %spec.kind, id = %spec.id, "creating task");

        match spec.kind {
            TaskKind::SubmitObj => Ok(Box::new(SubmitObjTask::new(
                spec,
                self.adapter.clone(),
                self.registry.clone(),
                &self.base_dir,
            )?)),
            TaskKind::UpdateObj => {
                let task = UpdateObjTask::new(
                    spec,
                    self.adapter.clone(),
                    self.registry.clone(),
                    &self.base_dir,
                )?;
                self.ensure_registered(task.label(), task.ref_task_id())?;
                Ok(Box::new(task))
            }
            TaskKind::CheckObj => {
                let task = CheckObjTask::new(spec, self.adapter.clone(), self.registry.clone())?;
                self.ensure_registered(task.label(), task.ref_task_id())?;
                Ok(Box::new(task))
            }
            TaskKind::DeleteObj => {
                let task = DeleteObjTask::new(spec, self.adapter.clone(), self.registry.clone())?;
                self.ensure_registered(task.label(), task.ref_task_id())?;
                Ok(Box::new(task))
            }
            TaskKind::CheckPod => {
                let task = CheckPodTask::new(spec, self.adapter.clone(), self.registry.clone())?;
                self.ensure_registered(task.label(), task.ref_task_id())?;
                Ok(Box::new(task))
            }
            TaskKind::UpdateNodes => {
                Ok(Box::new(UpdateNodesTask::new(spec, self.adapter.clone())?))
            }
            TaskKind::Sleep => Ok(Box::new(SleepTask::new(spec)?)),
            TaskKind::Pause => Ok(Box::new(PauseTask::new(spec)?)),
        }
    }

    fn ensure_registered(&self, label: &str, ref_task_id: &str) -> Result<(), EngineError> {
        if self.registry.contains(ref_task_id) {
            Ok(())
        } else {
            Err(EngineError::UnreferencedRef {
                task: label.to_string(),
                ref_id: ref_task_id.to_string(),
            })
        }
    }

    /// Teardown hook, invoked exactly once per run. Currently nothing to
    /// free.
    pub async fn reset(&self) -> Result<(), EngineError> {
        debug!("engine reset");
        Ok(())
    }
}
