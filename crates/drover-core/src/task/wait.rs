//! Sleep and Pause: time-based tasks.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use drover_config::TaskSpec;

use crate::error::EngineError;
use crate::params;
use crate::task::{task_label, Runnable, TaskContext};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SleepParams {
    #[serde(with = "params::duration")]
    timeout: Duration,
}

/// Waits for the configured duration, or returns `Canceled` if the run is
/// canceled first.
pub struct SleepTask {
    label: String,
    timeout: Duration,
}

impl SleepTask {
    pub fn new(spec: &TaskSpec) -> Result<Self, EngineError> {
        let label = task_label(spec.kind, &spec.id);
        let params: SleepParams = params::decode(&label, &spec.params)?;

        if params.timeout.is_zero() {
            return Err(EngineError::validation(&label, "'timeout' must be positive"));
        }

        Ok(Self {
            label,
            timeout: params.timeout,
        })
    }
}

#[async_trait]
impl Runnable for SleepTask {
    fn label(&self) -> &str {
        &self.label
    }

    async fn exec(&self, ctx: &TaskContext) -> Result<(), EngineError> {
        info!(task = %self.label, duration = ?self.timeout, "sleeping");
        tokio::select! {
            _ = tokio::time::sleep(self.timeout) => Ok(()),
            _ = ctx.cancel.cancelled() => Err(EngineError::canceled(&self.label)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PauseParams {}

/// Blocks until the run is canceled; never returns success.
pub struct PauseTask {
    label: String,
}

impl PauseTask {
    pub fn new(spec: &TaskSpec) -> Result<Self, EngineError> {
        let label = task_label(spec.kind, &spec.id);
        let _params: PauseParams = params::decode(&label, &spec.params)?;
        Ok(Self { label })
    }
}

#[async_trait]
impl Runnable for PauseTask {
    fn label(&self) -> &str {
        &self.label
    }

    async fn exec(&self, ctx: &TaskContext) -> Result<(), EngineError> {
        info!(task = %self.label, "pausing until canceled");
        ctx.cancel.cancelled().await;
        Err(EngineError::canceled(&self.label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::task_spec;
    use drover_config::TaskKind;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_sleep_elapses() {
        tokio_test::block_on(async {
            let spec = task_spec(TaskKind::Sleep, "nap", "timeout: 10ms");
            let task = SleepTask::new(&spec).expect("task");
            task.exec(&TaskContext::new()).await.expect("exec");
        });
    }

    #[test]
    fn test_sleep_requires_positive_timeout() {
        let spec = task_spec(TaskKind::Sleep, "nap", "");
        assert!(SleepTask::new(&spec).is_err());
    }

    #[test]
    fn test_sleep_cancellation_returns_canceled_promptly() {
        tokio_test::block_on(async {
            let spec = task_spec(TaskKind::Sleep, "nap", "timeout: 10m");
            let task = SleepTask::new(&spec).expect("task");

            let cancel = CancellationToken::new();
            let ctx = TaskContext::with_cancel(cancel.clone());
            let canceller = tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                cancel.cancel();
            });

            let started = std::time::Instant::now();
            let err = task.exec(&ctx).await.unwrap_err();
            assert!(matches!(err, EngineError::Canceled { .. }));
            assert!(started.elapsed() < std::time::Duration::from_secs(5));
            canceller.await.expect("canceller");
        });
    }

    #[test]
    fn test_pause_only_returns_on_cancellation() {
        tokio_test::block_on(async {
            let spec = task_spec(TaskKind::Pause, "hold", "");
            let task = PauseTask::new(&spec).expect("task");

            let cancel = CancellationToken::new();
            let ctx = TaskContext::with_cancel(cancel.clone());
            let canceller = tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                cancel.cancel();
            });

            let err = task.exec(&ctx).await.unwrap_err();
            assert!(matches!(err, EngineError::Canceled { .. }));
            canceller.await.expect("canceller");
        });
    }

    #[test]
    fn test_pause_rejects_unknown_params() {
        let spec = task_spec(TaskKind::Pause, "hold", "surprise: true");
        assert!(PauseTask::new(&spec).is_err());
    }
}
