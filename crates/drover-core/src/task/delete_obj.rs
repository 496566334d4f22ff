//! DeleteObj: delete every object a previous SubmitObj produced.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use drover_config::TaskSpec;

use crate::adapter::ClusterClient;
use crate::error::EngineError;
use crate::params;
use crate::registry::ObjRegistry;
use crate::task::{task_label, Runnable, TaskContext};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeleteObjParams {
    #[serde(rename = "refTaskId")]
    ref_task_id: String,
}

/// Deletes the referenced objects. Objects that are already gone count as
/// deleted, so re-running the task is harmless.
pub struct DeleteObjTask {
    label: String,
    ref_task_id: String,
    adapter: Arc<dyn ClusterClient>,
    registry: Arc<ObjRegistry>,
}

impl DeleteObjTask {
    pub fn new(
        spec: &TaskSpec,
        adapter: Arc<dyn ClusterClient>,
        registry: Arc<ObjRegistry>,
    ) -> Result<Self, EngineError> {
        let label = task_label(spec.kind, &spec.id);
        let params: DeleteObjParams = params::decode(&label, &spec.params)?;

        if params.ref_task_id.is_empty() {
            return Err(EngineError::validation(&label, "missing parameter 'refTaskId'"));
        }

        Ok(Self {
            label,
            ref_task_id: params.ref_task_id,
            adapter,
            registry,
        })
    }

    pub(crate) fn ref_task_id(&self) -> &str {
        &self.ref_task_id
    }
}

#[async_trait]
impl Runnable for DeleteObjTask {
    fn label(&self) -> &str {
        &self.label
    }

    async fn exec(&self, _ctx: &TaskContext) -> Result<(), EngineError> {
        let info = self.registry.get(&self.ref_task_id)?;

        for name in &info.names {
            self.adapter
                .delete_object(&info.gvr, &info.namespace, name)
                .await
                .map_err(|err| EngineError::adapter(&self.label, err))?;
            debug!(task = %self.label, object = %name, "deleted object");
        }

        Ok(())
    }
}
