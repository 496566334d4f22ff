//! UpdateObj: patch every object a previous SubmitObj produced.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use drover_config::TaskSpec;

use crate::adapter::ClusterClient;
use crate::error::EngineError;
use crate::params;
use crate::registry::ObjRegistry;
use crate::render::{self, NAME_BINDING};
use crate::task::{manifest_to_json, override_bindings, task_label, Runnable, TaskContext};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateObjParams {
    #[serde(rename = "refTaskId")]
    ref_task_id: String,
    template: PathBuf,
    #[serde(default)]
    overrides: serde_yaml::Mapping,
}

/// Applies a rendered patch manifest to each object named in the referenced
/// registry entry. Fails fast on the first error.
pub struct UpdateObjTask {
    label: String,
    ref_task_id: String,
    template: String,
    bindings: render::Bindings,
    adapter: Arc<dyn ClusterClient>,
    registry: Arc<ObjRegistry>,
}

impl std::fmt::Debug for UpdateObjTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateObjTask")
            .field("label", &self.label)
            .field("ref_task_id", &self.ref_task_id)
            .field("template", &self.template)
            .field("bindings", &self.bindings)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl UpdateObjTask {
    pub fn new(
        spec: &TaskSpec,
        adapter: Arc<dyn ClusterClient>,
        registry: Arc<ObjRegistry>,
        base_dir: &Path,
    ) -> Result<Self, EngineError> {
        let label = task_label(spec.kind, &spec.id);
        let params: UpdateObjParams = params::decode(&label, &spec.params)?;

        if params.ref_task_id.is_empty() {
            return Err(EngineError::validation(&label, "missing parameter 'refTaskId'"));
        }

        let path = base_dir.join(&params.template);
        let template = std::fs::read_to_string(&path).map_err(|err| {
            EngineError::validation(&label, format!("failed to read template {}: {err}", path.display()))
        })?;

        let bindings = override_bindings(&label, &params.overrides)?;

        Ok(Self {
            label,
            ref_task_id: params.ref_task_id,
            template,
            bindings,
            adapter,
            registry,
        })
    }

    pub(crate) fn ref_task_id(&self) -> &str {
        &self.ref_task_id
    }
}

#[async_trait]
impl Runnable for UpdateObjTask {
    fn label(&self) -> &str {
        &self.label
    }

    async fn exec(&self, _ctx: &TaskContext) -> Result<(), EngineError> {
        let info = self.registry.get(&self.ref_task_id)?;

        for name in &info.names {
            let mut bindings = self.bindings.clone();
            bindings.insert(NAME_BINDING.to_string(), name.clone());
            bindings.insert("namespace".to_string(), info.namespace.clone());

            let rendered = render::render(&self.template, &bindings)
                .map_err(|err| EngineError::validation(&self.label, err.to_string()))?;
            let patch = manifest_to_json(&self.label, &rendered)?;

            self.adapter
                .patch_object(&info.gvr, &info.namespace, name, &patch)
                .await
                .map_err(|err| EngineError::adapter(&self.label, err))?;

            debug!(task = %self.label, object = %name, "patched object");
        }

        Ok(())
    }
}
