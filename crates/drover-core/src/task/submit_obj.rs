//! SubmitObj: render and create one or more cluster objects.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use drover_config::TaskSpec;

use crate::adapter::{ClusterClient, Gvr};
use crate::error::EngineError;
use crate::params;
use crate::registry::{ObjInfo, ObjRegistry};
use crate::render::{self, Bindings, PodsSpec, ENUM_BINDING, NAME_BINDING};
use crate::task::{manifest_to_json, override_bindings, task_label, Runnable, TaskContext};

fn default_count() -> usize {
    1
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SubmitObjParams {
    #[serde(default = "default_count")]
    count: usize,
    grv: Gvr,
    template: PathBuf,
    nameformat: String,
    #[serde(default)]
    overrides: serde_yaml::Mapping,
    #[serde(default)]
    pods: Option<PodsSpec>,
    #[serde(default = "default_namespace")]
    namespace: String,
}

/// Creates `count` objects of one resource class, then registers the
/// produced names and expected pod names under this task's id.
pub struct SubmitObjTask {
    label: String,
    id: String,
    gvr: Gvr,
    namespace: String,
    template: String,
    bindings: Bindings,
    names: Vec<String>,
    pods: Vec<String>,
    adapter: Arc<dyn ClusterClient>,
    registry: Arc<ObjRegistry>,
}

impl std::fmt::Debug for SubmitObjTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitObjTask")
            .field("label", &self.label)
            .field("id", &self.id)
            .field("gvr", &self.gvr)
            .field("namespace", &self.namespace)
            .field("template", &self.template)
            .field("bindings", &self.bindings)
            .field("names", &self.names)
            .field("pods", &self.pods)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl SubmitObjTask {
    pub fn new(
        spec: &TaskSpec,
        adapter: Arc<dyn ClusterClient>,
        registry: Arc<ObjRegistry>,
        base_dir: &Path,
    ) -> Result<Self, EngineError> {
        let label = task_label(spec.kind, &spec.id);
        let params: SubmitObjParams = params::decode(&label, &spec.params)?;

        if params.count == 0 {
            return Err(EngineError::validation(&label, "'count' must be >= 1"));
        }

        let path = base_dir.join(&params.template);
        let template = std::fs::read_to_string(&path).map_err(|err| {
            EngineError::validation(&label, format!("failed to read template {}: {err}", path.display()))
        })?;

        let bindings = override_bindings(&label, &params.overrides)?;

        // Names and expected pods are deterministic; colliding nameformats
        // fail here, before anything is created.
        let names = render::expand_names(&params.nameformat, params.count, &bindings)
            .map_err(|err| EngineError::validation(&label, err.to_string()))?;
        let pods = match &params.pods {
            Some(spec) => render::expand_pod_names(spec, &names, &bindings)
                .map_err(|err| EngineError::validation(&label, err.to_string()))?,
            None => Vec::new(),
        };

        Ok(Self {
            label,
            id: spec.id.clone(),
            gvr: params.grv,
            namespace: params.namespace,
            template,
            bindings,
            names,
            pods,
            adapter,
            registry,
        })
    }
}

#[async_trait]
impl Runnable for SubmitObjTask {
    fn label(&self) -> &str {
        &self.label
    }

    async fn exec(&self, _ctx: &TaskContext) -> Result<(), EngineError> {
        for (i, name) in self.names.iter().enumerate() {
            let mut bindings = self.bindings.clone();
            bindings.insert(ENUM_BINDING.to_string(), i.to_string());
            bindings.insert(NAME_BINDING.to_string(), name.clone());
            bindings.insert("namespace".to_string(), self.namespace.clone());

            let rendered = render::render(&self.template, &bindings)
                .map_err(|err| EngineError::validation(&self.label, err.to_string()))?;
            let manifest = manifest_to_json(&self.label, &rendered)?;

            self.adapter
                .create_object(&self.gvr, &self.namespace, &manifest)
                .await
                .map_err(|err| EngineError::adapter(&self.label, err))?;

            debug!(task = %self.label, object = %name, "created object");
        }

        // No rollback of earlier creates on partial failure; cleanup is a
        // later DeleteObj's job. Registration only happens once every
        // create succeeded.
        self.registry.insert(
            &self.id,
            ObjInfo {
                gvr: self.gvr.clone(),
                namespace: self.namespace.clone(),
                names: self.names.clone(),
                pods: self.pods.clone(),
            },
        )?;

        info!(
            task = %self.label,
            objects = self.names.len(),
            pods = self.pods.len(),
            "submitted objects"
        );
        Ok(())
    }
}
