//! UpdateNodes: apply label and taint mutations to matching nodes.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use drover_config::TaskSpec;

use crate::adapter::ClusterClient;
use crate::error::EngineError;
use crate::params;
use crate::task::{task_label, Runnable, TaskContext};

/// One taint to upsert, keyed by `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaintSpec {
    pub key: String,
    #[serde(default)]
    pub value: String,
    pub effect: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateNodesParams {
    /// A node matches when all pairs of any one selector are present in its
    /// labels.
    selectors: Vec<BTreeMap<String, String>>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    taints: Vec<TaintSpec>,
}

pub struct UpdateNodesTask {
    label: String,
    params: UpdateNodesParams,
    adapter: Arc<dyn ClusterClient>,
}

impl UpdateNodesTask {
    pub fn new(spec: &TaskSpec, adapter: Arc<dyn ClusterClient>) -> Result<Self, EngineError> {
        let label = task_label(spec.kind, &spec.id);
        let params: UpdateNodesParams = params::decode(&label, &spec.params)?;

        if params.selectors.is_empty() {
            return Err(EngineError::validation(&label, "missing parameter 'selectors'"));
        }
        if params.labels.is_empty() && params.taints.is_empty() {
            return Err(EngineError::validation(
                &label,
                "missing parameters 'labels' and/or 'taints'",
            ));
        }

        Ok(Self {
            label,
            params,
            adapter,
        })
    }

    fn node_patch(&self, node: &Node) -> serde_json::Value {
        let mut patch = json!({});
        if !self.params.labels.is_empty() {
            patch["metadata"] = json!({ "labels": self.params.labels });
        }
        if !self.params.taints.is_empty() {
            patch["spec"] = json!({ "taints": merged_taints(node, &self.params.taints) });
        }
        patch
    }
}

/// Existing taints with the requested ones upserted by key.
fn merged_taints(node: &Node, updates: &[TaintSpec]) -> Vec<serde_json::Value> {
    let mut merged: Vec<(String, serde_json::Value)> = node
        .spec
        .as_ref()
        .and_then(|spec| spec.taints.as_ref())
        .map(|taints| {
            taints
                .iter()
                .map(|t| {
                    (
                        t.key.clone(),
                        json!({"key": t.key, "value": t.value, "effect": t.effect}),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    for update in updates {
        let value = json!({"key": update.key, "value": update.value, "effect": update.effect});
        match merged.iter_mut().find(|(key, _)| *key == update.key) {
            Some(slot) => slot.1 = value,
            None => merged.push((update.key.clone(), value)),
        }
    }

    merged.into_iter().map(|(_, taint)| taint).collect()
}

fn matches_any_selector(node: &Node, selectors: &[BTreeMap<String, String>]) -> bool {
    let labels = node.metadata.labels.clone().unwrap_or_default();
    selectors.iter().any(|selector| {
        selector
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    })
}

#[async_trait]
impl Runnable for UpdateNodesTask {
    fn label(&self) -> &str {
        &self.label
    }

    async fn exec(&self, _ctx: &TaskContext) -> Result<(), EngineError> {
        let nodes = self
            .adapter
            .list_nodes()
            .await
            .map_err(|err| EngineError::adapter(&self.label, err))?;

        let mut matched = 0usize;
        for node in &nodes {
            if !matches_any_selector(node, &self.params.selectors) {
                continue;
            }
            let Some(name) = node.metadata.name.as_deref() else {
                continue;
            };

            matched += 1;
            let patch = self.node_patch(node);
            self.adapter
                .patch_node(name, &patch)
                .await
                .map_err(|err| EngineError::adapter(&self.label, err))?;
            debug!(task = %self.label, node = %name, "node updated");
        }

        if matched == 0 {
            warn!(task = %self.label, "no nodes matched the selectors");
        }
        Ok(())
    }
}
