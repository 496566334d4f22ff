//! CheckPod: wait until every expected pod satisfies a predicate.
//!
//! Watch mode feeds two observation sources through one idempotent verify
//! routine: a pod-event subscription (armed first, so no creation is
//! missed) and an initial List of the namespace. Duplicate observations are
//! harmless because verification is set-membership plus delete.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use drover_config::TaskSpec;

use crate::adapter::{AdapterError, ClusterClient};
use crate::error::EngineError;
use crate::params;
use crate::registry::{ObjInfo, ObjRegistry};
use crate::task::{task_label, Runnable, TaskContext};

const RESYNC_PERIOD: Duration = Duration::from_secs(30);
const RUNNING_PHASE: &str = "Running";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckPodParams {
    #[serde(rename = "refTaskId")]
    ref_task_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, rename = "nodeLabels")]
    node_labels: BTreeMap<String, String>,
    #[serde(default, with = "params::duration")]
    timeout: Duration,
}

/// Verifies that all pods expected from a referenced SubmitObj reach the
/// given phase, and optionally that their host nodes carry the required
/// labels. `timeout == 0` means a single Get per pod; otherwise a bounded
/// watch that converges as events arrive.
pub struct CheckPodTask {
    label: String,
    params: CheckPodParams,
    adapter: Arc<dyn ClusterClient>,
    registry: Arc<ObjRegistry>,
}

impl std::fmt::Debug for CheckPodTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckPodTask")
            .field("label", &self.label)
            .field("params", &self.params)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl CheckPodTask {
    pub fn new(
        spec: &TaskSpec,
        adapter: Arc<dyn ClusterClient>,
        registry: Arc<ObjRegistry>,
    ) -> Result<Self, EngineError> {
        let label = task_label(spec.kind, &spec.id);
        let params: CheckPodParams = params::decode(&label, &spec.params)?;

        if params.ref_task_id.is_empty() {
            return Err(EngineError::validation(&label, "missing parameter 'refTaskId'"));
        }
        if params.status.is_none() && params.node_labels.is_empty() {
            return Err(EngineError::validation(
                &label,
                "missing parameters 'status' and/or 'nodeLabels'",
            ));
        }

        Ok(Self {
            label,
            params,
            adapter,
            registry,
        })
    }

    pub(crate) fn ref_task_id(&self) -> &str {
        &self.params.ref_task_id
    }

    /// Single-shot mode: one Get per expected pod, first mismatch fails.
    async fn check_pods(&self, info: &ObjInfo) -> Result<(), EngineError> {
        for name in &info.pods {
            let pod = self
                .adapter
                .get_pod(&info.namespace, name)
                .await
                .map_err(|err| EngineError::adapter(&self.label, err))?;

            let phase = pod_phase(&pod);
            if let Some(want) = &self.params.status {
                if phase != *want {
                    return Err(EngineError::mismatch(
                        &self.label,
                        format!("pod '{name}': status '{phase}', expected '{want}'"),
                    ));
                }
            }

            verify_node_labels(&self.label, &self.params.node_labels, &self.adapter, &pod).await?;
        }

        Ok(())
    }

    /// Watch mode: converge the remaining set against streamed events and an
    /// initial List within the deadline.
    async fn watch_pods(&self, ctx: &TaskContext, info: &ObjInfo) -> Result<(), EngineError> {
        info!(
            task = %self.label,
            pods = info.pods.len(),
            timeout = ?self.params.timeout,
            "watching pods"
        );

        let verifier = Arc::new(PodVerifier {
            label: self.label.clone(),
            status: self.params.status.clone(),
            node_labels: self.params.node_labels.clone(),
            adapter: self.adapter.clone(),
            remaining: Mutex::new(info.pods.iter().cloned().collect()),
        });

        // The subscription is armed before the List so that pods created in
        // between are observed by at least one source.
        let mut watch = self
            .adapter
            .watch_pods(&info.namespace, RESYNC_PERIOD)
            .await
            .map_err(|err| EngineError::adapter(&self.label, err))?;

        let (done_tx, mut done_rx) = mpsc::channel::<Result<(), EngineError>>(1);
        let _lister = AbortOnDrop(tokio::spawn(list_and_verify(
            verifier.clone(),
            info.namespace.clone(),
            done_tx.clone(),
        )));

        let deadline = tokio::time::sleep(self.params.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    return Err(EngineError::canceled(&self.label));
                }
                _ = &mut deadline => {
                    return Err(EngineError::timeout(&self.label, self.params.timeout));
                }
                Some(result) = done_rx.recv() => {
                    return result;
                }
                event = watch.recv() => match event {
                    Some(event) => match verifier.verify(&event.pod).await {
                        Ok(true) => return Ok(()),
                        Ok(false) => {}
                        Err(err) => return Err(err),
                    },
                    None => {
                        return Err(EngineError::adapter(
                            &self.label,
                            AdapterError::Api("pod subscription closed".to_string()),
                        ));
                    }
                },
            }
        }
    }
}

#[async_trait]
impl Runnable for CheckPodTask {
    fn label(&self) -> &str {
        &self.label
    }

    async fn exec(&self, ctx: &TaskContext) -> Result<(), EngineError> {
        let info = self.registry.get(&self.params.ref_task_id)?;

        if info.pods.is_empty() {
            info!(task = %self.label, "no pods expected");
            return Ok(());
        }

        if self.params.timeout.is_zero() {
            self.check_pods(&info).await
        } else {
            self.watch_pods(ctx, &info).await
        }
    }
}

/// Shared verification state for watch mode. `remaining` only ever shrinks;
/// the guard is held across membership checks and deletes but never across
/// an await.
struct PodVerifier {
    label: String,
    status: Option<String>,
    node_labels: BTreeMap<String, String>,
    adapter: Arc<dyn ClusterClient>,
    remaining: Mutex<HashSet<String>>,
}

impl PodVerifier {
    /// Returns `Ok(true)` once every expected pod has been accounted for.
    /// Observations of pods that are not (or no longer) expected are no-ops.
    async fn verify(&self, pod: &Pod) -> Result<bool, EngineError> {
        let Some(name) = pod.metadata.name.clone() else {
            return Ok(false);
        };
        if !self.remaining_guard().contains(&name) {
            return Ok(false);
        }

        let phase = pod_phase(pod);
        debug!(task = %self.label, pod = %name, status = %phase, "pod observed");
        if let Some(want) = &self.status {
            if phase != *want {
                // Not a failure: the pod may still transition; keep waiting.
                return Ok(false);
            }
        }

        verify_node_labels(&self.label, &self.node_labels, &self.adapter, pod).await?;

        let mut remaining = self.remaining_guard();
        remaining.remove(&name);
        if remaining.is_empty() {
            info!(task = %self.label, "accounted for all pods");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn is_done(&self) -> bool {
        self.remaining_guard().is_empty()
    }

    fn remaining_guard(&self) -> MutexGuard<'_, HashSet<String>> {
        match self.remaining.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Initial-List runner: feeds current pods through the same verify routine
/// the subscription handler uses.
async fn list_and_verify(
    verifier: Arc<PodVerifier>,
    namespace: String,
    done_tx: mpsc::Sender<Result<(), EngineError>>,
) {
    match verifier.adapter.list_pods(&namespace).await {
        Err(err) => {
            let _ = done_tx
                .send(Err(EngineError::adapter(&verifier.label, err)))
                .await;
        }
        Ok(pods) => {
            for pod in pods {
                if verifier.is_done() {
                    break;
                }
                match verifier.verify(&pod).await {
                    Ok(true) => {
                        let _ = done_tx.send(Ok(())).await;
                        break;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        let _ = done_tx.send(Err(err)).await;
                        break;
                    }
                }
            }
        }
    }
}

async fn verify_node_labels(
    label: &str,
    node_labels: &BTreeMap<String, String>,
    adapter: &Arc<dyn ClusterClient>,
    pod: &Pod,
) -> Result<(), EngineError> {
    if node_labels.is_empty() || pod_phase(pod) != RUNNING_PHASE {
        return Ok(());
    }

    let pod_name = pod.metadata.name.as_deref().unwrap_or_default();
    let node_name = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.node_name.as_deref())
        .unwrap_or_default();

    let node = adapter
        .get_node(node_name)
        .await
        .map_err(|err| EngineError::adapter(label, err))?;
    let labels = node.metadata.labels.clone().unwrap_or_default();

    for (key, want) in node_labels {
        if labels.get(key) != Some(want) {
            return Err(EngineError::mismatch(
                label,
                format!(
                    "pod '{pod_name}' was scheduled on node '{node_name}' without label '{key}={want}'"
                ),
            ));
        }
        debug!(pod = %pod_name, node = %node_name, label = %format!("{key}={want}"), "label verified");
    }

    Ok(())
}

fn pod_phase(pod: &Pod) -> String {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.clone())
        .unwrap_or_default()
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
