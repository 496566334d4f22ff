//! kube-rs backed implementation of the engine's cluster-client seam.
//!
//! Dynamic objects go through `Api<DynamicObject>` with an `ApiResource`
//! derived from the task's GVR; pods and nodes use the typed core-v1 APIs.
//! Pod subscriptions are pumped from `kube::runtime::watcher` with a
//! periodic re-list for resync.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::runtime::watcher;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use drover_core::adapter::{AdapterError, ClusterClient, Gvr, PodEvent, PodEventKind, PodWatch};

/// Cluster client backed by a `kube::Client`.
pub struct KubeCluster {
    client: kube::Client,
}

impl KubeCluster {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig/in-cluster configuration.
    pub async fn connect() -> Result<Self, AdapterError> {
        let client = kube::Client::try_default().await.map_err(api_error)?;
        Ok(Self::new(client))
    }

    fn dynamic_api(&self, gvr: &Gvr, namespace: &str, kind: Option<&str>) -> Api<DynamicObject> {
        let ar = api_resource(gvr, kind);
        Api::namespaced_with(self.client.clone(), namespace, &ar)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }
}

fn api_resource(gvr: &Gvr, kind: Option<&str>) -> ApiResource {
    ApiResource {
        group: gvr.group.clone(),
        version: gvr.version.clone(),
        api_version: gvr.api_version(),
        kind: kind
            .map(str::to_string)
            .unwrap_or_else(|| kind_from_resource(&gvr.resource)),
        plural: gvr.resource.clone(),
    }
}

/// Best-effort singular Kind from a plural resource name. Only used when
/// the manifest carries no `kind`; the API path is built from the plural,
/// so this never affects routing.
fn kind_from_resource(resource: &str) -> String {
    let singular = resource.strip_suffix('s').unwrap_or(resource);
    let mut chars = singular.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn api_error(err: kube::Error) -> AdapterError {
    AdapterError::Api(err.to_string())
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn create_object(
        &self,
        gvr: &Gvr,
        namespace: &str,
        manifest: &Value,
    ) -> Result<(), AdapterError> {
        let kind = manifest.get("kind").and_then(Value::as_str);
        let obj: DynamicObject = serde_json::from_value(manifest.clone())
            .map_err(|err| AdapterError::Payload(err.to_string()))?;

        let api = self.dynamic_api(gvr, namespace, kind);
        let created = api
            .create(&PostParams::default(), &obj)
            .await
            .map_err(api_error)?;
        debug!(gvr = %gvr, name = ?created.metadata.name, "created object");
        Ok(())
    }

    async fn patch_object(
        &self,
        gvr: &Gvr,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<(), AdapterError> {
        let kind = patch.get("kind").and_then(Value::as_str);
        let api = self.dynamic_api(gvr, namespace, kind);
        api.patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn get_object(
        &self,
        gvr: &Gvr,
        namespace: &str,
        name: &str,
    ) -> Result<Value, AdapterError> {
        let api = self.dynamic_api(gvr, namespace, None);
        match api.get(name).await {
            Ok(obj) => {
                serde_json::to_value(&obj).map_err(|err| AdapterError::Payload(err.to_string()))
            }
            Err(err) if is_not_found(&err) => {
                Err(AdapterError::not_found(gvr.resource.clone(), name))
            }
            Err(err) => Err(api_error(err)),
        }
    }

    async fn delete_object(
        &self,
        gvr: &Gvr,
        namespace: &str,
        name: &str,
    ) -> Result<(), AdapterError> {
        let api = self.dynamic_api(gvr, namespace, None);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            // Already gone: deletion is idempotent.
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(api_error(err)),
        }
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, AdapterError> {
        let list = self
            .pods(namespace)
            .list(&ListParams::default())
            .await
            .map_err(api_error)?;
        Ok(list.items)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, AdapterError> {
        match self.pods(namespace).get(name).await {
            Ok(pod) => Ok(pod),
            Err(err) if is_not_found(&err) => Err(AdapterError::not_found("pod", name)),
            Err(err) => Err(api_error(err)),
        }
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, AdapterError> {
        let list = self
            .nodes()
            .list(&ListParams::default())
            .await
            .map_err(api_error)?;
        Ok(list.items)
    }

    async fn get_node(&self, name: &str) -> Result<Node, AdapterError> {
        match self.nodes().get(name).await {
            Ok(node) => Ok(node),
            Err(err) if is_not_found(&err) => Err(AdapterError::not_found("node", name)),
            Err(err) => Err(api_error(err)),
        }
    }

    async fn patch_node(&self, name: &str, patch: &Value) -> Result<(), AdapterError> {
        self.nodes()
            .patch(name, &PatchParams::default(), &Patch::Strategic(patch))
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn watch_pods(
        &self,
        namespace: &str,
        resync: Duration,
    ) -> Result<PodWatch, AdapterError> {
        let api = self.pods(namespace);
        let (tx, rx) = mpsc::channel(64);
        let pump = tokio::spawn(pump_pod_events(api, resync, tx));
        Ok(PodWatch::new(rx, pump))
    }
}

async fn pump_pod_events(api: Api<Pod>, resync: Duration, tx: mpsc::Sender<PodEvent>) {
    let stream = watcher(api.clone(), watcher::Config::default());
    futures::pin_mut!(stream);

    let mut resync_tick = tokio::time::interval(resync);
    // interval fires immediately; the watcher's own init pass covers that.
    resync_tick.tick().await;

    loop {
        tokio::select! {
            event = stream.try_next() => match event {
                Ok(Some(watcher::Event::InitApply(pod))) => {
                    if tx.send(PodEvent { kind: PodEventKind::Added, pod }).await.is_err() {
                        return;
                    }
                }
                Ok(Some(watcher::Event::Apply(pod))) => {
                    if tx.send(PodEvent { kind: PodEventKind::Updated, pod }).await.is_err() {
                        return;
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) => return,
                // The watcher retries internally; log and keep consuming.
                Err(err) => warn!(error = %err, "pod watch error"),
            },
            _ = resync_tick.tick() => {
                match api.list(&ListParams::default()).await {
                    Ok(list) => {
                        for pod in list.items {
                            if tx.send(PodEvent { kind: PodEventKind::Updated, pod }).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(err) => warn!(error = %err, "pod resync list failed"),
                }
            }
        }
    }
}
