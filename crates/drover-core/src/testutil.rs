//! In-memory cluster fake and fixture helpers shared by the task tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use drover_config::{TaskKind, TaskSpec};

use crate::adapter::{AdapterError, ClusterClient, Gvr, PodEvent, PodEventKind, PodWatch};

/// Manifest used by SubmitObj tests; consumes the `parallelism` override.
pub(crate) const JOB_TEMPLATE: &str = r#"apiVersion: batch/v1
kind: Job
metadata:
  name: "{{._NAME_}}"
  namespace: "{{.namespace}}"
spec:
  parallelism: {{.parallelism}}
"#;

pub(crate) fn write_template(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).expect("write template");
}

pub(crate) fn task_spec(kind: TaskKind, id: &str, params: &str) -> TaskSpec {
    let params = if params.trim().is_empty() {
        serde_yaml::Value::Null
    } else {
        serde_yaml::from_str(params).expect("params yaml")
    };
    TaskSpec {
        id: id.to_string(),
        kind,
        params,
    }
}

pub(crate) fn pod(name: &str, namespace: &str, phase: &str, node_name: Option<&str>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: node_name.map(str::to_string),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
    }
}

pub(crate) fn node(name: &str, labels: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}

type ObjectKey = (String, String, String);

/// In-memory `ClusterClient`: dynamic objects, pods, and nodes live in
/// maps; `put_pod` doubles as the event source for armed watches.
pub(crate) struct FakeCluster {
    objects: Mutex<HashMap<ObjectKey, Value>>,
    pods: Mutex<BTreeMap<(String, String), Pod>>,
    nodes: Mutex<BTreeMap<String, Node>>,
    fail_creates: Mutex<HashSet<String>>,
    pod_events: broadcast::Sender<Pod>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        let (pod_events, _) = broadcast::channel(64);
        Arc::new(Self {
            objects: Mutex::new(HashMap::new()),
            pods: Mutex::new(BTreeMap::new()),
            nodes: Mutex::new(BTreeMap::new()),
            fail_creates: Mutex::new(HashSet::new()),
            pod_events,
        })
    }

    /// Make the create of the object with this name fail.
    pub fn fail_create(&self, name: &str) {
        lock(&self.fail_creates).insert(name.to_string());
    }

    /// Insert or replace a pod and deliver it to armed watches.
    pub fn put_pod(&self, pod: Pod) {
        let key = (
            pod.metadata.namespace.clone().unwrap_or_default(),
            pod.metadata.name.clone().unwrap_or_default(),
        );
        lock(&self.pods).insert(key, pod.clone());
        let _ = self.pod_events.send(pod);
    }

    pub fn put_node(&self, node: Node) {
        let name = node.metadata.name.clone().unwrap_or_default();
        lock(&self.nodes).insert(name, node);
    }

    pub fn put_object(&self, gvr: &Gvr, namespace: &str, name: &str, manifest: Value) {
        lock(&self.objects).insert(object_key(gvr, namespace, name), manifest);
    }

    pub fn object(&self, gvr: &Gvr, namespace: &str, name: &str) -> Option<Value> {
        lock(&self.objects)
            .get(&object_key(gvr, namespace, name))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn node(&self, name: &str) -> Option<Node> {
        lock(&self.nodes).get(name).cloned()
    }
}

fn object_key(gvr: &Gvr, namespace: &str, name: &str) -> ObjectKey {
    (gvr.to_string(), namespace.to_string(), name.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("lock")
}

/// Merge-patch semantics: objects merge recursively, everything else is
/// replaced.
fn merge_json(base: &mut Value, patch: &Value) {
    if let (Value::Object(base_map), Value::Object(patch_map)) = (&mut *base, patch) {
        for (key, value) in patch_map {
            merge_json(base_map.entry(key.clone()).or_insert(Value::Null), value);
        }
    } else {
        *base = patch.clone();
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn create_object(
        &self,
        gvr: &Gvr,
        namespace: &str,
        manifest: &Value,
    ) -> Result<(), AdapterError> {
        let name = manifest["metadata"]["name"]
            .as_str()
            .ok_or_else(|| AdapterError::Payload("manifest has no metadata.name".to_string()))?
            .to_string();

        if lock(&self.fail_creates).contains(&name) {
            return Err(AdapterError::Api(format!(
                "injected failure creating '{name}'"
            )));
        }

        lock(&self.objects).insert(object_key(gvr, namespace, &name), manifest.clone());
        Ok(())
    }

    async fn patch_object(
        &self,
        gvr: &Gvr,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<(), AdapterError> {
        let mut objects = lock(&self.objects);
        let object = objects
            .get_mut(&object_key(gvr, namespace, name))
            .ok_or_else(|| AdapterError::not_found(gvr.resource.clone(), name))?;
        merge_json(object, patch);
        Ok(())
    }

    async fn get_object(
        &self,
        gvr: &Gvr,
        namespace: &str,
        name: &str,
    ) -> Result<Value, AdapterError> {
        lock(&self.objects)
            .get(&object_key(gvr, namespace, name))
            .cloned()
            .ok_or_else(|| AdapterError::not_found(gvr.resource.clone(), name))
    }

    async fn delete_object(
        &self,
        gvr: &Gvr,
        namespace: &str,
        name: &str,
    ) -> Result<(), AdapterError> {
        lock(&self.objects).remove(&object_key(gvr, namespace, name));
        Ok(())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, AdapterError> {
        Ok(lock(&self.pods)
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, AdapterError> {
        lock(&self.pods)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| AdapterError::not_found("pod", name))
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, AdapterError> {
        Ok(lock(&self.nodes).values().cloned().collect())
    }

    async fn get_node(&self, name: &str) -> Result<Node, AdapterError> {
        lock(&self.nodes)
            .get(name)
            .cloned()
            .ok_or_else(|| AdapterError::not_found("node", name))
    }

    async fn patch_node(&self, name: &str, patch: &Value) -> Result<(), AdapterError> {
        let mut nodes = lock(&self.nodes);
        let node = nodes
            .get_mut(name)
            .ok_or_else(|| AdapterError::not_found("node", name))?;

        let mut value = serde_json::to_value(&*node)
            .map_err(|err| AdapterError::Payload(err.to_string()))?;
        merge_json(&mut value, patch);
        *node = serde_json::from_value(value).map_err(|err| AdapterError::Payload(err.to_string()))?;
        Ok(())
    }

    async fn watch_pods(
        &self,
        namespace: &str,
        _resync: Duration,
    ) -> Result<PodWatch, AdapterError> {
        let mut events = self.pod_events.subscribe();
        let namespace = namespace.to_string();
        let (tx, rx) = mpsc::channel(64);

        let pump = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(pod) => {
                        if pod.metadata.namespace.as_deref() != Some(namespace.as_str()) {
                            continue;
                        }
                        if tx
                            .send(PodEvent {
                                kind: PodEventKind::Updated,
                                pod,
                            })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(PodWatch::new(rx, pump))
    }
}
