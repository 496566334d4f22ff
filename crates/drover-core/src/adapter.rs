//! The seam between the engine and a concrete cluster API client.
//!
//! Tasks only ever see `Arc<dyn ClusterClient>`. The production
//! implementation lives in `drover-kube`; tests inject an in-memory fake.
//! The engine never inspects which one it was given.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Cluster-API failures, carrying the underlying message.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    #[error("cluster api error: {0}")]
    Api(String),

    #[error("malformed object payload: {0}")]
    Payload(String),
}

impl AdapterError {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

/// Group/version/resource triple identifying a class of cluster objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Gvr {
    /// Empty for the core API group.
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl Gvr {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }

    /// The `apiVersion` form: `group/version`, or bare `version` for the
    /// core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for Gvr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.resource)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodEventKind {
    Added,
    Updated,
}

/// One delivery from a pod subscription.
#[derive(Debug, Clone)]
pub struct PodEvent {
    pub kind: PodEventKind,
    pub pod: Pod,
}

/// An armed pod-event subscription.
///
/// Dropping the watch aborts the pump task feeding it, so the underlying
/// subscription is released on every exit path of the consuming task.
pub struct PodWatch {
    events: mpsc::Receiver<PodEvent>,
    pump: Option<JoinHandle<()>>,
}

impl PodWatch {
    pub fn new(events: mpsc::Receiver<PodEvent>, pump: JoinHandle<()>) -> Self {
        Self {
            events,
            pump: Some(pump),
        }
    }

    /// Receive the next event; `None` means the subscription ended.
    pub async fn recv(&mut self) -> Option<PodEvent> {
        self.events.recv().await
    }
}

impl Drop for PodWatch {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl fmt::Debug for PodWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PodWatch").finish_non_exhaustive()
    }
}

/// The cluster operations the engine invokes.
///
/// Dynamic operations are keyed by [`Gvr`] and exchange plain JSON payloads;
/// pod and node operations use the typed API objects.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create_object(
        &self,
        gvr: &Gvr,
        namespace: &str,
        manifest: &Value,
    ) -> Result<(), AdapterError>;

    async fn patch_object(
        &self,
        gvr: &Gvr,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<(), AdapterError>;

    async fn get_object(
        &self,
        gvr: &Gvr,
        namespace: &str,
        name: &str,
    ) -> Result<Value, AdapterError>;

    /// Deleting an object that is already gone is not an error.
    async fn delete_object(
        &self,
        gvr: &Gvr,
        namespace: &str,
        name: &str,
    ) -> Result<(), AdapterError>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, AdapterError>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, AdapterError>;

    async fn list_nodes(&self) -> Result<Vec<Node>, AdapterError>;

    async fn get_node(&self, name: &str) -> Result<Node, AdapterError>;

    async fn patch_node(&self, name: &str, patch: &Value) -> Result<(), AdapterError>;

    /// Arm a namespace-scoped pod subscription delivering Added/Updated
    /// events, re-delivering current state every `resync`.
    async fn watch_pods(&self, namespace: &str, resync: Duration)
        -> Result<PodWatch, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gvr_api_version_forms() {
        let core = Gvr::new("", "v1", "pods");
        assert_eq!(core.api_version(), "v1");
        assert_eq!(core.to_string(), "v1/pods");

        let batch = Gvr::new("batch", "v1", "jobs");
        assert_eq!(batch.api_version(), "batch/v1");
        assert_eq!(batch.to_string(), "batch/v1/jobs");
    }

    #[test]
    fn test_gvr_group_defaults_to_core() {
        let gvr: Gvr = serde_yaml::from_str("version: v1\nresource: pods\n").expect("parse");
        assert_eq!(gvr, Gvr::new("", "v1", "pods"));
    }
}
