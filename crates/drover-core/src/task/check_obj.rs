//! CheckObj: compare fields of previously submitted objects against
//! expected values, optionally polling until they match.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use drover_config::TaskSpec;

use crate::adapter::ClusterClient;
use crate::error::EngineError;
use crate::params;
use crate::registry::ObjRegistry;
use crate::task::{task_label, Runnable, TaskContext};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckObjParams {
    #[serde(rename = "refTaskId")]
    ref_task_id: String,
    /// Dotted field path (`spec.parallelism`) to expected value.
    expect: serde_yaml::Mapping,
    #[serde(default, with = "params::duration")]
    timeout: Duration,
}

pub struct CheckObjTask {
    label: String,
    ref_task_id: String,
    expect: Vec<(String, serde_json::Value)>,
    timeout: Duration,
    adapter: Arc<dyn ClusterClient>,
    registry: Arc<ObjRegistry>,
}

impl CheckObjTask {
    pub fn new(
        spec: &TaskSpec,
        adapter: Arc<dyn ClusterClient>,
        registry: Arc<ObjRegistry>,
    ) -> Result<Self, EngineError> {
        let label = task_label(spec.kind, &spec.id);
        let params: CheckObjParams = params::decode(&label, &spec.params)?;

        if params.ref_task_id.is_empty() {
            return Err(EngineError::validation(&label, "missing parameter 'refTaskId'"));
        }
        if params.expect.is_empty() {
            return Err(EngineError::validation(&label, "missing parameter 'expect'"));
        }

        let mut expect = Vec::with_capacity(params.expect.len());
        for (key, value) in &params.expect {
            let path = key
                .as_str()
                .ok_or_else(|| EngineError::validation(&label, "expect keys must be field paths"))?;
            let value: serde_json::Value = serde_yaml::from_value(value.clone())
                .map_err(|err| EngineError::validation(&label, format!("bad expect value: {err}")))?;
            expect.push((path.to_string(), value));
        }

        Ok(Self {
            label,
            ref_task_id: params.ref_task_id,
            expect,
            timeout: params.timeout,
            adapter,
            registry,
        })
    }

    pub(crate) fn ref_task_id(&self) -> &str {
        &self.ref_task_id
    }

    async fn check_once(&self) -> Result<(), EngineError> {
        let info = self.registry.get(&self.ref_task_id)?;

        for name in &info.names {
            let obj = self
                .adapter
                .get_object(&info.gvr, &info.namespace, name)
                .await
                .map_err(|err| EngineError::adapter(&self.label, err))?;

            for (path, want) in &self.expect {
                match lookup(&obj, path) {
                    Some(got) if got == want => {}
                    Some(got) => {
                        return Err(EngineError::mismatch(
                            &self.label,
                            format!("object '{name}': field '{path}' is {got}, expected {want}"),
                        ));
                    }
                    None => {
                        return Err(EngineError::mismatch(
                            &self.label,
                            format!("object '{name}': field '{path}' is absent, expected {want}"),
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Walk a dotted path through a JSON payload; numeric segments index arrays.
fn lookup<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[async_trait]
impl Runnable for CheckObjTask {
    fn label(&self) -> &str {
        &self.label
    }

    async fn exec(&self, ctx: &TaskContext) -> Result<(), EngineError> {
        if self.timeout.is_zero() {
            return self.check_once().await;
        }

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            match self.check_once().await {
                Ok(()) => return Ok(()),
                // Transient mismatches reconverge on the next poll; adapter
                // failures do not.
                Err(err @ EngineError::Adapter { .. }) => return Err(err),
                Err(err) => debug!(task = %self.label, error = %err, "objects not converged yet"),
            }

            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(EngineError::canceled(&self.label)),
                _ = &mut deadline => return Err(EngineError::timeout(&self.label, self.timeout)),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Gvr;
    use crate::registry::ObjInfo;
    use crate::testutil::{task_spec, FakeCluster};
    use drover_config::TaskKind;

    fn seeded(parallelism: i64) -> (Arc<FakeCluster>, Arc<ObjRegistry>) {
        let cluster = FakeCluster::new();
        let registry = Arc::new(ObjRegistry::new());
        let gvr = Gvr::new("batch", "v1", "jobs");
        cluster.put_object(
            &gvr,
            "default",
            "j0",
            serde_json::json!({"spec": {"parallelism": parallelism}}),
        );
        registry
            .insert(
                "job",
                ObjInfo {
                    gvr,
                    namespace: "default".to_string(),
                    names: vec!["j0".to_string()],
                    pods: Vec::new(),
                },
            )
            .expect("insert");
        (cluster, registry)
    }

    #[test]
    fn test_check_matches_expected_fields() {
        tokio_test::block_on(async {
            let (cluster, registry) = seeded(2);
            let spec = task_spec(
                TaskKind::CheckObj,
                "verify",
                "refTaskId: job\nexpect:\n  spec.parallelism: 2\n",
            );
            let task = CheckObjTask::new(&spec, cluster, registry).expect("task");
            task.exec(&TaskContext::new()).await.expect("exec");
        });
    }

    #[test]
    fn test_check_single_shot_mismatch_fails() {
        tokio_test::block_on(async {
            let (cluster, registry) = seeded(1);
            let spec = task_spec(
                TaskKind::CheckObj,
                "verify",
                "refTaskId: job\nexpect:\n  spec.parallelism: 2\n",
            );
            let task = CheckObjTask::new(&spec, cluster, registry).expect("task");
            let err = task.exec(&TaskContext::new()).await.unwrap_err();
            assert!(
                matches!(err, EngineError::Mismatch { ref detail, .. } if detail.contains("spec.parallelism"))
            );
        });
    }

    #[test]
    fn test_check_polls_until_deadline_then_times_out() {
        tokio_test::block_on(async {
            let (cluster, registry) = seeded(1);
            let spec = task_spec(
                TaskKind::CheckObj,
                "verify",
                "refTaskId: job\nexpect:\n  spec.parallelism: 2\ntimeout: 50ms\n",
            );
            let task = CheckObjTask::new(&spec, cluster, registry).expect("task");
            let err = task.exec(&TaskContext::new()).await.unwrap_err();
            assert!(matches!(err, EngineError::Timeout { .. }));
        });
    }

    #[test]
    fn test_check_requires_expectations() {
        let (cluster, registry) = seeded(1);
        let spec = task_spec(TaskKind::CheckObj, "verify", "refTaskId: job\nexpect: {}\n");
        assert!(CheckObjTask::new(&spec, cluster, registry).is_err());
    }

    #[test]
    fn test_lookup_traverses_maps_and_arrays() {
        let value = serde_json::json!({"a": {"b": [10, {"c": 42}]}});
        assert_eq!(lookup(&value, "a.b.0"), Some(&serde_json::json!(10)));
        assert_eq!(lookup(&value, "a.b.1.c"), Some(&serde_json::json!(42)));
        assert_eq!(lookup(&value, "a.x"), None);
    }
}
