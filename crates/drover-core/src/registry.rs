//! Run-scoped object registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::adapter::Gvr;
use crate::error::EngineError;

/// What a SubmitObj task produced: the resource class, the namespace, the
/// created object names, and the pod names those objects are expected to
/// spawn. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjInfo {
    pub gvr: Gvr,
    pub namespace: String,
    pub names: Vec<String>,
    pub pods: Vec<String>,
}

/// Mapping from task id to the objects that task produced.
///
/// The registry is the only state shared across tasks; every access holds a
/// single exclusive guard. Entries live until the engine is dropped.
#[derive(Debug, Default)]
pub struct ObjRegistry {
    entries: Mutex<HashMap<String, Arc<ObjInfo>>>,
}

impl ObjRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task_id: &str, info: ObjInfo) -> Result<(), EngineError> {
        let mut entries = self.guard();
        if entries.contains_key(task_id) {
            return Err(EngineError::DuplicateId(task_id.to_string()));
        }
        entries.insert(task_id.to_string(), Arc::new(info));
        Ok(())
    }

    pub fn get(&self, task_id: &str) -> Result<Arc<ObjInfo>, EngineError> {
        self.guard()
            .get(task_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownId(task_id.to_string()))
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.guard().contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, Arc<ObjInfo>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
