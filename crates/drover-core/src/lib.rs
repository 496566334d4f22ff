//! # Drover Core
//!
//! The task engine behind drover: a state-carrying runtime that executes a
//! declarative task list against a cluster control plane.
//!
//! This crate contains:
//! - the uniform [`Runnable`](task::Runnable) capability and the seven task kinds
//! - the object registry mapping task ids to the objects they produced
//! - the template renderer for manifests, object names, and pod-name patterns
//! - the [`ClusterClient`](adapter::ClusterClient) seam to a concrete cluster API
//! - the [`Engine`](engine::Engine) driver that builds and runs tasks in order
//!
//! This crate does NOT care about:
//! - how the task list reached the process (see `drover-config`)
//! - which concrete client talks to the cluster (see `drover-kube`)
//! - how logging is subscribed or where credentials come from

pub mod adapter;
pub mod engine;
pub mod error;
pub mod params;
pub mod registry;
pub mod render;
pub mod task;

#[cfg(test)]
pub(crate) mod testutil;

pub use adapter::{AdapterError, ClusterClient, Gvr, PodEvent, PodEventKind, PodWatch};
pub use engine::Engine;
pub use error::EngineError;
pub use registry::{ObjInfo, ObjRegistry};
pub use task::{Runnable, TaskContext};
