//! Kubesnap copies the contents of a Kubernetes namespace into a directory of json files, and
//! later recreates those objects in the same or a different namespace.
//!
//! Nine namespaced kinds are supported: persistent volume claims, pods, replica sets,
//! deployments, config maps, services, stateful sets, service accounts, and secrets. Each object
//! is written to its own file named after the kind and the object, like `pod-web-0.json`. A
//! restore never modifies or deletes anything: objects that already exist in the target
//! namespace are skipped, so restoring the same backup twice is harmless.
//!
//! The engine is written against two small traits, `ClusterApi` and `BackupStorage`, so it can be
//! driven directly:
//!
//! ```no_run
//! use kubesnap::prelude::*;
//! use std::path::Path;
//!
//! fn copy_namespace(cluster: &dyn ClusterApi) -> Result<(), kubesnap::engine::Error> {
//!     let storage = FsStorage;
//!     let backup_dir = Path::new("./backups/manual");
//!     storage.create_dir_all(backup_dir).expect("failed to create backup directory");
//!
//!     let engine = Engine::new(cluster, &storage);
//!     let backup = engine.run_backup("prod", backup_dir)?;
//!     println!("wrote {} files", backup.total_written());
//!
//!     let restore = engine.run_restore(backup_dir, "staging")?;
//!     println!("created {} objects", restore.total_created());
//!     Ok(())
//! }
//! ```
//!
//! The `kubesnap` binary wraps all of this in a small http api, see the `server` module.

#[macro_use]
extern crate serde_derive;

pub mod client;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod k8s_types;
pub mod kind;
pub mod metrics;
pub mod policy;
pub mod registry;
pub mod resource;
pub mod server;
pub mod service;
pub mod storage;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use serde_json;

pub mod prelude {
    pub use crate::cluster::{ClusterApi, ClusterError, KubeCluster};
    pub use crate::config::{ClientConfig, ServiceConfig};
    pub use crate::engine::{BackupReport, Engine, ExportReport, ImportReport, RestoreReport};
    pub use crate::k8s_types::{self, K8sType};
    pub use crate::kind::ResourceKind;
    pub use crate::policy::{policy_for, policy_for_tag, KindPolicy};
    pub use crate::resource::K8sResource;
    pub use crate::storage::{BackupStorage, FsStorage};
}
