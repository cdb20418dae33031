//! The operations exposed by the HTTP api, independent of http itself. Every method here blocks
//! until the cluster and storage calls it makes have completed.
use crate::cluster::{ClusterApi, ClusterError};
use crate::config::ServiceConfig;
use crate::engine::{self, BackupReport, Engine, RestoreReport};
use crate::metrics::Metrics;
use crate::registry::{Application, Backup, DuplicateApplication, Registry};
use crate::storage::{BackupStorage, StorageError};

use lazy_static::lazy_static;
use regex::Regex;

use std::fmt::{self, Display};
use std::path::PathBuf;
use std::sync::Arc;

lazy_static! {
    /// Kubernetes namespace names are DNS-1123 labels
    static ref NAMESPACE_NAME: Regex = Regex::new(r"^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$").unwrap();
    /// Backup ids name a directory directly under the backup root
    static ref BACKUP_ID: Regex = Regex::new(r"^[A-Za-z0-9_-]{1,128}$").unwrap();
}

#[derive(Debug)]
pub enum ServiceError {
    InvalidRequest(String),
    DuplicateApplication(DuplicateApplication),
    UnknownApplication(String),
    UnknownBackup(String),
    NamespaceNotFound(String),
    Cluster(ClusterError),
    Storage(StorageError),
    Engine(engine::Error),
}

impl ServiceError {
    /// True if the request itself was at fault, as opposed to the cluster or the backup storage
    pub fn is_client_error(&self) -> bool {
        match self {
            ServiceError::InvalidRequest(_)
            | ServiceError::DuplicateApplication(_)
            | ServiceError::UnknownApplication(_)
            | ServiceError::UnknownBackup(_)
            | ServiceError::NamespaceNotFound(_) => true,
            _ => false,
        }
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ServiceError::InvalidRequest(ref msg) => f.write_str(msg),
            ServiceError::DuplicateApplication(ref e) => e.fmt(f),
            ServiceError::UnknownApplication(_) => f.write_str("Invalid app_id"),
            ServiceError::UnknownBackup(_) => f.write_str("Backup does not exist"),
            ServiceError::NamespaceNotFound(_) => f.write_str("Namespace does not exist"),
            ServiceError::Cluster(ref e) => e.fmt(f),
            ServiceError::Storage(ref e) => e.fmt(f),
            ServiceError::Engine(ref e) => e.fmt(f),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::Cluster(e) => Some(e as &(dyn std::error::Error + 'static)),
            ServiceError::Storage(e) => Some(e as &(dyn std::error::Error + 'static)),
            ServiceError::Engine(e) => Some(e as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<DuplicateApplication> for ServiceError {
    fn from(e: DuplicateApplication) -> ServiceError {
        ServiceError::DuplicateApplication(e)
    }
}
impl From<ClusterError> for ServiceError {
    fn from(e: ClusterError) -> ServiceError {
        ServiceError::Cluster(e)
    }
}
impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> ServiceError {
        ServiceError::Storage(e)
    }
}
impl From<engine::Error> for ServiceError {
    fn from(e: engine::Error) -> ServiceError {
        ServiceError::Engine(e)
    }
}

fn validate_namespace(namespace: &str) -> Result<(), ServiceError> {
    if NAMESPACE_NAME.is_match(namespace) {
        Ok(())
    } else {
        Err(ServiceError::InvalidRequest(format!("Invalid namespace name: '{}'", namespace)))
    }
}

pub struct SnapshotService {
    config: ServiceConfig,
    registry: Registry,
    metrics: Metrics,
    cluster: Arc<dyn ClusterApi>,
    storage: Arc<dyn BackupStorage>,
}

impl fmt::Debug for SnapshotService {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SnapshotService")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

impl SnapshotService {
    pub fn new(
        config: ServiceConfig,
        metrics: Metrics,
        cluster: Arc<dyn ClusterApi>,
        storage: Arc<dyn BackupStorage>,
    ) -> SnapshotService {
        SnapshotService {
            config,
            registry: Registry::new(),
            metrics,
            cluster,
            storage,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn engine(&self) -> Engine<'_> {
        Engine::new(self.cluster.as_ref(), self.storage.as_ref())
    }

    pub fn define_application(&self, name: &str, namespace: &str) -> Result<Application, ServiceError> {
        if name.is_empty() {
            return Err(ServiceError::InvalidRequest("Application name must not be empty".to_owned()));
        }
        validate_namespace(namespace)?;
        let app = self.registry.define_application(name, namespace)?;
        Ok(app)
    }

    /// Backs up the application's namespace into a new directory under the backup root. The
    /// backup is only recorded if every kind was exported successfully.
    pub fn backup(&self, app_id: &str) -> Result<(Backup, BackupReport), ServiceError> {
        let app = self
            .registry
            .application(app_id)
            .ok_or_else(|| ServiceError::UnknownApplication(app_id.to_owned()))?;

        let (backup_id, backup_dir) = self.allocate_backup_dir();
        self.storage.create_dir_all(&backup_dir)?;

        self.metrics.backup_started();
        let report = match self.engine().run_backup(&app.namespace, &backup_dir) {
            Ok(report) => report,
            Err(err) => {
                log::error!("Backup {} of application {} failed: {}", backup_id, app.app_id, err);
                self.metrics.backup_failed();
                return Err(err.into());
            }
        };
        self.metrics.backup_finished(&report);

        let backup = self.registry.record_backup(&backup_id, &app.app_id);
        Ok((backup, report))
    }

    /// Returns the next backup id whose directory doesn't exist yet. The counter starts over
    /// whenever the process restarts, but the directories under the backup root don't.
    fn allocate_backup_dir(&self) -> (String, PathBuf) {
        loop {
            let backup_id = self.registry.next_backup_id();
            let backup_dir = self.config.backup_dir(&backup_id);
            if !self.storage.exists(&backup_dir) {
                return (backup_id, backup_dir);
            }
            log::debug!("Not using backup id {}, since {} already exists", backup_id, backup_dir.display());
        }
    }

    /// Restores a backup into an existing namespace. The backup does not have to be known to
    /// the registry, as long as its directory exists under the backup root.
    pub fn restore(&self, backup_id: &str, namespace: &str) -> Result<RestoreReport, ServiceError> {
        if !BACKUP_ID.is_match(backup_id) {
            return Err(ServiceError::InvalidRequest(format!("Invalid backup_id: '{}'", backup_id)));
        }
        validate_namespace(namespace)?;
        if !self.cluster.namespace_exists(namespace)? {
            return Err(ServiceError::NamespaceNotFound(namespace.to_owned()));
        }
        let backup_dir = self.config.backup_dir(backup_id);
        if !self.storage.exists(&backup_dir) {
            return Err(ServiceError::UnknownBackup(backup_id.to_owned()));
        }

        self.metrics.restore_started();
        match self.engine().run_restore(&backup_dir, namespace) {
            Ok(report) => {
                self.metrics.restore_finished(&report);
                Ok(report)
            }
            Err(err) => {
                log::error!("Restore of {} into namespace '{}' failed: {}", backup_id, namespace, err);
                self.metrics.restore_failed();
                Err(err.into())
            }
        }
    }
}
