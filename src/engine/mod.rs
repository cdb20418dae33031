//! The backup and restore engine. Both directions are generic drivers that get all of their
//! kind specific behavior from the `KindPolicy` table:
//!
//! - `Engine::export` lists the live objects of one kind in a namespace and writes each one to
//!   its own file in the backup directory.
//! - `Engine::import` reads the files for one kind from a backup directory, rewrites them for the
//!   target namespace, and creates whichever objects don't already exist there.
//! - `Engine::run_backup` and `Engine::run_restore` do the same for every kind.
//!
//! Everything stops at the first error. Files already written by an export are left in place,
//! and objects already created by an import are left in the cluster. Both operations are safe to
//! run again.
mod export;
mod import;

use crate::cluster::{ClusterApi, ClusterError};
use crate::kind::{ResourceKind, UnknownKind};
use crate::policy::{self, KindPolicy};
use crate::storage::{BackupStorage, StorageError};

use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

/// The underlying reason that reading or writing backup data failed
#[derive(Debug)]
pub enum IoCause {
    Cluster(ClusterError),
    Storage(StorageError),
    Serialization(serde_json::Error),
}

impl Display for IoCause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            IoCause::Cluster(ref e) => write!(f, "list failed: {}", e),
            IoCause::Storage(ref e) => e.fmt(f),
            IoCause::Serialization(ref e) => write!(f, "invalid json: {}", e),
        }
    }
}

impl IoCause {
    fn as_error(&self) -> &(dyn std::error::Error + 'static) {
        match self {
            IoCause::Cluster(e) => e,
            IoCause::Storage(e) => e,
            IoCause::Serialization(e) => e,
        }
    }
}

impl From<ClusterError> for IoCause {
    fn from(e: ClusterError) -> IoCause {
        IoCause::Cluster(e)
    }
}
impl From<StorageError> for IoCause {
    fn from(e: StorageError) -> IoCause {
        IoCause::Storage(e)
    }
}
impl From<serde_json::Error> for IoCause {
    fn from(e: serde_json::Error) -> IoCause {
        IoCause::Serialization(e)
    }
}

#[derive(Debug)]
pub enum Error {
    UnknownKind(UnknownKind),
    ExportIo {
        kind: ResourceKind,
        cause: IoCause,
    },
    ImportIo {
        kind: ResourceKind,
        path: PathBuf,
        cause: IoCause,
    },
    ConflictCheck {
        kind: ResourceKind,
        name: String,
        source: ClusterError,
    },
    Create {
        kind: ResourceKind,
        name: String,
        source: ClusterError,
    },
}

impl Error {
    pub fn export_io(kind: ResourceKind, cause: impl Into<IoCause>) -> Error {
        Error::ExportIo {
            kind,
            cause: cause.into(),
        }
    }

    pub fn import_io(kind: ResourceKind, path: impl Into<PathBuf>, cause: impl Into<IoCause>) -> Error {
        Error::ImportIo {
            kind,
            path: path.into(),
            cause: cause.into(),
        }
    }

    /// The kind that was being processed when the error happened
    pub fn kind(&self) -> Option<ResourceKind> {
        match *self {
            Error::UnknownKind(_) => None,
            Error::ExportIo { kind, .. }
            | Error::ImportIo { kind, .. }
            | Error::ConflictCheck { kind, .. }
            | Error::Create { kind, .. } => Some(kind),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::UnknownKind(ref e) => e.fmt(f),
            Error::ExportIo { kind, ref cause } => write!(f, "failed to export {}: {}", kind, cause),
            Error::ImportIo {
                kind,
                ref path,
                ref cause,
            } => write!(
                f,
                "failed to read {} backup from {}: {}",
                kind,
                path.display(),
                cause
            ),
            Error::ConflictCheck {
                kind,
                ref name,
                ref source,
            } => write!(f, "failed to check for existing {} '{}': {}", kind, name, source),
            Error::Create {
                kind,
                ref name,
                ref source,
            } => write!(f, "failed to create {} '{}': {}", kind, name, source),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::UnknownKind(e) => Some(e as &(dyn std::error::Error + 'static)),
            Error::ExportIo { cause, .. } | Error::ImportIo { cause, .. } => Some(cause.as_error()),
            Error::ConflictCheck { source, .. } | Error::Create { source, .. } => {
                Some(source as &(dyn std::error::Error + 'static))
            }
        }
    }
}

impl From<UnknownKind> for Error {
    fn from(e: UnknownKind) -> Error {
        Error::UnknownKind(e)
    }
}

/// The outcome of exporting a single kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub kind: ResourceKind,
    pub written: usize,
    /// Objects whose file was already present, for kinds that don't overwrite
    pub skipped_existing: usize,
    /// Objects that are never backed up, like the cluster's root CA config map
    pub excluded: usize,
}

impl ExportReport {
    fn new(kind: ResourceKind) -> ExportReport {
        ExportReport {
            kind,
            written: 0,
            skipped_existing: 0,
            excluded: 0,
        }
    }
}

/// The outcome of importing a single kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub kind: ResourceKind,
    pub created: usize,
    /// Objects that were already present in the target namespace
    pub skipped_existing: usize,
    /// Candidate files whose payload declared a different kind
    pub skipped_foreign: usize,
}

impl ImportReport {
    fn new(kind: ResourceKind) -> ImportReport {
        ImportReport {
            kind,
            created: 0,
            skipped_existing: 0,
            skipped_foreign: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackupReport {
    pub kinds: Vec<ExportReport>,
}

impl BackupReport {
    pub fn total_written(&self) -> usize {
        self.kinds.iter().map(|k| k.written).sum()
    }

    pub fn for_kind(&self, kind: ResourceKind) -> Option<&ExportReport> {
        self.kinds.iter().find(|k| k.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RestoreReport {
    pub kinds: Vec<ImportReport>,
}

impl RestoreReport {
    pub fn total_created(&self) -> usize {
        self.kinds.iter().map(|k| k.created).sum()
    }

    pub fn for_kind(&self, kind: ResourceKind) -> Option<&ImportReport> {
        self.kinds.iter().find(|k| k.kind == kind)
    }
}

/// Runs exports and imports against a cluster and a backup store. An `Engine` is cheap to
/// create, holds no state of its own, and performs every call on the current thread.
#[derive(Clone, Copy)]
pub struct Engine<'a> {
    cluster: &'a dyn ClusterApi,
    storage: &'a dyn BackupStorage,
}

impl<'a> Engine<'a> {
    pub fn new(cluster: &'a dyn ClusterApi, storage: &'a dyn BackupStorage) -> Engine<'a> {
        Engine { cluster, storage }
    }

    /// Writes every object of the given kind in `namespace` to `backup_dir`, which must already exist
    pub fn export(&self, kind: ResourceKind, namespace: &str, backup_dir: &Path) -> Result<ExportReport, Error> {
        self.export_with_policy(policy::policy_for(kind), namespace, backup_dir)
    }

    /// Same as `export`, but takes the kind's file name tag, like `configmap`
    pub fn export_tag(&self, tag: &str, namespace: &str, backup_dir: &Path) -> Result<ExportReport, Error> {
        let policy = policy::policy_for_tag(tag)?;
        self.export_with_policy(policy, namespace, backup_dir)
    }

    pub fn export_with_policy(
        &self,
        policy: &KindPolicy,
        namespace: &str,
        backup_dir: &Path,
    ) -> Result<ExportReport, Error> {
        export::export(self.cluster, self.storage, policy, namespace, backup_dir)
    }

    /// Creates the objects of the given kind from `backup_dir` in `target_namespace`, skipping any
    /// that already exist there
    pub fn import(&self, kind: ResourceKind, backup_dir: &Path, target_namespace: &str) -> Result<ImportReport, Error> {
        self.import_with_policy(policy::policy_for(kind), backup_dir, target_namespace)
    }

    /// Same as `import`, but takes the kind's file name tag, like `configmap`
    pub fn import_tag(&self, tag: &str, backup_dir: &Path, target_namespace: &str) -> Result<ImportReport, Error> {
        let policy = policy::policy_for_tag(tag)?;
        self.import_with_policy(policy, backup_dir, target_namespace)
    }

    pub fn import_with_policy(
        &self,
        policy: &KindPolicy,
        backup_dir: &Path,
        target_namespace: &str,
    ) -> Result<ImportReport, Error> {
        import::import(self.cluster, self.storage, policy, backup_dir, target_namespace)
    }

    /// Exports every kind, stopping at the first error
    pub fn run_backup(&self, namespace: &str, backup_dir: &Path) -> Result<BackupReport, Error> {
        log::info!("Starting backup of namespace '{}' to {}", namespace, backup_dir.display());
        let mut report = BackupReport::default();
        for policy in policy::policies_by_rank() {
            let kind_report = self.export_with_policy(policy, namespace, backup_dir)?;
            report.kinds.push(kind_report);
        }
        log::info!(
            "Finished backup of namespace '{}' to {}, wrote {} files",
            namespace,
            backup_dir.display(),
            report.total_written()
        );
        Ok(report)
    }

    /// Imports every kind, stopping at the first error
    pub fn run_restore(&self, backup_dir: &Path, target_namespace: &str) -> Result<RestoreReport, Error> {
        log::info!(
            "Starting restore of {} into namespace '{}'",
            backup_dir.display(),
            target_namespace
        );
        let mut report = RestoreReport::default();
        for policy in policy::policies_by_rank() {
            let kind_report = self.import_with_policy(policy, backup_dir, target_namespace)?;
            report.kinds.push(kind_report);
        }
        log::info!(
            "Finished restore of {} into namespace '{}', created {} objects",
            backup_dir.display(),
            target_namespace,
            report.total_created()
        );
        Ok(report)
    }
}
