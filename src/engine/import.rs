use super::{Error, ImportReport};
use crate::cluster::ClusterApi;
use crate::kind::ResourceKind;
use crate::policy::{ConflictCheck, Discovery, KindPolicy};
use crate::resource::K8sResource;
use crate::storage::{BackupStorage, StorageError};

use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub(crate) fn import(
    cluster: &dyn ClusterApi,
    storage: &dyn BackupStorage,
    policy: &KindPolicy,
    backup_dir: &Path,
    target_namespace: &str,
) -> Result<ImportReport, Error> {
    let kind = policy.kind;
    let candidates =
        discover(storage, policy, backup_dir).map_err(|err| Error::import_io(kind, backup_dir, err))?;
    log::debug!("Found {} candidate {} files in {}", candidates.len(), kind, backup_dir.display());

    let mut report = ImportReport::new(kind);
    let mut conflicts = Conflicts::new(cluster, policy.conflict_check, kind, target_namespace);
    for path in candidates {
        let bytes = storage
            .read_file(&path)
            .map_err(|err| Error::import_io(kind, path.as_path(), err))?;
        let mut object =
            K8sResource::from_slice(&bytes).map_err(|err| Error::import_io(kind, path.as_path(), err))?;

        let expected_kind = kind.k8s_type().kind;
        if let Some(declared) = object.kind() {
            if declared != expected_kind {
                log::debug!(
                    "Skipping {} while importing {}, since it contains a {}",
                    path.display(),
                    kind,
                    declared
                );
                report.skipped_foreign += 1;
                continue;
            }
        }

        (policy.import_normalize)(&mut object, target_namespace);
        object.set_type_if_missing(kind.k8s_type());
        let name = object.name().to_owned();

        if conflicts.exists(name.as_str())? {
            log::info!(
                "{} '{}' already exists in namespace '{}', skipping",
                kind,
                name,
                target_namespace
            );
            report.skipped_existing += 1;
            continue;
        }

        match cluster.create(kind, target_namespace, &object) {
            Ok(_) => {
                log::debug!("Created {} '{}' in namespace '{}'", kind, name, target_namespace);
                report.created += 1;
            }
            Err(err) if err.is_already_exists() => {
                log::warn!(
                    "{} '{}' was created in namespace '{}' by someone else during the restore, skipping",
                    kind,
                    name,
                    target_namespace
                );
                report.skipped_existing += 1;
            }
            Err(source) => return Err(Error::Create { kind, name, source }),
        }
        conflicts.created(name);
    }

    log::info!(
        "Imported {} {} objects into namespace '{}', skipped_existing: {}, skipped_foreign: {}",
        report.created,
        kind,
        target_namespace,
        report.skipped_existing,
        report.skipped_foreign
    );
    Ok(report)
}

/// Returns the files in `backup_dir` that may hold objects of the policy's kind, sorted by name
fn discover(
    storage: &dyn BackupStorage,
    policy: &KindPolicy,
    backup_dir: &Path,
) -> Result<Vec<PathBuf>, StorageError> {
    match policy.file_pattern.discovery {
        Discovery::Glob(pattern) => storage.glob(backup_dir, pattern),
        Discovery::PrefixScan(prefix) => regular_files(storage, backup_dir, |name| name.starts_with(prefix)),
        Discovery::FullScan => regular_files(storage, backup_dir, |_| true),
    }
}

fn regular_files<F: Fn(&str) -> bool>(
    storage: &dyn BackupStorage,
    dir: &Path,
    filter: F,
) -> Result<Vec<PathBuf>, StorageError> {
    let paths = storage
        .list_dir(dir)?
        .into_iter()
        .filter(|entry| !entry.is_dir && filter(entry.name.as_str()))
        .map(|entry| dir.join(entry.name))
        .collect();
    Ok(paths)
}

/// Answers whether an object with a given name is already present in the target namespace. A
/// list based check fetches the listing lazily, at most once per import.
struct Conflicts<'a> {
    cluster: &'a dyn ClusterApi,
    strategy: ConflictCheck,
    kind: ResourceKind,
    namespace: &'a str,
    listed: Option<HashSet<String>>,
}

impl<'a> Conflicts<'a> {
    fn new(
        cluster: &'a dyn ClusterApi,
        strategy: ConflictCheck,
        kind: ResourceKind,
        namespace: &'a str,
    ) -> Conflicts<'a> {
        Conflicts {
            cluster,
            strategy,
            kind,
            namespace,
            listed: None,
        }
    }

    fn exists(&mut self, name: &str) -> Result<bool, Error> {
        match self.strategy {
            ConflictCheck::ListScan => {
                if self.listed.is_none() {
                    let live = self.cluster.list(self.kind, self.namespace).map_err(|source| {
                        Error::ConflictCheck {
                            kind: self.kind,
                            name: name.to_owned(),
                            source,
                        }
                    })?;
                    let names = live.iter().map(|obj| obj.name().to_owned()).collect();
                    self.listed = Some(names);
                }
                Ok(self.listed.as_ref().map(|names| names.contains(name)).unwrap_or(false))
            }
            ConflictCheck::DirectGet => match self.cluster.get(self.kind, self.namespace, name) {
                Ok(_) => Ok(true),
                Err(err) if err.is_not_found() => Ok(false),
                Err(source) => Err(Error::ConflictCheck {
                    kind: self.kind,
                    name: name.to_owned(),
                    source,
                }),
            },
        }
    }

    /// Records an object that now exists, so that a second file with the same name is skipped
    fn created(&mut self, name: String) {
        if let Some(names) = self.listed.as_mut() {
            names.insert(name);
        }
    }
}
