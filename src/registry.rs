//! Keeps track of the applications that have been defined and the backups that were taken of
//! them. The registry lives only in memory, so it starts out empty every time the process
//! starts. Backup directories outlive it, which is why a restore only needs the backup id.
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A named application, which is backed up by capturing its entire namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub app_id: String,
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub backup_id: String,
    pub app_id: String,
}

/// Returned when an application with the same name and namespace was already defined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateApplication {
    pub existing_app_id: String,
}

impl Display for DuplicateApplication {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Application with same name and namespace already exists")
    }
}

impl std::error::Error for DuplicateApplication {}

#[derive(Debug, Default)]
struct RegistryState {
    app_counter: u64,
    backup_counter: u64,
    apps: HashMap<String, Application>,
    /// app ids keyed by `<name>_<namespace>`
    apps_by_key: HashMap<String, String>,
    backups: HashMap<String, Backup>,
}

#[derive(Debug, Default)]
pub struct Registry {
    state: Mutex<RegistryState>,
}

fn app_key(name: &str, namespace: &str) -> String {
    format!("{}_{}", name, namespace)
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    // every update leaves the state consistent, so a poisoned lock is still usable
    fn lock(&self) -> MutexGuard<RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn define_application(&self, name: &str, namespace: &str) -> Result<Application, DuplicateApplication> {
        let key = app_key(name, namespace);
        let mut state = self.lock();
        if let Some(existing) = state.apps_by_key.get(&key) {
            return Err(DuplicateApplication {
                existing_app_id: existing.clone(),
            });
        }

        state.app_counter += 1;
        let app = Application {
            app_id: format!("app_{}", state.app_counter),
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        };
        state.apps_by_key.insert(key, app.app_id.clone());
        state.apps.insert(app.app_id.clone(), app.clone());
        log::info!("Defined application {} as '{}' in namespace '{}'", app.app_id, name, namespace);
        Ok(app)
    }

    pub fn application(&self, app_id: &str) -> Option<Application> {
        self.lock().apps.get(app_id).cloned()
    }

    /// Allocates the id for a new backup. Ids are never reused within a process, even if the
    /// backup fails. Callers must still check for directories left by an earlier process.
    pub fn next_backup_id(&self) -> String {
        let mut state = self.lock();
        state.backup_counter += 1;
        format!("backup_{}", state.backup_counter)
    }

    pub fn record_backup(&self, backup_id: &str, app_id: &str) -> Backup {
        let backup = Backup {
            backup_id: backup_id.to_owned(),
            app_id: app_id.to_owned(),
        };
        self.lock().backups.insert(backup_id.to_owned(), backup.clone());
        backup
    }

    pub fn backup(&self, backup_id: &str) -> Option<Backup> {
        self.lock().backups.get(backup_id).cloned()
    }
}
