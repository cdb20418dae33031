//! In-memory stand-ins for a cluster and for backup storage, so that backups and restores can be
//! exercised without an api server. Only available in tests, or with the `testkit` feature enabled.
//!
//! These types panic on poisoned locks and on objects that aren't valid resources, since they're
//! only ever used from tests.
use crate::cluster::{ClusterApi, ClusterError};
use crate::kind::ResourceKind;
use crate::resource::{K8sResource, ObjectId};
use crate::storage::{BackupStorage, DirEntry, StorageError};

use serde::Serialize;
use serde_json::Value;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Converts test fixtures, like the structs from `k8s_openapi`, into json
pub trait ToJson {
    fn to_json(&self) -> Value;
    fn into_json(self) -> Value;
}

impl<T: Serialize + Clone> ToJson for T {
    fn to_json(&self) -> Value {
        self.clone().into_json()
    }
    fn into_json(self) -> Value {
        serde_json::to_value(self).expect("failed to serialize value")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Operation {
    List,
    Get,
    Create,
}

#[derive(Debug, Default)]
struct ClusterState {
    objects: BTreeMap<(ResourceKind, ObjectId), K8sResource>,
    namespaces: BTreeSet<String>,
    failures: HashMap<(Operation, ResourceKind), ClusterError>,
    calls: HashMap<(Operation, ResourceKind), usize>,
    create_requests: Vec<(ResourceKind, K8sResource)>,
}

impl ClusterState {
    fn record_call(&mut self, op: Operation, kind: ResourceKind) -> Result<(), ClusterError> {
        *self.calls.entry((op, kind)).or_insert(0) += 1;
        match self.failures.get(&(op, kind)) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// A `ClusterApi` that keeps objects in memory. Objects are stored exactly as they were inserted
/// or created, with `apiVersion` and `kind` filled in the way a list response from a real api
/// server would.
#[derive(Debug, Default)]
pub struct FakeCluster {
    state: RwLock<ClusterState>,
}

impl FakeCluster {
    pub fn new() -> FakeCluster {
        FakeCluster::default()
    }

    pub fn add_namespace(&self, namespace: &str) {
        let mut state = self.state.write().unwrap();
        state.namespaces.insert(namespace.to_owned());
    }

    /// Adds an existing object to the cluster, along with its namespace
    pub fn insert(&self, kind: ResourceKind, object: impl ToJson) {
        let mut resource = K8sResource::from_value(object.into_json()).expect("invalid test resource");
        resource.set_type_if_missing(kind.k8s_type());
        let namespace = resource.namespace().unwrap_or_default().to_owned();
        let id = ObjectId::new(namespace.as_str(), resource.name());

        let mut state = self.state.write().unwrap();
        state.namespaces.insert(namespace);
        state.objects.insert((kind, id), resource);
    }

    /// Makes every subsequent `list` of the kind fail with the given error
    pub fn fail_list(&self, kind: ResourceKind, error: ClusterError) {
        self.fail(Operation::List, kind, error);
    }

    pub fn fail_get(&self, kind: ResourceKind, error: ClusterError) {
        self.fail(Operation::Get, kind, error);
    }

    pub fn fail_create(&self, kind: ResourceKind, error: ClusterError) {
        self.fail(Operation::Create, kind, error);
    }

    fn fail(&self, op: Operation, kind: ResourceKind, error: ClusterError) {
        let mut state = self.state.write().unwrap();
        state.failures.insert((op, kind), error);
    }

    pub fn list_calls(&self, kind: ResourceKind) -> usize {
        self.calls(Operation::List, kind)
    }

    pub fn get_calls(&self, kind: ResourceKind) -> usize {
        self.calls(Operation::Get, kind)
    }

    fn calls(&self, op: Operation, kind: ResourceKind) -> usize {
        let state = self.state.read().unwrap();
        state.calls.get(&(op, kind)).copied().unwrap_or(0)
    }

    /// Every object that was passed to `create`, in order, including the ones that failed
    pub fn create_requests(&self) -> Vec<(ResourceKind, K8sResource)> {
        let state = self.state.read().unwrap();
        state.create_requests.clone()
    }

    /// Returns a copy of every object in the cluster
    pub fn snapshot(&self) -> BTreeMap<(ResourceKind, ObjectId), K8sResource> {
        let state = self.state.read().unwrap();
        state.objects.clone()
    }

    /// Returns every object of the kind in the namespace, sorted by name
    pub fn objects(&self, kind: ResourceKind, namespace: &str) -> Vec<K8sResource> {
        let state = self.state.read().unwrap();
        state
            .objects
            .iter()
            .filter(|((k, id), _)| *k == kind && id.namespace == namespace)
            .map(|(_, obj)| obj.clone())
            .collect()
    }
}

impl ClusterApi for FakeCluster {
    fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<K8sResource>, ClusterError> {
        self.state.write().unwrap().record_call(Operation::List, kind)?;
        Ok(self.objects(kind, namespace))
    }

    fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<K8sResource, ClusterError> {
        let mut state = self.state.write().unwrap();
        state.record_call(Operation::Get, kind)?;
        state
            .objects
            .get(&(kind, ObjectId::new(namespace, name)))
            .cloned()
            .ok_or(ClusterError::NotFound)
    }

    fn create(
        &self,
        kind: ResourceKind,
        namespace: &str,
        resource: &K8sResource,
    ) -> Result<K8sResource, ClusterError> {
        let mut state = self.state.write().unwrap();
        state.create_requests.push((kind, resource.clone()));
        state.record_call(Operation::Create, kind)?;

        let key = (kind, ObjectId::new(namespace, resource.name()));
        if state.objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists);
        }
        let mut created = resource.clone();
        created.set_type_if_missing(kind.k8s_type());
        state.objects.insert(key, created.clone());
        Ok(created)
    }

    fn namespace_exists(&self, namespace: &str) -> Result<bool, ClusterError> {
        let state = self.state.read().unwrap();
        Ok(state.namespaces.contains(namespace))
    }
}

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

/// A `BackupStorage` that keeps a tree of directories and files in memory. Like a real
/// filesystem, a file can only be written into a directory that already exists.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    nodes: RwLock<BTreeMap<PathBuf, Node>>,
}

fn not_a_directory(path: &Path) -> StorageError {
    StorageError::Io {
        path: path.to_owned(),
        source: io::Error::new(io::ErrorKind::Other, "not a directory"),
    }
}

impl MemoryStorage {
    pub fn new() -> MemoryStorage {
        MemoryStorage::default()
    }

    /// Creates a new storage that already contains the given directory
    pub fn with_dir(dir: impl AsRef<Path>) -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage
            .create_dir_all(dir.as_ref())
            .expect("failed to create directory");
        storage
    }

    /// Names of the regular files in `dir`, sorted. Empty if the directory doesn't exist.
    pub fn file_names(&self, dir: &Path) -> Vec<String> {
        self.list_dir(dir)
            .map(|entries| {
                entries
                    .into_iter()
                    .filter(|entry| !entry.is_dir)
                    .map(|entry| entry.name)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn is_dir(nodes: &BTreeMap<PathBuf, Node>, path: &Path) -> bool {
        match nodes.get(path) {
            Some(Node::Dir) => true,
            Some(Node::File(_)) => false,
            // the root always exists
            None => path.parent().is_none() || path.as_os_str().is_empty(),
        }
    }
}

impl BackupStorage for MemoryStorage {
    fn create_dir_all(&self, path: &Path) -> Result<(), StorageError> {
        let mut nodes = self.nodes.write().unwrap();
        for ancestor in path.ancestors().filter(|p| !p.as_os_str().is_empty()) {
            match nodes.get(ancestor) {
                Some(Node::File(_)) => return Err(not_a_directory(ancestor)),
                Some(Node::Dir) => {}
                None => {
                    nodes.insert(ancestor.to_owned(), Node::Dir);
                }
            }
        }
        Ok(())
    }

    fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let mut nodes = self.nodes.write().unwrap();
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        if !MemoryStorage::is_dir(&nodes, parent) {
            return Err(StorageError::NotFound(path.to_owned()));
        }
        if let Some(Node::Dir) = nodes.get(path) {
            return Err(StorageError::Io {
                path: path.to_owned(),
                source: io::Error::new(io::ErrorKind::Other, "is a directory"),
            });
        }
        nodes.insert(path.to_owned(), Node::File(bytes.to_vec()));
        Ok(())
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
        let nodes = self.nodes.read().unwrap();
        match nodes.get(path) {
            Some(Node::File(bytes)) => Ok(bytes.clone()),
            _ => Err(StorageError::NotFound(path.to_owned())),
        }
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<DirEntry>, StorageError> {
        let nodes = self.nodes.read().unwrap();
        if !MemoryStorage::is_dir(&nodes, dir) {
            return Err(StorageError::NotFound(dir.to_owned()));
        }
        let mut entries = nodes
            .iter()
            .filter(|(path, _)| path.parent() == Some(dir))
            .filter_map(|(path, node)| {
                path.file_name().map(|name| DirEntry {
                    name: name.to_string_lossy().into_owned(),
                    is_dir: matches!(node, Node::Dir),
                })
            })
            .collect::<Vec<_>>();
        entries.sort();
        Ok(entries)
    }

    fn exists(&self, path: &Path) -> bool {
        self.nodes.read().unwrap().contains_key(path)
    }
}
