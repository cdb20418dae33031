//! Durable storage for backup files. The engine only ever deals with flat directories of json
//! files, so the `BackupStorage` trait is deliberately small. `FsStorage` is the implementation
//! used by the service, and the testkit provides an in-memory one.
use globset::GlobBuilder;

use std::fmt::{self, Display};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum StorageError {
    NotFound(PathBuf),
    Io { path: PathBuf, source: io::Error },
    Pattern(String),
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> StorageError {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(path)
        } else {
            StorageError::Io { path, source }
        }
    }
}

impl Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            StorageError::NotFound(ref path) => write!(f, "No such file or directory: {}", path.display()),
            StorageError::Io { ref path, ref source } => write!(f, "IO error for {}: {}", path.display(), source),
            StorageError::Pattern(ref pattern) => write!(f, "Invalid file pattern: '{}'", pattern),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io { source, .. } => Some(source as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> DirEntry {
        DirEntry {
            name: name.into(),
            is_dir: false,
        }
    }
}

pub trait BackupStorage: Send + Sync {
    fn create_dir_all(&self, path: &Path) -> Result<(), StorageError>;

    /// Writes the file, replacing any existing content
    fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError>;

    fn read_file(&self, path: &Path) -> Result<Vec<u8>, StorageError>;

    /// Lists the entries of a single directory, sorted by name
    fn list_dir(&self, dir: &Path) -> Result<Vec<DirEntry>, StorageError>;

    fn exists(&self, path: &Path) -> bool;

    /// Returns the paths of entries in `dir` whose names match the glob `pattern`, sorted by name.
    /// Wildcards never match a `/`.
    fn glob(&self, dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, StorageError> {
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|err| StorageError::Pattern(format!("{}: {}", pattern, err.kind())))?
            .compile_matcher();
        let paths = self
            .list_dir(dir)?
            .into_iter()
            .filter(|entry| matcher.is_match(entry.name.as_str()))
            .map(|entry| dir.join(entry.name))
            .collect();
        Ok(paths)
    }
}

/// Stores backups on the local filesystem. Paths are used as given.
#[derive(Debug, Clone, Default)]
pub struct FsStorage;

impl BackupStorage for FsStorage {
    fn create_dir_all(&self, path: &Path) -> Result<(), StorageError> {
        fs::create_dir_all(path).map_err(|err| StorageError::io(path, err))
    }

    fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        log::trace!("Writing {} bytes to {}", bytes.len(), path.display());
        fs::write(path, bytes).map_err(|err| StorageError::io(path, err))
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
        fs::read(path).map_err(|err| StorageError::io(path, err))
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<DirEntry>, StorageError> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir).map_err(|err| StorageError::io(dir, err))? {
            let entry = entry.map_err(|err| StorageError::io(dir, err))?;
            let file_type = entry.file_type().map_err(|err| StorageError::io(entry.path(), err))?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: file_type.is_dir(),
            });
        }
        entries.sort();
        Ok(entries)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn dir_with(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        for name in names {
            FsStorage.write_file(&dir.path().join(name), b"{}").unwrap();
        }
        dir
    }

    fn globbed_names(dir: &Path, pattern: &str) -> Vec<String> {
        FsStorage
            .glob(dir, pattern)
            .expect("glob failed")
            .into_iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn glob_matches_whole_file_names() {
        let dir = dir_with(&[
            "pvc-data.json",
            "pvc-.json",
            "data.json",
            "pvc-data.json.bak",
            "pvc-dataxjson",
            "xpvc-data.json",
        ]);
        assert_eq!(vec!["pvc-.json", "pvc-data.json"], globbed_names(dir.path(), "pvc-*.json"));
    }

    #[test]
    fn glob_supports_single_character_wildcards() {
        let dir = dir_with(&["pod-a.json", "pod-ab.json"]);
        assert_eq!(vec!["pod-a.json"], globbed_names(dir.path(), "pod-?.json"));
    }

    #[test]
    fn invalid_glob_is_a_pattern_error() {
        let dir = dir_with(&[]);
        match FsStorage.glob(dir.path(), "pod-[a.json") {
            Err(StorageError::Pattern(msg)) => assert!(msg.starts_with("pod-[a.json"), "message: {}", msg),
            other => panic!("expected Pattern error, got: {:?}", other),
        }
    }

    #[test]
    fn fs_storage_lists_and_globs_sorted_entries() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let subject = FsStorage;
        subject.write_file(&dir.path().join("pod-b.json"), b"{}").unwrap();
        subject.write_file(&dir.path().join("pod-a.json"), b"{}").unwrap();
        subject.write_file(&dir.path().join("secret-a.json"), b"{}").unwrap();
        subject.create_dir_all(&dir.path().join("nested")).unwrap();

        let entries = subject.list_dir(dir.path()).unwrap();
        let expected = vec![
            DirEntry { name: "nested".to_owned(), is_dir: true },
            DirEntry::file("pod-a.json"),
            DirEntry::file("pod-b.json"),
            DirEntry::file("secret-a.json"),
        ];
        assert_eq!(expected, entries);

        let globbed = subject.glob(dir.path(), "pod-*.json").unwrap();
        assert_eq!(vec![dir.path().join("pod-a.json"), dir.path().join("pod-b.json")], globbed);
    }

    #[test]
    fn fs_storage_reports_missing_files_as_not_found() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("missing.json");
        assert!(!FsStorage.exists(&path));
        match FsStorage.read_file(&path) {
            Err(StorageError::NotFound(p)) => assert_eq!(path, p),
            other => panic!("expected NotFound, got: {:?}", other),
        }
    }

    #[test]
    fn fs_storage_write_replaces_existing_content() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("pod-a.json");
        FsStorage.write_file(&path, b"first version").unwrap();
        FsStorage.write_file(&path, b"second").unwrap();
        assert_eq!(b"second".to_vec(), FsStorage.read_file(&path).unwrap());
    }
}
