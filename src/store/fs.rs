//! Directory-backed object store.
//!
//! Keys map to files under a root directory (`/` separates directories).
//! Writes go to a temporary file in the target directory and are renamed
//! into place, so readers see either the old or the new object, never a
//! torn one. Conditional operations additionally hold a per-key lock file
//! so the compare and the swap happen as one step across processes.

use crate::store::StoreError;
use crate::store::object::{ObjectStore, ObjectVersion, StoredObject, content_version};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;

/// Lock files older than this are assumed abandoned by a crashed writer.
const LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

const LOCK_RETRY_DELAY: Duration = Duration::from_millis(10);

const LOCK_MAX_ATTEMPTS: usize = 500;

const LOCK_SUFFIX: &str = ".lock";

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Opens the store, creating the root directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let invalid = |reason| StoreError::InvalidKey {
            key: key.to_string(),
            reason,
        };

        if key.is_empty() {
            return Err(invalid("key is empty"));
        }
        if key.ends_with(LOCK_SUFFIX) {
            return Err(invalid("the .lock suffix is reserved"));
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'))
        {
            return Err(invalid("only ASCII letters, digits, '.', '_', '-' and '/' are allowed"));
        }

        let relative = Path::new(key);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(invalid("key must be a relative path without '..'"));
        }
        Ok(self.root.join(relative))
    }

    fn read(&self, path: &Path) -> Result<Option<StoredObject>, StoreError> {
        match fs::read(path) {
            Ok(bytes) => {
                let version = content_version(&bytes);
                Ok(Some(StoredObject { bytes, version }))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<ObjectVersion, StoreError> {
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

        let mut temp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
        temp.write_all(bytes)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| StoreError::io(temp.path(), e))?;
        temp.persist(path)
            .map_err(|e| StoreError::io(path, e.error))?;
        Ok(content_version(bytes))
    }

    /// Runs `op` while holding the key's lock file.
    fn with_lock<T>(
        &self,
        path: &Path,
        op: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _lock = KeyLock::acquire(path)?;
        op()
    }
}

/// Exclusive lock file next to an object, removed on drop.
struct KeyLock {
    path: PathBuf,
}

impl KeyLock {
    fn acquire(object: &Path) -> Result<Self, StoreError> {
        let mut name = object.as_os_str().to_owned();
        name.push(LOCK_SUFFIX);
        let path = PathBuf::from(name);

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }

        for _ in 0..LOCK_MAX_ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Self::is_stale(&path) {
                        tracing::warn!("Removing abandoned lock file {}", path.display());
                        // Another writer may have cleaned it up first
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    std::thread::sleep(LOCK_RETRY_DELAY);
                }
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }

        Err(StoreError::Backend(format!(
            "timed out waiting for lock {}",
            path.display()
        )))
    }

    fn is_stale(path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > LOCK_STALE_AFTER)
    }
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Failed to remove lock file {}: {e}", self.path.display());
        }
    }
}

impl ObjectStore for FsObjectStore {
    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.object_path(key)?;
        path.try_exists().map_err(|e| StoreError::io(&path, e))
    }

    fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        self.read(&self.object_path(key)?)
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<ObjectVersion, StoreError> {
        self.write_atomic(&self.object_path(key)?, bytes)
    }

    fn put_if(
        &self,
        key: &str,
        bytes: &[u8],
        expected: Option<&ObjectVersion>,
    ) -> Result<ObjectVersion, StoreError> {
        let path = self.object_path(key)?;
        self.with_lock(&path, || {
            let current = self.read(&path)?.map(|o| o.version);
            if current.as_ref() != expected {
                return Err(StoreError::Conflict {
                    key: key.to_string(),
                });
            }
            self.write_atomic(&path, bytes)
        })
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    fn delete_if(&self, key: &str, expected: &ObjectVersion) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        self.with_lock(&path, || match self.read(&path)? {
            Some(current) if &current.version == expected => {
                fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))
            }
            _ => Err(StoreError::Conflict {
                key: key.to_string(),
            }),
        })
    }
}
