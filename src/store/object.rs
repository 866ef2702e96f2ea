//! Durable key/object storage with compare-and-swap.
//!
//! There are no multi-object transactions. Conditional writes are the only
//! coordination primitive: every object carries a version token, and
//! [`ObjectStore::put_if`] only succeeds when the caller's expectation about
//! that token (or about absence) still holds.

use crate::store::StoreError;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Version token of a stored object.
///
/// The bundled stores use the SHA-256 of the content, so writing identical
/// bytes yields an identical token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectVersion(String);

impl ObjectVersion {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content-derived version token.
#[must_use]
pub fn content_version(bytes: &[u8]) -> ObjectVersion {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    ObjectVersion(format!("{result:x}"))
}

/// An object's bytes with the version they were read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub version: ObjectVersion,
}

/// Key/object store used for snapshot artifacts and the sync lease.
pub trait ObjectStore: Send + Sync {
    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Reads an object, or `None` if it does not exist.
    fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError>;

    /// Unconditionally writes an object, returning its new version.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<ObjectVersion, StoreError>;

    /// Writes only if the current version matches `expected`.
    ///
    /// `expected == None` means "only if the object does not exist".
    ///
    /// # Errors
    /// [`StoreError::Conflict`] when the expectation no longer holds.
    fn put_if(
        &self,
        key: &str,
        bytes: &[u8],
        expected: Option<&ObjectVersion>,
    ) -> Result<ObjectVersion, StoreError>;

    /// Deletes an object if present.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Deletes only if the current version matches `expected`.
    ///
    /// # Errors
    /// [`StoreError::Conflict`] when the object is missing or has changed.
    fn delete_if(&self, key: &str, expected: &ObjectVersion) -> Result<(), StoreError>;
}

/// In-process object store.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl ObjectStore for MemoryObjectStore {
    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.objects.lock().contains_key(key))
    }

    fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        Ok(self.objects.lock().get(key).cloned())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<ObjectVersion, StoreError> {
        let version = content_version(bytes);
        self.objects.lock().insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                version: version.clone(),
            },
        );
        Ok(version)
    }

    fn put_if(
        &self,
        key: &str,
        bytes: &[u8],
        expected: Option<&ObjectVersion>,
    ) -> Result<ObjectVersion, StoreError> {
        let mut objects = self.objects.lock();
        let current = objects.get(key).map(|o| &o.version);
        if current != expected {
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }

        let version = content_version(bytes);
        objects.insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                version: version.clone(),
            },
        );
        Ok(version)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.objects.lock().remove(key);
        Ok(())
    }

    fn delete_if(&self, key: &str, expected: &ObjectVersion) -> Result<(), StoreError> {
        let mut objects = self.objects.lock();
        match objects.get(key) {
            Some(current) if &current.version == expected => {
                objects.remove(key);
                Ok(())
            }
            _ => Err(StoreError::Conflict {
                key: key.to_string(),
            }),
        }
    }
}
