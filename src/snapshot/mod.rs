//! Persisted index state shared by the sync and search paths.
//!
//! A snapshot is three independent objects in the object store: the
//! serialized index, the id mapping and the sync metadata. There is no
//! transaction across them, so every load re-checks that they agree and
//! every persist reports exactly how far it got.

mod mapping;
mod metadata;

pub use mapping::IdMapping;
pub use metadata::SyncMetadata;

use crate::store::{ObjectStore, StoreError};
use crate::types::Timestamp;
use crate::vector::IvfIndex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Object keys of the snapshot artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotKeys {
    pub index: String,
    pub mapping: String,
    pub metadata: String,
}

impl Default for SnapshotKeys {
    fn default() -> Self {
        Self {
            index: "faiss.index".to_string(),
            mapping: "index_to_id.json".to_string(),
            metadata: "metadata.json".to_string(),
        }
    }
}

impl SnapshotKeys {
    fn key(&self, artifact: Artifact) -> &str {
        match artifact {
            Artifact::Index => &self.index,
            Artifact::Mapping => &self.mapping,
            Artifact::Metadata => &self.metadata,
        }
    }
}

/// One of the three snapshot objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    Metadata,
    Index,
    Mapping,
}

impl Artifact {
    /// Persist order. Metadata goes first so an interrupted persist leaves
    /// `last_index` ahead of the index, which the next load detects.
    pub const PERSIST_ORDER: [Artifact; 3] = [Artifact::Metadata, Artifact::Index, Artifact::Mapping];
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Artifact::Metadata => "metadata",
            Artifact::Index => "index",
            Artifact::Mapping => "id mapping",
        })
    }
}

/// The three artifacts disagree about the number of indexed vectors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "Snapshot is inconsistent: index holds {index_len} vectors, mapping holds {mapping_len}{}",
    .last_index.map(|n| format!(", metadata records {n}")).unwrap_or_default()
)]
pub struct ConsistencyViolation {
    pub index_len: u64,
    pub mapping_len: u64,
    pub last_index: Option<u64>,
}

/// Errors from loading or persisting snapshots.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Failed to access {artifact}: {source}")]
    Store {
        artifact: Artifact,
        source: StoreError,
    },

    #[error("Corrupt {artifact}: {reason}\nSuggestion: Restore the artifact from a backup or rebuild the snapshot")]
    Codec { artifact: Artifact, reason: String },

    #[error("{0}\nSuggestion: A previous sync was interrupted while persisting; restore a consistent snapshot before syncing again")]
    Consistency(#[from] ConsistencyViolation),

    #[error(
        "Persist failed writing {failed} after writing [{}]: {source}\nSuggestion: The snapshot is now inconsistent; rerun after restoring it",
        .written.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    )]
    PartialWrite {
        written: Vec<Artifact>,
        failed: Artifact,
        source: StoreError,
    },

    #[error("No {0} found in the snapshot store\nSuggestion: Run 'clipdex sync' to initialize the index")]
    NotInitialized(Artifact),
}

/// Index, mapping and metadata as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub index: IvfIndex,
    pub mapping: IdMapping,
    pub metadata: SyncMetadata,
}

impl Snapshot {
    /// A fresh snapshot around a newly trained, empty index.
    #[must_use]
    pub fn empty(index: IvfIndex) -> Self {
        Self {
            index,
            mapping: IdMapping::new(),
            metadata: SyncMetadata::default(),
        }
    }

    /// Checks `|mapping| == index.len() == metadata.last_index`.
    pub fn check_consistency(&self) -> Result<(), ConsistencyViolation> {
        let index_len = self.index.len() as u64;
        let mapping_len = self.mapping.len() as u64;
        if index_len != mapping_len || index_len != self.metadata.last_index {
            return Err(ConsistencyViolation {
                index_len,
                mapping_len,
                last_index: Some(self.metadata.last_index),
            });
        }
        Ok(())
    }

    /// The read path only needs the index and mapping to agree.
    pub fn check_searchable(&self) -> Result<(), ConsistencyViolation> {
        let index_len = self.index.len() as u64;
        let mapping_len = self.mapping.len() as u64;
        if index_len != mapping_len {
            return Err(ConsistencyViolation {
                index_len,
                mapping_len,
                last_index: None,
            });
        }
        Ok(())
    }
}

/// Summary of the persisted snapshot, loadable even when it is damaged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotStats {
    /// Vectors in the index, if the index exists.
    pub index_size: Option<usize>,
    pub dimension: Option<usize>,
    pub clusters: Option<usize>,
    /// Vectors per inverted list.
    pub list_sizes: Vec<usize>,
    pub mapping_size: Option<usize>,
    pub last_timestamp: Option<Timestamp>,
    pub last_index: Option<u64>,
    /// The consistency violation, if all artifacts exist and disagree.
    pub violation: Option<String>,
}

impl SnapshotStats {
    /// All three artifacts exist.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.index_size.is_some() && self.mapping_size.is_some() && self.last_index.is_some()
    }

    /// Initialized and the artifacts agree.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.is_initialized() && self.violation.is_none()
    }
}

/// Typed access to the snapshot artifacts in an object store.
#[derive(Clone)]
pub struct SnapshotStore {
    store: Arc<dyn ObjectStore>,
    keys: SnapshotKeys,
}

impl SnapshotStore {
    pub fn new(store: Arc<dyn ObjectStore>, keys: SnapshotKeys) -> Self {
        Self { store, keys }
    }

    #[must_use]
    pub fn keys(&self) -> &SnapshotKeys {
        &self.keys
    }

    pub fn load_metadata(&self) -> Result<Option<SyncMetadata>, SnapshotError> {
        self.load(Artifact::Metadata, |bytes| {
            SyncMetadata::from_json(bytes).map_err(|e| e.to_string())
        })
    }

    pub fn load_index(&self) -> Result<Option<IvfIndex>, SnapshotError> {
        self.load(Artifact::Index, |bytes| {
            IvfIndex::from_bytes(bytes).map_err(|e| e.to_string())
        })
    }

    pub fn load_mapping(&self) -> Result<Option<IdMapping>, SnapshotError> {
        self.load(Artifact::Mapping, |bytes| {
            IdMapping::from_json(bytes).map_err(|e| e.to_string())
        })
    }

    /// Loads the snapshot for writing, initializing missing artifacts.
    ///
    /// Missing metadata starts at the epoch, a missing index is trained by
    /// `bootstrap`, a missing mapping starts empty. Each initialized artifact
    /// is persisted immediately. The result is checked for consistency.
    pub fn load_or_init<E>(
        &self,
        bootstrap: impl FnOnce() -> Result<IvfIndex, E>,
    ) -> Result<Snapshot, E>
    where
        E: From<SnapshotError>,
    {
        let metadata = match self.load_metadata()? {
            Some(metadata) => metadata,
            None => {
                let metadata = SyncMetadata::default();
                tracing::info!("No sync metadata found, starting from {}", metadata.last_timestamp);
                self.write(Artifact::Metadata, self.encode_metadata(&metadata)?)?;
                metadata
            }
        };

        let index = match self.load_index()? {
            Some(index) => index,
            None => {
                tracing::info!("No index found, training one from the bootstrap sample");
                let index = bootstrap()?;
                self.write(Artifact::Index, index.to_bytes())?;
                index
            }
        };

        let mapping = match self.load_mapping()? {
            Some(mapping) => mapping,
            None => {
                tracing::info!("No id mapping found, starting empty");
                let mapping = IdMapping::new();
                self.write(Artifact::Mapping, self.encode_mapping(&mapping)?)?;
                mapping
            }
        };

        let snapshot = Snapshot {
            index,
            mapping,
            metadata,
        };
        snapshot.check_consistency().map_err(SnapshotError::from)?;
        Ok(snapshot)
    }

    /// Loads the snapshot for searching. Nothing is initialized or written.
    pub fn load_read_only(&self) -> Result<Snapshot, SnapshotError> {
        let index = self
            .load_index()?
            .ok_or(SnapshotError::NotInitialized(Artifact::Index))?;
        let mapping = self
            .load_mapping()?
            .ok_or(SnapshotError::NotInitialized(Artifact::Mapping))?;
        let metadata = self
            .load_metadata()?
            .ok_or(SnapshotError::NotInitialized(Artifact::Metadata))?;

        let snapshot = Snapshot {
            index,
            mapping,
            metadata,
        };
        snapshot.check_searchable()?;
        Ok(snapshot)
    }

    /// Loads whatever artifacts exist and summarizes them.
    pub fn stats(&self) -> Result<SnapshotStats, SnapshotError> {
        let index = self.load_index()?;
        let mapping = self.load_mapping()?;
        let metadata = self.load_metadata()?;

        let mut stats = SnapshotStats {
            index_size: index.as_ref().map(IvfIndex::len),
            dimension: index.as_ref().map(|i| i.dimension().get()),
            clusters: index.as_ref().map(IvfIndex::nlist),
            list_sizes: index.as_ref().map(IvfIndex::list_sizes).unwrap_or_default(),
            mapping_size: mapping.as_ref().map(IdMapping::len),
            last_timestamp: metadata.as_ref().map(|m| m.last_timestamp),
            last_index: metadata.as_ref().map(|m| m.last_index),
            violation: None,
        };

        if let (Some(index), Some(mapping), Some(metadata)) = (index, mapping, metadata) {
            let snapshot = Snapshot {
                index,
                mapping,
                metadata,
            };
            stats.violation = snapshot.check_consistency().err().map(|v| v.to_string());
        }
        Ok(stats)
    }

    /// Writes metadata, then index, then mapping.
    ///
    /// # Errors
    /// [`SnapshotError::PartialWrite`] names the artifacts already written and
    /// the one that failed. Encoding happens up front, so nothing is written
    /// if any artifact fails to encode.
    pub fn persist(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let mut encoded = Vec::with_capacity(Artifact::PERSIST_ORDER.len());
        for artifact in Artifact::PERSIST_ORDER {
            let bytes = match artifact {
                Artifact::Metadata => self.encode_metadata(&snapshot.metadata)?,
                Artifact::Index => snapshot.index.to_bytes(),
                Artifact::Mapping => self.encode_mapping(&snapshot.mapping)?,
            };
            encoded.push((artifact, bytes));
        }

        let mut written = Vec::with_capacity(encoded.len());
        for (artifact, bytes) in encoded {
            if let Err(source) = self.store.put(self.keys.key(artifact), &bytes) {
                return Err(SnapshotError::PartialWrite {
                    written,
                    failed: artifact,
                    source,
                });
            }
            written.push(artifact);
        }
        Ok(())
    }

    fn load<T>(
        &self,
        artifact: Artifact,
        decode: impl FnOnce(&[u8]) -> Result<T, String>,
    ) -> Result<Option<T>, SnapshotError> {
        let Some(object) = self
            .store
            .get(self.keys.key(artifact))
            .map_err(|source| SnapshotError::Store { artifact, source })?
        else {
            return Ok(None);
        };
        decode(&object.bytes)
            .map(Some)
            .map_err(|reason| SnapshotError::Codec { artifact, reason })
    }

    fn write(&self, artifact: Artifact, bytes: Vec<u8>) -> Result<(), SnapshotError> {
        self.store
            .put(self.keys.key(artifact), &bytes)
            .map(|_| ())
            .map_err(|source| SnapshotError::Store { artifact, source })
    }

    fn encode_metadata(&self, metadata: &SyncMetadata) -> Result<Vec<u8>, SnapshotError> {
        metadata.to_json().map_err(|e| SnapshotError::Codec {
            artifact: Artifact::Metadata,
            reason: e.to_string(),
        })
    }

    fn encode_mapping(&self, mapping: &IdMapping) -> Result<Vec<u8>, SnapshotError> {
        mapping.to_json().map_err(|e| SnapshotError::Codec {
            artifact: Artifact::Mapping,
            reason: e.to_string(),
        })
    }
}
