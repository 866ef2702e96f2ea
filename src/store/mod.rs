//! Adapters for the external stores the index depends on.
//!
//! - [`embedding`]: append-only, partition-keyed embedding records with
//!   reverse-chronological paginated range queries
//! - [`object`]: durable key/object storage with compare-and-swap, holding
//!   the snapshot artifacts and the sync lease
//! - [`locator`]: time-limited retrieval links for stored images
//!
//! Every adapter sits behind a trait so tests and alternative backends can
//! swap in without touching the sync or search engines.

pub mod embedding;
pub mod fs;
pub mod jsonl;
pub mod locator;
pub mod object;

pub use embedding::{
    EmbeddingRecord, EmbeddingStore, MemoryEmbeddingStore, PageToken, RecordPage,
    fetch_all_after,
};
pub use fs::FsObjectStore;
pub use jsonl::JsonlEmbeddingStore;
pub use locator::{Locator, LocatorResolver, SignedUrlResolver};
pub use object::{MemoryObjectStore, ObjectStore, ObjectVersion, StoredObject, content_version};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by store adapters.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Store backend failure: {0}\nSuggestion: Retry the operation; the backend may be temporarily unavailable")]
    Backend(String),

    #[error(
        "Conditional write on '{key}' lost a race: the object changed since it was read\nSuggestion: Reload the object and retry"
    )]
    Conflict { key: String },

    #[error("Corrupt {what}: {reason}")]
    Codec { what: String, reason: String },

    #[error("Invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("Invalid page token '{0}'\nSuggestion: Restart the query without a continuation token")]
    InvalidPageToken(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same call could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Conflict { .. } | Self::Io { .. })
    }
}
