//! clipdex: incremental IVF index synchronization and text-to-image
//! similarity search over CLIP embeddings.
//!
//! The write path ([`sync`]) folds new records from an [`store::EmbeddingStore`]
//! into a persisted [`snapshot::Snapshot`]; the read path ([`search`]) embeds a
//! query and searches the latest snapshot.

pub mod config;
pub mod display;
pub mod error;
pub mod io;
pub mod search;
pub mod snapshot;
pub mod store;
pub mod sync;
pub mod types;
pub mod vector;

// Explicit exports for better API clarity
pub use config::Settings;
pub use error::{ClipdexError, ClipdexResult};
pub use search::{SearchConfig, SearchEngine, SearchError, SearchHit, SearchParams, SearchResponse};
pub use snapshot::{Snapshot, SnapshotError, SnapshotKeys, SnapshotStats, SnapshotStore};
pub use store::{
    EmbeddingRecord, EmbeddingStore, FsObjectStore, JsonlEmbeddingStore, ObjectStore, StoreError,
};
pub use sync::{SyncConfig, SyncEngine, SyncError, SyncOutcome};
pub use types::Timestamp;
pub use vector::{InternalId, IvfIndex, TextEncoder, VectorError};
