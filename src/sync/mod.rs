//! Incremental index synchronization.
//!
//! One run folds every embedding newer than the watermark into the index:
//!
//! 1. claim the single-writer lease
//! 2. load the snapshot, initializing missing artifacts (the index is
//!    trained from the bootstrap sample the first time)
//! 3. verify the artifacts agree
//! 4. drain the embedding store for records after the watermark
//! 5. fold them in ([`fold_records`]), deduplicating by external id
//! 6. renew the lease, then persist metadata, index, mapping in that order
//! 7. release the lease
//!
//! Running a sync twice with no new records changes nothing. A run whose
//! lease was taken over while it worked fails with
//! [`SyncError::LeaseLost`] before writing anything. A run can be cancelled
//! through a [`CancellationToken`]; it stops at the next checkpoint and never
//! between the three writes.

mod fold;
mod lease;

pub use fold::fold_records;
pub use lease::{LeaseConfig, SyncLease};

use crate::snapshot::{Snapshot, SnapshotError, SnapshotKeys, SnapshotStore};
use crate::store::{EmbeddingStore, ObjectStore, StoreError, fetch_all_after};
use crate::types::Timestamp;
use crate::vector::{IvfIndex, VectorError, load_npy_matrix};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Summary of one sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    /// Records returned by the embedding store.
    pub retrieved: usize,
    /// Records appended to the index.
    pub ingested: usize,
    /// Records skipped because their external id was already indexed.
    pub duplicates: usize,
    /// Records at or below the watermark, dropped.
    pub stale: usize,
    /// Watermark after the run.
    pub last_timestamp: Timestamp,
    /// Index size after the run.
    pub index_size: usize,
}

impl SyncOutcome {
    /// Outcome of a run that found nothing to do.
    #[must_use]
    pub fn unchanged(snapshot: &Snapshot) -> Self {
        Self {
            retrieved: 0,
            ingested: 0,
            duplicates: 0,
            stale: 0,
            last_timestamp: snapshot.metadata.last_timestamp,
            index_size: snapshot.index.len(),
        }
    }
}

/// Errors from a sync run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("Embedding store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error("Record '{external_id}' rejected: {source}")]
    InvalidRecord {
        external_id: String,
        source: VectorError,
    },

    #[error("Failed to bootstrap the index: {0}")]
    Bootstrap(VectorError),

    #[error(
        "No index exists and no bootstrap sample is configured\nSuggestion: Set index.bootstrap_sample to a .npy file of training embeddings"
    )]
    NoTrainingSample,

    #[error(
        "Could not acquire sync lease '{key}' after {attempts} attempts{}\nSuggestion: Another sync is running; wait for it or remove the lease if its holder crashed",
        .holder.as_ref().map(|h| format!(" (held by {h})")).unwrap_or_default()
    )]
    LeaseUnavailable {
        key: String,
        holder: Option<String>,
        attempts: u32,
    },

    #[error(
        "Sync lease '{key}' held by {holder} expired and was taken over; nothing was written\nSuggestion: Raise sync.lease_ttl_secs above the longest expected run"
    )]
    LeaseLost { key: String, holder: String },

    #[error("Sync cancelled before writing the snapshot")]
    Cancelled,
}

/// Where the bootstrap training vectors come from.
#[derive(Debug, Clone)]
pub enum TrainingSample {
    /// A `(n, d)` float32 `.npy` matrix.
    Npy(PathBuf),
    Vectors(Vec<Vec<f32>>),
}

impl TrainingSample {
    fn train(&self, clusters: usize, seed: u64) -> Result<IvfIndex, VectorError> {
        match self {
            TrainingSample::Npy(path) => {
                let vectors = load_npy_matrix(path)?;
                tracing::info!("Loaded {} training vectors from {}", vectors.len(), path.display());
                IvfIndex::bootstrap(&vectors, clusters, seed)
            }
            TrainingSample::Vectors(vectors) => IvfIndex::bootstrap(vectors, clusters, seed),
        }
    }
}

/// Settings for a [`SyncEngine`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub partition: String,
    pub keys: SnapshotKeys,
    pub lease_key: String,
    pub lease: LeaseConfig,
    pub clusters: usize,
    pub seed: u64,
    pub training: Option<TrainingSample>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            partition: "image".to_string(),
            keys: SnapshotKeys::default(),
            lease_key: "sync.lease".to_string(),
            lease: LeaseConfig::default(),
            clusters: 15,
            seed: crate::vector::clustering::DEFAULT_SEED,
            training: None,
        }
    }
}

/// Write path: folds new embeddings into the persisted snapshot.
pub struct SyncEngine {
    embeddings: Arc<dyn EmbeddingStore>,
    objects: Arc<dyn ObjectStore>,
    snapshots: SnapshotStore,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        embeddings: Arc<dyn EmbeddingStore>,
        objects: Arc<dyn ObjectStore>,
        config: SyncConfig,
    ) -> Self {
        let snapshots = SnapshotStore::new(objects.clone(), config.keys.clone());
        Self {
            embeddings,
            objects,
            snapshots,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Runs one sync under the single-writer lease.
    pub fn run(&self) -> Result<SyncOutcome, SyncError> {
        self.run_cancellable(&CancellationToken::new())
    }

    /// Like [`SyncEngine::run`], but stops with [`SyncError::Cancelled`] if
    /// `cancel` fires before the snapshot is written.
    pub fn run_cancellable(&self, cancel: &CancellationToken) -> Result<SyncOutcome, SyncError> {
        let mut lease = SyncLease::acquire(
            self.objects.clone(),
            &self.config.lease_key,
            &self.config.lease,
        )?;
        let result = self.run_locked(&mut lease, cancel);

        if let Err(e) = lease.release() {
            tracing::warn!("Sync lease was lost before release: {e}");
        }
        result
    }

    fn run_locked(
        &self,
        lease: &mut SyncLease,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        checkpoint(cancel)?;
        let snapshot = self.snapshots.load_or_init(|| self.bootstrap())?;
        let watermark = snapshot.metadata.last_timestamp;

        let records = fetch_all_after(self.embeddings.as_ref(), &self.config.partition, watermark)?;
        if records.is_empty() {
            tracing::info!(
                "No new embeddings after {watermark}; index holds {} vectors",
                snapshot.index.len()
            );
            return Ok(SyncOutcome::unchanged(&snapshot));
        }

        let (snapshot, outcome) = fold_records(snapshot, records)?;
        if outcome.ingested > 0 || outcome.last_timestamp != watermark {
            checkpoint(cancel)?;
            // Fence: the writes below must come from the current lease holder
            lease.renew()?;
            self.snapshots.persist(&snapshot)?;
        }

        tracing::info!(
            "Sync complete: retrieved {}, ingested {}, duplicates {}, stale {}; index holds {} vectors up to {}",
            outcome.retrieved,
            outcome.ingested,
            outcome.duplicates,
            outcome.stale,
            outcome.index_size,
            outcome.last_timestamp
        );
        Ok(outcome)
    }

    fn bootstrap(&self) -> Result<IvfIndex, SyncError> {
        let sample = self
            .config
            .training
            .as_ref()
            .ok_or(SyncError::NoTrainingSample)?;
        sample
            .train(self.config.clusters, self.config.seed)
            .map_err(SyncError::Bootstrap)
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), SyncError> {
    if cancel.is_cancelled() {
        tracing::info!("Sync cancelled; snapshot left untouched");
        return Err(SyncError::Cancelled);
    }
    Ok(())
}
