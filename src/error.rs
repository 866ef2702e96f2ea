//! Error types for clipdex
//!
//! Each subsystem owns its error enum (`StoreError`, `SnapshotError`,
//! `SyncError`, `SearchError`, `VectorError`). This module folds them into
//! [`ClipdexError`] for the CLI, which adds stable status codes for JSON
//! output and recovery suggestions.

use crate::search::SearchError;
use crate::snapshot::SnapshotError;
use crate::store::StoreError;
use crate::sync::SyncError;
use crate::vector::VectorError;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error for CLI operations
#[derive(Error, Debug)]
pub enum ClipdexError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Vector(#[from] VectorError),

    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    /// Malformed ingest input
    #[error("Invalid input at {path}:{line}: {reason}")]
    Input {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },

    /// General errors for cases where we need to preserve existing behavior
    #[error("{0}")]
    General(String),
}

impl ClipdexError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::Sync(SyncError::LeaseUnavailable { .. }) => "LEASE_UNAVAILABLE",
            Self::Sync(SyncError::LeaseLost { .. }) => "LEASE_LOST",
            Self::Sync(SyncError::Cancelled) => "CANCELLED",
            Self::Sync(SyncError::NoTrainingSample) => "NO_TRAINING_SAMPLE",
            Self::Sync(SyncError::Bootstrap(_)) => "BOOTSTRAP_FAILED",
            Self::Sync(SyncError::InvalidRecord { .. }) => "INVALID_RECORD",
            Self::Sync(SyncError::Snapshot(e)) | Self::Search(SearchError::Snapshot(e)) => {
                snapshot_status(e)
            }
            Self::Snapshot(e) => snapshot_status(e),
            Self::Sync(SyncError::Store(_)) | Self::Store(_) => "STORE_ERROR",
            Self::Sync(SyncError::Vector(_)) | Self::Vector(_) => "VECTOR_ERROR",
            Self::Search(SearchError::InvalidParameter { .. }) => "INVALID_PARAMETER",
            Self::Search(SearchError::Encoder(_)) => "ENCODER_ERROR",
            Self::Search(SearchError::Vector(_)) => "VECTOR_ERROR",
            Self::Search(SearchError::MappingDesync(_)) => "MAPPING_DESYNC",
            Self::Search(SearchError::Locator(_)) => "LOCATOR_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Input { .. } => "INVALID_INPUT",
            Self::Timeout { .. } => "TIMEOUT",
            Self::General(_) => "GENERAL_ERROR",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Sync(SyncError::LeaseUnavailable { .. }) => vec![
                "Another sync holds the lease; retry once it finishes",
                "A crashed holder's lease expires after sync.lease_ttl_secs",
            ],
            Self::Sync(SyncError::LeaseLost { .. }) => vec![
                "The run outlived its lease and another sync took over; rerun 'clipdex sync'",
                "Raise sync.lease_ttl_secs if runs routinely take this long",
            ],
            Self::Sync(SyncError::NoTrainingSample) => vec![
                "Set index.bootstrap_sample to a .npy matrix of training embeddings",
            ],
            Self::Sync(SyncError::Snapshot(SnapshotError::Consistency(_)))
            | Self::Search(SearchError::Snapshot(SnapshotError::Consistency(_)))
            | Self::Snapshot(SnapshotError::Consistency(_))
            | Self::Search(SearchError::MappingDesync(_)) => vec![
                "The snapshot artifacts disagree, usually after an interrupted sync",
                "Restore the artifacts from a backup, or delete all three and resync from scratch",
            ],
            Self::Sync(SyncError::Snapshot(SnapshotError::PartialWrite { .. }))
            | Self::Snapshot(SnapshotError::PartialWrite { .. }) => vec![
                "Some artifacts were written before the failure",
                "Run 'clipdex stats' to see whether the snapshot is still consistent",
            ],
            Self::Search(SearchError::Snapshot(SnapshotError::NotInitialized(_)))
            | Self::Snapshot(SnapshotError::NotInitialized(_)) => {
                vec!["Run 'clipdex sync' to build the index first"]
            }
            Self::Config { .. } => vec![
                "Check .clipdex/settings.toml",
                "Run 'clipdex init --force' to regenerate the defaults",
            ],
            Self::Timeout { .. } => vec![
                "Raise search.timeout_secs or sync.timeout_secs in settings",
            ],
            _ => vec![],
        }
    }
}

fn snapshot_status(error: &SnapshotError) -> &'static str {
    match error {
        SnapshotError::Consistency(_) => "SNAPSHOT_INCONSISTENT",
        SnapshotError::PartialWrite { .. } => "PARTIAL_WRITE",
        SnapshotError::NotInitialized(_) => "NOT_INITIALIZED",
        SnapshotError::Codec { .. } => "SNAPSHOT_CORRUPTED",
        SnapshotError::Store { .. } => "STORE_ERROR",
    }
}

/// Result type alias for CLI operations
pub type ClipdexResult<T> = Result<T, ClipdexError>;
