//! Exit codes for CLI operations following Unix conventions.
//!
//! # Exit Code Semantics
//!
//! - `0`: Success - operation completed (an empty result is still success)
//! - `1`: General error - unspecified failure
//! - `2`: Blocking error - the snapshot is damaged and automation should halt
//! - `3-125`: Specific recoverable errors
//! - `126-255`: Reserved by shell

use crate::error::ClipdexError;
use crate::search::SearchError;
use crate::snapshot::SnapshotError;
use crate::sync::SyncError;

/// Standard exit codes for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Operation succeeded (code 0)
    Success = 0,

    /// Unspecified error occurred (code 1)
    GeneralError = 1,

    /// Critical error that should halt automation (code 2)
    BlockingError = 2,

    /// No snapshot exists yet (code 3)
    NotFound = 3,

    /// Rejected input or parameters (code 4)
    InvalidInput = 4,

    /// Object or embedding store failure (code 5)
    IoError = 5,

    /// Configuration error (code 6)
    ConfigError = 6,

    /// Another writer holds the sync lease (code 7)
    Busy = 7,

    /// Operation exceeded its deadline (code 8)
    Timeout = 8,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl ExitCode {
    /// Convert a `ClipdexError` to the appropriate exit code.
    ///
    /// Maps specific error types to semantic exit codes that scripts
    /// can use to determine appropriate recovery actions.
    pub fn from_error(error: &ClipdexError) -> Self {
        match error {
            ClipdexError::Sync(SyncError::Snapshot(e))
            | ClipdexError::Search(SearchError::Snapshot(e))
            | ClipdexError::Snapshot(e) => Self::from_snapshot_error(e),

            ClipdexError::Search(SearchError::MappingDesync(_)) => ExitCode::BlockingError,

            // Both leave the snapshot untouched; rerunning later is safe
            ClipdexError::Sync(SyncError::LeaseUnavailable { .. } | SyncError::LeaseLost { .. }) => {
                ExitCode::Busy
            }
            ClipdexError::Sync(SyncError::NoTrainingSample) | ClipdexError::Config { .. } => {
                ExitCode::ConfigError
            }
            ClipdexError::Sync(SyncError::Store(_)) | ClipdexError::Store(_) => ExitCode::IoError,

            ClipdexError::Sync(SyncError::InvalidRecord { .. })
            | ClipdexError::Search(SearchError::InvalidParameter { .. })
            | ClipdexError::Input { .. } => ExitCode::InvalidInput,

            ClipdexError::Timeout { .. } => ExitCode::Timeout,

            // Everything else is a general error
            _ => ExitCode::GeneralError,
        }
    }

    fn from_snapshot_error(error: &SnapshotError) -> Self {
        match error {
            SnapshotError::NotInitialized(_) => ExitCode::NotFound,
            SnapshotError::Store { .. } => ExitCode::IoError,
            // A partial write or disagreeing artifacts need a human
            SnapshotError::Consistency(_)
            | SnapshotError::PartialWrite { .. }
            | SnapshotError::Codec { .. } => ExitCode::BlockingError,
        }
    }

    /// Check if this exit code indicates a blocking error.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(self, ExitCode::BlockingError)
    }

    /// Check if this exit code indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }

    /// Get a human-readable description of the exit code.
    pub fn description(&self) -> &str {
        match self {
            ExitCode::Success => "Success",
            ExitCode::GeneralError => "General error",
            ExitCode::BlockingError => "Blocking error - automation should halt",
            ExitCode::NotFound => "Not found",
            ExitCode::InvalidInput => "Invalid input",
            ExitCode::IoError => "I/O error",
            ExitCode::ConfigError => "Configuration error",
            ExitCode::Busy => "Sync lease held or taken over by another writer",
            ExitCode::Timeout => "Timed out",
        }
    }
}
