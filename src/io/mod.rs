//! Input/Output handling for the CLI.
//!
//! This module provides:
//! - Consistent exit codes derived from errors
//! - Line-oriented ingest input parsing

pub mod exit_code;
pub mod input;

pub use exit_code::ExitCode;
pub use input::{IngestLine, read_ingest_lines, stamp_records};
