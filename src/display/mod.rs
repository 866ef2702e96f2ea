//! Terminal output for the CLI.

pub mod tables;

pub use tables::{TableBuilder, create_search_table, create_stats_table, create_sync_table};
