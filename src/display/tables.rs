//! Table formatting for search results, sync outcomes and snapshot stats.

use crate::search::SearchResponse;
use crate::snapshot::SnapshotStats;
use crate::sync::SyncOutcome;
use comfy_table::{
    Attribute, Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
};

/// Builder for creating formatted tables.
pub struct TableBuilder {
    table: Table,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    /// Create a new table builder.
    pub fn new() -> Self {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.apply_modifier(UTF8_ROUND_CORNERS);
        Self { table }
    }

    /// Set the table headers.
    pub fn set_headers(mut self, headers: Vec<&str>) -> Self {
        let header_cells: Vec<Cell> = headers
            .into_iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
            .collect();
        self.table.set_header(header_cells);
        self
    }

    /// Add a row to the table.
    pub fn add_row(mut self, row: Vec<String>) -> Self {
        self.table.add_row(row);
        self
    }

    /// Add a row of pre-styled cells.
    pub fn add_cells(mut self, row: Vec<Cell>) -> Self {
        self.table.add_row(row);
        self
    }

    /// Build and return the formatted table.
    pub fn build(self) -> String {
        self.table.to_string()
    }
}

/// Ranked hits, one row each.
pub fn create_search_table(response: &SearchResponse) -> String {
    let mut builder =
        TableBuilder::new().set_headers(vec!["Rank", "Image", "Score", "Internal id", "Link"]);
    for (rank, (hit, url)) in response.hits.iter().zip(&response.image_urls).enumerate() {
        builder = builder.add_row(vec![
            (rank + 1).to_string(),
            hit.external_id.clone(),
            format!("{:.4}", hit.score),
            hit.internal_id.to_string(),
            url.clone(),
        ]);
    }
    builder.build()
}

/// Counts from one sync run.
pub fn create_sync_table(outcome: &SyncOutcome) -> String {
    TableBuilder::new()
        .set_headers(vec!["Metric", "Value"])
        .add_row(vec!["Retrieved".to_string(), outcome.retrieved.to_string()])
        .add_row(vec!["Ingested".to_string(), outcome.ingested.to_string()])
        .add_row(vec!["Duplicates".to_string(), outcome.duplicates.to_string()])
        .add_row(vec!["Stale".to_string(), outcome.stale.to_string()])
        .add_row(vec!["Index size".to_string(), outcome.index_size.to_string()])
        .add_row(vec![
            "Watermark".to_string(),
            outcome.last_timestamp.to_string(),
        ])
        .build()
}

/// Snapshot summary with a colored consistency verdict.
pub fn create_stats_table(stats: &SnapshotStats) -> String {
    fn or_missing<T: ToString>(value: Option<T>) -> String {
        value.map_or_else(|| "missing".to_string(), |v| v.to_string())
    }

    let list_sizes = if stats.list_sizes.is_empty() {
        "-".to_string()
    } else {
        stats
            .list_sizes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    };

    let (verdict, color) = if !stats.is_initialized() {
        ("⚠ Not initialized".to_string(), Color::Yellow)
    } else if let Some(violation) = &stats.violation {
        (format!("✗ {violation}"), Color::Red)
    } else {
        ("✓ Consistent".to_string(), Color::Green)
    };

    TableBuilder::new()
        .set_headers(vec!["Property", "Value"])
        .add_row(vec!["Vectors".to_string(), or_missing(stats.index_size)])
        .add_row(vec!["Dimension".to_string(), or_missing(stats.dimension)])
        .add_row(vec!["Clusters".to_string(), or_missing(stats.clusters)])
        .add_row(vec!["List sizes".to_string(), list_sizes])
        .add_row(vec!["Mapping entries".to_string(), or_missing(stats.mapping_size)])
        .add_row(vec!["Watermark".to_string(), or_missing(stats.last_timestamp)])
        .add_row(vec!["Last index".to_string(), or_missing(stats.last_index)])
        .add_cells(vec![
            Cell::new("Status"),
            Cell::new(verdict).fg(color).add_attribute(Attribute::Bold),
        ])
        .build()
}
