//! Ingest input parsing.
//!
//! `clipdex ingest` reads JSON lines of the form
//! `{"external_id": "cat.jpg", "vector": [0.1, ...]}`. Blank lines are
//! skipped. Vectors are L2-normalized here, before they reach the store,
//! so the index only ever holds unit vectors.

use crate::error::ClipdexError;
use crate::store::EmbeddingRecord;
use crate::types::Timestamp;
use crate::vector::normalize;
use serde::Deserialize;
use std::io::BufRead;
use std::path::Path;

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IngestLine {
    pub external_id: String,
    pub vector: Vec<f32>,
    /// 1-based line number, for error reporting.
    #[serde(skip)]
    pub line: usize,
}

impl IngestLine {
    /// Normalizes the vector and stamps the record with `timestamp`.
    pub fn into_record(
        mut self,
        path: &Path,
        timestamp: Timestamp,
    ) -> Result<EmbeddingRecord, ClipdexError> {
        normalize(&mut self.vector).map_err(|e| ClipdexError::Input {
            path: path.to_path_buf(),
            line: self.line,
            reason: e.to_string(),
        })?;
        Ok(EmbeddingRecord::new(self.external_id, self.vector, timestamp))
    }
}

/// Parses every non-blank line of `reader`.
///
/// `path` only labels errors.
pub fn read_ingest_lines(
    reader: impl BufRead,
    path: &Path,
) -> Result<Vec<IngestLine>, ClipdexError> {
    let mut lines = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let number = i + 1;
        let input_error = |reason: String| ClipdexError::Input {
            path: path.to_path_buf(),
            line: number,
            reason,
        };

        let line = line.map_err(|e| input_error(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }

        let mut parsed: IngestLine =
            serde_json::from_str(&line).map_err(|e| input_error(e.to_string()))?;
        if parsed.external_id.is_empty() {
            return Err(input_error("external_id must not be empty".to_string()));
        }
        parsed.line = number;
        lines.push(parsed);
    }
    Ok(lines)
}

/// Stamps records with strictly increasing times, never earlier than now.
pub fn stamp_records(
    lines: Vec<IngestLine>,
    path: &Path,
) -> Result<Vec<EmbeddingRecord>, ClipdexError> {
    let mut last: Option<Timestamp> = None;
    lines
        .into_iter()
        .map(|line| {
            let now = Timestamp::now();
            let stamp = match last {
                Some(prev) if prev >= now => prev.next_tick(),
                _ => now,
            };
            last = Some(stamp);
            line.into_record(path, stamp)
        })
        .collect()
}
