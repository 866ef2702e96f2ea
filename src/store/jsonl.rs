//! Embedding store backed by an append-only JSON-lines file.
//!
//! Each line is one record:
//!
//! ```text
//! {"partition":"image","external_id":"cat.jpg","timestamp":"2024-01-01T00:00:00.000001","vector":"Q1ZFQw..."}
//! ```
//!
//! `vector` is the versioned binary vector encoding, base64 wrapped, so the
//! file stays readable by anything that understands the encoding. The line
//! number is the record's insertion sequence.

use crate::store::StoreError;
use crate::store::embedding::{
    DEFAULT_PAGE_SIZE, EmbeddingRecord, EmbeddingStore, PageToken, RecordPage, Sequenced,
    paginate,
};
use crate::types::Timestamp;
use crate::vector::{decode_vector, encode_vector};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct JsonlLine {
    partition: String,
    external_id: String,
    timestamp: Timestamp,
    vector: String,
}

/// JSON-lines embedding store.
///
/// Appends from this process are serialized by a mutex; the file itself is
/// only ever appended to.
#[derive(Debug)]
pub struct JsonlEmbeddingStore {
    path: PathBuf,
    page_size: usize,
    append_lock: Mutex<()>,
}

impl JsonlEmbeddingStore {
    /// Opens (without creating) the store at `path`.
    ///
    /// A missing file reads as an empty store and is created on first append.
    pub fn new(path: impl Into<PathBuf>, page_size: usize) -> Self {
        Self {
            path: path.into(),
            page_size: page_size.max(1),
            append_lock: Mutex::new(()),
        }
    }

    /// Opens the store with the default page size.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(path, DEFAULT_PAGE_SIZE)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_partition(&self, partition: &str, after: Timestamp) -> Result<Vec<Sequenced>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        let mut matching = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| StoreError::io(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }

            let parsed: JsonlLine = serde_json::from_str(&line).map_err(|e| StoreError::Codec {
                what: format!("{} line {}", self.path.display(), line_no + 1),
                reason: e.to_string(),
            })?;
            if parsed.partition != partition || parsed.timestamp <= after {
                continue;
            }

            let record = decode_line(parsed).map_err(|reason| StoreError::Codec {
                what: format!("{} line {}", self.path.display(), line_no + 1),
                reason,
            })?;
            matching.push((line_no as u64, record));
        }
        Ok(matching)
    }
}

fn decode_line(line: JsonlLine) -> Result<EmbeddingRecord, String> {
    let blob = STANDARD
        .decode(line.vector.as_bytes())
        .map_err(|e| format!("vector is not base64: {e}"))?;
    let vector = decode_vector(&blob).map_err(|e| e.to_string())?;
    Ok(EmbeddingRecord {
        external_id: line.external_id,
        vector,
        timestamp: line.timestamp,
    })
}

impl EmbeddingStore for JsonlEmbeddingStore {
    fn query_after(
        &self,
        partition: &str,
        after: Timestamp,
        page: Option<&PageToken>,
    ) -> Result<RecordPage, StoreError> {
        let matching = self.read_partition(partition, after)?;
        paginate(matching, page, self.page_size)
    }

    fn append(&self, partition: &str, record: EmbeddingRecord) -> Result<(), StoreError> {
        let line = JsonlLine {
            partition: partition.to_string(),
            external_id: record.external_id,
            timestamp: record.timestamp,
            vector: STANDARD.encode(encode_vector(&record.vector)),
        };
        let mut encoded = serde_json::to_string(&line).map_err(|e| StoreError::Codec {
            what: "embedding record".to_string(),
            reason: e.to_string(),
        })?;
        encoded.push('\n');

        let _guard = self.append_lock.lock();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;
        file.write_all(encoded.as_bytes())
            .and_then(|()| file.sync_data())
            .map_err(|e| StoreError::io(&self.path, e))
    }
}
