//! Embedding store: append-only records of `(external_id, vector, timestamp)`.
//!
//! Records are grouped by partition and read back newest first through a
//! continuation-token paginated query. A sync drains every page with
//! [`fetch_all_after`].

use crate::store::StoreError;
use crate::types::Timestamp;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// Default number of records per page for the bundled stores.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// One embedding as written by the encoder side. Immutable once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub external_id: String,
    pub vector: Vec<f32>,
    pub timestamp: Timestamp,
}

impl EmbeddingRecord {
    pub fn new(external_id: impl Into<String>, vector: Vec<f32>, timestamp: Timestamp) -> Self {
        Self {
            external_id: external_id.into(),
            vector,
            timestamp,
        }
    }
}

/// Opaque continuation token returned with a non-final page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageToken(String);

impl PageToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PageToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of a range query.
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub records: Vec<EmbeddingRecord>,
    /// Present while more pages remain.
    pub next: Option<PageToken>,
}

/// Append-only store of embedding records.
pub trait EmbeddingStore: Send + Sync {
    /// Records in `partition` with `timestamp > after`, newest first.
    ///
    /// Pass the previous page's `next` token to continue; `None` starts from
    /// the newest record.
    fn query_after(
        &self,
        partition: &str,
        after: Timestamp,
        page: Option<&PageToken>,
    ) -> Result<RecordPage, StoreError>;

    /// Appends a record. Existing records are never modified.
    fn append(&self, partition: &str, record: EmbeddingRecord) -> Result<(), StoreError>;
}

/// Drains every page of a range query.
///
/// # Errors
/// Propagates store failures, and fails if the store hands back a
/// continuation token it already returned earlier in the same drain.
pub fn fetch_all_after(
    store: &dyn EmbeddingStore,
    partition: &str,
    after: Timestamp,
) -> Result<Vec<EmbeddingRecord>, StoreError> {
    let mut records = Vec::new();
    let mut token: Option<PageToken> = None;
    let mut seen: HashSet<PageToken> = HashSet::new();
    let mut pages = 0usize;

    loop {
        let page = store.query_after(partition, after, token.as_ref())?;
        pages += 1;
        records.extend(page.records);

        match page.next {
            Some(next) if seen.contains(&next) => {
                return Err(StoreError::Backend(format!(
                    "pagination revisited token '{next}' after {pages} pages"
                )));
            }
            Some(next) => {
                seen.insert(next.clone());
                token = Some(next);
            }
            None => break,
        }
    }

    tracing::debug!(
        "Fetched {} records from partition '{partition}' after {after} in {pages} pages",
        records.len()
    );
    Ok(records)
}

/// A stored record with its insertion sequence number.
///
/// The sequence breaks timestamp ties so cursors stay exact even when two
/// records share a timestamp.
pub(crate) type Sequenced = (u64, EmbeddingRecord);

/// Cuts one newest-first page out of the records matching a query.
///
/// Tokens encode the `(timestamp, sequence)` of the last record served, so
/// records appended between pages never shift later pages.
pub(crate) fn paginate(
    mut matching: Vec<Sequenced>,
    page: Option<&PageToken>,
    page_size: usize,
) -> Result<RecordPage, StoreError> {
    matching.sort_by(|(a_seq, a), (b_seq, b)| {
        b.timestamp.cmp(&a.timestamp).then(b_seq.cmp(a_seq))
    });

    let start = match page {
        None => 0,
        Some(token) => {
            let cursor = decode_cursor(token)?;
            matching.partition_point(|(seq, r)| (r.timestamp, *seq) >= cursor)
        }
    };

    let page_size = page_size.max(1);
    let end = (start + page_size).min(matching.len());
    let next = if end < matching.len() && end > start {
        let (seq, last) = &matching[end - 1];
        Some(encode_cursor(last.timestamp, *seq))
    } else {
        None
    };

    let records = matching
        .drain(start..end)
        .map(|(_, record)| record)
        .collect();
    Ok(RecordPage { records, next })
}

fn encode_cursor(timestamp: Timestamp, seq: u64) -> PageToken {
    PageToken(format!("{timestamp}/{seq}"))
}

fn decode_cursor(token: &PageToken) -> Result<(Timestamp, u64), StoreError> {
    let invalid = || StoreError::InvalidPageToken(token.0.clone());
    let (timestamp, seq) = token.0.split_once('/').ok_or_else(invalid)?;
    let timestamp = Timestamp::parse(timestamp).map_err(|_| invalid())?;
    let seq = seq.parse().map_err(|_| invalid())?;
    Ok((timestamp, seq))
}

/// In-process embedding store.
#[derive(Debug)]
pub struct MemoryEmbeddingStore {
    partitions: RwLock<HashMap<String, Vec<Sequenced>>>,
    page_size: usize,
}

impl Default for MemoryEmbeddingStore {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl MemoryEmbeddingStore {
    /// Creates an empty store serving at most `page_size` records per page.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            page_size: page_size.max(1),
        }
    }

    /// Number of records stored in `partition`.
    #[must_use]
    pub fn record_count(&self, partition: &str) -> usize {
        self.partitions.read().get(partition).map_or(0, Vec::len)
    }
}

impl EmbeddingStore for MemoryEmbeddingStore {
    fn query_after(
        &self,
        partition: &str,
        after: Timestamp,
        page: Option<&PageToken>,
    ) -> Result<RecordPage, StoreError> {
        let matching = self
            .partitions
            .read()
            .get(partition)
            .map(|records| {
                records
                    .iter()
                    .filter(|(_, r)| r.timestamp > after)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        paginate(matching, page, self.page_size)
    }

    fn append(&self, partition: &str, record: EmbeddingRecord) -> Result<(), StoreError> {
        let mut partitions = self.partitions.write();
        let records = partitions.entry(partition.to_string()).or_default();
        let seq = records.len() as u64;
        records.push((seq, record));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(micros: i64) -> Timestamp {
        Timestamp::from_micros(micros).unwrap()
    }

    fn record(id: &str, micros: i64) -> EmbeddingRecord {
        EmbeddingRecord::new(id, vec![1.0, 0.0], ts(micros))
    }

    #[test]
    fn test_query_is_newest_first_and_strict() {
        let store = MemoryEmbeddingStore::new(10);
        for (id, t) in [("a", 10), ("b", 30), ("c", 20)] {
            store.append("image", record(id, t)).unwrap();
        }

        let page = store.query_after("image", ts(10), None).unwrap();
        let ids: Vec<_> = page.records.iter().map(|r| r.external_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(page.next.is_none());
    }

    #[test]
    fn test_partitions_are_isolated() {
        let store = MemoryEmbeddingStore::default();
        store.append("image", record("a", 1)).unwrap();
        store.append("video", record("b", 2)).unwrap();

        let all = fetch_all_after(&store, "image", Timestamp::epoch()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].external_id, "a");
        assert!(fetch_all_after(&store, "audio", Timestamp::epoch())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_pagination_drains_ties_exactly() {
        let store = MemoryEmbeddingStore::new(2);
        // Five records sharing two timestamps, split across three pages
        for (i, t) in [5, 5, 5, 7, 7].iter().enumerate() {
            store.append("image", record(&format!("r{i}"), *t)).unwrap();
        }

        let first = store.query_after("image", Timestamp::epoch(), None).unwrap();
        assert_eq!(first.records.len(), 2);
        assert!(first.next.is_some());

        let all = fetch_all_after(&store, "image", Timestamp::epoch()).unwrap();
        let mut ids: Vec<_> = all.iter().map(|r| r.external_id.clone()).collect();
        assert_eq!(ids.len(), 5);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);
        for pair in all.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }
    }

    #[test]
    fn test_invalid_token_rejected() {
        let store = MemoryEmbeddingStore::new(1);
        store.append("image", record("a", 1)).unwrap();
        let bogus = PageToken::new("not-a-cursor");
        assert!(matches!(
            store.query_after("image", Timestamp::epoch(), Some(&bogus)),
            Err(StoreError::InvalidPageToken(_))
        ));
    }

    struct StuckStore;

    impl EmbeddingStore for StuckStore {
        fn query_after(
            &self,
            _partition: &str,
            _after: Timestamp,
            _page: Option<&PageToken>,
        ) -> Result<RecordPage, StoreError> {
            Ok(RecordPage {
                records: Vec::new(),
                next: Some(PageToken::new("same")),
            })
        }

        fn append(&self, _partition: &str, _record: EmbeddingRecord) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn test_non_advancing_pagination_fails() {
        assert!(matches!(
            fetch_all_after(&StuckStore, "image", Timestamp::epoch()),
            Err(StoreError::Backend(_))
        ));
    }

    /// Hands out tokens A, B, A, B, ... forever.
    struct CyclingStore;

    impl EmbeddingStore for CyclingStore {
        fn query_after(
            &self,
            _partition: &str,
            _after: Timestamp,
            page: Option<&PageToken>,
        ) -> Result<RecordPage, StoreError> {
            let next = match page.map(PageToken::as_str) {
                None | Some("B") => "A",
                _ => "B",
            };
            Ok(RecordPage {
                records: vec![record(next, 1)],
                next: Some(PageToken::new(next)),
            })
        }

        fn append(&self, _partition: &str, _record: EmbeddingRecord) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn test_cycling_pagination_fails() {
        let err = fetch_all_after(&CyclingStore, "image", Timestamp::epoch()).unwrap_err();
        assert!(matches!(err, StoreError::Backend(ref msg) if msg.contains("'A'")));
    }
}
