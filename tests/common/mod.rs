//! Shared helpers for integration tests.
#![allow(dead_code)]

use clipdex::snapshot::SnapshotKeys;
use clipdex::store::{
    EmbeddingRecord, EmbeddingStore, MemoryEmbeddingStore, MemoryObjectStore, ObjectStore,
    ObjectVersion, PageToken, RecordPage, StoreError, StoredObject,
};
use clipdex::sync::{LeaseConfig, SyncConfig, TrainingSample};
use clipdex::types::Timestamp;
use clipdex::vector::normalize;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Unit vectors with uniformly random directions.
pub fn random_unit_vectors(count: usize, dimension: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let mut v: Vec<f32> = (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect();
            normalize(&mut v).expect("random vector is nonzero");
            v
        })
        .collect()
}

/// Unit vectors scattered around `centers` random directions, so the data
/// has real cluster structure for the IVF to exploit.
pub fn clustered_unit_vectors(
    count: usize,
    dimension: usize,
    centers: usize,
    seed: u64,
) -> Vec<Vec<f32>> {
    let anchors = random_unit_vectors(centers, dimension, seed ^ 0xa5a5);
    let noise = 0.6 / (dimension as f32).sqrt();
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let anchor = &anchors[i % centers];
            let mut v: Vec<f32> = anchor
                .iter()
                .map(|x| x + rng.random_range(-noise..noise))
                .collect();
            normalize(&mut v).expect("perturbed vector is nonzero");
            v
        })
        .collect()
}

/// Timestamp `micros` after the epoch.
pub fn ts(micros: i64) -> Timestamp {
    Timestamp::from_micros(micros).expect("valid timestamp")
}

/// Sync settings for tests: vector training sample, fast lease retries.
pub fn sync_config(training: Vec<Vec<f32>>, clusters: usize) -> SyncConfig {
    SyncConfig {
        clusters,
        lease: LeaseConfig {
            ttl: Duration::from_secs(60),
            retries: 400,
            backoff: Duration::from_millis(1),
        },
        training: Some(TrainingSample::Vectors(training)),
        ..SyncConfig::default()
    }
}

/// Appends `(external_id, vector, micros)` triples to partition `image`.
pub fn append_all(store: &dyn EmbeddingStore, records: &[(&str, Vec<f32>, i64)]) {
    for (id, vector, micros) in records {
        store
            .append("image", EmbeddingRecord::new(*id, vector.clone(), ts(*micros)))
            .expect("append succeeds");
    }
}

/// Object store whose writes to one key fail once armed.
#[derive(Debug, Default)]
pub struct FailingObjectStore {
    pub inner: MemoryObjectStore,
    fail_key: Mutex<Option<String>>,
    armed: AtomicBool,
}

impl FailingObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `put` to `key` fail until [`disarm`](Self::disarm).
    pub fn fail_writes_to(&self, key: &str) {
        *self.fail_key.lock() = Some(key.to_string());
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    fn check(&self, key: &str) -> Result<(), StoreError> {
        if self.armed.load(Ordering::SeqCst) && self.fail_key.lock().as_deref() == Some(key) {
            return Err(StoreError::Backend(format!("injected failure writing '{key}'")));
        }
        Ok(())
    }
}

impl ObjectStore for FailingObjectStore {
    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.exists(key)
    }

    fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<ObjectVersion, StoreError> {
        self.check(key)?;
        self.inner.put(key, bytes)
    }

    fn put_if(
        &self,
        key: &str,
        bytes: &[u8],
        expected: Option<&ObjectVersion>,
    ) -> Result<ObjectVersion, StoreError> {
        self.check(key)?;
        self.inner.put_if(key, bytes, expected)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(key)
    }

    fn delete_if(&self, key: &str, expected: &ObjectVersion) -> Result<(), StoreError> {
        self.inner.delete_if(key, expected)
    }
}

/// Embedding store that ignores the watermark and redelivers every record,
/// like an at-least-once queue would.
#[derive(Debug, Default)]
pub struct RedeliveringEmbeddingStore {
    inner: MemoryEmbeddingStore,
}

impl RedeliveringEmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EmbeddingStore for RedeliveringEmbeddingStore {
    fn query_after(
        &self,
        partition: &str,
        _after: Timestamp,
        page: Option<&PageToken>,
    ) -> Result<RecordPage, StoreError> {
        self.inner.query_after(partition, Timestamp::epoch(), page)
    }

    fn append(&self, partition: &str, record: EmbeddingRecord) -> Result<(), StoreError> {
        self.inner.append(partition, record)
    }
}

/// Embedding store that stalls after answering its first query, long enough
/// for a short lease to expire mid-run.
#[derive(Debug)]
pub struct StallingEmbeddingStore {
    pub inner: Arc<MemoryEmbeddingStore>,
    stall: Duration,
    stalled: AtomicBool,
}

impl StallingEmbeddingStore {
    pub fn new(inner: Arc<MemoryEmbeddingStore>, stall: Duration) -> Self {
        Self {
            inner,
            stall,
            stalled: AtomicBool::new(false),
        }
    }
}

impl EmbeddingStore for StallingEmbeddingStore {
    fn query_after(
        &self,
        partition: &str,
        after: Timestamp,
        page: Option<&PageToken>,
    ) -> Result<RecordPage, StoreError> {
        let result = self.inner.query_after(partition, after, page);
        if !self.stalled.swap(true, Ordering::SeqCst) {
            std::thread::sleep(self.stall);
        }
        result
    }

    fn append(&self, partition: &str, record: EmbeddingRecord) -> Result<(), StoreError> {
        self.inner.append(partition, record)
    }
}

/// Mapping bytes as persisted.
pub fn mapping_bytes(objects: &dyn ObjectStore) -> Vec<u8> {
    objects
        .get(&SnapshotKeys::default().mapping)
        .expect("store readable")
        .expect("mapping exists")
        .bytes
}
