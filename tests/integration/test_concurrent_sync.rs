//! Concurrent sync runs under the lease never lose records.

use crate::common::{random_unit_vectors, sync_config, ts, StallingEmbeddingStore};
use clipdex::snapshot::{SnapshotKeys, SnapshotStore};
use clipdex::store::{EmbeddingRecord, EmbeddingStore, MemoryEmbeddingStore, MemoryObjectStore, ObjectStore};
use clipdex::sync::{SyncEngine, SyncError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WRITERS: usize = 4;
const PER_WRITER: usize = 25;

fn run_until_done(engine: &SyncEngine) {
    loop {
        match engine.run() {
            Ok(_) => return,
            Err(SyncError::LeaseUnavailable { .. }) => thread::yield_now(),
            Err(e) => panic!("sync failed: {e}"),
        }
    }
}

#[test]
fn test_concurrent_writers_lose_no_records() {
    let embeddings = Arc::new(MemoryEmbeddingStore::new(5));
    let objects = Arc::new(MemoryObjectStore::new());
    let training = random_unit_vectors(128, 32, 21);
    let vectors = Arc::new(random_unit_vectors(WRITERS * PER_WRITER, 32, 22));
    // Stamping and appending together keeps records visible in stamp order
    let clock = Arc::new(Mutex::new(1i64));

    // Initialize once so every writer shares the same trained index
    SyncEngine::new(embeddings.clone(), objects.clone(), sync_config(training.clone(), 8))
        .run()
        .unwrap();

    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let embeddings = embeddings.clone();
            let objects = objects.clone();
            let vectors = vectors.clone();
            let clock = clock.clone();
            let config = sync_config(training.clone(), 8);
            thread::spawn(move || {
                let engine = SyncEngine::new(embeddings.clone(), objects, config);
                for i in 0..PER_WRITER {
                    {
                        let mut now = clock.lock();
                        let record = EmbeddingRecord::new(
                            format!("w{w}-{i}.jpg"),
                            vectors[w * PER_WRITER + i].clone(),
                            ts(*now),
                        );
                        embeddings.append("image", record).unwrap();
                        *now += 1;
                    }
                    if i % 5 == 4 {
                        run_until_done(&engine);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // Each writer synced after its last append, so everything is in
    let snapshot = SnapshotStore::new(objects.clone(), SnapshotKeys::default())
        .load_read_only()
        .unwrap();
    snapshot.check_consistency().unwrap();
    assert_eq!(snapshot.index.len(), WRITERS * PER_WRITER);

    let ids: Vec<u64> = snapshot.mapping.iter().map(|(id, _)| id.get()).collect();
    assert_eq!(ids, (0..(WRITERS * PER_WRITER) as u64).collect::<Vec<_>>());
    for w in 0..WRITERS {
        for i in 0..PER_WRITER {
            assert!(snapshot.mapping.contains_external(&format!("w{w}-{i}.jpg")));
        }
    }
    assert_eq!(snapshot.metadata.last_timestamp, ts((WRITERS * PER_WRITER) as i64));
    assert!(!objects.exists("sync.lease").unwrap());
}

#[test]
fn test_writer_that_outlives_its_lease_writes_nothing() {
    let embeddings = Arc::new(MemoryEmbeddingStore::new(10));
    let objects = Arc::new(MemoryObjectStore::new());
    let training = random_unit_vectors(64, 16, 31);
    let vectors = random_unit_vectors(2, 16, 32);

    SyncEngine::new(embeddings.clone(), objects.clone(), sync_config(training.clone(), 4))
        .run()
        .unwrap();
    embeddings
        .append("image", EmbeddingRecord::new("r1.jpg", vectors[0].clone(), ts(1)))
        .unwrap();

    // Writer A reads {r1}, then stalls well past its 50 ms lease
    let mut slow_config = sync_config(training.clone(), 4);
    slow_config.lease.ttl = Duration::from_millis(50);
    let slow = SyncEngine::new(
        Arc::new(StallingEmbeddingStore::new(embeddings.clone(), Duration::from_millis(400))),
        objects.clone(),
        slow_config,
    );
    let slow_run = thread::spawn(move || slow.run());

    // Writer B takes over the expired lease and ingests r2
    thread::sleep(Duration::from_millis(150));
    embeddings
        .append("image", EmbeddingRecord::new("r2.jpg", vectors[1].clone(), ts(2)))
        .unwrap();
    let outcome = SyncEngine::new(embeddings.clone(), objects.clone(), sync_config(training, 4))
        .run()
        .unwrap();
    assert_eq!(outcome.ingested, 2);
    assert_eq!(outcome.last_timestamp, ts(2));

    let result = slow_run.join().unwrap();
    assert!(
        matches!(result, Err(SyncError::LeaseLost { .. })),
        "stalled writer must not persist: {result:?}"
    );

    // B's snapshot survives untouched
    let snapshot = SnapshotStore::new(objects.clone(), SnapshotKeys::default())
        .load_read_only()
        .unwrap();
    snapshot.check_consistency().unwrap();
    assert_eq!(snapshot.index.len(), 2);
    assert!(snapshot.mapping.contains_external("r1.jpg"));
    assert!(snapshot.mapping.contains_external("r2.jpg"));
    assert_eq!(snapshot.metadata.last_timestamp, ts(2));
    assert!(!objects.exists("sync.lease").unwrap());
}
