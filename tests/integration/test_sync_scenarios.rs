//! End-to-end sync behavior over in-memory stores at CLIP scale (d = 512).

use crate::common::{
    RedeliveringEmbeddingStore, append_all, mapping_bytes, random_unit_vectors, sync_config, ts,
};
use clipdex::snapshot::{SnapshotKeys, SnapshotStore};
use clipdex::store::{EmbeddingStore, MemoryEmbeddingStore, MemoryObjectStore};
use clipdex::sync::SyncEngine;
use clipdex::vector::{CLIP_DIMENSION, InternalId};
use std::sync::Arc;

fn training() -> Vec<Vec<f32>> {
    random_unit_vectors(1000, CLIP_DIMENSION, 7)
}

#[test]
fn test_three_records_then_resync_then_late_record() {
    let embeddings = Arc::new(MemoryEmbeddingStore::new(2));
    let objects = Arc::new(MemoryObjectStore::new());
    let engine = SyncEngine::new(embeddings.clone(), objects.clone(), sync_config(training(), 15));
    let vectors = random_unit_vectors(4, CLIP_DIMENSION, 99);

    append_all(
        embeddings.as_ref(),
        &[
            ("first.jpg", vectors[0].clone(), 1_000),
            ("second.jpg", vectors[1].clone(), 2_000),
            ("third.jpg", vectors[2].clone(), 3_000),
        ],
    );

    let outcome = engine.run().unwrap();
    assert_eq!(outcome.retrieved, 3);
    assert_eq!(outcome.ingested, 3);
    assert_eq!(outcome.last_timestamp, ts(3_000));

    let snapshots = SnapshotStore::new(objects.clone(), SnapshotKeys::default());
    let snapshot = snapshots.load_read_only().unwrap();
    assert_eq!(snapshot.index.nlist(), 15);
    for (id, name) in ["first.jpg", "second.jpg", "third.jpg"].iter().enumerate() {
        assert_eq!(
            snapshot.mapping.external_id(InternalId::new(id as u64)),
            Some(*name)
        );
    }

    // Nothing new: nothing changes
    let before = mapping_bytes(objects.as_ref());
    let again = engine.run().unwrap();
    assert_eq!(again.retrieved, 0);
    assert_eq!(again.ingested, 0);
    assert_eq!(again.index_size, 3);
    assert_eq!(mapping_bytes(objects.as_ref()), before);

    // Older than the watermark: never retrieved, never ingested
    append_all(embeddings.as_ref(), &[("late.jpg", vectors[3].clone(), 2_500)]);
    let late = engine.run().unwrap();
    assert_eq!(late.ingested, 0);
    assert_eq!(late.index_size, 3);
    assert_eq!(late.last_timestamp, ts(3_000));
    assert_eq!(mapping_bytes(objects.as_ref()), before);
}

#[test]
fn test_ids_stay_dense_across_many_runs() {
    let embeddings = Arc::new(MemoryEmbeddingStore::new(7));
    let objects = Arc::new(MemoryObjectStore::new());
    let engine = SyncEngine::new(embeddings.clone(), objects.clone(), sync_config(training(), 15));
    let vectors = random_unit_vectors(60, CLIP_DIMENSION, 3);

    for (batch, chunk) in vectors.chunks(20).enumerate() {
        for (i, vector) in chunk.iter().enumerate() {
            let n = batch * 20 + i;
            embeddings
                .append(
                    "image",
                    clipdex::EmbeddingRecord::new(format!("img-{n}.jpg"), vector.clone(), ts(n as i64 + 1)),
                )
                .unwrap();
        }
        engine.run().unwrap();
    }

    let snapshot = SnapshotStore::new(objects, SnapshotKeys::default())
        .load_read_only()
        .unwrap();
    assert_eq!(snapshot.index.len(), 60);
    assert_eq!(snapshot.mapping.len(), 60);
    assert_eq!(snapshot.metadata.last_index, 60);
    let ids: Vec<u64> = snapshot.mapping.iter().map(|(id, _)| id.get()).collect();
    assert_eq!(ids, (0..60).collect::<Vec<_>>());
    assert_eq!(snapshot.mapping.internal_id("img-42.jpg"), Some(InternalId::new(42)));
}

#[test]
fn test_redelivered_records_are_never_reingested() {
    let embeddings = Arc::new(RedeliveringEmbeddingStore::new());
    let objects = Arc::new(MemoryObjectStore::new());
    let engine = SyncEngine::new(embeddings.clone(), objects.clone(), sync_config(training(), 15));
    let vectors = random_unit_vectors(3, CLIP_DIMENSION, 11);

    append_all(
        embeddings.as_ref(),
        &[("a.jpg", vectors[0].clone(), 10), ("b.jpg", vectors[1].clone(), 20)],
    );
    assert_eq!(engine.run().unwrap().ingested, 2);

    append_all(embeddings.as_ref(), &[("c.jpg", vectors[2].clone(), 30)]);
    let outcome = engine.run().unwrap();
    assert_eq!(outcome.retrieved, 3);
    assert_eq!(outcome.stale, 2);
    assert_eq!(outcome.ingested, 1);
    assert_eq!(outcome.index_size, 3);
}

#[test]
fn test_reembedded_external_id_counts_as_duplicate() {
    let embeddings = Arc::new(MemoryEmbeddingStore::default());
    let objects = Arc::new(MemoryObjectStore::new());
    let engine = SyncEngine::new(embeddings.clone(), objects.clone(), sync_config(training(), 15));
    let vectors = random_unit_vectors(2, CLIP_DIMENSION, 5);

    append_all(embeddings.as_ref(), &[("cat.jpg", vectors[0].clone(), 100)]);
    engine.run().unwrap();

    append_all(embeddings.as_ref(), &[("cat.jpg", vectors[1].clone(), 200)]);
    let outcome = engine.run().unwrap();
    assert_eq!(outcome.duplicates, 1);
    assert_eq!(outcome.ingested, 0);
    // The watermark still moves past the duplicate
    assert_eq!(outcome.last_timestamp, ts(200));
    assert_eq!(engine.run().unwrap().retrieved, 0);
}

#[test]
fn test_wrong_dimension_aborts_before_touching_index() {
    let embeddings = Arc::new(MemoryEmbeddingStore::default());
    let objects = Arc::new(MemoryObjectStore::new());
    let engine = SyncEngine::new(embeddings.clone(), objects.clone(), sync_config(training(), 15));
    let good = random_unit_vectors(1, CLIP_DIMENSION, 1).remove(0);

    append_all(
        embeddings.as_ref(),
        &[("good.jpg", good, 1), ("bad.jpg", vec![1.0, 0.0, 0.0], 2)],
    );
    assert!(matches!(
        engine.run(),
        Err(clipdex::SyncError::InvalidRecord { ref external_id, .. }) if external_id == "bad.jpg"
    ));

    let stats = SnapshotStore::new(objects, SnapshotKeys::default()).stats().unwrap();
    assert_eq!(stats.index_size, Some(0));
    assert!(stats.is_consistent());
}
