//! An interrupted persist is reported precisely and caught on the next load.

use crate::common::{FailingObjectStore, append_all, random_unit_vectors, sync_config};
use clipdex::snapshot::{Artifact, SnapshotError, SnapshotKeys, SnapshotStore};
use clipdex::store::MemoryEmbeddingStore;
use clipdex::sync::{SyncEngine, SyncError};
use std::sync::Arc;

#[test]
fn test_failed_index_write_is_surfaced_then_detected() {
    let embeddings = Arc::new(MemoryEmbeddingStore::default());
    let objects = Arc::new(FailingObjectStore::new());
    let training = random_unit_vectors(64, 16, 1);
    let engine = SyncEngine::new(embeddings.clone(), objects.clone(), sync_config(training, 4));
    let vectors = random_unit_vectors(2, 16, 2);

    // Initialize cleanly, then fail the next index write
    engine.run().unwrap();
    objects.fail_writes_to(&SnapshotKeys::default().index);
    append_all(
        embeddings.as_ref(),
        &[("a.jpg", vectors[0].clone(), 1), ("b.jpg", vectors[1].clone(), 2)],
    );

    match engine.run() {
        Err(SyncError::Snapshot(SnapshotError::PartialWrite {
            written, failed, ..
        })) => {
            assert_eq!(written, vec![Artifact::Metadata]);
            assert_eq!(failed, Artifact::Index);
        }
        other => panic!("Expected PartialWrite, got {other:?}"),
    }

    // Metadata now claims 2 vectors the index does not have
    objects.disarm();
    let err = engine.run().unwrap_err();
    assert!(matches!(
        err,
        SyncError::Snapshot(SnapshotError::Consistency(ref v)) if v.index_len == 0 && v.last_index == Some(2)
    ));

    // Stats still load and show the damage
    let stats = SnapshotStore::new(objects, SnapshotKeys::default()).stats().unwrap();
    assert!(stats.is_initialized());
    assert!(!stats.is_consistent());
}

#[test]
fn test_failed_mapping_write_breaks_search_consistency() {
    let embeddings = Arc::new(MemoryEmbeddingStore::default());
    let objects = Arc::new(FailingObjectStore::new());
    let engine = SyncEngine::new(
        embeddings.clone(),
        objects.clone(),
        sync_config(random_unit_vectors(64, 16, 3), 4),
    );
    engine.run().unwrap();

    objects.fail_writes_to(&SnapshotKeys::default().mapping);
    append_all(embeddings.as_ref(), &[("a.jpg", random_unit_vectors(1, 16, 4).remove(0), 1)]);
    assert!(matches!(
        engine.run(),
        Err(SyncError::Snapshot(SnapshotError::PartialWrite {
            failed: Artifact::Mapping,
            ..
        }))
    ));

    objects.disarm();
    let snapshots = SnapshotStore::new(objects, SnapshotKeys::default());
    assert!(matches!(
        snapshots.load_read_only(),
        Err(SnapshotError::Consistency(_))
    ));
}
