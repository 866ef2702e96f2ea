//! The on-disk stack the CLI uses: JSONL embeddings, filesystem snapshots,
//! `.npy` bootstrap sample, all wired from `Settings`.

use crate::common::{random_unit_vectors, ts};
use clipdex::Settings;
use clipdex::snapshot::SnapshotStore;
use clipdex::store::{EmbeddingRecord, EmbeddingStore, FsObjectStore, JsonlEmbeddingStore};
use clipdex::sync::SyncEngine;
use clipdex::vector::write_npy_matrix;
use std::sync::Arc;
use tempfile::TempDir;

fn settings_in(dir: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.snapshot.root = dir.path().join("snapshots");
    settings.embeddings.path = dir.path().join("embeddings.jsonl");
    settings.embeddings.page_size = 3;
    settings.index.clusters = 5;
    settings.index.bootstrap_sample = Some(dir.path().join("bootstrap.npy"));
    settings
}

#[test]
fn test_sync_from_jsonl_into_filesystem_snapshot() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let settings = settings_in(&dir);
    write_npy_matrix(
        settings.index.bootstrap_sample.as_deref().unwrap(),
        &random_unit_vectors(100, 16, 5),
    )?;

    let embeddings = Arc::new(JsonlEmbeddingStore::new(
        &settings.embeddings.path,
        settings.embeddings.page_size,
    ));
    for (i, vector) in random_unit_vectors(10, 16, 6).into_iter().enumerate() {
        embeddings.append(
            "image",
            EmbeddingRecord::new(format!("{i}.png"), vector, ts(i as i64 + 1)),
        )?;
    }
    // Another partition is never synced
    embeddings.append(
        "thumbnail",
        EmbeddingRecord::new("thumb.png", random_unit_vectors(1, 16, 7).remove(0), ts(50)),
    )?;

    let objects = Arc::new(FsObjectStore::open(&settings.snapshot.root)?);
    let engine = SyncEngine::new(embeddings.clone(), objects.clone(), settings.sync_config());
    let outcome = engine.run()?;
    assert_eq!(outcome.ingested, 10);
    assert_eq!(outcome.last_timestamp, ts(10));

    for key in ["faiss.index", "index_to_id.json", "metadata.json"] {
        assert!(settings.snapshot.root.join(key).is_file(), "{key} missing");
    }
    assert!(!settings.snapshot.root.join("sync.lease").exists());

    let metadata = std::fs::read_to_string(settings.snapshot.root.join("metadata.json"))?;
    let metadata: serde_json::Value = serde_json::from_str(&metadata)?;
    assert_eq!(metadata["last_index"], 10);
    assert_eq!(metadata["last_timestamp"], "1970-01-01T00:00:00.000010");

    // A fresh process sees the same state
    let reopened = SnapshotStore::new(
        Arc::new(FsObjectStore::open(&settings.snapshot.root)?),
        settings.snapshot_keys(),
    );
    let stats = reopened.stats()?;
    assert!(stats.is_consistent());
    assert_eq!(stats.clusters, Some(5));
    assert_eq!(stats.list_sizes.iter().sum::<usize>(), 10);

    assert_eq!(engine.run()?.retrieved, 0);
    Ok(())
}

#[test]
fn test_missing_bootstrap_sample_file_fails_cleanly() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let settings = settings_in(&dir);

    let engine = SyncEngine::new(
        Arc::new(JsonlEmbeddingStore::open(&settings.embeddings.path)),
        Arc::new(FsObjectStore::open(&settings.snapshot.root)?),
        settings.sync_config(),
    );
    assert!(matches!(
        engine.run(),
        Err(clipdex::SyncError::Bootstrap(_))
    ));
    // Metadata was initialized before the index failed to train
    assert!(settings.snapshot.root.join("metadata.json").is_file());
    assert!(!settings.snapshot.root.join("faiss.index").exists());
    Ok(())
}
