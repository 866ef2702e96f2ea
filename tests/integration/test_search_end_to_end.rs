//! Sync then search, through signed retrieval links.

use crate::common::{append_all, random_unit_vectors, sync_config};
use chrono::Utc;
use clipdex::search::{SearchConfig, SearchEngine, SearchError, SearchParams};
use clipdex::snapshot::SnapshotError;
use clipdex::store::{MemoryEmbeddingStore, MemoryObjectStore, ObjectStore, SignedUrlResolver};
use clipdex::sync::SyncEngine;
use clipdex::vector::{TextEncoder, VectorDimension, VectorError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const DIMENSION: usize = 24;

/// Encodes known captions to fixed vectors, like a CLIP text tower would
/// place a caption near its image.
struct CaptionEncoder {
    captions: HashMap<String, Vec<f32>>,
}

impl TextEncoder for CaptionEncoder {
    fn encode(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        self.captions
            .get(text)
            .map(|v| v.iter().map(|x| x * 3.0).collect())
            .ok_or_else(|| VectorError::EmbeddingFailed(format!("unknown caption '{text}'")))
    }

    fn dimension(&self) -> VectorDimension {
        VectorDimension::new(DIMENSION).unwrap()
    }
}

struct Fixture {
    objects: Arc<MemoryObjectStore>,
    resolver: Arc<SignedUrlResolver>,
    encoder: Arc<CaptionEncoder>,
}

fn indexed_fixture() -> Fixture {
    let embeddings = Arc::new(MemoryEmbeddingStore::default());
    let objects = Arc::new(MemoryObjectStore::new());
    let vectors = random_unit_vectors(40, DIMENSION, 77);

    let records: Vec<(String, Vec<f32>, i64)> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (format!("photos/{i}.jpg"), v.clone(), i as i64 + 1))
        .collect();
    let borrowed: Vec<(&str, Vec<f32>, i64)> = records
        .iter()
        .map(|(id, v, t)| (id.as_str(), v.clone(), *t))
        .collect();
    append_all(embeddings.as_ref(), &borrowed);

    SyncEngine::new(
        embeddings,
        objects.clone(),
        sync_config(random_unit_vectors(200, DIMENSION, 78), 6),
    )
    .run()
    .unwrap();

    let captions = [("a lighthouse", 7), ("a red bicycle", 23)]
        .into_iter()
        .map(|(caption, i)| (caption.to_string(), vectors[i].clone()))
        .collect();

    Fixture {
        objects,
        resolver: Arc::new(SignedUrlResolver::new("https://img.example.com/media/", "s3cret").unwrap()),
        encoder: Arc::new(CaptionEncoder { captions }),
    }
}

fn engine(fixture: &Fixture, config: SearchConfig) -> SearchEngine {
    SearchEngine::new(
        fixture.encoder.clone(),
        fixture.objects.clone(),
        fixture.resolver.clone(),
        config,
    )
}

#[test]
fn test_caption_finds_its_image_with_verifiable_link() {
    let fixture = indexed_fixture();
    let engine = engine(&fixture, SearchConfig::default());

    // Probing every list makes the top hit exact
    let response = engine
        .search("a lighthouse", SearchParams { k: 3, nprobe: 6 })
        .unwrap();
    assert_eq!(response.hits.len(), 3);
    assert_eq!(response.image_urls.len(), 3);
    assert_eq!(response.hits[0].external_id, "photos/7.jpg");
    assert_eq!(response.hits[0].internal_id.get(), 7);
    assert!((response.hits[0].score - 1.0).abs() < 1e-5);
    assert!(response.hits.windows(2).all(|w| w[0].score >= w[1].score));

    for (hit, url) in response.hits.iter().zip(&response.image_urls) {
        assert_eq!(
            fixture.resolver.verify(url, Utc::now()).as_deref(),
            Some(hit.external_id.as_str())
        );
    }

    let wire: serde_json::Value = serde_json::to_value(&response).unwrap();
    assert_eq!(wire["neighbors"].as_object().unwrap().len(), 3);
    assert!(wire["neighbors"]["7"].as_f64().unwrap() > 0.99);
    assert_eq!(wire["image_urls"][0], response.image_urls[0].as_str());
}

#[test]
fn test_cached_snapshot_is_reused_within_ttl() {
    let fixture = indexed_fixture();
    let engine = engine(
        &fixture,
        SearchConfig {
            cache_ttl: Duration::from_secs(300),
            ..SearchConfig::default()
        },
    );
    let params = SearchParams { k: 1, nprobe: 6 };
    let first = engine.search("a red bicycle", params).unwrap();

    // Deleting the artifacts does not affect searches served from cache
    for key in fixture.objects.keys() {
        fixture.objects.delete(&key).unwrap();
    }
    let second = engine.search("a red bicycle", params).unwrap();
    assert_eq!(first.hits, second.hits);

    let uncached = self::engine(&fixture, SearchConfig::default());
    assert!(matches!(
        uncached.search("a red bicycle", params),
        Err(SearchError::Snapshot(SnapshotError::NotInitialized(_)))
    ));
}

#[test]
fn test_encoder_failure_is_reported() {
    let fixture = indexed_fixture();
    let engine = engine(&fixture, SearchConfig::default());
    assert!(matches!(
        engine.search("an unknown caption", SearchParams::default()),
        Err(SearchError::Encoder(_))
    ));
}
