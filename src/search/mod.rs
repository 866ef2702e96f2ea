//! Text-to-image similarity search.
//!
//! The read path: encode the query text, L2-normalize it, search the latest
//! snapshot (or a recently cached one), translate internal ids to external
//! ids, and attach a retrieval link to every hit. Nothing is ever written.

mod cache;

pub use cache::SnapshotCache;

use crate::snapshot::{Snapshot, SnapshotError, SnapshotKeys, SnapshotStore};
use crate::store::{LocatorResolver, ObjectStore, StoreError};
use crate::vector::{InternalId, TextEncoder, VectorError, normalize};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default number of results.
pub const DEFAULT_K: usize = 5;

/// Default number of inverted lists scanned.
pub const DEFAULT_NPROBE: usize = 3;

/// Per-request search knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchParams {
    /// Number of hits to return.
    pub k: usize,
    /// Clusters to scan; more is slower and finds more true neighbors.
    pub nprobe: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            nprobe: DEFAULT_NPROBE,
        }
    }
}

impl SearchParams {
    fn validate(&self) -> Result<(), SearchError> {
        if self.k == 0 {
            return Err(SearchError::InvalidParameter {
                name: "k",
                reason: "must be at least 1",
            });
        }
        if self.nprobe == 0 {
            return Err(SearchError::InvalidParameter {
                name: "nprobe",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

/// One ranked hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub internal_id: InternalId,
    pub external_id: String,
    /// Inner product with the query; cosine similarity for unit vectors.
    pub score: f32,
}

/// Ranked hits with rank-aligned retrieval links.
///
/// Serializes to `{"neighbors": {"<internal id>": <score>, ...}, "image_urls": [...]}`
/// with neighbors in rank order.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub image_urls: Vec<String>,
}

struct RankedNeighbors<'a>(&'a [SearchHit]);

impl Serialize for RankedNeighbors<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for hit in self.0 {
            map.serialize_entry(&hit.internal_id.get().to_string(), &hit.score)?;
        }
        map.end()
    }
}

impl Serialize for SearchResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("neighbors", &RankedNeighbors(&self.hits))?;
        map.serialize_entry("image_urls", &self.image_urls)?;
        map.end()
    }
}

/// Errors from the read path.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid search parameter '{name}': {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: &'static str,
    },

    #[error("Failed to encode query: {0}")]
    Encoder(VectorError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error(
        "Index returned internal id {0} which has no mapping entry\nSuggestion: The snapshot is out of sync; rerun 'clipdex sync' or restore the mapping"
    )]
    MappingDesync(InternalId),

    #[error("Failed to build retrieval link: {0}")]
    Locator(#[from] StoreError),
}

/// Settings for a [`SearchEngine`].
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub keys: SnapshotKeys,
    /// How long a loaded snapshot may be reused; zero disables caching.
    pub cache_ttl: Duration,
    /// Lifetime of issued retrieval links.
    pub link_ttl: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            keys: SnapshotKeys::default(),
            cache_ttl: Duration::ZERO,
            link_ttl: Duration::from_secs(3600),
        }
    }
}

/// Read path over the persisted snapshot.
pub struct SearchEngine {
    encoder: Arc<dyn TextEncoder>,
    snapshots: SnapshotStore,
    locator: Arc<dyn LocatorResolver>,
    cache: Option<SnapshotCache>,
    link_ttl: Duration,
}

impl SearchEngine {
    pub fn new(
        encoder: Arc<dyn TextEncoder>,
        objects: Arc<dyn ObjectStore>,
        locator: Arc<dyn LocatorResolver>,
        config: SearchConfig,
    ) -> Self {
        let cache = (!config.cache_ttl.is_zero()).then(|| SnapshotCache::new(config.cache_ttl));
        Self {
            encoder,
            snapshots: SnapshotStore::new(objects, config.keys),
            locator,
            cache,
            link_ttl: config.link_ttl,
        }
    }

    /// Embeds `text` and returns its nearest images.
    pub fn search(&self, text: &str, params: SearchParams) -> Result<SearchResponse, SearchError> {
        params.validate()?;
        let query = self.encoder.encode(text).map_err(SearchError::Encoder)?;
        self.search_vector(query, params)
    }

    /// Searches with an already-computed query embedding.
    pub fn search_vector(
        &self,
        mut query: Vec<f32>,
        params: SearchParams,
    ) -> Result<SearchResponse, SearchError> {
        params.validate()?;
        normalize(&mut query)?;

        let snapshot = self.snapshot()?;
        let neighbors = snapshot.index.search(&query, params.k, params.nprobe)?;

        let mut hits = Vec::with_capacity(neighbors.len());
        let mut image_urls = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let external_id = snapshot
                .mapping
                .external_id(neighbor.id)
                .ok_or(SearchError::MappingDesync(neighbor.id))?;
            let locator = self.locator.locate(external_id, self.link_ttl)?;

            hits.push(SearchHit {
                internal_id: neighbor.id,
                external_id: external_id.to_string(),
                score: neighbor.score.get(),
            });
            image_urls.push(locator.url);
        }

        tracing::debug!(
            "Search k={} nprobe={} returned {} hits from {} vectors",
            params.k,
            params.nprobe,
            hits.len(),
            snapshot.index.len()
        );
        Ok(SearchResponse { hits, image_urls })
    }

    fn snapshot(&self) -> Result<Arc<Snapshot>, SnapshotError> {
        match &self.cache {
            Some(cache) => cache.get_or_load(|| self.snapshots.load_read_only()),
            None => self.snapshots.load_read_only().map(Arc::new),
        }
    }
}
