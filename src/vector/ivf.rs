//! Inverted-file index (IVF-Flat) over unit-length embedding vectors.
//!
//! The coarse quantizer is trained once from a bootstrap sample and then
//! frozen: the number of clusters and the dimension never change. Appended
//! vectors go to the inverted list of their nearest centroid and are stored
//! uncompressed. A search ranks centroids against the query and scans only
//! the `nprobe` best lists, so recall grows with `nprobe` at a latency cost.
//!
//! # Storage Format
//!
//! - Header (24 bytes): magic `CIVF`, version (u32), dimension (u32),
//!   cluster count (u32), total vector count (u64)
//! - Centroids: `clusters * dimension` f32 values
//! - Per cluster: list length (u64), ids (u64 each), then vectors (f32)
//!
//! All values are little-endian.

use crate::vector::clustering::{
    KMeansConfig, assign_to_nearest_centroid, inner_product, kmeans_clustering,
};
use crate::vector::codec::{ByteReader, put_f32s, put_u32, put_u64};
use crate::vector::types::{ClusterId, InternalId, Score, VectorDimension, VectorError};

/// Magic bytes identifying a serialized index.
const INDEX_MAGIC: &[u8; 4] = b"CIVF";

/// Current index format version.
const INDEX_FORMAT_VERSION: u32 = 1;

/// One search hit: an internal id and its inner-product score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    pub id: InternalId,
    pub score: Score,
}

/// Vectors assigned to one cluster, stored flat.
#[derive(Debug, Clone, Default, PartialEq)]
struct InvertedList {
    ids: Vec<InternalId>,
    vectors: Vec<f32>,
}

impl InvertedList {
    fn len(&self) -> usize {
        self.ids.len()
    }

    fn iter<'a>(&'a self, dimension: usize) -> impl Iterator<Item = (InternalId, &'a [f32])> + 'a {
        self.ids
            .iter()
            .copied()
            .zip(self.vectors.chunks_exact(dimension))
    }
}

/// IVF-Flat index with inner-product scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct IvfIndex {
    dimension: VectorDimension,
    centroids: Vec<Vec<f32>>,
    lists: Vec<InvertedList>,
    len: usize,
}

impl IvfIndex {
    /// Trains an empty index from a bootstrap sample.
    ///
    /// The dimension is inferred from the sample and `clusters` centroids
    /// are trained with seeded spherical K-means.
    ///
    /// # Errors
    /// Fails if the sample is empty, has inconsistent or zero dimension, or
    /// holds fewer vectors than `clusters`.
    pub fn bootstrap(
        training: &[Vec<f32>],
        clusters: usize,
        seed: u64,
    ) -> Result<Self, VectorError> {
        let first = training.first().ok_or_else(|| {
            VectorError::ClusteringFailed("bootstrap sample is empty".to_string())
        })?;
        let dimension = VectorDimension::new(first.len())?;
        for vector in training {
            dimension.validate_vector(vector)?;
        }

        let result = kmeans_clustering(training, clusters, &KMeansConfig::with_seed(seed))
            .map_err(|e| VectorError::ClusteringFailed(e.to_string()))?;

        tracing::info!(
            "Trained {clusters} clusters over {} vectors of dimension {} in {} iterations",
            training.len(),
            dimension.get(),
            result.iterations
        );

        Self::from_centroids(result.centroids)
    }

    /// Builds an empty index around already-trained centroids.
    pub fn from_centroids(centroids: Vec<Vec<f32>>) -> Result<Self, VectorError> {
        let first = centroids.first().ok_or_else(|| {
            VectorError::ClusteringFailed("at least one centroid is required".to_string())
        })?;
        let dimension = VectorDimension::new(first.len())?;
        for centroid in &centroids {
            dimension.validate_vector(centroid)?;
        }

        let lists = vec![InvertedList::default(); centroids.len()];
        Ok(Self {
            dimension,
            centroids,
            lists,
            len: 0,
        })
    }

    /// Inserts a vector under a caller-chosen internal id.
    ///
    /// The caller is responsible for handing out ids densely and in order;
    /// the index only stores them. Returns the cluster the vector went to.
    pub fn append(&mut self, vector: &[f32], id: InternalId) -> Result<ClusterId, VectorError> {
        self.dimension.validate_vector(vector)?;
        debug_assert_eq!(id.get(), self.len as u64, "internal ids must be dense");

        let cluster = assign_to_nearest_centroid(vector, &self.centroids);
        let list = &mut self.lists[cluster.index()];
        list.ids.push(id);
        list.vectors.extend_from_slice(vector);
        self.len += 1;
        Ok(cluster)
    }

    /// Approximate top-`k` search scanning the `nprobe` closest clusters.
    ///
    /// `nprobe` is clamped to `1..=nlist`. Results are ordered by descending
    /// score, ties by ascending id, and hold fewer than `k` entries when the
    /// probed lists are smaller than `k`.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        nprobe: usize,
    ) -> Result<Vec<Neighbor>, VectorError> {
        self.dimension.validate_vector(query)?;
        if k == 0 || self.len == 0 {
            return Ok(Vec::new());
        }

        let nprobe = nprobe.clamp(1, self.nlist());
        let probes = self.probe_order(query);
        let lists = probes[..nprobe].iter().map(|cluster| &self.lists[*cluster]);
        self.scan(lists, query, k)
    }

    /// Exact top-`k` search over every list.
    pub fn exact_search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, VectorError> {
        self.dimension.validate_vector(query)?;
        if k == 0 || self.len == 0 {
            return Ok(Vec::new());
        }
        self.scan(self.lists.iter(), query, k)
    }

    /// Number of vectors in the index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Vector dimension fixed at training time.
    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Number of clusters (inverted lists).
    #[must_use]
    pub fn nlist(&self) -> usize {
        self.centroids.len()
    }

    /// Trained centroids.
    #[must_use]
    pub fn centroids(&self) -> &[Vec<f32>] {
        &self.centroids
    }

    /// Number of vectors held by each inverted list.
    #[must_use]
    pub fn list_sizes(&self) -> Vec<usize> {
        self.lists.iter().map(InvertedList::len).collect()
    }

    /// Serializes the index.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let dimension = self.dimension.get();
        let body = self.nlist() * dimension + self.len * dimension;
        let mut bytes = Vec::with_capacity(24 + body * 4 + self.len * 8 + self.nlist() * 8);

        bytes.extend_from_slice(INDEX_MAGIC);
        put_u32(&mut bytes, INDEX_FORMAT_VERSION);
        put_u32(&mut bytes, dimension as u32);
        put_u32(&mut bytes, self.nlist() as u32);
        put_u64(&mut bytes, self.len as u64);

        for centroid in &self.centroids {
            put_f32s(&mut bytes, centroid);
        }
        for list in &self.lists {
            put_u64(&mut bytes, list.len() as u64);
            for id in &list.ids {
                bytes.extend_from_slice(&id.to_bytes());
            }
            put_f32s(&mut bytes, &list.vectors);
        }
        bytes
    }

    /// Deserializes an index written by [`IvfIndex::to_bytes`].
    ///
    /// Besides the framing, this checks that the stored ids are exactly
    /// `0..N` with no repeats.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VectorError> {
        let mut reader = ByteReader::new(bytes);
        reader.expect_magic(INDEX_MAGIC)?;

        let version = reader.read_u32()?;
        if version != INDEX_FORMAT_VERSION {
            return Err(VectorError::VersionMismatch {
                expected: INDEX_FORMAT_VERSION,
                actual: version,
            });
        }

        let dimension = VectorDimension::new(reader.read_u32()? as usize)?;
        let nlist = reader.read_u32()? as usize;
        if nlist == 0 {
            return Err(VectorError::Serialization(
                "Index has no clusters".to_string(),
            ));
        }
        let total = usize::try_from(reader.read_u64()?)
            .map_err(|_| VectorError::Serialization("Vector count overflows".to_string()))?;

        let mut centroids = Vec::with_capacity(nlist.min(reader.remaining()));
        for _ in 0..nlist {
            centroids.push(reader.read_f32s(dimension.get())?);
        }

        let mut seen = vec![false; total.min(reader.remaining() / 8)];
        let mut lists = Vec::with_capacity(nlist);
        let mut counted = 0usize;
        for cluster in 0..nlist {
            let list_len = usize::try_from(reader.read_u64()?).map_err(|_| {
                VectorError::Serialization(format!("List {cluster} length overflows"))
            })?;
            counted = counted.checked_add(list_len).filter(|c| *c <= total).ok_or_else(|| {
                VectorError::Serialization(format!(
                    "Inverted lists hold more vectors than the declared {total}"
                ))
            })?;

            // Lengths come from the blob; never reserve more than it can hold
            let mut ids = Vec::with_capacity(list_len.min(reader.remaining() / 8));
            for _ in 0..list_len {
                let raw = reader.take(8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(raw);
                let id = InternalId::from_bytes(buf);
                let slot = seen.get_mut(id.get() as usize).ok_or_else(|| {
                    VectorError::Serialization(format!("Internal id {id} is outside 0..{total}"))
                })?;
                if *slot {
                    return Err(VectorError::Serialization(format!(
                        "Internal id {id} appears twice"
                    )));
                }
                *slot = true;
                ids.push(id);
            }
            let floats = list_len.checked_mul(dimension.get()).ok_or_else(|| {
                VectorError::Serialization(format!("List {cluster} size overflows"))
            })?;
            let vectors = reader.read_f32s(floats)?;
            lists.push(InvertedList { ids, vectors });
        }
        reader.finish()?;

        if counted != total || seen.len() != total {
            return Err(VectorError::Serialization(format!(
                "Declared {total} vectors but lists hold {counted}"
            )));
        }

        Ok(Self {
            dimension,
            centroids,
            lists,
            len: total,
        })
    }

    /// Cluster positions ordered by descending centroid similarity.
    fn probe_order(&self, query: &[f32]) -> Vec<usize> {
        let mut ranked: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, inner_product(query, c)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.into_iter().map(|(i, _)| i).collect()
    }

    fn scan<'a>(
        &'a self,
        lists: impl Iterator<Item = &'a InvertedList>,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<Neighbor>, VectorError> {
        let dimension = self.dimension.get();
        let mut candidates = Vec::new();
        for list in lists {
            for (id, vector) in list.iter(dimension) {
                let score = Score::new(inner_product(query, vector))?;
                candidates.push(Neighbor { id, score });
            }
        }

        candidates.sort_by(|a, b| b.score.cmp(&a.score).then(a.id.cmp(&b.id)));
        candidates.truncate(k);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::clustering::normalize;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_unit_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let mut v: Vec<f32> = (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect();
                normalize(&mut v).unwrap();
                v
            })
            .collect()
    }

    fn populated_index(n: usize, dim: usize, clusters: usize) -> (IvfIndex, Vec<Vec<f32>>) {
        let training = random_unit_vectors(200, dim, 1);
        let mut index = IvfIndex::bootstrap(&training, clusters, 7).unwrap();
        let data = random_unit_vectors(n, dim, 2);
        for (i, v) in data.iter().enumerate() {
            index.append(v, InternalId::new(i as u64)).unwrap();
        }
        (index, data)
    }

    #[test]
    fn test_bootstrap_shape() {
        let training = random_unit_vectors(100, 16, 3);
        let index = IvfIndex::bootstrap(&training, 5, 0).unwrap();
        assert_eq!(index.nlist(), 5);
        assert_eq!(index.dimension().get(), 16);
        assert!(index.is_empty());
        assert_eq!(index.list_sizes(), vec![0; 5]);
    }

    #[test]
    fn test_bootstrap_rejects_bad_samples() {
        assert!(IvfIndex::bootstrap(&[], 3, 0).is_err());

        let ragged = vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]];
        assert!(matches!(
            IvfIndex::bootstrap(&ragged, 1, 0),
            Err(VectorError::DimensionMismatch { .. })
        ));

        let too_small = random_unit_vectors(3, 8, 4);
        assert!(matches!(
            IvfIndex::bootstrap(&too_small, 4, 0),
            Err(VectorError::ClusteringFailed(_))
        ));
    }

    #[test]
    fn test_append_and_find_self() {
        let (index, data) = populated_index(300, 16, 8);
        assert_eq!(index.len(), 300);
        assert_eq!(index.list_sizes().iter().sum::<usize>(), 300);

        // Probing every list is exhaustive, so each vector finds itself first
        for (i, v) in data.iter().enumerate().take(20) {
            let hits = index.search(v, 1, index.nlist()).unwrap();
            assert_eq!(hits[0].id, InternalId::new(i as u64));
            assert!((hits[0].score.get() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_search_sorted_and_bounded() {
        let (index, data) = populated_index(100, 8, 4);
        let hits = index.search(&data[0], 10, 2).unwrap();
        assert!(hits.len() <= 10);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }

        // k larger than the index returns everything that was scanned
        let all = index.search(&data[0], 1000, 4).unwrap();
        assert_eq!(all.len(), 100);

        assert!(index.search(&data[0], 0, 4).unwrap().is_empty());
    }

    #[test]
    fn test_nprobe_is_clamped() {
        let (index, data) = populated_index(50, 8, 4);
        let zero = index.search(&data[3], 5, 0).unwrap();
        let one = index.search(&data[3], 5, 1).unwrap();
        assert_eq!(zero, one);

        let huge = index.search(&data[3], 5, 99).unwrap();
        let exact = index.exact_search(&data[3], 5).unwrap();
        assert_eq!(huge, exact);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let (mut index, _) = populated_index(10, 8, 2);
        assert!(matches!(
            index.search(&[0.5; 4], 3, 1),
            Err(VectorError::DimensionMismatch {
                expected: 8,
                actual: 4
            })
        ));
        assert!(index.append(&[0.5; 9], InternalId::new(10)).is_err());
        assert_eq!(index.len(), 10);
    }

    #[test]
    fn test_empty_index_search() {
        let training = random_unit_vectors(10, 4, 5);
        let index = IvfIndex::bootstrap(&training, 2, 0).unwrap();
        assert!(index.search(&training[0], 5, 2).unwrap().is_empty());
    }

    #[test]
    fn test_serialization_preserves_search() {
        let (index, data) = populated_index(150, 12, 6);
        let restored = IvfIndex::from_bytes(&index.to_bytes()).unwrap();
        assert_eq!(restored, index);
        for query in data.iter().take(10) {
            assert_eq!(
                restored.search(query, 5, 3).unwrap(),
                index.search(query, 5, 3).unwrap()
            );
        }
    }

    #[test]
    fn test_from_bytes_rejects_corruption() {
        let (index, _) = populated_index(20, 4, 2);
        let bytes = index.to_bytes();

        assert!(IvfIndex::from_bytes(&bytes[..bytes.len() - 3]).is_err());

        let mut wrong_magic = bytes.clone();
        wrong_magic[0] = b'X';
        assert!(IvfIndex::from_bytes(&wrong_magic).is_err());

        // Declared total larger than what the lists hold
        let mut wrong_total = bytes.clone();
        wrong_total[16..24].copy_from_slice(&21u64.to_le_bytes());
        assert!(IvfIndex::from_bytes(&wrong_total).is_err());
    }

    #[test]
    fn test_from_bytes_rejects_huge_declared_lengths() {
        // dim 1, one cluster, total and list length both claim 2^61 vectors
        let huge = 1u64 << 61;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"CIVF");
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&huge.to_le_bytes());
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        bytes.extend_from_slice(&huge.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes());

        assert!(matches!(
            IvfIndex::from_bytes(&bytes),
            Err(VectorError::Serialization(_))
        ));
    }

    #[test]
    fn test_from_bytes_rejects_duplicate_ids() {
        let centroids = vec![vec![1.0, 0.0]];
        let mut index = IvfIndex::from_centroids(centroids).unwrap();
        index.append(&[1.0, 0.0], InternalId::new(0)).unwrap();
        index.append(&[0.0, 1.0], InternalId::new(1)).unwrap();

        let mut bytes = index.to_bytes();
        // Header 24 bytes, centroid 8 bytes, list length 8 bytes, then ids
        let second_id = 24 + 8 + 8 + 8;
        bytes[second_id..second_id + 8].copy_from_slice(&0u64.to_le_bytes());
        assert!(IvfIndex::from_bytes(&bytes).is_err());
    }
}
