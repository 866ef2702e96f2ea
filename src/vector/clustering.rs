//! K-means clustering used to train the coarse quantizer of the IVF index.
//!
//! Spherical K-means: inputs are L2-normalized before training and centroids
//! are re-normalized after every update, so assignment by inner product is
//! assignment by cosine similarity.
//!
//! # Algorithm Details
//! - Similarity: inner product on unit vectors
//! - Initialization: K-means++ driven by a seeded RNG (training is reproducible)
//! - Max iterations: 25
//! - Convergence tolerance: 1e-4 mean centroid movement
//! - Assignment step runs in parallel on the rayon pool

use crate::vector::types::{ClusterId, VectorError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;

/// Maximum number of Lloyd iterations.
pub const MAX_ITERATIONS: usize = 25;

/// Convergence tolerance for centroid updates.
const CONVERGENCE_TOLERANCE: f32 = 1e-4;

/// Epsilon for floating-point comparisons.
const EPSILON: f32 = 1e-10;

/// Seed used when the caller does not pick one.
pub const DEFAULT_SEED: u64 = 0x5eed_c11b;

/// Tunables for a K-means run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KMeansConfig {
    pub max_iterations: usize,
    pub tolerance: f32,
    pub seed: u64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            max_iterations: MAX_ITERATIONS,
            tolerance: CONVERGENCE_TOLERANCE,
            seed: DEFAULT_SEED,
        }
    }
}

impl KMeansConfig {
    /// Default tunables with a specific seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }
}

/// Result of K-means clustering operation.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Unit-length cluster centroids.
    pub centroids: Vec<Vec<f32>>,

    /// Cluster assignment for each input vector.
    pub assignments: Vec<ClusterId>,

    /// Number of iterations run.
    pub iterations: usize,

    /// Whether the run stopped on convergence rather than the iteration cap.
    pub converged: bool,
}

/// Why a training run could not start or finish.
#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error("Training sample is empty\nSuggestion: Point index.bootstrap_sample at a non-empty .npy matrix")]
    EmptyVectorSet,

    #[error("Cannot train {0} clusters\nSuggestion: index.clusters must be at least 1 and at most the sample size")]
    InvalidClusterCount(usize),

    #[error("Training sample rows differ in length\nSuggestion: Every row must come from the same encoder")]
    DimensionMismatch,

    #[error("Training sample has fewer distinct directions than requested clusters")]
    InitializationFailed,

    #[error(transparent)]
    VectorError(#[from] VectorError),
}

/// Performs spherical K-means clustering.
///
/// # Arguments
/// * `vectors` - Input vectors (non-empty, same non-zero dimension)
/// * `k` - Number of clusters (`1..=vectors.len()`)
/// * `config` - Iteration cap, tolerance and RNG seed
///
/// # Algorithm
/// 1. Normalize inputs and pick K-means++ seeds
/// 2. Iterate until assignments stop changing, centroid movement drops
///    below the tolerance, or the iteration cap is hit:
///    - Assign each vector to the centroid with the highest inner product
///    - Recompute centroids as normalized means of their members
#[must_use = "clustering results should be used or the computation is wasted"]
pub fn kmeans_clustering(
    vectors: &[Vec<f32>],
    k: usize,
    config: &KMeansConfig,
) -> Result<KMeansResult, ClusteringError> {
    if vectors.is_empty() {
        return Err(ClusteringError::EmptyVectorSet);
    }

    if k == 0 || k > vectors.len() {
        return Err(ClusteringError::InvalidClusterCount(k));
    }

    let dimension = vectors[0].len();
    if dimension == 0 || vectors.iter().any(|v| v.len() != dimension) {
        return Err(ClusteringError::DimensionMismatch);
    }

    let normalized: Vec<Vec<f32>> = vectors.iter().map(|v| unit_copy(v)).collect();
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut centroids = initialize_centroids_kmeans_plus_plus(&normalized, k, &mut rng)?;
    let mut assignments: Vec<ClusterId> = Vec::new();
    let mut iterations = 0;
    let mut converged = false;

    loop {
        iterations += 1;

        let new_assignments: Vec<ClusterId> = normalized
            .par_iter()
            .map(|vector| assign_to_nearest_centroid(vector, &centroids))
            .collect();

        let unchanged = new_assignments == assignments;
        assignments = new_assignments;

        if unchanged {
            converged = true;
            break;
        }
        if iterations >= config.max_iterations {
            break;
        }

        let new_centroids = update_centroids(&normalized, &assignments, k, &mut rng);
        let centroid_movement = calculate_centroid_movement(&centroids, &new_centroids);
        centroids = new_centroids;

        if centroid_movement < config.tolerance {
            // Centroids moved; bring assignments in line with them.
            assignments = normalized
                .par_iter()
                .map(|vector| assign_to_nearest_centroid(vector, &centroids))
                .collect();
            converged = true;
            break;
        }
    }

    if !converged {
        tracing::warn!(
            "k-means did not fully converge after {} iterations (k={k}, n={})",
            config.max_iterations,
            vectors.len()
        );
    }

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
        converged,
    })
}

/// Assigns a vector to the centroid with the highest inner product.
///
/// Ties go to the lower cluster id.
///
/// # Panics
/// Debug builds assert that `centroids` is non-empty.
pub fn assign_to_nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> ClusterId {
    debug_assert!(!centroids.is_empty(), "Need at least one centroid");

    let mut best_similarity = f32::NEG_INFINITY;
    let mut best_cluster = 0;

    for (i, centroid) in centroids.iter().enumerate() {
        let similarity = inner_product(vector, centroid);
        if similarity > best_similarity {
            best_similarity = similarity;
            best_cluster = i;
        }
    }

    ClusterId::new(best_cluster as u32)
}

/// Updates centroids as the normalized mean of their assigned vectors.
fn update_centroids(
    vectors: &[Vec<f32>],
    assignments: &[ClusterId],
    k: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let dimension = vectors[0].len();
    let mut new_centroids = vec![vec![0.0; dimension]; k];
    let mut cluster_sizes = vec![0usize; k];

    for (vector, cluster_id) in vectors.iter().zip(assignments.iter()) {
        let centroid = &mut new_centroids[cluster_id.index()];
        for (acc, &value) in centroid.iter_mut().zip(vector.iter()) {
            *acc += value;
        }
        cluster_sizes[cluster_id.index()] += 1;
    }

    for (centroid, &size) in new_centroids.iter_mut().zip(cluster_sizes.iter()) {
        if size == 0 {
            // Empty cluster: reseed from a random member of the sample
            let random_idx = rng.random_range(0..vectors.len());
            centroid.copy_from_slice(&vectors[random_idx]);
        } else {
            // Scaling by 1/size is redundant before re-normalizing.
            if normalize(centroid).is_err() {
                let random_idx = rng.random_range(0..vectors.len());
                centroid.copy_from_slice(&vectors[random_idx]);
            }
        }
    }

    new_centroids
}

/// Inner product of two equal-length vectors.
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Computes cosine similarity between two vectors.
///
/// Returns a value in `[-1, 1]`, or 0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        inner_product(a, b) / (norm_a * norm_b)
    }
}

/// Euclidean length of a vector.
pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scales a vector in place to unit length.
///
/// Fails when the norm is zero or not finite; such a vector has no
/// direction and would silently score 0 against everything.
pub fn normalize(vector: &mut [f32]) -> Result<(), VectorError> {
    let norm = l2_norm(vector);
    if !norm.is_finite() || norm <= EPSILON {
        return Err(VectorError::NotNormalizable { norm });
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
    Ok(())
}

/// Initializes centroids using the K-means++ algorithm.
///
/// Each new seed is drawn with probability proportional to its squared
/// cosine distance from the nearest seed picked so far.
fn initialize_centroids_kmeans_plus_plus(
    vectors: &[Vec<f32>],
    k: usize,
    rng: &mut StdRng,
) -> Result<Vec<Vec<f32>>, ClusteringError> {
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);

    let first_idx = rng.random_range(0..vectors.len());
    centroids.push(vectors[first_idx].clone());

    // Distance of every vector to its nearest chosen centroid, kept current
    // incrementally instead of rescanning all centroids each round.
    let mut nearest: Vec<f32> = vectors
        .par_iter()
        .map(|v| cosine_distance(v, &centroids[0]))
        .collect();

    for _ in 1..k {
        let weights: Vec<f32> = nearest.iter().map(|d| d * d).collect();
        let total: f32 = weights.iter().sum();

        if total < EPSILON {
            // Remaining points coincide with existing centroids
            break;
        }

        let target = rng.random::<f32>() * total;
        let mut cumulative = 0.0;
        let mut chosen = vectors.len() - 1;
        for (i, &weight) in weights.iter().enumerate() {
            cumulative += weight;
            if weight > 0.0 && cumulative >= target {
                chosen = i;
                break;
            }
        }

        let centroid = vectors[chosen].clone();
        nearest
            .par_iter_mut()
            .zip(vectors.par_iter())
            .for_each(|(best, v)| *best = best.min(cosine_distance(v, &centroid)));
        centroids.push(centroid);
    }

    if centroids.len() != k {
        return Err(ClusteringError::InitializationFailed);
    }

    Ok(centroids)
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    (1.0 - inner_product(a, b)).max(0.0)
}

/// Mean cosine distance travelled by the centroids in one update.
fn calculate_centroid_movement(old: &[Vec<f32>], new: &[Vec<f32>]) -> f32 {
    old.iter()
        .zip(new.iter())
        .map(|(old_c, new_c)| cosine_distance(old_c, new_c))
        .sum::<f32>()
        / old.len() as f32
}

/// Unit-length copy; zero rows stay zero and never win an assignment.
fn unit_copy(vector: &[f32]) -> Vec<f32> {
    let mut copy = vector.to_vec();
    let _ = normalize(&mut copy);
    copy
}
