//! Type-safe wrappers and core types for the ANN index.
//!
//! Newtypes keep internal ids, cluster ids, scores and dimensions from being
//! mixed up with each other or with plain integers.

use thiserror::Error;

/// Embedding dimension of the CLIP ViT-B/32 image and text towers.
pub const CLIP_DIMENSION: usize = 512;

/// Dense, zero-based position of a vector in the index.
///
/// Internal ids are handed out in append order and never reused, so the ids
/// in an index of `N` vectors are exactly `0..N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternalId(u64);

impl InternalId {
    /// Creates an internal id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying value.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// The id following this one.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Converts to little-endian bytes for storage.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Creates from little-endian bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }
}

impl std::fmt::Display for InternalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of an inverted list (cluster) in the index, zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterId(u32);

impl ClusterId {
    /// Creates a cluster id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying value.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Index into per-cluster tables.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Inner-product similarity between two vectors.
///
/// For unit-length vectors this is the cosine similarity, in `[-1.0, 1.0]`
/// up to rounding. Higher is more similar. Never NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score(f32);

impl Score {
    /// Creates a score, rejecting NaN.
    pub fn new(value: f32) -> Result<Self, VectorError> {
        if value.is_nan() {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Score cannot be NaN",
            });
        }
        Ok(Self(value))
    }

    /// Returns the underlying f32 value.
    #[must_use]
    pub fn get(&self) -> f32 {
        self.0
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Type-safe wrapper for vector dimensions.
///
/// Fixed when the index is trained; every appended or queried vector is
/// validated against it before the index is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// The 512-dimensional CLIP embedding space.
    #[must_use]
    pub const fn clip() -> Self {
        Self(CLIP_DIMENSION)
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// Failures in the vector layer: validation, training, codecs and encoders.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Vector has {actual} dimensions but the index holds {expected}\nSuggestion: Embed images and queries with the encoder the index was trained for"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Unusable vector dimension {dimension}: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error("Unusable score {value}: {reason}")]
    InvalidScore { value: f32, reason: &'static str },

    #[error(
        "Vector norm is {norm}, cannot scale to unit length\nSuggestion: Zero or non-finite embeddings usually mean the encoder failed"
    )]
    NotNormalizable { norm: f32 },

    #[error(
        "Coarse quantizer training failed: {0}\nSuggestion: The bootstrap sample needs at least index.clusters distinct rows"
    )]
    ClusteringFailed(String),

    #[error("Text encoder failed: {0}\nSuggestion: Check encoder.model and that the model files can be downloaded")]
    EmbeddingFailed(String),

    #[error("Malformed vector data: {0}")]
    Serialization(String),

    #[error("Index format version {actual} is not supported (expected {expected})\nSuggestion: Rebuild the snapshot with this release")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Failed to read vector file: {0}")]
    Storage(#[from] std::io::Error),
}
