//! Approximate nearest-neighbor search over CLIP embeddings.
//!
//! The index is an IVF-Flat structure: spherical K-means splits the unit
//! sphere into a fixed set of cells at bootstrap time, every vector lives
//! uncompressed in the inverted list of its cell, and a query scans only the
//! `nprobe` most promising lists.
//!
//! # Architecture
//! - [`clustering`]: K-means++ seeded spherical K-means and vector helpers
//! - [`ivf`]: the index itself plus its binary format
//! - [`codec`]: the versioned binary vector encoding
//! - [`npy`]: loading the bootstrap sample
//! - [`embedding`]: text encoders for queries

pub mod clustering;
pub mod codec;
mod embedding;
pub mod ivf;
pub mod npy;
mod types;

// Re-export core types for public API
pub use clustering::{
    ClusteringError, KMeansConfig, KMeansResult, assign_to_nearest_centroid, cosine_similarity,
    inner_product, kmeans_clustering, l2_norm, normalize,
};
pub use codec::{decode_vector, encode_vector};
pub use embedding::{FastEmbedEncoder, TextEncoder, parse_encoder_model};
pub use ivf::{IvfIndex, Neighbor};
pub use npy::{load_npy_matrix, write_npy_matrix};
pub use types::{
    CLIP_DIMENSION, ClusterId, InternalId, Score, VectorDimension, VectorError,
};
