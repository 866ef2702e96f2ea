//! Text encoders producing query embeddings.
//!
//! Queries are embedded with the text tower of the same CLIP model whose
//! image tower produced the stored embeddings, so both land in one 512-d
//! space and inner products between them are meaningful.

use crate::vector::{VectorDimension, VectorError};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Mutex;

/// Trait for turning query text into an embedding vector.
///
/// Implementations must be thread-safe; the search engine shares one
/// encoder across requests.
pub trait TextEncoder: Send + Sync {
    /// Encodes one query. The result is not required to be normalized.
    fn encode(&self, text: &str) -> Result<Vec<f32>, VectorError>;

    /// Dimension of the vectors this encoder produces.
    fn dimension(&self) -> VectorDimension;
}

/// CLIP text encoder backed by fastembed.
///
/// The ONNX session needs `&mut` access, hence the mutex.
pub struct FastEmbedEncoder {
    model: Mutex<TextEmbedding>,
    dimension: VectorDimension,
}

impl FastEmbedEncoder {
    /// Loads the model, downloading it into `cache_dir` on first use.
    ///
    /// # Errors
    /// Returns an error if the model fails to initialize or download.
    pub fn new(
        model: EmbeddingModel,
        cache_dir: PathBuf,
        show_progress: bool,
    ) -> Result<Self, VectorError> {
        let mut embedding = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(show_progress),
        )
        .map_err(|e| VectorError::EmbeddingFailed(
            format!("Failed to initialize text encoder: {e}. Ensure you have internet connection for first-time model download")
        ))?;

        // Models report their width only through their output
        let sample = embedding
            .embed(vec!["dimension check".to_string()], None)
            .map_err(|e| VectorError::EmbeddingFailed(format!("Failed to query model width: {e}")))?;
        let width = sample.first().map(Vec::len).unwrap_or_default();
        let dimension = VectorDimension::new(width)?;

        tracing::debug!("Loaded text encoder with dimension {}", dimension.get());

        Ok(Self {
            model: Mutex::new(embedding),
            dimension,
        })
    }
}

impl TextEncoder for FastEmbedEncoder {
    fn encode(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        let mut embeddings = self
            .model
            .lock()
            .map_err(|_| {
                VectorError::EmbeddingFailed(
                    "Failed to acquire encoder lock - model may be poisoned".to_string(),
                )
            })?
            .embed(vec![text.to_string()], None)
            .map_err(|e| VectorError::EmbeddingFailed(format!("Failed to encode query: {e}")))?;

        let embedding = embeddings.pop().ok_or_else(|| {
            VectorError::EmbeddingFailed("Encoder returned no embedding".to_string())
        })?;
        self.dimension.validate_vector(&embedding)?;
        Ok(embedding)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}

/// Parses an encoder model name from configuration.
///
/// Accepts the fastembed variant name (`ClipVitB32`) or the hub name
/// (`Qdrant/clip-ViT-B-32-text`), case-insensitively.
pub fn parse_encoder_model(name: &str) -> Result<EmbeddingModel, VectorError> {
    match name.to_ascii_lowercase().as_str() {
        "clipvitb32" | "clip-vit-b-32" | "qdrant/clip-vit-b-32-text" => {
            Ok(EmbeddingModel::ClipVitB32)
        }
        _ => Err(VectorError::EmbeddingFailed(format!(
            "Unknown text encoder model '{name}'. Supported: ClipVitB32"
        ))),
    }
}
