/// Embedding collaborator boundary.
///
/// The crate never loads a model itself: callers inject an implementation
/// (a sentence-transformer service, an ONNX session, the mock below) and
/// the index treats its vectors as opaque fixed-length payloads.
pub mod mock;

use thiserror::Error;

/// Errors surfaced by an embedding backend.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),
}

/// Trait for text embedding implementations.
///
/// Implementations must be `Send + Sync` so one instance can be shared
/// behind `Arc`, and must return identical vectors for identical input:
/// the reuse-vs-rebuild gate assumes embeddings are reproducible.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a fixed-length vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings, preserving input order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}
