//! Sentence embeddings for the semantic layer.
//!
//! Backends are pluggable behind [`Embedder`]. Any failure is reported as an
//! error; the semantic scorer turns it into a flagged fallback score.

mod hashed;
mod http;
#[cfg(feature = "local-embeddings")]
mod local;

pub use hashed::HashEmbedder;
pub use http::HttpEmbedder;
#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::Result;
use std::sync::Arc;
use tracing::info;

/// Text to fixed-size vector.
pub trait Embedder: Send + Sync {
    /// Short backend name for logs and flags.
    fn name(&self) -> &str;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Build the configured backend; `None` disables the semantic layer.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Option<Arc<dyn Embedder>>> {
    let embedder: Arc<dyn Embedder> = match config.backend {
        EmbeddingBackend::None => return Ok(None),
        EmbeddingBackend::Http => Arc::new(HttpEmbedder::new(config)?),
        EmbeddingBackend::Hash => Arc::new(HashEmbedder::new(config.dimension)),
        EmbeddingBackend::Local => local_backend(config)?,
    };
    info!(backend = embedder.name(), "Semantic layer enabled");
    Ok(Some(embedder))
}

#[cfg(feature = "local-embeddings")]
fn local_backend(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    Ok(Arc::new(LocalEmbedder::load(&config.model)?))
}

#[cfg(not(feature = "local-embeddings"))]
fn local_backend(_config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    Err(crate::error::ScorecardError::Config(
        "the local embedding backend needs the 'local-embeddings' feature".to_string(),
    ))
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
