//! Text-to-vector encoders and snapshot composition.
//!
//! Provides the [`EmbeddingProvider`] trait (the external encoder seam), a
//! local implementation using all-MiniLM-L6-v2 via ONNX Runtime, and
//! [`temporal`], which turns an encoder output plus a note's timestamps into
//! the fixed-length vector stored as a session snapshot.

pub mod local;
pub mod temporal;

use anyhow::Result;

/// Number of dimensions produced by all-MiniLM-L6-v2.
pub const EMBEDDING_DIM: usize = 384;

/// Trait for embedding text into vectors.
///
/// Implementations produce L2-normalized vectors of [`EmbeddingProvider::dimensions`]
/// length. All methods are synchronous and may block.
pub trait EmbeddingProvider {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Create an embedding provider from config.
///
/// Currently only `"local"` is supported (ONNX Runtime + all-MiniLM-L6-v2).
/// Returns an error if model files are not found: run `geist model download` first.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "local" => {
            let provider = local::LocalEmbeddingProvider::new(config)?;
            Ok(Box::new(provider))
        }
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: local"),
    }
}

/// Text the encoder sees for a note: title on its own line, then the body.
pub fn note_text(title: &str, content: &str) -> String {
    if content.trim().is_empty() {
        title.to_string()
    } else {
        format!("{title}\n\n{content}")
    }
}
