//! Embedding oracle implementations

use crate::error::Result;
use async_trait::async_trait;

/// Text → vector oracle.
///
/// Treated as a fallible black box; callers decide whether a failure aborts
/// their operation.
#[async_trait]
pub trait EmbeddingOracle: Send + Sync {
    /// Generate the embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for a batch of texts, one per input.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Dimension of the vectors this oracle produces.
    fn dimension(&self) -> usize;
}

pub mod hashed;
pub use hashed::HashedEmbeddings;

#[cfg(feature = "embeddings-local")]
pub mod local;

#[cfg(feature = "embeddings-local")]
pub use local::LocalEmbeddings;
