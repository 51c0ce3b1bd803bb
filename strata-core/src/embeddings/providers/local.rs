//! Local embedding oracle using fastembed

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::EmbeddingOracle;
use crate::error::{Result, StrataError};

/// In-process sentence embeddings (ONNX via fastembed, no API needed).
///
/// Inference is CPU-bound and runs on the blocking pool.
pub struct LocalEmbeddings {
    model: Arc<Mutex<fastembed::TextEmbedding>>,
    dimension: usize,
}

impl LocalEmbeddings {
    /// Load a model by name, e.g. "all-MiniLM-L6-v2" or "bge-small-en-v1.5".
    ///
    /// # Errors
    ///
    /// Returns an error if the name is unknown or the model cannot be loaded.
    pub fn new(model_name: impl Into<String>) -> Result<Self> {
        let model_name = model_name.into();
        let (embedding_model, dimension) = resolve_model(&model_name)?;

        let mut init_options = fastembed::InitOptions::default();
        init_options.model_name = embedding_model;

        let model = fastembed::TextEmbedding::try_new(init_options).map_err(|e| {
            StrataError::Configuration(format!(
                "Failed to load embedding model '{}': {}",
                model_name, e
            ))
        })?;

        tracing::info!(model = %model_name, dimension, "local embedding model loaded");
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            dimension,
        })
    }
}

fn resolve_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel as M;

    let resolved = match name.to_lowercase().replace('_', "-").as_str() {
        "all-minilm-l6-v2" => (M::AllMiniLML6V2, 384),
        "all-minilm-l12-v2" => (M::AllMiniLML12V2, 384),
        "bge-small-en-v1.5" => (M::BGESmallENV15, 384),
        "bge-base-en-v1.5" => (M::BGEBaseENV15, 768),
        "bge-large-en-v1.5" => (M::BGELargeENV15, 1024),
        "multilingual-e5-small" => (M::MultilingualE5Small, 384),
        "multilingual-e5-base" => (M::MultilingualE5Base, 768),
        "multilingual-e5-large" => (M::MultilingualE5Large, 1024),
        _ => {
            return Err(StrataError::Configuration(format!(
                "Unsupported embedding model '{}'. Supported: all-MiniLM-L6-v2, all-MiniLM-L12-v2, \
                 bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, multilingual-e5-small, \
                 multilingual-e5-base, multilingual-e5-large",
                name
            )));
        }
    };
    Ok(resolved)
}

#[async_trait]
impl EmbeddingOracle for LocalEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .pop()
            .ok_or_else(|| StrataError::embedding("embedding generation returned no vectors"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = texts.iter().map(|s| s.to_string()).collect();
        let model = self.model.clone();

        tokio::task::spawn_blocking(move || {
            let mut model = model.lock().map_err(|e| {
                StrataError::embedding(format!("embedding model lock poisoned: {e}"))
            })?;
            model
                .embed(texts, None)
                .map_err(|e| StrataError::embedding(format!("failed to generate embeddings: {e}")))
        })
        .await
        .map_err(|e| StrataError::embedding(format!("embedding task failed: {e}")))?
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model_aliases() {
        let (_, dim) = resolve_model("all_MiniLM_L6_v2").unwrap();
        assert_eq!(dim, 384);
        let (_, dim) = resolve_model("BGE-base-en-v1.5").unwrap();
        assert_eq!(dim, 768);
        assert!(resolve_model("word2vec").is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    #[ignore = "downloads the all-MiniLM-L6-v2 model"]
    async fn test_batch_runs_off_the_runtime_thread() {
        let embeddings = LocalEmbeddings::new("all-MiniLM-L6-v2").unwrap();
        let texts = vec!["switched the pool to deadpool"; 64];

        // On a current-thread runtime the ticker can only finish first if
        // inference leaves the runtime thread free.
        let ticker = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            std::time::Instant::now()
        });
        let vectors = embeddings.embed_batch(&texts).await.unwrap();
        let finished = std::time::Instant::now();

        assert!(ticker.await.unwrap() < finished);
        assert_eq!(vectors.len(), 64);
        assert!(vectors.iter().all(|v| v.len() == embeddings.dimension()));
    }
}
