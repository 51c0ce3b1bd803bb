//! Factory for creating embedding oracles from configuration

use crate::config::{EmbeddingProvider as EmbeddingProviderType, EmbeddingsConfig};
use crate::embeddings::providers::{EmbeddingOracle, HashedEmbeddings, hashed};
use crate::error::Result;
use std::sync::Arc;

#[cfg(feature = "embeddings-local")]
use crate::embeddings::providers::local::LocalEmbeddings;

/// Factory for creating embedding oracles
pub struct EmbeddingProviderFactory;

impl EmbeddingProviderFactory {
    /// Create an embedding oracle from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the provider feature is disabled or the model
    /// cannot be loaded.
    pub fn create(config: &EmbeddingsConfig) -> Result<Arc<dyn EmbeddingOracle>> {
        match config.provider {
            #[cfg(feature = "embeddings-local")]
            EmbeddingProviderType::Local => {
                let provider = LocalEmbeddings::new(config.model.clone())?;
                Ok(Arc::new(provider))
            }

            #[cfg(not(feature = "embeddings-local"))]
            EmbeddingProviderType::Local => Err(crate::error::StrataError::Configuration(
                "Local embeddings require 'embeddings-local' feature".to_string(),
            )),

            EmbeddingProviderType::Hashed => Ok(Arc::new(HashedEmbeddings::new(
                config.dimension.unwrap_or(hashed::DEFAULT_DIMENSION),
            ))),
        }
    }

    /// Create from StrataConfig, defaulting to hashed embeddings when none
    /// are configured.
    pub fn from_config(config: Option<&EmbeddingsConfig>) -> Result<Arc<dyn EmbeddingOracle>> {
        match config {
            Some(cfg) => Self::create(cfg),
            None => Ok(Arc::new(HashedEmbeddings::default())),
        }
    }
}
