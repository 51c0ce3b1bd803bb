//! Embedding oracles used to spot near-duplicate summaries before a merge.

pub mod factory;
pub mod providers;
pub mod similarity;

pub use factory::EmbeddingProviderFactory;
pub use providers::{EmbeddingOracle, HashedEmbeddings};
#[cfg(feature = "embeddings-local")]
pub use providers::LocalEmbeddings;
pub use similarity::cosine_similarity;
