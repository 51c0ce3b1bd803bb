//! # Strata - Hierarchical Conversation Memory
//!
//! Strata keeps an unbounded, turn-by-turn conversation usable as model
//! context by compressing it into three tiers of summaries:
//! - **SHORT**: facts and code from a block of raw messages
//! - **MID**: technical decisions merged from several SHORT summaries
//! - **LONG**: project-level goals merged from several MID summaries
//!
//! Context for the next model call is the latest summary of each tier
//! followed by the most recent raw messages, trimmed to a hard token budget.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strata_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let memory = SmartMemory::builder()
//!         .config(StrataConfig::load()?)
//!         .build()
//!         .await?;
//!
//!     let ctx = RequestContext::new(42, 7);
//!     memory.record_message(ctx.app_id, Role::User, "How do I enable WAL mode?").await?;
//!
//!     // Before the model call: summaries + recent messages within budget
//!     let context = memory.assemble_context(ctx.app_id).await?;
//!     let _chat = context.to_chat_messages();
//!
//!     // After the turn: compress in the background, never blocks
//!     memory.trigger_summary_if_needed(ctx);
//!
//!     memory.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency
//!
//! Passes for the same app may run on several workers at once. The stores
//! arbitrate with optimistic concurrency (a tier-head check on insert and a
//! version check on update); the losing pass discards its work and the next
//! trigger retries from fresh state.
//!
//! ## Feature Flags
//!
//! - `sqlite` (default): durable [`store::SqliteStore`]
//! - `llm-openai`, `llm-ollama`: chat-completion backends for summarization
//! - `embeddings-local`: in-process fastembed models for deduplication

pub mod assembler;
pub mod classifier;
pub mod config;
pub mod dedup;
pub mod embeddings;
pub mod error;
pub mod llm;
pub mod merger;
pub mod model;
pub mod service;
pub mod stats;
pub mod store;
pub mod summarize;
pub mod tokens;
pub mod trigger;
pub mod worker;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::assembler::{AssembledContext, ContextAssembler, ContextUnit};
    pub use crate::classifier::{ComplexityClassifier, TopicComplexity};
    pub use crate::config::{
        EmbeddingProvider, EmbeddingsConfig, LLMProvider as LLMProviderType, LLMProviderConfig,
        MemoryConfig, OracleConfig, StorageConfig, StrataConfig,
    };
    pub use crate::dedup::Deduplicator;
    pub use crate::embeddings::{
        EmbeddingOracle, EmbeddingProviderFactory, HashedEmbeddings, cosine_similarity,
    };
    pub use crate::error::{Result, StrataError};
    pub use crate::llm::{LLMProvider, LLMProviderFactory, LLMRequest, LLMResponse};
    pub use crate::merger::{MergeOutcome, TierMerger};
    pub use crate::model::{
        AppId, Message, MessageId, NewSummary, RequestContext, Role, Summary, SummaryId,
        SummaryTier, UserId,
    };
    pub use crate::service::{SmartMemory, SmartMemoryBuilder};
    pub use crate::stats::{CompressionStats, CompressionStatsReporter};
    pub use crate::store::{InMemoryStore, MessageStore, SummaryStore};
    #[cfg(feature = "sqlite")]
    pub use crate::store::SqliteStore;
    pub use crate::summarize::{ExtractiveSummarizer, LlmSummarizer, SummarizationOracle};
    pub use crate::tokens::TokenEstimator;
    pub use crate::trigger::{PassReport, PassState, SummaryTriggerEngine};
    pub use crate::worker::{SummaryWorker, WorkerHandle};
}
