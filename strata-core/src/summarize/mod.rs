//! Summarization oracles.
//!
//! The merge and trigger logic only sees [`SummarizationOracle`]; which
//! backend produces the text is decided when the engine is built.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::SummaryTier;

pub mod extractive;
pub mod llm;
pub mod prompts;

pub use extractive::ExtractiveSummarizer;
pub use llm::LlmSummarizer;

/// Separator placed between lower-tier summaries fed to a merge.
pub const MERGE_SEPARATOR: &str = "\n\n---\n\n";

/// Text → summary oracle with one operation per tier.
///
/// Output is trusted as given; implementations report transport or model
/// failures as oracle errors.
#[async_trait]
pub trait SummarizationOracle: Send + Sync {
    /// Summarize a role-tagged transcript of raw messages.
    async fn summarize_short(&self, conversation: &str) -> Result<String>;

    /// Merge several SHORT summaries into technical decisions.
    async fn summarize_mid(&self, summaries: &str) -> Result<String>;

    /// Merge several MID summaries into project-level knowledge.
    async fn summarize_long(&self, summaries: &str) -> Result<String>;

    /// Dispatch to the operation producing `tier`.
    async fn summarize(&self, tier: SummaryTier, text: &str) -> Result<String> {
        match tier {
            SummaryTier::Short => self.summarize_short(text).await,
            SummaryTier::Mid => self.summarize_mid(text).await,
            SummaryTier::Long => self.summarize_long(text).await,
        }
    }
}
