//! Compression statistics per app.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{AppId, Summary, SummaryTier};
use crate::store::{MessageStore, SummaryStore};
use crate::tokens::TokenEstimator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionStats {
    pub app_id: AppId,
    pub original_tokens: usize,
    pub summary_tokens: usize,
    /// `1 - summary / original`, 0 when nothing has been summarized
    pub compression_ratio: f64,
    pub short_count: usize,
    pub mid_count: usize,
    pub long_count: usize,
    /// Messages not yet covered by a SHORT summary
    pub unsummarized_backlog_size: usize,
}

impl CompressionStats {
    /// Aggregate over every persisted summary of an app.
    pub fn from_summaries(app_id: AppId, summaries: &[Summary], backlog: usize) -> Self {
        let count = |tier| summaries.iter().filter(|s| s.tier == tier).count();
        let original_tokens = summaries.iter().map(|s| s.original_tokens).sum();
        let summary_tokens = summaries.iter().map(|s| s.summary_tokens).sum();
        Self {
            app_id,
            original_tokens,
            summary_tokens,
            compression_ratio: TokenEstimator::compression_ratio(original_tokens, summary_tokens),
            short_count: count(SummaryTier::Short),
            mid_count: count(SummaryTier::Mid),
            long_count: count(SummaryTier::Long),
            unsummarized_backlog_size: backlog,
        }
    }
}

pub struct CompressionStatsReporter {
    messages: Arc<dyn MessageStore>,
    summaries: Arc<dyn SummaryStore>,
}

impl CompressionStatsReporter {
    pub fn new(messages: Arc<dyn MessageStore>, summaries: Arc<dyn SummaryStore>) -> Self {
        Self {
            messages,
            summaries,
        }
    }

    pub async fn stats(&self, app_id: AppId) -> Result<CompressionStats> {
        let summaries = self.summaries.all(app_id).await?;
        let covered_to = summaries
            .iter()
            .filter(|s| s.tier == SummaryTier::Short)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .map(|s| s.covered_to);
        let backlog = self.messages.count_after(app_id, covered_to).await?;
        Ok(CompressionStats::from_summaries(app_id, &summaries, backlog))
    }
}
