//! Folds lower-tier summaries into the next tier up.
//!
//! A merge at `target` considers every `source` summary with an id above
//! the provenance pointer of the latest `target` summary. When enough are
//! waiting, near-duplicates are filtered out, the survivors are joined with
//! [`MERGE_SEPARATOR`] and handed to the summarization oracle, and the
//! result is saved against the target tier head.
//!
//! Failures abort only the merge in progress. Nothing is written before the
//! final save, so the inputs stay unmerged and the next pass retries them.

use std::sync::Arc;
use std::time::Instant;

use crate::config::MemoryConfig;
use crate::dedup::{DedupOutcome, Deduplicator};
use crate::embeddings::EmbeddingOracle;
use crate::error::{Result, StrataError};
use crate::model::{NewSummary, RequestContext, Summary, SummaryTier};
use crate::store::SummaryStore;
use crate::summarize::{MERGE_SEPARATOR, SummarizationOracle};
use crate::tokens::TokenEstimator;

/// Result of one merge attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Merged(Summary),
    /// Not enough unmerged source summaries yet
    Skipped { available: usize, required: usize },
    /// The attempt failed; inputs are left for the next pass
    Aborted(String),
}

impl MergeOutcome {
    pub fn merged(&self) -> Option<&Summary> {
        match self {
            Self::Merged(summary) => Some(summary),
            _ => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

pub struct TierMerger {
    summaries: Arc<dyn SummaryStore>,
    oracle: Arc<dyn SummarizationOracle>,
    embeddings: Arc<dyn EmbeddingOracle>,
    dedup: Deduplicator,
    tokens: TokenEstimator,
    mid_merge_count: usize,
    long_merge_count: usize,
}

impl TierMerger {
    pub fn new(
        summaries: Arc<dyn SummaryStore>,
        oracle: Arc<dyn SummarizationOracle>,
        embeddings: Arc<dyn EmbeddingOracle>,
        tokens: TokenEstimator,
        config: &MemoryConfig,
    ) -> Self {
        let dedup = Deduplicator::new(
            embeddings.clone(),
            summaries.clone(),
            config.similarity_threshold,
        );
        Self {
            summaries,
            oracle,
            embeddings,
            dedup,
            tokens,
            mid_merge_count: config.mid_merge_count,
            long_merge_count: config.long_merge_count,
        }
    }

    /// Unmerged summaries required before merging into `target`.
    pub fn merge_count(&self, target: SummaryTier) -> usize {
        match target {
            SummaryTier::Short => 0,
            SummaryTier::Mid => self.mid_merge_count,
            SummaryTier::Long => self.long_merge_count,
        }
    }

    /// Merge `source` summaries into `target`, never failing.
    ///
    /// Errors are logged and reported as [`MergeOutcome::Aborted`].
    pub async fn try_merge(
        &self,
        ctx: &RequestContext,
        source: SummaryTier,
        target: SummaryTier,
    ) -> MergeOutcome {
        match self.merge(ctx, source, target).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_conflict() {
                    tracing::warn!(
                        app_id = ctx.app_id,
                        tier = %target,
                        error = %e,
                        "merge lost a concurrent write, will retry on next pass"
                    );
                } else {
                    tracing::error!(
                        app_id = ctx.app_id,
                        tier = %target,
                        error = %e,
                        "merge aborted"
                    );
                }
                MergeOutcome::Aborted(e.to_string())
            }
        }
    }

    /// Merge `source` summaries into `target`, propagating failures.
    pub async fn merge(
        &self,
        ctx: &RequestContext,
        source: SummaryTier,
        target: SummaryTier,
    ) -> Result<MergeOutcome> {
        if target.source() != Some(source) {
            return Err(StrataError::DataInconsistency(format!(
                "cannot merge {source} summaries into {target}"
            )));
        }

        let head = self.summaries.latest(ctx.app_id, target).await?;
        let after = head.as_ref().and_then(|s| s.parent_summary_id);
        let candidates = self.summaries.unmerged(ctx.app_id, source, after).await?;

        let required = self.merge_count(target);
        if candidates.len() < required {
            tracing::debug!(
                app_id = ctx.app_id,
                tier = %target,
                available = candidates.len(),
                required,
                "not enough summaries to merge"
            );
            return Ok(MergeOutcome::Skipped {
                available: candidates.len(),
                required,
            });
        }

        let DedupOutcome { kept, .. } = self.dedup.deduplicate(candidates).await?;
        let (Some(first), Some(last)) = (kept.first(), kept.last()) else {
            return Ok(MergeOutcome::Skipped {
                available: 0,
                required,
            });
        };

        let joined = kept
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(MERGE_SEPARATOR);
        let original_tokens = self.tokens.count(&joined);

        let started = Instant::now();
        let text = self.oracle.summarize(target, &joined).await?;
        let summary_tokens = self.tokens.count(&text);

        let embedding = match self.embeddings.embed(&text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!(
                    app_id = ctx.app_id,
                    tier = %target,
                    error = %e,
                    "could not embed merged summary, storing without vector"
                );
                None
            }
        };

        let saved = self
            .summaries
            .save(NewSummary {
                app_id: ctx.app_id,
                tier: target,
                text,
                covered_from: first.covered_from,
                covered_to: last.covered_to,
                covered_count: kept.iter().map(|s| s.covered_count).sum(),
                original_tokens,
                summary_tokens,
                topic_complexity: None,
                parent_summary_id: Some(first.id),
                embedding,
                owner_user_id: ctx.user_id,
                expected_head: head.map(|s| s.id),
            })
            .await?;

        let compression_pct =
            TokenEstimator::compression_ratio(original_tokens, summary_tokens) * 100.0;
        tracing::info!(
            app_id = ctx.app_id,
            tier = %target,
            summary_id = saved.id,
            merged = kept.len(),
            original_tokens,
            summary_tokens,
            compression_pct,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "merged summaries"
        );

        Ok(MergeOutcome::Merged(saved))
    }
}
