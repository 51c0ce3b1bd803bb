//! Per-app summary pass.
//!
//! ```text
//! IDLE -> CHECK_BACKLOG -(too small)-> IDLE
//!                       -> SUMMARIZE_SHORT -> MERGE_MID -> MERGE_LONG -> IDLE
//! ```
//!
//! The backlog check has no side effects. A SHORT summary is written only
//! once the backlog reaches the threshold for its complexity, and the two
//! merges are each skipped until enough summaries of the tier below exist.
//! Concurrent passes for the same app are arbitrated by the store: the
//! loser's save fails with a conflict and its work is discarded.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::Instrument;

use crate::classifier::{ComplexityClassifier, TopicComplexity};
use crate::config::MemoryConfig;
use crate::embeddings::EmbeddingOracle;
use crate::error::Result;
use crate::merger::{MergeOutcome, TierMerger};
use crate::model::{Message, NewSummary, RequestContext, Summary, SummaryTier};
use crate::store::{MessageStore, SummaryStore};
use crate::summarize::SummarizationOracle;
use crate::tokens::TokenEstimator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PassState {
    Idle,
    CheckBacklog,
    SummarizeShort,
    MergeMid,
    MergeLong,
}

/// What one pass did.
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub app_id: i64,
    /// States visited, ending in `Idle`
    pub states: Vec<PassState>,
    pub backlog: usize,
    pub complexity: Option<TopicComplexity>,
    pub threshold: Option<usize>,
    pub short: Option<Summary>,
    pub mid: Option<MergeOutcome>,
    pub long: Option<MergeOutcome>,
}

impl PassReport {
    fn new(app_id: i64) -> Self {
        Self {
            app_id,
            states: vec![PassState::Idle],
            backlog: 0,
            complexity: None,
            threshold: None,
            short: None,
            mid: None,
            long: None,
        }
    }

    fn enter(&mut self, state: PassState) {
        self.states.push(state);
    }

    fn finish(mut self) -> Self {
        self.states.push(PassState::Idle);
        self
    }

    /// Summaries written during the pass.
    pub fn created(&self) -> Vec<&Summary> {
        let merged = [&self.mid, &self.long]
            .into_iter()
            .filter_map(|o| o.as_ref().and_then(MergeOutcome::merged));
        self.short.iter().chain(merged).collect()
    }
}

/// Render messages as `Speaker: text` blocks separated by blank lines.
pub fn format_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        out.push_str(message.role.speaker());
        out.push_str(": ");
        out.push_str(&message.text);
        out.push_str("\n\n");
    }
    out
}

pub struct SummaryTriggerEngine {
    messages: Arc<dyn MessageStore>,
    summaries: Arc<dyn SummaryStore>,
    oracle: Arc<dyn SummarizationOracle>,
    merger: TierMerger,
    classifier: ComplexityClassifier,
    tokens: TokenEstimator,
    config: MemoryConfig,
}

impl SummaryTriggerEngine {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        summaries: Arc<dyn SummaryStore>,
        oracle: Arc<dyn SummarizationOracle>,
        embeddings: Arc<dyn EmbeddingOracle>,
        tokens: TokenEstimator,
        config: MemoryConfig,
    ) -> Self {
        let merger = TierMerger::new(
            summaries.clone(),
            oracle.clone(),
            embeddings,
            tokens.clone(),
            &config,
        );
        Self {
            messages,
            summaries,
            oracle,
            merger,
            classifier: ComplexityClassifier::new(),
            tokens,
            config,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn merger(&self) -> &TierMerger {
        &self.merger
    }

    /// Run one pass and swallow every failure.
    ///
    /// This is the entry point for the background path; it never returns an
    /// error and logs whatever went wrong.
    pub async fn trigger_summary_if_needed(&self, ctx: &RequestContext) {
        let span = tracing::info_span!("summary_pass", app_id = ctx.app_id, user_id = ctx.user_id);
        async {
            match self.run_pass(ctx).await {
                Ok(report) => tracing::debug!(
                    created = report.created().len(),
                    backlog = report.backlog,
                    "summary pass finished"
                ),
                Err(e) if e.is_conflict() => {
                    tracing::info!(error = %e, "summary pass lost a concurrent write")
                }
                Err(e) => tracing::error!(error = %e, "summary pass failed"),
            }
        }
        .instrument(span)
        .await
    }

    /// Run one pass through the state machine.
    ///
    /// # Errors
    ///
    /// Store failures, and any failure while producing or saving the SHORT
    /// summary, end the pass with an error. Merge failures do not: they are
    /// reported as [`MergeOutcome::Aborted`] and the next tier is still
    /// evaluated.
    pub async fn run_pass(&self, ctx: &RequestContext) -> Result<PassReport> {
        let mut report = PassReport::new(ctx.app_id);
        if !self.config.enabled {
            return Ok(report.finish());
        }

        report.enter(PassState::CheckBacklog);
        let head = self.summaries.latest(ctx.app_id, SummaryTier::Short).await?;
        let after = head.as_ref().map(|s| s.covered_to);
        let backlog = self.messages.after(ctx.app_id, after).await?;
        report.backlog = backlog.len();

        tracing::debug!(app_id = ctx.app_id, backlog = backlog.len(), after, "checking backlog");
        if backlog.is_empty() {
            return Ok(report.finish());
        }

        let complexity = self.classifier.classify(&backlog);
        let threshold = self.config.threshold(complexity);
        report.complexity = Some(complexity);
        report.threshold = Some(threshold);

        if backlog.len() < threshold {
            tracing::debug!(
                app_id = ctx.app_id,
                backlog = backlog.len(),
                threshold,
                complexity = %complexity,
                "backlog below threshold"
            );
            return Ok(report.finish());
        }

        report.enter(PassState::SummarizeShort);
        report.short = Some(
            self.summarize_short(ctx, &backlog, complexity, head.map(|s| s.id))
                .await?,
        );

        report.enter(PassState::MergeMid);
        report.mid = Some(
            self.merger
                .try_merge(ctx, SummaryTier::Short, SummaryTier::Mid)
                .await,
        );

        report.enter(PassState::MergeLong);
        report.long = Some(
            self.merger
                .try_merge(ctx, SummaryTier::Mid, SummaryTier::Long)
                .await,
        );

        Ok(report.finish())
    }

    async fn summarize_short(
        &self,
        ctx: &RequestContext,
        backlog: &[Message],
        complexity: TopicComplexity,
        expected_head: Option<i64>,
    ) -> Result<Summary> {
        let (Some(first), Some(last)) = (backlog.first(), backlog.last()) else {
            return Err(crate::error::StrataError::DataInconsistency(
                "empty backlog".to_string(),
            ));
        };

        let transcript = format_transcript(backlog);
        let original_tokens = self.tokens.count(&transcript);

        tracing::info!(
            app_id = ctx.app_id,
            messages = backlog.len(),
            complexity = %complexity,
            original_tokens,
            "summarizing backlog"
        );

        let started = Instant::now();
        let text = self.oracle.summarize_short(&transcript).await?;
        let elapsed = started.elapsed();
        let summary_tokens = self.tokens.count(&text);

        let saved = self
            .summaries
            .save(NewSummary {
                app_id: ctx.app_id,
                tier: SummaryTier::Short,
                text,
                covered_from: first.id,
                covered_to: last.id,
                covered_count: backlog.len() as u32,
                original_tokens,
                summary_tokens,
                topic_complexity: Some(complexity),
                parent_summary_id: None,
                embedding: None,
                owner_user_id: ctx.user_id,
                expected_head,
            })
            .await?;

        let compression_pct =
            TokenEstimator::compression_ratio(original_tokens, summary_tokens) * 100.0;
        tracing::info!(
            app_id = ctx.app_id,
            summary_id = saved.id,
            original_tokens,
            summary_tokens,
            compression_pct,
            oracle_ms = elapsed.as_millis() as u64,
            "SHORT summary created"
        );
        Ok(saved)
    }
}
