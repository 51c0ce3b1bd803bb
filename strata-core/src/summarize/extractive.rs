//! Offline summarizer that keeps the leading line of each unit.
//!
//! Not a real summary: it exists so the engine can run end to end without a
//! model (CLI `--offline`, tests, demos). Output is deterministic.

use async_trait::async_trait;

use super::{MERGE_SEPARATOR, SummarizationOracle};
use crate::error::Result;
use crate::model::SummaryTier;

/// Deterministic extractive summarizer.
#[derive(Debug, Clone)]
pub struct ExtractiveSummarizer {
    line_chars: usize,
    short_budget: usize,
    mid_budget: usize,
    long_budget: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self {
            line_chars: 160,
            short_budget: 1600,
            mid_budget: 1200,
            long_budget: 800,
        }
    }
}

impl ExtractiveSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum characters kept from each unit.
    pub fn with_line_chars(mut self, chars: usize) -> Self {
        self.line_chars = chars.max(8);
        self
    }

    fn budget(&self, tier: SummaryTier) -> usize {
        match tier {
            SummaryTier::Short => self.short_budget,
            SummaryTier::Mid => self.mid_budget,
            SummaryTier::Long => self.long_budget,
        }
    }

    fn extract(&self, tier: SummaryTier, text: &str) -> String {
        let units: Vec<&str> = match tier {
            SummaryTier::Short => text.split("\n\n").collect(),
            SummaryTier::Mid | SummaryTier::Long => text.split(MERGE_SEPARATOR).collect(),
        };

        let budget = self.budget(tier);
        let mut out = String::new();
        for unit in units {
            let Some(line) = unit.lines().map(str::trim).find(|l| !l.is_empty()) else {
                continue;
            };
            let line = truncate_chars(line.trim_start_matches("- "), self.line_chars);
            let entry = format!("- {line}\n");
            if out.chars().count() + entry.chars().count() > budget {
                break;
            }
            out.push_str(&entry);
        }
        out.trim_end().to_string()
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[async_trait]
impl SummarizationOracle for ExtractiveSummarizer {
    async fn summarize_short(&self, conversation: &str) -> Result<String> {
        Ok(self.extract(SummaryTier::Short, conversation))
    }

    async fn summarize_mid(&self, summaries: &str) -> Result<String> {
        Ok(self.extract(SummaryTier::Mid, summaries))
    }

    async fn summarize_long(&self, summaries: &str) -> Result<String> {
        Ok(self.extract(SummaryTier::Long, summaries))
    }
}
