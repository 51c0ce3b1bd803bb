//! Builds the context injected ahead of the next model call.
//!
//! Read-only: dropping the future at any point leaves nothing to clean up.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;

use crate::config::MemoryConfig;
use crate::error::Result;
use crate::llm;
use crate::model::{AppId, Message, Role, Summary, SummaryTier};
use crate::store::{MessageStore, SummaryStore};
use crate::tokens::TokenEstimator;

/// Heading of the synthetic summary unit.
pub const SUMMARY_HEADER: &str = "Summary of earlier conversation:\n";

/// Tiers in the order they appear in the summary unit.
const TIER_ORDER: [SummaryTier; 3] = [SummaryTier::Long, SummaryTier::Mid, SummaryTier::Short];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ContextUnit {
    Summary { text: String, tokens: usize },
    Message { message: Message, tokens: usize },
}

impl ContextUnit {
    pub fn tokens(&self) -> usize {
        match self {
            Self::Summary { tokens, .. } | Self::Message { tokens, .. } => *tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledContext {
    /// Summary unit (if any) followed by raw messages, oldest first
    pub units: Vec<ContextUnit>,
    pub summary_tokens: usize,
    pub message_tokens: usize,
    /// Recent messages dropped to fit the budget
    pub evicted: usize,
    /// True when compression is disabled and raw history was returned
    pub degraded: bool,
}

impl AssembledContext {
    pub fn total_tokens(&self) -> usize {
        self.summary_tokens + self.message_tokens
    }

    pub fn summary_text(&self) -> Option<&str> {
        self.units.iter().find_map(|u| match u {
            ContextUnit::Summary { text, .. } => Some(text.as_str()),
            ContextUnit::Message { .. } => None,
        })
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.units.iter().filter_map(|u| match u {
            ContextUnit::Message { message, .. } => Some(message),
            ContextUnit::Summary { .. } => None,
        })
    }

    /// Convert to chat messages; the summary becomes a system message.
    pub fn to_chat_messages(&self) -> Vec<llm::Message> {
        self.units
            .iter()
            .map(|unit| match unit {
                ContextUnit::Summary { text, .. } => llm::Message::system(text.clone()),
                ContextUnit::Message { message, .. } => match message.role {
                    Role::User => llm::Message::user(message.text.clone()),
                    Role::Assistant => llm::Message::assistant(message.text.clone()),
                },
            })
            .collect()
    }
}

/// Render the latest summary of each tier as one block, most compressed
/// first. `None` when there are no summaries.
pub fn render_summary_block(latest: &[Summary]) -> Option<String> {
    let sections: Vec<String> = TIER_ORDER
        .iter()
        .filter_map(|tier| latest.iter().find(|s| s.tier == *tier))
        .filter(|s| !s.text.trim().is_empty())
        .map(|s| format!("{}\n{}", s.tier.context_label(), s.text.trim()))
        .collect();

    (!sections.is_empty()).then(|| format!("{SUMMARY_HEADER}{}", sections.join("\n\n")))
}

/// Number of leading (oldest) messages to evict so that
/// `fixed + sum(messages) <= budget`. Evicts everything if `fixed` alone
/// is over budget.
pub fn eviction_count(fixed: usize, messages: &[usize], budget: usize) -> usize {
    let mut total: usize = fixed + messages.iter().sum::<usize>();
    let mut evicted = 0;
    while total > budget && evicted < messages.len() {
        total -= messages[evicted];
        evicted += 1;
    }
    evicted
}

pub struct ContextAssembler {
    messages: Arc<dyn MessageStore>,
    summaries: Arc<dyn SummaryStore>,
    tokens: TokenEstimator,
    config: MemoryConfig,
}

impl ContextAssembler {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        summaries: Arc<dyn SummaryStore>,
        tokens: TokenEstimator,
        config: MemoryConfig,
    ) -> Self {
        Self {
            messages,
            summaries,
            tokens,
            config,
        }
    }

    /// Assemble the context for `app_id`.
    pub async fn assemble_context(&self, app_id: AppId) -> Result<AssembledContext> {
        if !self.config.enabled {
            return self.raw_recent(app_id).await;
        }

        let mut latest = Vec::with_capacity(TIER_ORDER.len());
        for tier in TIER_ORDER {
            if let Some(summary) = self.summaries.latest(app_id, tier).await? {
                latest.push(summary);
            }
        }
        let block = render_summary_block(&latest);
        let summary_tokens = block.as_deref().map_or(0, |b| self.tokens.count(b));

        let mut recent: VecDeque<(Message, usize)> = self
            .messages
            .recent(app_id, self.config.recent_message_count)
            .await?
            .into_iter()
            .map(|m| {
                let tokens = self.tokens.count(&m.text);
                (m, tokens)
            })
            .collect();

        let budget = self.config.token_budget();
        let counts: Vec<usize> = recent.iter().map(|(_, t)| *t).collect();
        let evicted = eviction_count(summary_tokens, &counts, budget);
        recent.drain(..evicted);

        if summary_tokens > budget {
            tracing::warn!(
                app_id,
                summary_tokens,
                budget,
                "summary block alone exceeds the token budget"
            );
        } else if evicted > 0 {
            tracing::warn!(app_id, evicted, budget, "evicted recent messages to fit budget");
        }

        let message_tokens = recent.iter().map(|(_, t)| *t).sum();
        let mut units = Vec::with_capacity(recent.len() + 1);
        if let Some(text) = block {
            units.push(ContextUnit::Summary {
                text,
                tokens: summary_tokens,
            });
        }
        units.extend(
            recent
                .into_iter()
                .map(|(message, tokens)| ContextUnit::Message { message, tokens }),
        );

        tracing::debug!(
            app_id,
            summary_tokens,
            message_tokens,
            units = units.len(),
            "context assembled"
        );

        Ok(AssembledContext {
            units,
            summary_tokens,
            message_tokens,
            evicted,
            degraded: false,
        })
    }

    async fn raw_recent(&self, app_id: AppId) -> Result<AssembledContext> {
        let units: Vec<ContextUnit> = self
            .messages
            .recent(app_id, self.config.fallback_message_count)
            .await?
            .into_iter()
            .map(|message| {
                let tokens = self.tokens.count(&message.text);
                ContextUnit::Message { message, tokens }
            })
            .collect();
        let message_tokens = units.iter().map(ContextUnit::tokens).sum();
        Ok(AssembledContext {
            units,
            summary_tokens: 0,
            message_tokens,
            evicted: 0,
            degraded: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewSummary;
    use crate::store::InMemoryStore;
    use proptest::prelude::*;

    fn assembler(store: Arc<InMemoryStore>, config: MemoryConfig) -> ContextAssembler {
        ContextAssembler::new(store.clone(), store, TokenEstimator::heuristic(), config)
    }

    #[test]
    fn test_eviction_count() {
        assert_eq!(eviction_count(10, &[5, 5, 5], 25), 0);
        assert_eq!(eviction_count(10, &[5, 5, 5], 24), 1);
        assert_eq!(eviction_count(10, &[5, 5, 5], 10), 3);
        assert_eq!(eviction_count(30, &[5, 5], 25), 2);
    }

    #[test]
    fn test_block_order_and_labels() {
        let mk = |tier, text: &str| Summary {
            id: 1,
            app_id: 1,
            tier,
            text: text.to_string(),
            covered_from: 1,
            covered_to: 1,
            covered_count: 1,
            original_tokens: 0,
            summary_tokens: 0,
            topic_complexity: None,
            parent_summary_id: None,
            embedding: None,
            version: 1,
            owner_user_id: 1,
            created_at: chrono::Utc::now(),
        };
        let block = render_summary_block(&[
            mk(SummaryTier::Short, "short"),
            mk(SummaryTier::Long, "long"),
        ])
        .unwrap();
        assert_eq!(
            block,
            "Summary of earlier conversation:\n[Project knowledge]\nlong\n\n[Recent conversation]\nshort"
        );
        assert!(render_summary_block(&[]).is_none());
    }

    #[tokio::test]
    async fn test_disabled_returns_raw_fallback() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..30 {
            store.append(3, Role::User, &format!("m{i}")).await.unwrap();
        }
        let ctx = assembler(store, MemoryConfig::default().with_enabled(false))
            .assemble_context(3)
            .await
            .unwrap();
        assert!(ctx.degraded);
        assert_eq!(ctx.units.len(), 20);
        assert_eq!(ctx.messages().next().unwrap().text, "m10");
        assert!(ctx.summary_text().is_none());
    }

    #[tokio::test]
    async fn test_summary_then_recent_messages() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..15 {
            store.append(3, Role::Assistant, &format!("m{i}")).await.unwrap();
        }
        store
            .save(NewSummary {
                app_id: 3,
                tier: SummaryTier::Short,
                text: "user set up the project".to_string(),
                covered_from: 1,
                covered_to: 5,
                covered_count: 5,
                original_tokens: 50,
                summary_tokens: 6,
                topic_complexity: None,
                parent_summary_id: None,
                embedding: None,
                owner_user_id: 1,
                expected_head: None,
            })
            .await
            .unwrap();

        let ctx = assembler(store, MemoryConfig::default()).assemble_context(3).await.unwrap();
        assert!(!ctx.degraded);
        assert_eq!(ctx.units.len(), 11);
        assert!(matches!(ctx.units[0], ContextUnit::Summary { .. }));
        assert_eq!(ctx.messages().next().unwrap().text, "m5");

        let chat = ctx.to_chat_messages();
        assert_eq!(chat[0].role, llm::MessageRole::System);
        assert_eq!(chat[1].role, llm::MessageRole::Assistant);
    }

    #[tokio::test]
    async fn test_evicts_oldest_first() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..10 {
            // 40 bytes each, 10 heuristic tokens
            store.append(1, Role::User, &format!("{i}{}", "x".repeat(39))).await.unwrap();
        }
        let config = MemoryConfig::default().with_context_window(100, 0.5);
        let ctx = assembler(store, config).assemble_context(1).await.unwrap();
        assert_eq!(ctx.evicted, 5);
        assert_eq!(ctx.total_tokens(), 50);
        assert!(ctx.messages().next().unwrap().text.starts_with('5'));
    }

    proptest! {
        #[test]
        fn eviction_fits_budget(
            fixed in 0usize..500,
            messages in prop::collection::vec(0usize..300, 0..20),
            budget in 0usize..2000,
        ) {
            let evicted = eviction_count(fixed, &messages, budget);
            let kept: usize = messages[evicted..].iter().sum();
            if fixed <= budget {
                prop_assert!(fixed + kept <= budget);
                // Minimal: keeping one more would not fit.
                if evicted > 0 {
                    prop_assert!(fixed + kept + messages[evicted - 1] > budget);
                }
            } else {
                prop_assert_eq!(evicted, messages.len());
            }
        }
    }
}
