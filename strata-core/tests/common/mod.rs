//! Scripted oracle doubles and seeding helpers shared by integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use strata_core::prelude::*;

/// Summarizer that records every input and returns a unique summary.
#[derive(Default)]
pub struct RecordingSummarizer {
    calls: Mutex<Vec<(SummaryTier, String)>>,
    counter: AtomicUsize,
    fail_short: AtomicBool,
    fail_mid: AtomicBool,
    panic_next: AtomicBool,
    delay: Option<Duration>,
}

impl RecordingSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before answering, so concurrent callers interleave.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn fail_short(&self, fail: bool) {
        self.fail_short.store(fail, Ordering::SeqCst);
    }

    pub fn fail_mid(&self, fail: bool) {
        self.fail_mid.store(fail, Ordering::SeqCst);
    }

    pub fn panic_next(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    pub fn inputs(&self, tier: SummaryTier) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|(t, _)| *t == tier)
            .map(|(_, text)| text.clone())
            .collect()
    }

    async fn answer(&self, tier: SummaryTier, input: &str, fail: &AtomicBool) -> Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("summarizer exploded");
        }
        if fail.load(Ordering::SeqCst) {
            return Err(StrataError::summarization(format!("{tier} backend unavailable")));
        }
        self.calls.lock().push((tier, input.to_string()));
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{tier} summary {n}"))
    }
}

#[async_trait]
impl SummarizationOracle for RecordingSummarizer {
    async fn summarize_short(&self, conversation: &str) -> Result<String> {
        self.answer(SummaryTier::Short, conversation, &self.fail_short).await
    }

    async fn summarize_mid(&self, summaries: &str) -> Result<String> {
        self.answer(SummaryTier::Mid, summaries, &self.fail_mid).await
    }

    async fn summarize_long(&self, summaries: &str) -> Result<String> {
        self.answer(SummaryTier::Long, summaries, &AtomicBool::new(false)).await
    }
}

/// Embeddings that never collide: each call returns the next basis vector.
/// Texts listed in `fixed` get the given vector instead.
pub struct ScriptedEmbeddings {
    dimension: usize,
    next: AtomicUsize,
    fixed: Mutex<HashMap<String, Vec<f32>>>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedEmbeddings {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            next: AtomicUsize::new(0),
            fixed: Mutex::new(HashMap::new()),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, text: &str, vector: Vec<f32>) {
        self.fixed.lock().insert(text.to_string(), vector);
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingOracle for ScriptedEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(StrataError::embedding("embedding model offline"));
        }
        if let Some(vector) = self.fixed.lock().get(text) {
            return Ok(vector.clone());
        }
        let mut vector = vec![0.0; self.dimension];
        vector[self.next.fetch_add(1, Ordering::SeqCst) % self.dimension] = 1.0;
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

pub fn engine(
    store: Arc<InMemoryStore>,
    summarizer: Arc<RecordingSummarizer>,
    embeddings: Arc<ScriptedEmbeddings>,
    config: MemoryConfig,
) -> SummaryTriggerEngine {
    SummaryTriggerEngine::new(
        store.clone(),
        store,
        summarizer,
        embeddings,
        TokenEstimator::heuristic(),
        config,
    )
}

/// Append `count` alternating plain messages.
pub async fn append_plain(store: &InMemoryStore, app_id: AppId, count: usize) -> Vec<Message> {
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        out.push(
            store
                .append(app_id, role, &format!("plain message number {i}"))
                .await
                .unwrap(),
        );
    }
    out
}

/// Save a SHORT summary on top of the current head.
pub async fn save_short(
    store: &InMemoryStore,
    app_id: AppId,
    text: &str,
    covered: (MessageId, MessageId),
    embedding: Option<Vec<f32>>,
) -> Summary {
    let head = store
        .latest(app_id, SummaryTier::Short)
        .await
        .unwrap()
        .map(|s| s.id);
    store
        .save(NewSummary {
            app_id,
            tier: SummaryTier::Short,
            text: text.to_string(),
            covered_from: covered.0,
            covered_to: covered.1,
            covered_count: (covered.1 - covered.0 + 1) as u32,
            original_tokens: 1000,
            summary_tokens: 100,
            topic_complexity: Some(TopicComplexity::Low),
            parent_summary_id: None,
            embedding,
            owner_user_id: 1,
            expected_head: head,
        })
        .await
        .unwrap()
}

/// Save a MID summary on top of the current MID head.
pub async fn save_mid(
    store: &InMemoryStore,
    app_id: AppId,
    text: &str,
    parent: &Summary,
    embedding: Option<Vec<f32>>,
) -> Summary {
    let head = store
        .latest(app_id, SummaryTier::Mid)
        .await
        .unwrap()
        .map(|s| s.id);
    store
        .save(NewSummary {
            app_id,
            tier: SummaryTier::Mid,
            text: text.to_string(),
            covered_from: parent.covered_from,
            covered_to: parent.covered_to,
            covered_count: parent.covered_count,
            original_tokens: 500,
            summary_tokens: 80,
            topic_complexity: None,
            parent_summary_id: Some(parent.id),
            embedding,
            owner_user_id: 1,
            expected_head: head,
        })
        .await
        .unwrap()
}
