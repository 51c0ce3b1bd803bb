//! Summary passes against the SQLite store.

#![cfg(feature = "sqlite")]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{RecordingSummarizer, ScriptedEmbeddings};
use strata_core::prelude::*;

fn sqlite_engine(
    store: &Arc<SqliteStore>,
    summarizer: Arc<RecordingSummarizer>,
    config: MemoryConfig,
) -> SummaryTriggerEngine {
    SummaryTriggerEngine::new(
        store.clone(),
        store.clone(),
        summarizer,
        Arc::new(ScriptedEmbeddings::new(64)),
        TokenEstimator::heuristic(),
        config,
    )
}

async fn append_turns(store: &SqliteStore, app_id: AppId, count: usize) -> Vec<Message> {
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        out.push(store.append(app_id, role, &format!("turn {i}")).await.unwrap());
    }
    out
}

#[tokio::test]
async fn test_full_chain_over_sqlite() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let config = MemoryConfig::default()
        .with_thresholds(2, 3, 4)
        .with_merge_counts(2, 2);
    let engine = sqlite_engine(&store, Arc::new(RecordingSummarizer::new()), config);
    let ctx = RequestContext::new(9, 4);

    let mut first_message = None;
    for _ in 0..6 {
        let turns = append_turns(&store, 9, 4).await;
        first_message.get_or_insert(turns[0].id);
        let report = engine.run_pass(&ctx).await.unwrap();
        let short = report.short.unwrap();
        assert_eq!(short.covered_count, 4);
        assert_eq!(short.covered_to, turns[3].id);
    }

    let all = store.all(9).await.unwrap();
    let count = |tier| all.iter().filter(|s| s.tier == tier).count();
    assert_eq!(count(SummaryTier::Short), 6);
    assert!(count(SummaryTier::Mid) >= 2);
    assert!(count(SummaryTier::Long) >= 1);

    for summary in all.iter().filter(|s| s.tier != SummaryTier::Short) {
        let parent = store
            .get(9, summary.parent_summary_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Some(parent.tier), summary.tier.source());
        assert_eq!(summary.covered_from, parent.covered_from);
        assert!(summary.covered_from <= summary.covered_to);
    }

    // The first LONG folds in the first MID, which starts at the first turn.
    let first_long = all.iter().find(|s| s.tier == SummaryTier::Long).unwrap();
    assert_eq!(Some(first_long.covered_from), first_message);

    // The first SHORT went through dedup, so its embedding was written back
    // through the version check.
    let first_short = all.iter().find(|s| s.tier == SummaryTier::Short).unwrap();
    assert!(first_short.embedding.is_some());
    assert_eq!(first_short.version, 2);
}

#[tokio::test]
async fn test_racing_passes_over_sqlite_write_one_short() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let summarizer = Arc::new(RecordingSummarizer::with_delay(Duration::from_millis(50)));
    let a = sqlite_engine(&store, summarizer.clone(), MemoryConfig::default());
    let b = sqlite_engine(&store, summarizer, MemoryConfig::default());
    append_turns(&store, 1, 40).await;

    let ctx = RequestContext::new(1, 1);
    let (ra, rb) = tokio::join!(a.run_pass(&ctx), b.run_pass(&ctx));

    let results = [ra, rb];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(
        loser,
        StrataError::HeadConflict { tier: SummaryTier::Short, .. }
    ));

    let all = store.all(1).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].covered_count, 40);
    assert_eq!(all[0].version, 1);
}
