//! Summary pass scenarios against the in-memory store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    RecordingSummarizer, ScriptedEmbeddings, append_plain, engine, save_mid, save_short,
};
use strata_core::prelude::*;

type Fixture = (Arc<InMemoryStore>, Arc<RecordingSummarizer>, SummaryTriggerEngine);

fn setup(config: MemoryConfig) -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let summarizer = Arc::new(RecordingSummarizer::new());
    let engine = engine(
        store.clone(),
        summarizer.clone(),
        Arc::new(ScriptedEmbeddings::new(64)),
        config,
    );
    (store, summarizer, engine)
}

#[tokio::test]
async fn test_low_threshold_boundary_for_app_42() {
    let (store, _, engine) = setup(MemoryConfig::default());
    let ctx = RequestContext::new(42, 1);

    append_plain(&store, 42, 39).await;
    engine.trigger_summary_if_needed(&ctx).await;
    assert!(store.all(42).await.unwrap().is_empty());

    let fortieth = store.append(42, Role::Assistant, "thanks, that works").await.unwrap();
    engine.trigger_summary_if_needed(&ctx).await;

    let summaries = store.all(42).await.unwrap();
    assert_eq!(summaries.len(), 1);
    let short = &summaries[0];
    assert_eq!(short.tier, SummaryTier::Short);
    assert_eq!(short.covered_count, 40);
    assert_eq!(short.covered_to, fortieth.id);
    assert_eq!(short.topic_complexity, Some(TopicComplexity::Low));
    assert_eq!(short.version, 1);
}

#[tokio::test]
async fn test_backlog_restarts_after_summary() {
    let (store, summarizer, engine) = setup(MemoryConfig::default());
    let ctx = RequestContext::new(1, 1);

    let first = append_plain(&store, 1, 40).await;
    engine.run_pass(&ctx).await.unwrap();

    // Nothing new: the pass stops at the backlog check.
    let report = engine.run_pass(&ctx).await.unwrap();
    assert_eq!(report.backlog, 0);
    assert!(report.created().is_empty());

    let second = append_plain(&store, 1, 40).await;
    let report = engine.run_pass(&ctx).await.unwrap();
    let short = report.short.unwrap();
    assert_eq!(short.covered_from, second[0].id);
    assert_eq!(short.covered_to, second[39].id);
    assert!(short.covered_from > first[39].id);

    // The transcript starts with the speaker tag of the first backlog message.
    let inputs = summarizer.inputs(SummaryTier::Short);
    assert_eq!(inputs.len(), 2);
    assert!(inputs[1].starts_with("User: plain message number 0\n\nAssistant: "));
}

#[tokio::test]
async fn test_error_keywords_use_medium_threshold() {
    let (store, _, engine) = setup(MemoryConfig::default());
    let ctx = RequestContext::new(1, 1);

    store
        .append(1, Role::User, "the deploy failed with a timeout")
        .await
        .unwrap();
    append_plain(&store, 1, 28).await;

    let report = engine.run_pass(&ctx).await.unwrap();
    assert_eq!(report.complexity, Some(TopicComplexity::Medium));
    assert_eq!(report.threshold, Some(30));
    assert!(report.short.is_none());
    assert_eq!(
        report.states,
        vec![PassState::Idle, PassState::CheckBacklog, PassState::Idle]
    );

    append_plain(&store, 1, 1).await;
    let report = engine.run_pass(&ctx).await.unwrap();
    assert_eq!(report.short.unwrap().covered_count, 30);
}

#[tokio::test]
async fn test_oracle_failure_leaves_backlog_for_retry() {
    let (store, summarizer, engine) = setup(MemoryConfig::default());
    let ctx = RequestContext::new(1, 1);
    append_plain(&store, 1, 40).await;

    summarizer.fail_short(true);
    let err = engine.run_pass(&ctx).await.unwrap_err();
    assert!(err.is_oracle_failure());
    // The swallowing entry point does not surface it either.
    engine.trigger_summary_if_needed(&ctx).await;
    assert_eq!(store.summary_count(), 0);

    summarizer.fail_short(false);
    let report = engine.run_pass(&ctx).await.unwrap();
    assert_eq!(report.short.unwrap().covered_count, 40);
}

#[tokio::test]
async fn test_full_chain_builds_provenance() {
    let config = MemoryConfig::default()
        .with_thresholds(2, 3, 4)
        .with_merge_counts(2, 2);
    let (store, _, engine) = setup(config);
    let ctx = RequestContext::new(7, 3);

    let mut mids = 0;
    let mut longs = 0;
    for _ in 0..6 {
        append_plain(&store, 7, 4).await;
        let report = engine.run_pass(&ctx).await.unwrap();
        assert!(report.short.is_some());
        assert_eq!(
            report.states,
            vec![
                PassState::Idle,
                PassState::CheckBacklog,
                PassState::SummarizeShort,
                PassState::MergeMid,
                PassState::MergeLong,
                PassState::Idle,
            ]
        );
        mids += usize::from(report.mid.as_ref().and_then(MergeOutcome::merged).is_some());
        longs += usize::from(report.long.as_ref().and_then(MergeOutcome::merged).is_some());
    }
    assert!(mids >= 2);
    assert!(longs >= 1);

    let all = store.all(7).await.unwrap();
    for summary in all.iter().filter(|s| s.tier != SummaryTier::Short) {
        let parent = store
            .get(7, summary.parent_summary_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Some(parent.tier), summary.tier.source());
        assert_eq!(summary.covered_from, parent.covered_from);
        assert!(summary.covered_from <= summary.covered_to);
        assert_eq!(summary.owner_user_id, 3);
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_passes_write_one_summary() {
    let store = Arc::new(InMemoryStore::new());
    let summarizer = Arc::new(RecordingSummarizer::with_delay(Duration::from_millis(50)));
    let embeddings = Arc::new(ScriptedEmbeddings::new(64));
    let a = engine(store.clone(), summarizer.clone(), embeddings.clone(), MemoryConfig::default());
    let b = engine(store.clone(), summarizer, embeddings, MemoryConfig::default());
    append_plain(&store, 1, 40).await;

    let ctx = RequestContext::new(1, 1);
    let (ra, rb) = tokio::join!(a.run_pass(&ctx), b.run_pass(&ctx));

    let results = [ra, rb];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(loser.is_conflict());
    assert_eq!(store.all(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_mid_abort_does_not_block_long_merge() {
    let config = MemoryConfig::default()
        .with_thresholds(2, 3, 4)
        .with_merge_counts(2, 2);
    let (store, summarizer, engine) = setup(config);
    let ctx = RequestContext::new(5, 1);

    // Two MIDs waiting for a LONG merge, and one SHORT past the MID window.
    let early = append_plain(&store, 5, 4).await;
    let first = save_short(&store, 5, "early short", (early[0].id, early[1].id), None).await;
    save_mid(&store, 5, "mid one", &first, None).await;
    save_mid(&store, 5, "mid two", &first, None).await;
    save_short(&store, 5, "pending short", (early[2].id, early[3].id), None).await;

    append_plain(&store, 5, 4).await;
    summarizer.fail_mid(true);
    let report = engine.run_pass(&ctx).await.unwrap();

    assert!(report.short.is_some());
    assert!(report.mid.as_ref().unwrap().is_aborted());
    let long = report.long.as_ref().and_then(MergeOutcome::merged).unwrap();
    assert_eq!(long.tier, SummaryTier::Long);
    assert_eq!(report.states.last(), Some(&PassState::Idle));
    assert!(report.states.contains(&PassState::MergeLong));

    // No MID was written, so both SHORTs stay in the window for the next pass.
    let mid_head = store.latest(5, SummaryTier::Mid).await.unwrap().unwrap();
    assert_eq!(mid_head.text, "mid two");
    assert_eq!(summarizer.inputs(SummaryTier::Long).len(), 1);
}
