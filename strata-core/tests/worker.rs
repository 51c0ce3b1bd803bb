//! Background worker: fire-and-forget submission and failure isolation.

mod common;

use std::sync::Arc;

use common::{RecordingSummarizer, ScriptedEmbeddings, append_plain, engine};
use strata_core::prelude::*;

fn spawn_worker(
    store: &Arc<InMemoryStore>,
    summarizer: &Arc<RecordingSummarizer>,
    config: MemoryConfig,
) -> (WorkerHandle, tokio::task::JoinHandle<()>) {
    let engine = Arc::new(engine(
        store.clone(),
        summarizer.clone(),
        Arc::new(ScriptedEmbeddings::new(32)),
        config.clone(),
    ));
    SummaryWorker::spawn(engine, &config)
}

#[tokio::test]
async fn test_submitted_pass_runs_in_background() {
    let store = Arc::new(InMemoryStore::new());
    let summarizer = Arc::new(RecordingSummarizer::new());
    append_plain(&store, 42, 40).await;

    let (handle, task) = spawn_worker(&store, &summarizer, MemoryConfig::default());
    assert!(handle.submit(RequestContext::new(42, 1)));

    handle.shutdown();
    task.await.unwrap();

    assert_eq!(handle.stats().completed(), 1);
    let short = store.latest(42, SummaryTier::Short).await.unwrap().unwrap();
    assert_eq!(short.covered_count, 40);
}

#[tokio::test]
async fn test_failing_pass_is_contained() {
    let store = Arc::new(InMemoryStore::new());
    let summarizer = Arc::new(RecordingSummarizer::new());
    append_plain(&store, 1, 40).await;
    summarizer.fail_short(true);

    let (handle, task) = spawn_worker(&store, &summarizer, MemoryConfig::default());
    assert!(handle.submit(RequestContext::new(1, 1)));
    handle.shutdown();
    task.await.unwrap();

    assert_eq!(handle.stats().completed(), 1);
    assert_eq!(handle.stats().panicked(), 0);
    assert_eq!(store.summary_count(), 0);
}

#[tokio::test]
async fn test_panicking_pass_does_not_stop_worker() {
    let store = Arc::new(InMemoryStore::new());
    let summarizer = Arc::new(RecordingSummarizer::new());
    append_plain(&store, 1, 40).await;
    summarizer.panic_next();

    let config = MemoryConfig::default().with_worker(1, 8);
    let (handle, task) = spawn_worker(&store, &summarizer, config);
    assert!(handle.submit(RequestContext::new(1, 1)));
    assert!(handle.submit(RequestContext::new(1, 1)));
    handle.shutdown();
    task.await.unwrap();

    assert_eq!(handle.stats().panicked(), 1);
    assert_eq!(handle.stats().completed(), 1);
    assert_eq!(store.summary_count(), 1);
}

#[tokio::test]
async fn test_full_queue_drops_jobs() {
    // Current-thread runtime: the dispatcher cannot drain until we yield.
    let store = Arc::new(InMemoryStore::new());
    let summarizer = Arc::new(RecordingSummarizer::new());
    let config = MemoryConfig::default().with_worker(1, 2);
    let (handle, task) = spawn_worker(&store, &summarizer, config);

    assert!(handle.submit(RequestContext::new(1, 1)));
    assert!(handle.submit(RequestContext::new(2, 1)));
    assert!(!handle.submit(RequestContext::new(3, 1)));
    assert_eq!(handle.stats().accepted(), 2);
    assert_eq!(handle.stats().dropped(), 1);

    handle.shutdown();
    task.await.unwrap();
    assert_eq!(handle.stats().completed(), 2);
}

#[tokio::test]
async fn test_submit_after_shutdown_is_rejected() {
    let store = Arc::new(InMemoryStore::new());
    let summarizer = Arc::new(RecordingSummarizer::new());
    let (handle, task) = spawn_worker(&store, &summarizer, MemoryConfig::default());

    handle.shutdown();
    task.await.unwrap();

    assert!(!handle.submit(RequestContext::new(1, 1)));
    assert_eq!(handle.stats().dropped(), 1);
}

#[tokio::test]
async fn test_smart_memory_triggers_through_worker() {
    let store = Arc::new(InMemoryStore::new());
    let memory = SmartMemory::builder()
        .store(store.clone())
        .summarizer(Arc::new(RecordingSummarizer::new()))
        .embedding_oracle(Arc::new(ScriptedEmbeddings::new(16)))
        .token_estimator(TokenEstimator::heuristic())
        .build()
        .await
        .unwrap();

    for i in 0..40 {
        memory
            .record_message(5, Role::User, &format!("turn {i}"))
            .await
            .unwrap();
    }
    memory.trigger_summary_if_needed(RequestContext::new(5, 2));
    memory.shutdown().await;

    let stats = CompressionStatsReporter::new(store.clone(), store)
        .stats(5)
        .await
        .unwrap();
    assert_eq!(stats.short_count, 1);
    assert_eq!(stats.unsummarized_backlog_size, 0);
}
