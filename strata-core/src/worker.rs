//! Background summary worker.
//!
//! Hosts call [`WorkerHandle::submit`] after each turn. Jobs go into a
//! bounded queue drained by one dispatcher task, and every pass runs in its
//! own spawned task behind a semaphore, so a failing or panicking pass is
//! logged and never reaches the caller. Submitted jobs are detached from the
//! caller's cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::Instrument;

use crate::config::MemoryConfig;
use crate::model::RequestContext;
use crate::trigger::SummaryTriggerEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryJob {
    pub ctx: RequestContext,
}

/// Counters for jobs seen by a worker.
#[derive(Debug, Default)]
pub struct WorkerStats {
    accepted: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

impl WorkerStats {
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }
}

/// Cloneable submission side of a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
    jobs: mpsc::Sender<SummaryJob>,
    shutdown: Arc<watch::Sender<bool>>,
    stats: Arc<WorkerStats>,
}

impl WorkerHandle {
    /// Queue a summary pass for `ctx` without waiting for it.
    ///
    /// Returns false when the job was dropped because the queue is full or
    /// the worker is shut down. Dropping is safe: the backlog is examined
    /// again on the next submission.
    pub fn submit(&self, ctx: RequestContext) -> bool {
        match self.jobs.try_send(SummaryJob { ctx }) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(app_id = job.ctx.app_id, "summary queue full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(app_id = job.ctx.app_id, "summary worker stopped, dropping job");
                false
            }
        }
    }

    /// Stop accepting jobs. Queued and running passes still finish; await
    /// the worker's `JoinHandle` to wait for them.
    pub fn shutdown(&self) {
        // Fails only if the dispatcher is already gone.
        let _ = self.shutdown.send(true);
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }
}

pub struct SummaryWorker;

impl SummaryWorker {
    /// Start the dispatcher on the current runtime.
    pub fn spawn(
        engine: Arc<SummaryTriggerEngine>,
        config: &MemoryConfig,
    ) -> (WorkerHandle, JoinHandle<()>) {
        let (jobs, queue) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown, signal) = watch::channel(false);
        let stats = Arc::new(WorkerStats::default());
        let permits = Arc::new(Semaphore::new(config.worker_concurrency.max(1)));

        let dispatcher = tokio::spawn(dispatch(engine, queue, signal, permits, stats.clone()));

        tracing::info!(
            concurrency = config.worker_concurrency,
            queue_capacity = config.queue_capacity,
            "summary worker started"
        );

        let handle = WorkerHandle {
            jobs,
            shutdown: Arc::new(shutdown),
            stats,
        };
        (handle, dispatcher)
    }
}

async fn dispatch(
    engine: Arc<SummaryTriggerEngine>,
    mut queue: mpsc::Receiver<SummaryJob>,
    mut signal: watch::Receiver<bool>,
    permits: Arc<Semaphore>,
    stats: Arc<WorkerStats>,
) {
    let mut running = JoinSet::new();
    let mut closing = false;

    loop {
        tokio::select! {
            changed = signal.changed(), if !closing => {
                if changed.is_err() || *signal.borrow() {
                    closing = true;
                    queue.close();
                    tracing::info!("summary worker closing, draining queue");
                }
            }
            Some(result) = running.join_next(), if !running.is_empty() => {
                reap(result, &stats);
            }
            job = queue.recv() => {
                let Some(job) = job else { break };
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let engine = engine.clone();
                let span = tracing::debug_span!("summary_job", app_id = job.ctx.app_id);
                running.spawn(
                    async move {
                        let _permit = permit;
                        engine.trigger_summary_if_needed(&job.ctx).await;
                    }
                    .instrument(span),
                );
            }
        }
    }

    while let Some(result) = running.join_next().await {
        reap(result, &stats);
    }
    tracing::info!(completed = stats.completed(), "summary worker stopped");
}

fn reap(result: std::result::Result<(), JoinError>, stats: &WorkerStats) {
    match result {
        Ok(()) => {
            stats.completed.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) if e.is_panic() => {
            stats.panicked.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %e, "summary pass panicked");
        }
        Err(e) => tracing::warn!(error = %e, "summary pass cancelled"),
    }
}
