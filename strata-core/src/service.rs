//! Host-facing facade.
//!
//! [`SmartMemory`] wires the stores, oracles and engines together and
//! exposes the three host operations: trigger a background summary pass,
//! assemble context, and report compression stats.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::assembler::{AssembledContext, ContextAssembler};
use crate::config::{MemoryConfig, StrataConfig};
use crate::embeddings::{EmbeddingOracle, EmbeddingProviderFactory};
use crate::error::Result;
use crate::llm::{LLMProvider, LLMProviderFactory};
use crate::model::{AppId, Message, RequestContext, Role};
use crate::stats::{CompressionStats, CompressionStatsReporter};
use crate::store::{InMemoryStore, MessageStore, SummaryStore};
use crate::summarize::{ExtractiveSummarizer, LlmSummarizer, SummarizationOracle};
use crate::tokens::TokenEstimator;
use crate::trigger::{PassReport, SummaryTriggerEngine};
use crate::worker::{SummaryWorker, WorkerHandle};

/// Hierarchical conversation memory for one deployment.
pub struct SmartMemory {
    messages: Arc<dyn MessageStore>,
    engine: Arc<SummaryTriggerEngine>,
    assembler: ContextAssembler,
    reporter: CompressionStatsReporter,
    worker: Option<WorkerHandle>,
    worker_task: Option<JoinHandle<()>>,
}

impl SmartMemory {
    pub fn builder() -> SmartMemoryBuilder {
        SmartMemoryBuilder::new()
    }

    pub fn config(&self) -> &MemoryConfig {
        self.engine.config()
    }

    pub fn engine(&self) -> &Arc<SummaryTriggerEngine> {
        &self.engine
    }

    pub fn worker(&self) -> Option<&WorkerHandle> {
        self.worker.as_ref()
    }

    /// Append a conversation turn.
    pub async fn record_message(&self, app_id: AppId, role: Role, text: &str) -> Result<Message> {
        self.messages.append(app_id, role, text).await
    }

    /// Schedule a summary pass for `ctx` and return immediately.
    ///
    /// Never fails. Without a background worker the pass is spawned as a
    /// detached task on the current runtime.
    pub fn trigger_summary_if_needed(&self, ctx: RequestContext) {
        match &self.worker {
            Some(worker) => {
                worker.submit(ctx);
            }
            None => {
                let engine = self.engine.clone();
                tokio::spawn(async move { engine.trigger_summary_if_needed(&ctx).await });
            }
        }
    }

    /// Run a summary pass inline and report what it did.
    pub async fn run_summary_pass(&self, ctx: &RequestContext) -> Result<PassReport> {
        self.engine.run_pass(ctx).await
    }

    /// Context to inject ahead of the next model call.
    pub async fn assemble_context(&self, app_id: AppId) -> Result<AssembledContext> {
        self.assembler.assemble_context(app_id).await
    }

    pub async fn get_compression_stats(&self, app_id: AppId) -> Result<CompressionStats> {
        self.reporter.stats(app_id).await
    }

    /// Stop the background worker and wait for queued passes to finish.
    pub async fn shutdown(mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
        if let Some(task) = self.worker_task.take()
            && let Err(e) = task.await
        {
            tracing::error!(error = %e, "summary worker task failed");
        }
    }
}

/// Builder for [`SmartMemory`]
pub struct SmartMemoryBuilder {
    config: Option<StrataConfig>,
    memory_config: Option<MemoryConfig>,
    messages: Option<Arc<dyn MessageStore>>,
    summaries: Option<Arc<dyn SummaryStore>>,
    summarizer: Option<Arc<dyn SummarizationOracle>>,
    llm_provider: Option<Arc<dyn LLMProvider>>,
    embeddings: Option<Arc<dyn EmbeddingOracle>>,
    tokens: Option<TokenEstimator>,
    background: bool,
}

impl Default for SmartMemoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SmartMemoryBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            memory_config: None,
            messages: None,
            summaries: None,
            summarizer: None,
            llm_provider: None,
            embeddings: None,
            tokens: None,
            background: true,
        }
    }

    /// Full configuration; providers and the SQLite store are created from
    /// it unless set explicitly.
    pub fn config(mut self, config: StrataConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Memory tuning; takes precedence over `config.memory`.
    pub fn with_memory_config(mut self, config: MemoryConfig) -> Self {
        self.memory_config = Some(config);
        self
    }

    /// Use one value as both message and summary store.
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: MessageStore + SummaryStore + 'static,
    {
        self.messages = Some(store.clone());
        self.summaries = Some(store);
        self
    }

    pub fn message_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.messages = Some(store);
        self
    }

    pub fn summary_store(mut self, store: Arc<dyn SummaryStore>) -> Self {
        self.summaries = Some(store);
        self
    }

    pub fn summarizer(mut self, oracle: Arc<dyn SummarizationOracle>) -> Self {
        self.summarizer = Some(oracle);
        self
    }

    /// LLM used to build an [`LlmSummarizer`] when no summarizer is set.
    pub fn llm_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.llm_provider = Some(provider);
        self
    }

    pub fn embedding_oracle(mut self, oracle: Arc<dyn EmbeddingOracle>) -> Self {
        self.embeddings = Some(oracle);
        self
    }

    pub fn token_estimator(mut self, tokens: TokenEstimator) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Run triggered passes on a background worker (default) or as
    /// detached tasks.
    pub fn background_worker(mut self, enabled: bool) -> Self {
        self.background = enabled;
        self
    }

    /// Build and, if enabled, start the background worker.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn build(self) -> Result<SmartMemory> {
        let config = self.config.unwrap_or_default();
        let memory_config = self.memory_config.unwrap_or_else(|| config.memory.clone());
        memory_config.validate()?;

        let (messages, summaries) = match (self.messages, self.summaries) {
            (Some(messages), Some(summaries)) => (messages, summaries),
            (messages, summaries) => {
                let (default_messages, default_summaries) = default_stores(&config)?;
                (
                    messages.unwrap_or(default_messages),
                    summaries.unwrap_or(default_summaries),
                )
            }
        };

        let summarizer = match self.summarizer {
            Some(oracle) => oracle,
            None => {
                let provider = match self.llm_provider {
                    Some(provider) => Some(provider),
                    None => LLMProviderFactory::from_config(config.llm.as_ref())?,
                };
                match provider {
                    Some(provider) => Arc::new(LlmSummarizer::new(provider, &config.oracle))
                        as Arc<dyn SummarizationOracle>,
                    None => {
                        tracing::warn!("no LLM configured, using extractive summarizer");
                        Arc::new(ExtractiveSummarizer::new())
                    }
                }
            }
        };

        let embeddings = match self.embeddings {
            Some(oracle) => oracle,
            None => EmbeddingProviderFactory::from_config(config.embeddings.as_ref())?,
        };

        let tokens = self.tokens.unwrap_or_default();

        let engine = Arc::new(SummaryTriggerEngine::new(
            messages.clone(),
            summaries.clone(),
            summarizer,
            embeddings,
            tokens.clone(),
            memory_config.clone(),
        ));
        let assembler = ContextAssembler::new(
            messages.clone(),
            summaries.clone(),
            tokens,
            memory_config.clone(),
        );
        let reporter = CompressionStatsReporter::new(messages.clone(), summaries);

        let (worker, worker_task) = if self.background {
            let (handle, task) = SummaryWorker::spawn(engine.clone(), &memory_config);
            (Some(handle), Some(task))
        } else {
            (None, None)
        };

        Ok(SmartMemory {
            messages,
            engine,
            assembler,
            reporter,
            worker,
            worker_task,
        })
    }
}

#[cfg(feature = "sqlite")]
fn default_stores(config: &StrataConfig) -> Result<(Arc<dyn MessageStore>, Arc<dyn SummaryStore>)> {
    let store = Arc::new(crate::store::SqliteStore::open(&config.storage.sqlite_path)?);
    Ok((store.clone(), store))
}

#[cfg(not(feature = "sqlite"))]
fn default_stores(
    _config: &StrataConfig,
) -> Result<(Arc<dyn MessageStore>, Arc<dyn SummaryStore>)> {
    let store = Arc::new(InMemoryStore::new());
    Ok((store.clone(), store))
}

/// In-memory deployment with offline oracles, for tests and demos.
pub async fn in_memory(config: MemoryConfig) -> Result<SmartMemory> {
    SmartMemory::builder()
        .with_memory_config(config)
        .store(Arc::new(InMemoryStore::new()))
        .summarizer(Arc::new(ExtractiveSummarizer::new()))
        .embedding_oracle(Arc::new(crate::embeddings::HashedEmbeddings::default()))
        .build()
        .await
}
