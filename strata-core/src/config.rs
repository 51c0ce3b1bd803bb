//! Configuration types for Strata

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::classifier::TopicComplexity;
use crate::error::{Result, StrataError};
use crate::tokens::token_budget;

/// Main configuration for Strata
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StrataConfig {
    /// Compression and assembly tuning
    pub memory: MemoryConfig,

    /// Timeouts and retries around oracle calls
    pub oracle: OracleConfig,

    /// Durable store settings
    pub storage: StorageConfig,

    /// LLM provider used for summarization (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<LLMProviderConfig>,

    /// Embeddings provider used for merge deduplication (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<EmbeddingsConfig>,
}

/// Tuning for the hierarchical memory engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// When false, context assembly returns raw recent messages and no
    /// summaries are produced
    pub enabled: bool,

    /// Backlog size that triggers a SHORT summary for plain conversation
    pub low_threshold: usize,

    /// Backlog size that triggers a SHORT summary for debugging topics
    pub medium_threshold: usize,

    /// Backlog size that triggers a SHORT summary for code-heavy topics
    pub high_threshold: usize,

    /// Raw messages kept after the summary block
    pub recent_message_count: usize,

    /// Unmerged SHORT summaries needed before a MID merge
    pub mid_merge_count: usize,

    /// Unmerged MID summaries needed before a LONG merge
    pub long_merge_count: usize,

    /// Cosine similarity above which a merge candidate is a duplicate
    pub similarity_threshold: f32,

    /// Model context window in tokens
    pub context_window_size: usize,

    /// Share of the context window the assembled context may use
    pub max_context_ratio: f64,

    /// Raw messages returned when the engine is disabled
    pub fallback_message_count: usize,

    /// Summary passes allowed to run at once in the background worker
    pub worker_concurrency: usize,

    /// Pending passes the background queue holds before dropping new ones
    pub queue_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            low_threshold: 40,
            medium_threshold: 30,
            high_threshold: 20,
            recent_message_count: 10,
            mid_merge_count: 3,
            long_merge_count: 3,
            similarity_threshold: 0.85,
            context_window_size: 128_000,
            max_context_ratio: 0.7,
            fallback_message_count: 20,
            worker_concurrency: 4,
            queue_capacity: 256,
        }
    }
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backlog size that triggers summarization for a complexity class.
    pub fn threshold(&self, complexity: TopicComplexity) -> usize {
        match complexity {
            TopicComplexity::High => self.high_threshold,
            TopicComplexity::Medium => self.medium_threshold,
            TopicComplexity::Low => self.low_threshold,
        }
    }

    /// Largest assembled context in tokens.
    pub fn token_budget(&self) -> usize {
        token_budget(self.context_window_size, self.max_context_ratio)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set thresholds for (high, medium, low) complexity.
    pub fn with_thresholds(mut self, high: usize, medium: usize, low: usize) -> Self {
        self.high_threshold = high.max(1);
        self.medium_threshold = medium.max(1);
        self.low_threshold = low.max(1);
        self
    }

    pub fn with_recent_message_count(mut self, count: usize) -> Self {
        self.recent_message_count = count;
        self
    }

    pub fn with_merge_counts(mut self, mid: usize, long: usize) -> Self {
        self.mid_merge_count = mid.max(2);
        self.long_merge_count = long.max(2);
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_context_window(mut self, size: usize, ratio: f64) -> Self {
        self.context_window_size = size;
        self.max_context_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_fallback_message_count(mut self, count: usize) -> Self {
        self.fallback_message_count = count;
        self
    }

    pub fn with_worker(mut self, concurrency: usize, queue_capacity: usize) -> Self {
        self.worker_concurrency = concurrency.max(1);
        self.queue_capacity = queue_capacity.max(1);
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if thresholds are out of order or any bound is
    /// outside its range.
    pub fn validate(&self) -> Result<()> {
        if self.high_threshold == 0 {
            return Err(invalid("high_threshold must be at least 1"));
        }
        if !(self.high_threshold < self.medium_threshold
            && self.medium_threshold < self.low_threshold)
        {
            return Err(invalid(format!(
                "thresholds must satisfy high < medium < low, got {}/{}/{}",
                self.high_threshold, self.medium_threshold, self.low_threshold
            )));
        }
        if self.mid_merge_count < 2 || self.long_merge_count < 2 {
            return Err(invalid("merge counts must be at least 2"));
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(invalid(format!(
                "similarity_threshold must be in (0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.context_window_size == 0 {
            return Err(invalid("context_window_size must be positive"));
        }
        if !(self.max_context_ratio > 0.0 && self.max_context_ratio <= 1.0) {
            return Err(invalid(format!(
                "max_context_ratio must be in (0, 1], got {}",
                self.max_context_ratio
            )));
        }
        if self.worker_concurrency == 0 || self.queue_capacity == 0 {
            return Err(invalid("worker_concurrency and queue_capacity must be positive"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> StrataError {
    StrataError::Configuration(message.into())
}

/// Timeout and retry policy for summarization calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Per-attempt timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Attempts before the call is reported as failed
    pub max_attempts: usize,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Cap on the backoff delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Durable store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    pub sqlite_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("./data/strata.db"),
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMProviderConfig {
    /// Provider type
    pub provider: LLMProvider,

    /// Model name
    pub model: String,

    /// API key (if needed, prefer env vars)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL (for custom endpoints, e.g., Ollama)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// LLM provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LLMProvider {
    OpenAI,
    Ollama,
}

/// Embeddings configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// Provider type
    pub provider: EmbeddingProvider,

    /// Model name (ignored by the hashed provider)
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Vector size for the hashed provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
}

fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}

/// Embedding provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// fastembed model running in-process
    Local,
    /// Feature-hashed bag of words, no model download
    Hashed,
}

impl StrataConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `strata.toml` in the working directory
    /// 3. The file named by `STRATA_CONFIG_PATH`
    /// 4. `STRATA_` environment variables, nested with `__`
    ///    (e.g. `STRATA_MEMORY__LOW_THRESHOLD=50`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid or the result
    /// fails validation.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Toml},
        };

        let mut figment = Figment::new().merge(Toml::file("strata.toml"));

        if let Ok(path) = std::env::var("STRATA_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: StrataConfig = figment
            .merge(Env::prefixed("STRATA_").ignore(&["config_path"]).split("__"))
            .extract()
            .map_err(|e| invalid(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Toml},
        };

        let config: StrataConfig = Figment::new()
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| invalid(format!("Failed to load configuration file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.memory.validate()?;
        if self.oracle.max_attempts == 0 {
            return Err(invalid("oracle.max_attempts must be at least 1"));
        }
        if self.oracle.timeout.is_zero() {
            return Err(invalid("oracle.timeout must be positive"));
        }
        if let Some(embeddings) = &self.embeddings {
            if embeddings.dimension == Some(0) {
                return Err(invalid("embeddings.dimension must be positive"));
            }
        }
        Ok(())
    }
}
