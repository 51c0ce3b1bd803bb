use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::SummarizationOracle;
use super::prompts::system_prompt;
use crate::config::OracleConfig;
use crate::error::{Result, StrataError};
use crate::llm::{LLMProvider, LLMRequest, RetryConfig, with_retry_if};
use crate::model::SummaryTier;

/// Summarization oracle backed by a chat-completion provider.
///
/// Each tier uses its own system prompt. Every attempt is bounded by
/// `timeout`, and failed attempts are retried with backoff before the call
/// is reported as an oracle failure.
///
/// # Example
///
/// ```rust,ignore
/// use strata_core::llm::providers::OllamaProvider;
/// use strata_core::summarize::LlmSummarizer;
///
/// let provider = Arc::new(OllamaProvider::from_env(Some("qwen3:14b")));
/// let summarizer = LlmSummarizer::new(provider, &OracleConfig::default());
/// let short = summarizer.summarize_short("User: ...\n\nAssistant: ...").await?;
/// ```
pub struct LlmSummarizer {
    llm: Arc<dyn LLMProvider>,
    retry: RetryConfig,
    timeout: Duration,
    temperature: f32,
    max_tokens: usize,
}

impl LlmSummarizer {
    pub fn new(llm: Arc<dyn LLMProvider>, config: &OracleConfig) -> Self {
        Self {
            llm,
            retry: RetryConfig::from(config),
            timeout: config.timeout,
            temperature: 0.2,
            max_tokens: 1024,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn complete(&self, tier: SummaryTier, text: &str) -> Result<String> {
        let request = LLMRequest::with_system_prompt(system_prompt(tier), text)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens);

        let started = Instant::now();
        // Configuration errors (e.g. a missing key) will not heal on retry.
        let response = with_retry_if(
            &self.retry,
            || async {
                let call = self.llm.generate_request(&request);
                match tokio::time::timeout(self.timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(StrataError::summarization(format!(
                        "{tier} summary timed out after {:?}",
                        self.timeout
                    ))),
                }
            },
            StrataError::is_oracle_failure,
        )
        .await?;

        let content = response.content.trim();
        if content.is_empty() {
            return Err(StrataError::summarization(format!(
                "{} returned an empty {tier} summary",
                self.llm.model_info().model_name
            )));
        }

        tracing::debug!(
            tier = %tier,
            model = %self.llm.model_info().model_name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            completion_tokens = response.usage.map(|u| u.completion_tokens),
            "summary generated"
        );
        Ok(content.to_string())
    }
}

#[async_trait]
impl SummarizationOracle for LlmSummarizer {
    async fn summarize_short(&self, conversation: &str) -> Result<String> {
        self.complete(SummaryTier::Short, conversation).await
    }

    async fn summarize_mid(&self, summaries: &str) -> Result<String> {
        self.complete(SummaryTier::Mid, summaries).await
    }

    async fn summarize_long(&self, summaries: &str) -> Result<String> {
        self.complete(SummaryTier::Long, summaries).await
    }
}
