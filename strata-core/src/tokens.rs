//! Token counting with the cl100k_base BPE.
//!
//! Counts are a pure function of the text. When the BPE tables cannot be
//! loaded the estimator falls back to a ~4 bytes per token heuristic, which
//! is still deterministic.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

const CACHE_CAPACITY: usize = 10_000;

/// Deterministic text → token count function.
#[derive(Clone)]
pub struct TokenEstimator {
    bpe: Option<Arc<CoreBPE>>,
    /// Keyed by the full text so distinct texts never share a count.
    cache: Arc<RwLock<HashMap<Box<str>, usize>>>,
}

impl std::fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEstimator")
            .field("bpe", &self.bpe.is_some())
            .field("cached", &self.cache.read().len())
            .finish()
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator {
    /// Load cl100k_base, falling back to the byte heuristic on failure.
    pub fn new() -> Self {
        let bpe = match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(Arc::new(bpe)),
            Err(e) => {
                tracing::warn!(error = %e, "cl100k_base unavailable, using byte-length estimate");
                None
            }
        };
        Self {
            bpe,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Estimator that never loads the BPE tables.
    pub fn heuristic() -> Self {
        Self {
            bpe: None,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Token count of one text. Empty text is zero tokens.
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let Some(bpe) = &self.bpe else {
            return estimate_tokens_quick(text);
        };

        if let Some(count) = self.cache.read().get(text) {
            return *count;
        }

        let count = bpe.encode_with_special_tokens(text).len();

        let mut cache = self.cache.write();
        if cache.len() >= CACHE_CAPACITY {
            let evict: Vec<_> = cache.keys().take(CACHE_CAPACITY / 2).cloned().collect();
            for k in evict {
                cache.remove(&k);
            }
        }
        cache.insert(text.into(), count);
        count
    }

    /// Sum of the per-text counts.
    pub fn count_all<S: AsRef<str>>(&self, texts: &[S]) -> usize {
        texts.iter().map(|t| self.count(t.as_ref())).sum()
    }

    /// Whether `tokens` is strictly over `window * ratio`.
    pub fn exceeds(tokens: usize, window: usize, ratio: f64) -> bool {
        tokens > token_budget(window, ratio)
    }

    /// `1 - summary / original`, or 0 when nothing was compressed.
    pub fn compression_ratio(original: usize, summary: usize) -> f64 {
        if original == 0 {
            return 0.0;
        }
        1.0 - summary as f64 / original as f64
    }
}

/// Largest token count that fits in `window * ratio`.
pub fn token_budget(window: usize, ratio: f64) -> usize {
    (window as f64 * ratio).floor().max(0.0) as usize
}

/// Rough estimate: ~4 bytes per token.
pub fn estimate_tokens_quick(text: &str) -> usize {
    text.len().div_ceil(4)
}
