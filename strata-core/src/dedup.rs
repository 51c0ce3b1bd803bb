//! Embedding-similarity filter applied to merge candidates.
//!
//! Greedy and order-dependent: candidates are visited in the order given,
//! the first is always kept, and each later one is dropped when it is too
//! similar to any candidate already kept. Reordering the input can change
//! which summaries survive.

use std::sync::Arc;

use crate::embeddings::{EmbeddingOracle, cosine_similarity};
use crate::error::Result;
use crate::model::{Summary, SummaryId};
use crate::store::SummaryStore;

/// A candidate removed as a near-duplicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Duplicate {
    pub dropped: SummaryId,
    pub duplicate_of: SummaryId,
    pub similarity: f32,
}

#[derive(Debug, Clone)]
pub struct DedupOutcome {
    /// Survivors in input order
    pub kept: Vec<Summary>,
    pub duplicates: Vec<Duplicate>,
}

/// Indices of the vectors that survive greedy filtering, plus the drops as
/// `(dropped index, kept index, similarity)`.
pub fn greedy_filter(vectors: &[&[f32]], threshold: f32) -> (Vec<usize>, Vec<(usize, usize, f32)>) {
    let mut kept: Vec<usize> = Vec::with_capacity(vectors.len());
    let mut dropped = Vec::new();

    for (i, vector) in vectors.iter().enumerate() {
        let hit = kept.iter().find_map(|&k| {
            let similarity = cosine_similarity(vector, vectors[k]);
            (similarity > threshold).then_some((k, similarity))
        });
        match hit {
            Some((k, similarity)) => dropped.push((i, k, similarity)),
            None => kept.push(i),
        }
    }
    (kept, dropped)
}

pub struct Deduplicator {
    embeddings: Arc<dyn EmbeddingOracle>,
    summaries: Arc<dyn SummaryStore>,
    threshold: f32,
}

impl Deduplicator {
    pub fn new(
        embeddings: Arc<dyn EmbeddingOracle>,
        summaries: Arc<dyn SummaryStore>,
        threshold: f32,
    ) -> Self {
        Self {
            embeddings,
            summaries,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Return the summary with an embedding, computing and persisting one
    /// if it has none.
    ///
    /// # Errors
    ///
    /// Fails on an embedding oracle error, or with `VersionConflict` if
    /// another writer updated the summary since it was loaded.
    pub async fn ensure_embedding(&self, summary: Summary) -> Result<Summary> {
        if summary.embedding.is_some() {
            return Ok(summary);
        }

        let vector = self.embeddings.embed(&summary.text).await?;
        let mut updated = summary;
        updated.embedding = Some(vector);
        let stored = self.summaries.update(&updated).await?;
        tracing::debug!(
            summary_id = stored.id,
            version = stored.version,
            "stored missing embedding"
        );
        Ok(stored)
    }

    /// Drop candidates whose similarity to an earlier kept candidate exceeds
    /// the threshold.
    pub async fn deduplicate(&self, candidates: Vec<Summary>) -> Result<DedupOutcome> {
        let mut embedded = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            embedded.push(self.ensure_embedding(candidate).await?);
        }

        let vectors: Vec<&[f32]> = embedded
            .iter()
            .map(|s| s.embedding.as_deref().unwrap_or_default())
            .collect();
        let (kept_idx, dropped_idx) = greedy_filter(&vectors, self.threshold);

        let duplicates: Vec<Duplicate> = dropped_idx
            .into_iter()
            .map(|(i, k, similarity)| {
                tracing::debug!(
                    dropped = embedded[i].id,
                    duplicate_of = embedded[k].id,
                    similarity,
                    "dropping near-duplicate summary"
                );
                Duplicate {
                    dropped: embedded[i].id,
                    duplicate_of: embedded[k].id,
                    similarity,
                }
            })
            .collect();

        let total = embedded.len();
        let kept: Vec<Summary> = embedded
            .into_iter()
            .enumerate()
            .filter(|(i, _)| kept_idx.contains(i))
            .map(|(_, s)| s)
            .collect();

        tracing::info!(
            candidates = total,
            kept = kept.len(),
            dropped = duplicates.len(),
            threshold = self.threshold,
            "deduplicated merge candidates"
        );

        Ok(DedupOutcome { kept, duplicates })
    }
}
