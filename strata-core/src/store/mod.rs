//! Persistence interfaces for messages and summaries.
//!
//! Stores are the only shared mutable state. Concurrent summary passes
//! coordinate through two compare-and-swap rules enforced here:
//!
//! - [`SummaryStore::save`] only inserts if the (app, tier) head is still
//!   the one the writer saw ([`NewSummary::expected_head`]).
//! - [`SummaryStore::update`] only writes if the caller's `version` is
//!   current, and bumps it by one.
//!
//! A loser gets a conflict error and must reload before trying again.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{AppId, Message, MessageId, NewSummary, Role, Summary, SummaryId, SummaryTier};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Conversation log, one row per turn.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message; the store assigns a monotonically increasing id.
    async fn append(&self, app_id: AppId, role: Role, text: &str) -> Result<Message>;

    /// The `limit` most recent messages, oldest first.
    async fn recent(&self, app_id: AppId, limit: usize) -> Result<Vec<Message>>;

    /// Messages with id greater than `after` (all when `None`), oldest first.
    async fn after(&self, app_id: AppId, after: Option<MessageId>) -> Result<Vec<Message>>;

    /// Number of messages [`MessageStore::after`] would return.
    async fn count_after(&self, app_id: AppId, after: Option<MessageId>) -> Result<usize> {
        Ok(self.after(app_id, after).await?.len())
    }
}

/// Tiered summaries with optimistic concurrency.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Most recently created summary of a tier.
    async fn latest(&self, app_id: AppId, tier: SummaryTier) -> Result<Option<Summary>>;

    /// Summaries of `tier` with id greater than `after` (all when `None`),
    /// ascending by id.
    async fn unmerged(
        &self,
        app_id: AppId,
        tier: SummaryTier,
        after: Option<SummaryId>,
    ) -> Result<Vec<Summary>>;

    async fn get(&self, app_id: AppId, id: SummaryId) -> Result<Option<Summary>>;

    /// Insert a summary at version 1.
    ///
    /// Fails with `HeadConflict` if the tier head is not `expected_head`, and
    /// with `DataInconsistency` if coverage or provenance is invalid.
    async fn save(&self, summary: NewSummary) -> Result<Summary>;

    /// Persist new metadata (the embedding) for an existing summary.
    ///
    /// Succeeds only when `summary.version` is the stored version; returns
    /// the row at `version + 1`. Text, tier, coverage and provenance are
    /// never rewritten.
    async fn update(&self, summary: &Summary) -> Result<Summary>;

    /// Every summary of the app, ascending by id.
    async fn all(&self, app_id: AppId) -> Result<Vec<Summary>>;
}
