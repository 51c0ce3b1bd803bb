//! In-memory store for tests and single-process deployments

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use super::{MessageStore, SummaryStore};
use crate::error::{Result, StrataError};
use crate::model::{AppId, Message, MessageId, NewSummary, Role, Summary, SummaryId, SummaryTier};

/// Both stores backed by ordered maps.
pub struct InMemoryStore {
    messages: RwLock<BTreeMap<MessageId, Message>>,
    summaries: RwLock<BTreeMap<SummaryId, Summary>>,
    next_message_id: AtomicI64,
    next_summary_id: AtomicI64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(BTreeMap::new()),
            summaries: RwLock::new(BTreeMap::new()),
            next_message_id: AtomicI64::new(1),
            next_summary_id: AtomicI64::new(1),
        }
    }

    /// Number of summaries across all apps.
    pub fn summary_count(&self) -> usize {
        self.summaries.read().map(|s| s.len()).unwrap_or(0)
    }
}

fn poisoned<T>(_: T) -> StrataError {
    StrataError::Storage("in-memory store lock poisoned".to_string())
}

/// Latest by creation time, newest id breaking ties.
fn latest_of<'a>(rows: impl Iterator<Item = &'a Summary>) -> Option<&'a Summary> {
    rows.max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn append(&self, app_id: AppId, role: Role, text: &str) -> Result<Message> {
        let mut messages = self.messages.write().map_err(poisoned)?;
        let message = Message {
            id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
            app_id,
            role,
            text: text.to_string(),
            created_at: Utc::now(),
        };
        messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn recent(&self, app_id: AppId, limit: usize) -> Result<Vec<Message>> {
        let messages = self.messages.read().map_err(poisoned)?;
        let mut recent: Vec<Message> = messages
            .values()
            .rev()
            .filter(|m| m.app_id == app_id)
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn after(&self, app_id: AppId, after: Option<MessageId>) -> Result<Vec<Message>> {
        let messages = self.messages.read().map_err(poisoned)?;
        let floor = after.unwrap_or(MessageId::MIN);
        Ok(messages
            .values()
            .filter(|m| m.app_id == app_id && m.id > floor)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SummaryStore for InMemoryStore {
    async fn latest(&self, app_id: AppId, tier: SummaryTier) -> Result<Option<Summary>> {
        let summaries = self.summaries.read().map_err(poisoned)?;
        Ok(latest_of(
            summaries
                .values()
                .filter(|s| s.app_id == app_id && s.tier == tier),
        )
        .cloned())
    }

    async fn unmerged(
        &self,
        app_id: AppId,
        tier: SummaryTier,
        after: Option<SummaryId>,
    ) -> Result<Vec<Summary>> {
        let summaries = self.summaries.read().map_err(poisoned)?;
        let floor = after.unwrap_or(SummaryId::MIN);
        Ok(summaries
            .values()
            .filter(|s| s.app_id == app_id && s.tier == tier && s.id > floor)
            .cloned()
            .collect())
    }

    async fn get(&self, app_id: AppId, id: SummaryId) -> Result<Option<Summary>> {
        let summaries = self.summaries.read().map_err(poisoned)?;
        Ok(summaries.get(&id).filter(|s| s.app_id == app_id).cloned())
    }

    async fn save(&self, summary: NewSummary) -> Result<Summary> {
        summary.check_shape()?;

        let mut summaries = self.summaries.write().map_err(poisoned)?;

        let head = latest_of(
            summaries
                .values()
                .filter(|s| s.app_id == summary.app_id && s.tier == summary.tier),
        )
        .map(|s| s.id);
        if head != summary.expected_head {
            return Err(StrataError::HeadConflict {
                app_id: summary.app_id,
                tier: summary.tier,
                expected: summary.expected_head,
                found: head,
            });
        }

        // Parent lookup ignores app so a cross-app link is reported as such.
        let parent = summary
            .parent_summary_id
            .and_then(|id| summaries.get(&id));
        summary.check_parent(parent)?;

        let id = self.next_summary_id.fetch_add(1, Ordering::SeqCst);
        let saved = summary.into_summary(id, Utc::now());
        summaries.insert(id, saved.clone());
        Ok(saved)
    }

    async fn update(&self, summary: &Summary) -> Result<Summary> {
        let mut summaries = self.summaries.write().map_err(poisoned)?;
        let stored = summaries
            .get_mut(&summary.id)
            .filter(|s| s.app_id == summary.app_id)
            .ok_or_else(|| {
                StrataError::DataInconsistency(format!(
                    "summary {} of app {} does not exist",
                    summary.id, summary.app_id
                ))
            })?;

        if stored.version != summary.version {
            return Err(StrataError::VersionConflict {
                summary_id: summary.id,
                expected: summary.version,
                found: stored.version,
            });
        }

        stored.embedding = summary.embedding.clone();
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn all(&self, app_id: AppId) -> Result<Vec<Summary>> {
        let summaries = self.summaries.read().map_err(poisoned)?;
        Ok(summaries
            .values()
            .filter(|s| s.app_id == app_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short(app_id: AppId, from: MessageId, to: MessageId, head: Option<SummaryId>) -> NewSummary {
        NewSummary {
            app_id,
            tier: SummaryTier::Short,
            text: format!("messages {from}..{to}"),
            covered_from: from,
            covered_to: to,
            covered_count: (to - from + 1) as u32,
            original_tokens: 100,
            summary_tokens: 10,
            topic_complexity: None,
            parent_summary_id: None,
            embedding: None,
            owner_user_id: 1,
            expected_head: head,
        }
    }

    #[tokio::test]
    async fn test_messages_are_per_app_and_ordered() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store.append(1, Role::User, &format!("a{i}")).await.unwrap();
            store.append(2, Role::Assistant, &format!("b{i}")).await.unwrap();
        }

        let recent = store.recent(1, 3).await.unwrap();
        let texts: Vec<_> = recent.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["a2", "a3", "a4"]);

        let after = store.after(1, Some(recent[0].id)).await.unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(store.count_after(2, None).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_save_checks_head() {
        let store = InMemoryStore::new();
        let first = store.save(short(1, 1, 10, None)).await.unwrap();
        assert_eq!(first.version, 1);

        let err = store.save(short(1, 11, 20, None)).await.unwrap_err();
        assert!(matches!(err, StrataError::HeadConflict { found: Some(id), .. } if id == first.id));

        let second = store.save(short(1, 11, 20, Some(first.id))).await.unwrap();
        assert_eq!(store.latest(1, SummaryTier::Short).await.unwrap().unwrap().id, second.id);

        // Heads are per app.
        assert!(store.save(short(2, 1, 4, None)).await.is_ok());
    }

    #[tokio::test]
    async fn test_save_rejects_foreign_parent() {
        let store = InMemoryStore::new();
        let other_app = store.save(short(2, 1, 10, None)).await.unwrap();

        let mut mid = short(1, 1, 10, None);
        mid.tier = SummaryTier::Mid;
        mid.parent_summary_id = Some(other_app.id);

        let err = store.save(mid).await.unwrap_err();
        assert!(err.is_data_inconsistency());
        assert_eq!(store.summary_count(), 1);
    }

    #[tokio::test]
    async fn test_update_is_compare_and_swap() {
        let store = InMemoryStore::new();
        let saved = store.save(short(1, 1, 10, None)).await.unwrap();

        let mut with_vector = saved.clone();
        with_vector.embedding = Some(vec![0.1, 0.2]);
        let updated = store.update(&with_vector).await.unwrap();
        assert_eq!(updated.version, 2);

        // A writer still holding version 1 loses.
        let err = store.update(&with_vector).await.unwrap_err();
        assert!(matches!(err, StrataError::VersionConflict { expected: 1, found: 2, .. }));
    }

    #[tokio::test]
    async fn test_unmerged_window() {
        let store = InMemoryStore::new();
        let mut head = None;
        let mut ids = Vec::new();
        for i in 0..4 {
            let s = store.save(short(1, i * 10 + 1, i * 10 + 10, head)).await.unwrap();
            head = Some(s.id);
            ids.push(s.id);
        }

        let all = store.unmerged(1, SummaryTier::Short, None).await.unwrap();
        assert_eq!(all.len(), 4);
        let tail = store.unmerged(1, SummaryTier::Short, Some(ids[1])).await.unwrap();
        assert_eq!(tail.iter().map(|s| s.id).collect::<Vec<_>>(), ids[2..]);
    }
}
