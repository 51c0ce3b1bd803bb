//! Core records: conversation messages, tiered summaries and the request context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::TopicComplexity;
use crate::error::{Result, StrataError};

pub type AppId = i64;
pub type UserId = i64;
pub type MessageId = i64;
pub type SummaryId = i64;

/// Identifies whose conversation a call operates on.
///
/// Passed explicitly through every engine call; nothing in the crate reads
/// identity from ambient or thread-local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub app_id: AppId,
    pub user_id: UserId,
}

impl RequestContext {
    pub fn new(app_id: AppId, user_id: UserId) -> Self {
        Self { app_id, user_id }
    }
}

/// Author of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Speaker tag used when a transcript is rendered for summarization.
    pub fn speaker(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" | "ai" => Ok(Self::Assistant),
            other => Err(StrataError::Other(format!("unknown role: {other}"))),
        }
    }
}

/// One conversation turn. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub app_id: AppId,
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Compression tier of a summary, from most to least detailed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SummaryTier {
    /// Facts and code from a block of raw messages
    Short,
    /// Technical decisions merged from SHORT summaries
    Mid,
    /// Project-level goals merged from MID summaries
    Long,
}

impl SummaryTier {
    pub const ALL: [SummaryTier; 3] = [Self::Short, Self::Mid, Self::Long];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "SHORT",
            Self::Mid => "MID",
            Self::Long => "LONG",
        }
    }

    /// The tier whose summaries are folded into this one.
    pub fn source(&self) -> Option<SummaryTier> {
        match self {
            Self::Short => None,
            Self::Mid => Some(Self::Short),
            Self::Long => Some(Self::Mid),
        }
    }

    /// The tier this one is merged into.
    pub fn target(&self) -> Option<SummaryTier> {
        match self {
            Self::Short => Some(Self::Mid),
            Self::Mid => Some(Self::Long),
            Self::Long => None,
        }
    }

    /// Section heading used in the assembled context block.
    pub fn context_label(&self) -> &'static str {
        match self {
            Self::Long => "[Project knowledge]",
            Self::Mid => "[Technical decisions]",
            Self::Short => "[Recent conversation]",
        }
    }
}

impl std::fmt::Display for SummaryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SummaryTier {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SHORT" => Ok(Self::Short),
            "MID" => Ok(Self::Mid),
            "LONG" => Ok(Self::Long),
            other => Err(StrataError::DataInconsistency(format!(
                "unknown summary tier: {other}"
            ))),
        }
    }
}

/// A persisted summary at one tier.
///
/// Everything except `embedding` is fixed at creation; `version` counts
/// persisted mutations of that metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub id: SummaryId,
    pub app_id: AppId,
    pub tier: SummaryTier,
    pub text: String,
    /// First message id transitively covered
    pub covered_from: MessageId,
    /// Last message id transitively covered
    pub covered_to: MessageId,
    /// Number of units folded in (summed through merges)
    pub covered_count: u32,
    pub original_tokens: usize,
    pub summary_tokens: usize,
    /// Only set on SHORT summaries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_complexity: Option<TopicComplexity>,
    /// First lower-tier summary folded into this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_summary_id: Option<SummaryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub version: u32,
    pub owner_user_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// A summary about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSummary {
    pub app_id: AppId,
    pub tier: SummaryTier,
    pub text: String,
    pub covered_from: MessageId,
    pub covered_to: MessageId,
    pub covered_count: u32,
    pub original_tokens: usize,
    pub summary_tokens: usize,
    pub topic_complexity: Option<TopicComplexity>,
    pub parent_summary_id: Option<SummaryId>,
    pub embedding: Option<Vec<f32>>,
    pub owner_user_id: UserId,
    /// Latest id of this (app, tier) the writer saw; the insert fails if
    /// the tier has moved on since.
    pub expected_head: Option<SummaryId>,
}

impl NewSummary {
    /// Checks the invariants that do not need the store.
    pub fn check_shape(&self) -> Result<()> {
        if self.covered_from > self.covered_to {
            return Err(StrataError::DataInconsistency(format!(
                "{} summary for app {} covers {}..{} (from > to)",
                self.tier, self.app_id, self.covered_from, self.covered_to
            )));
        }
        if self.covered_count == 0 {
            return Err(StrataError::DataInconsistency(format!(
                "{} summary for app {} covers no units",
                self.tier, self.app_id
            )));
        }
        match (self.tier, self.parent_summary_id) {
            (SummaryTier::Short, Some(parent)) => Err(StrataError::DataInconsistency(format!(
                "SHORT summary for app {} names parent {parent}",
                self.app_id
            ))),
            (SummaryTier::Mid | SummaryTier::Long, None) => {
                Err(StrataError::DataInconsistency(format!(
                    "{} summary for app {} has no parent",
                    self.tier, self.app_id
                )))
            }
            _ => Ok(()),
        }
    }

    /// Checks the provenance link against the summary it points at.
    pub fn check_parent(&self, parent: Option<&Summary>) -> Result<()> {
        let Some(parent_id) = self.parent_summary_id else {
            return Ok(());
        };
        let parent = parent.ok_or_else(|| {
            StrataError::DataInconsistency(format!(
                "parent summary {parent_id} of new {} summary does not exist",
                self.tier
            ))
        })?;
        if parent.app_id != self.app_id {
            return Err(StrataError::DataInconsistency(format!(
                "parent summary {parent_id} belongs to app {}, not {}",
                parent.app_id, self.app_id
            )));
        }
        if Some(parent.tier) != self.tier.source() {
            return Err(StrataError::DataInconsistency(format!(
                "parent summary {parent_id} is {}, expected {:?}",
                parent.tier,
                self.tier.source()
            )));
        }
        Ok(())
    }

    /// Materializes the row a store persists.
    pub fn into_summary(self, id: SummaryId, created_at: DateTime<Utc>) -> Summary {
        Summary {
            id,
            app_id: self.app_id,
            tier: self.tier,
            text: self.text,
            covered_from: self.covered_from,
            covered_to: self.covered_to,
            covered_count: self.covered_count,
            original_tokens: self.original_tokens,
            summary_tokens: self.summary_tokens,
            topic_complexity: self.topic_complexity,
            parent_summary_id: self.parent_summary_id,
            embedding: self.embedding,
            version: 1,
            owner_user_id: self.owner_user_id,
            created_at,
        }
    }
}
