//! Error types for Strata operations

use crate::model::{AppId, SummaryId, SummaryTier};

/// Result type for Strata operations
pub type Result<T> = std::result::Result<T, StrataError>;

/// Which external oracle failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleKind {
    Summarization,
    Embedding,
}

impl std::fmt::Display for OracleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Summarization => write!(f, "summarization"),
            Self::Embedding => write!(f, "embedding"),
        }
    }
}

/// Error types for the memory subsystem
#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    /// A summarization or embedding call failed or timed out
    #[error("{oracle} oracle failed: {message}")]
    Oracle { oracle: OracleKind, message: String },

    /// Stale version on a summary update
    #[error("Version conflict on summary {summary_id}: expected v{expected}, found v{found}")]
    VersionConflict {
        summary_id: SummaryId,
        expected: u32,
        found: u32,
    },

    /// Another writer appended to the tier since it was read
    #[error("Tier head moved for app {app_id} {tier}: expected {expected:?}, found {found:?}")]
    HeadConflict {
        app_id: AppId,
        tier: SummaryTier,
        expected: Option<SummaryId>,
        found: Option<SummaryId>,
    },

    /// Provenance or coverage that cannot be right under correct sequencing
    #[error("Data inconsistency: {0}")]
    DataInconsistency(String),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl StrataError {
    pub fn summarization(message: impl Into<String>) -> Self {
        Self::Oracle {
            oracle: OracleKind::Summarization,
            message: message.into(),
        }
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Oracle {
            oracle: OracleKind::Embedding,
            message: message.into(),
        }
    }

    /// Lost an optimistic-concurrency race. Safe to retry from fresh state.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. } | Self::HeadConflict { .. })
    }

    pub fn is_oracle_failure(&self) -> bool {
        matches!(self, Self::Oracle { .. })
    }

    pub fn is_data_inconsistency(&self) -> bool {
        matches!(self, Self::DataInconsistency(_))
    }
}

impl From<String> for StrataError {
    fn from(s: String) -> Self {
        StrataError::Other(s)
    }
}

impl From<&str> for StrataError {
    fn from(s: &str) -> Self {
        StrataError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for StrataError {
    fn from(err: anyhow::Error) -> Self {
        StrataError::Other(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StrataError {
    fn from(err: rusqlite::Error) -> Self {
        StrataError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_classification() {
        let version = StrataError::VersionConflict {
            summary_id: 7,
            expected: 1,
            found: 2,
        };
        let head = StrataError::HeadConflict {
            app_id: 1,
            tier: SummaryTier::Mid,
            expected: None,
            found: Some(3),
        };
        assert!(version.is_conflict());
        assert!(head.is_conflict());
        assert!(!StrataError::summarization("timeout").is_conflict());
    }

    #[test]
    fn test_oracle_display() {
        let err = StrataError::embedding("model not loaded");
        assert!(err.is_oracle_failure());
        assert_eq!(err.to_string(), "embedding oracle failed: model not loaded");
    }
}
