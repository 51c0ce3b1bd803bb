//! Heuristic topic complexity of a message backlog.
//!
//! Complex topics (code, long technical messages) get summarized after fewer
//! messages so detail is captured before it scrolls out of the window.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::Message;

/// Messages longer than this (in characters) count as HIGH complexity.
pub const LONG_MESSAGE_CHARS: usize = 500;

const CODE_FENCE: &str = "```";

static ERROR_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)错误|异常|报错|bug|fix|error|exception|failed|failure")
        .expect("error keyword pattern is valid")
});

/// Topic complexity of a backlog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TopicComplexity {
    /// Plain conversation
    Low,
    /// Debugging or error discussion
    Medium,
    /// Code blocks or long technical messages
    High,
}

impl TopicComplexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl std::fmt::Display for TopicComplexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TopicComplexity {
    type Err = crate::error::StrataError;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            other => Err(crate::error::StrataError::DataInconsistency(format!(
                "unknown topic complexity: {other}"
            ))),
        }
    }
}

/// Classifies a chronological batch of messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplexityClassifier;

impl ComplexityClassifier {
    pub fn new() -> Self {
        Self
    }

    /// A code fence anywhere in the batch decides HIGH. Otherwise the batch
    /// is scanned in order and the first message that is over-long (HIGH) or
    /// carries an error keyword (MEDIUM) decides; later messages are not
    /// inspected, so an early keyword hides a later long message.
    ///
    /// Precedence: a fence in a later message outranks an earlier keyword;
    /// a later over-long message does not.
    pub fn classify(&self, messages: &[Message]) -> TopicComplexity {
        if let Some(message) = messages.iter().find(|m| m.text.contains(CODE_FENCE)) {
            tracing::debug!(message_id = message.id, "complexity HIGH: code block");
            return TopicComplexity::High;
        }
        for message in messages {
            if let Some(complexity) = Self::classify_text(&message.text) {
                tracing::debug!(
                    message_id = message.id,
                    complexity = %complexity,
                    "complexity decided"
                );
                return complexity;
            }
        }
        TopicComplexity::Low
    }

    fn classify_text(text: &str) -> Option<TopicComplexity> {
        if text.chars().count() > LONG_MESSAGE_CHARS {
            return Some(TopicComplexity::High);
        }
        if ERROR_KEYWORDS.is_match(text) {
            return Some(TopicComplexity::Medium);
        }
        None
    }
}
