//! System prompts for each summary tier.

use crate::model::SummaryTier;

pub const SHORT_PROMPT: &str = "\
You compress a slice of a conversation between a user and an assistant into \
a factual record that will replace the original messages.

Keep verbatim: code snippets, file paths, identifiers, configuration values, \
commands, version numbers and error messages or stack trace heads.
Record what was asked, what was done, and what is still open.
Drop greetings, filler and repeated explanations.

Answer with a concise bullet list and nothing else.";

pub const MID_PROMPT: &str = "\
You merge several conversation summaries, separated by '---', into a record \
of technical decisions.

For every decision keep what was chosen, why it was chosen, and which \
alternatives were rejected. Group decisions by module or area. When two \
summaries disagree, keep the later one. Keep identifiers and configuration \
values that the decisions depend on; drop step-by-step narration.

Answer with short grouped bullet lists and nothing else.";

pub const LONG_PROMPT: &str = "\
You merge several technical-decision records, separated by '---', into \
project-level knowledge that must stay valid for the rest of the project.

Keep: the project's goals, its architecture and how it has evolved, hard \
constraints (platforms, dependencies, conventions) and standing user \
preferences. Drop individual bug fixes and details that later decisions \
superseded.

Answer with three sections titled Goals, Architecture and Constraints.";

/// System prompt for the oracle operation producing `tier`.
pub fn system_prompt(tier: SummaryTier) -> &'static str {
    match tier {
        SummaryTier::Short => SHORT_PROMPT,
        SummaryTier::Mid => MID_PROMPT,
        SummaryTier::Long => LONG_PROMPT,
    }
}
