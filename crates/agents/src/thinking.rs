//! Thinking-level application for workers without a native thinking flag.

use clawdis_common::types::ThinkingLevel;

/// Cue token appended to the prompt when the worker has no `--thinking`
/// support. `Off` and `Minimal` add nothing.
#[must_use]
pub fn cue_token(level: ThinkingLevel) -> &'static str {
    match level {
        ThinkingLevel::Off | ThinkingLevel::Minimal => "",
        ThinkingLevel::Low => "think",
        ThinkingLevel::Medium => "think hard",
        ThinkingLevel::High => "think harder",
        ThinkingLevel::Max => "ultrathink",
    }
}

/// Append the cue token to a prompt body, when one applies.
#[must_use]
pub fn apply_cue(body: &str, level: ThinkingLevel) -> String {
    let cue = cue_token(level);
    if cue.is_empty() {
        return body.to_string();
    }
    format!("{body}\n\n{cue}")
}
