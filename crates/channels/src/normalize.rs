//! Inbound body normalization.
//!
//! Transports prepend timestamps, quote headers, and markup that must not
//! confuse directive parsing or stop-word matching. Normalization strips
//! those while `raw_body` keeps the original for the agent prompt.

/// Leading line marking a batched history block; directives inside one are
/// conversation replay, not commands for this turn.
pub const HISTORY_FENCE: &str = "[chat messages since last reply]";

/// Stop words that abort the in-flight agent run instead of prompting it.
const STOP_WORDS: &[&str] = &["stop", "esc", "abort", "wait", "exit"];

/// Normalize an inbound body: drop `[HH:MM]`-style timestamp prefixes and
/// `>`-quoted header lines, then trim.
#[must_use]
pub fn normalize_body(raw: &str) -> String {
    let mut lines: Vec<&str> = raw.lines().collect();

    // Quote headers only count at the top of the message.
    while let Some(first) = lines.first() {
        if first.trim_start().starts_with('>') {
            lines.remove(0);
        } else {
            break;
        }
    }

    let joined = lines.join("\n");
    strip_timestamp_prefix(joined.trim()).trim().to_string()
}

/// Strip one leading `[HH:MM]` or `[HH:MM:SS]` bracket.
fn strip_timestamp_prefix(s: &str) -> &str {
    let Some(rest) = s.strip_prefix('[') else {
        return s;
    };
    let Some(end) = rest.find(']') else {
        return s;
    };
    if is_clock(&rest[..end]) {
        rest[end + 1..].trim_start()
    } else {
        s
    }
}

fn is_clock(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 2 && parts.len() != 3 {
        return false;
    }
    parts
        .iter()
        .all(|p| !p.is_empty() && p.len() <= 2 && p.chars().all(|c| c.is_ascii_digit()))
}

/// Remove lightweight markup (markdown emphasis, inline code, HTML tags) so
/// token matching sees plain text.
#[must_use]
pub fn strip_markup(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for ch in s.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            '*' | '_' | '~' | '`' => {},
            c if !in_tag => out.push(c),
            _ => {},
        }
    }
    out
}

/// Whether the normalized body is exactly a stop word.
#[must_use]
pub fn is_stop_word(body: &str) -> bool {
    let word = strip_markup(body).trim().to_lowercase();
    STOP_WORDS.contains(&word.as_str())
}

/// Whether this body is a batched history block (directives suppressed).
#[must_use]
pub fn is_history_block(body: &str) -> bool {
    body.lines()
        .next()
        .is_some_and(|first| first.trim() == HISTORY_FENCE)
}
