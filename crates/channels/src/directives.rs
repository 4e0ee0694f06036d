//! Slash-directive parsing.
//!
//! Directives are matched at message start, case-insensitively, on the
//! normalized body. A directive with trailing text applies inline to that
//! turn; a directive-only message pins the session and earns a short
//! confirmation reply. Invalid arguments return a hint without mutating
//! anything.

use clawdis_common::types::{ThinkingLevel, Verbosity};

use crate::normalize::is_history_block;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Think(ThinkingLevel),
    Verbose(Verbosity),
    Queue(QueueDirective),
    New,
    Model(String),
    Status,
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueDirective {
    Queue,
    Interrupt,
    Reset,
}

/// A parsed inbound body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub directive: Option<Directive>,
    /// Text remaining after the directive token.
    pub rest: String,
    /// True when the message carried nothing but the directive, which pins
    /// the session instead of applying one-shot.
    pub directive_only: bool,
}

impl ParsedMessage {
    fn plain(body: &str) -> Self {
        Self {
            directive: None,
            rest: body.to_string(),
            directive_only: false,
        }
    }
}

/// Parse a normalized body. `Err` carries the hint reply for an invalid
/// argument.
pub fn parse(body: &str) -> Result<ParsedMessage, String> {
    let trimmed = body.trim();
    if !trimmed.starts_with('/') || is_history_block(body) {
        return Ok(ParsedMessage::plain(trimmed));
    }

    let (token, rest) = split_token(trimmed);

    // `/think:high` and `/think=high` carry the argument inside the token.
    let (name, inline_arg) = match token.split_once([':', '=']) {
        Some((name, arg)) => (name.to_lowercase(), Some(arg.to_string())),
        None => (token.to_lowercase(), None),
    };

    let (arg, rest) = match inline_arg {
        Some(arg) => (Some(arg), rest.to_string()),
        None => {
            let (arg, rest) = split_token(rest);
            if arg.is_empty() {
                (None, rest.to_string())
            } else {
                (Some(arg.to_string()), rest.to_string())
            }
        },
    };

    let directive = match name.as_str() {
        "/think" => match arg.as_deref() {
            Some(level) => match ThinkingLevel::parse(level) {
                Some(level) => Directive::Think(level),
                None => {
                    return Err(format!(
                        "Unknown thinking level '{level}'. Use one of: off, minimal, low, medium, high, max."
                    ));
                },
            },
            None => {
                return Err(
                    "Usage: /think <off|minimal|low|medium|high|max>".to_string(),
                );
            },
        },
        "/verbose" => match arg.as_deref() {
            Some(v) => match Verbosity::parse(v) {
                Some(v) => Directive::Verbose(v),
                None => {
                    return Err(format!("Unknown verbose mode '{v}'. Use: on, full, or off."));
                },
            },
            // Bare `/verbose` switches on.
            None => Directive::Verbose(Verbosity::On),
        },
        "/queue" => match arg.as_deref().map(str::to_lowercase).as_deref() {
            Some("queue") => Directive::Queue(QueueDirective::Queue),
            Some("interrupt") => Directive::Queue(QueueDirective::Interrupt),
            Some("reset") => Directive::Queue(QueueDirective::Reset),
            Some(other) => {
                return Err(format!(
                    "Unknown queue mode '{other}'. Use: queue, interrupt, or reset."
                ));
            },
            None => return Err("Usage: /queue <queue|interrupt|reset>".to_string()),
        },
        "/new" => {
            // `/new` takes no argument; any trailing text rides along as the
            // first message of the fresh session.
            let rest = match arg {
                Some(arg) => join_rest(&arg, &rest),
                None => rest,
            };
            return Ok(ParsedMessage {
                directive: Some(Directive::New),
                directive_only: rest.trim().is_empty(),
                rest,
            });
        },
        "/model" => match arg {
            Some(model_ref) => Directive::Model(model_ref),
            None => return Err("Usage: /model <ref>".to_string()),
        },
        "/status" => {
            return Ok(ParsedMessage {
                directive: Some(Directive::Status),
                rest: String::new(),
                directive_only: true,
            });
        },
        "/restart" => {
            return Ok(ParsedMessage {
                directive: Some(Directive::Restart),
                rest: String::new(),
                directive_only: true,
            });
        },
        // Unknown slash command: treat as plain text for the agent.
        _ => return Ok(ParsedMessage::plain(trimmed)),
    };

    Ok(ParsedMessage {
        directive: Some(directive),
        directive_only: rest.trim().is_empty(),
        rest,
    })
}

/// Confirmation line for a directive-only message.
#[must_use]
pub fn confirmation(directive: &Directive) -> String {
    match directive {
        Directive::Think(level) => format!("Thinking level set to {}.", level.as_str()),
        Directive::Verbose(v) => format!("Verbose set to {}.", v.as_str()),
        Directive::Queue(QueueDirective::Queue) => "Queue mode set to queue.".into(),
        Directive::Queue(QueueDirective::Interrupt) => "Queue mode set to interrupt.".into(),
        Directive::Queue(QueueDirective::Reset) => "Queue mode reset.".into(),
        Directive::New => "Started a new session.".into(),
        Directive::Model(m) => format!("Model set to {m}."),
        Directive::Status | Directive::Restart => String::new(),
    }
}

fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

fn join_rest(first: &str, rest: &str) -> String {
    if rest.is_empty() {
        first.to_string()
    } else {
        format!("{first} {rest}")
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn think_pin_parses_all_separators() {
        for input in ["/think high", "/think:high", "/think=high", "/THINK High"] {
            let parsed = parse(input).unwrap();
            assert_eq!(parsed.directive, Some(Directive::Think(ThinkingLevel::High)), "{input}");
            assert!(parsed.directive_only, "{input}");
        }
    }

    #[test]
    fn inline_think_keeps_the_message() {
        let parsed = parse("/think high summarize my inbox").unwrap();
        assert_eq!(parsed.directive, Some(Directive::Think(ThinkingLevel::High)));
        assert!(!parsed.directive_only);
        assert_eq!(parsed.rest, "summarize my inbox");
    }

    #[test]
    fn invalid_level_returns_hint_only() {
        let err = parse("/think enormous").unwrap_err();
        assert!(err.contains("enormous"));
        assert!(err.contains("off, minimal, low, medium, high, max"));
    }

    #[test]
    fn verbose_variants() {
        assert_eq!(
            parse("/verbose full").unwrap().directive,
            Some(Directive::Verbose(Verbosity::Full))
        );
        assert_eq!(
            parse("/verbose").unwrap().directive,
            Some(Directive::Verbose(Verbosity::On))
        );
        assert!(parse("/verbose loud").is_err());
    }

    #[test]
    fn queue_directives() {
        assert_eq!(
            parse("/queue interrupt").unwrap().directive,
            Some(Directive::Queue(QueueDirective::Interrupt))
        );
        assert_eq!(
            parse("/queue reset").unwrap().directive,
            Some(Directive::Queue(QueueDirective::Reset))
        );
        assert!(parse("/queue").is_err());
    }

    #[test]
    fn new_with_trailing_text_starts_fresh_turn() {
        let parsed = parse("/new plan my week").unwrap();
        assert_eq!(parsed.directive, Some(Directive::New));
        assert!(!parsed.directive_only);
        assert_eq!(parsed.rest, "plan my week");
    }

    #[test]
    fn model_status_restart() {
        assert_eq!(
            parse("/model sonnet").unwrap().directive,
            Some(Directive::Model("sonnet".into()))
        );
        assert_eq!(parse("/status").unwrap().directive, Some(Directive::Status));
        assert_eq!(parse("/restart").unwrap().directive, Some(Directive::Restart));
    }

    #[test]
    fn unknown_slash_commands_fall_through_to_agent() {
        let parsed = parse("/giphy cats").unwrap();
        assert!(parsed.directive.is_none());
        assert_eq!(parsed.rest, "/giphy cats");
    }

    #[test]
    fn history_block_suppresses_directives() {
        let body = "[chat messages since last reply]\n/think high\nsome replayed chat";
        let parsed = parse(body).unwrap();
        assert!(parsed.directive.is_none());
    }

    #[test]
    fn confirmations_match_wire_text() {
        assert_eq!(
            confirmation(&Directive::Think(ThinkingLevel::High)),
            "Thinking level set to high."
        );
        assert_eq!(
            confirmation(&Directive::Verbose(Verbosity::Off)),
            "Verbose set to off."
        );
        assert_eq!(
            confirmation(&Directive::Queue(QueueDirective::Reset)),
            "Queue mode reset."
        );
    }
}
