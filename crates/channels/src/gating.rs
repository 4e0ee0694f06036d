//! Sender allowlists and group activation.

use clawdis_common::types::{Activation, ChatType, Envelope};

/// Check if a sender is allowed to interact with the agent.
///
/// Entries are matched case-insensitively against the sender ID, with
/// glob-style `*` wildcards. An empty allowlist denies everyone; a lone
/// `"*"` entry is the open policy.
#[must_use]
pub fn is_allowed(sender: &str, allowlist: &[String]) -> bool {
    let sender = sender.to_lowercase();
    allowlist.iter().any(|pattern| {
        let pattern = pattern.to_lowercase();
        if pattern.contains('*') {
            glob_match(&pattern, &sender)
        } else {
            pattern == sender
        }
    })
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == text;
    }

    let mut pos = 0;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        match text[pos..].find(segment) {
            Some(idx) => {
                if i == 0 && idx != 0 {
                    return false;
                }
                pos += idx + segment.len();
            },
            None => return false,
        }
    }
    match segments.last() {
        Some(last) if !last.is_empty() => pos == text.len(),
        _ => true,
    }
}

/// Outcome of group activation for one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupDecision {
    /// Not eligible; drop silently.
    Skip,
    /// Eligible through standing policy (allowlist + activation rules).
    Engage,
    /// Not allowlisted, but the bot was mentioned directly — reply for this
    /// turn only.
    EngageTransient,
}

/// Decide whether a group message activates the agent.
///
/// `require_mention` unset defaults to true. Mention detection runs against
/// `envelope.mentions`, which transports populate from message bodies *and*
/// media captions.
#[must_use]
pub fn evaluate_group(
    envelope: &Envelope,
    group_allowlisted: bool,
    require_mention: Option<bool>,
    activation: Activation,
    bot_identifier: &str,
) -> GroupDecision {
    debug_assert_eq!(envelope.chat_type, ChatType::Group);
    let mentioned = envelope.mentions_identifier(bot_identifier);

    if !group_allowlisted {
        // A direct mention still earns a one-turn reply.
        return if mentioned {
            GroupDecision::EngageTransient
        } else {
            GroupDecision::Skip
        };
    }

    if activation == Activation::Always {
        return GroupDecision::Engage;
    }
    if mentioned || !require_mention.unwrap_or(true) {
        return GroupDecision::Engage;
    }
    GroupDecision::Skip
}
