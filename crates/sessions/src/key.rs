//! Session key derivation.

use clawdis_common::types::{Channel, ChatType};

/// Derive the canonical session key for a conversation.
///
/// Direct chats collapse into the agent's `main` key when `collapse_direct`
/// is on, so every DM surface shares one conversation thread. Groups and
/// broadcast channels always get their own key.
#[must_use]
pub fn derive_session_key(
    agent_id: &str,
    channel: Channel,
    chat_type: ChatType,
    chat_key: &str,
    collapse_direct: bool,
) -> String {
    if collapse_direct && chat_type == ChatType::Direct {
        return format!("agent:{agent_id}:main");
    }
    format!(
        "agent:{agent_id}:{}:{}:{chat_key}",
        channel.as_str(),
        chat_type.as_str()
    )
}

/// Sanitize a session key for use as a filename.
#[must_use]
pub fn key_to_filename(key: &str) -> String {
    key.replace([':', '/', '@'], "_")
}
