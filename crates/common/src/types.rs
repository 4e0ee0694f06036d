//! Core message and session value types shared by every layer.

use serde::{Deserialize, Serialize};

// ── Channels ─────────────────────────────────────────────────────────────────

/// The logical transport a message arrived on or leaves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    WhatsApp,
    Telegram,
    Discord,
    WebChat,
    Node,
}

impl Channel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WhatsApp => "whatsapp",
            Self::Telegram => "telegram",
            Self::Discord => "discord",
            Self::WebChat => "webchat",
            Self::Node => "node",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "whatsapp" => Some(Self::WhatsApp),
            "telegram" => Some(Self::Telegram),
            "discord" => Some(Self::Discord),
            "webchat" => Some(Self::WebChat),
            "node" => Some(Self::Node),
            _ => None,
        }
    }

    /// Channel-level default when neither the session nor the config pins a
    /// queue mode. Phone-style surfaces interrupt; desktop surfaces queue.
    #[must_use]
    pub fn default_queue_mode(self) -> QueueMode {
        match self {
            Self::WhatsApp | Self::Telegram => QueueMode::Interrupt,
            Self::Discord | Self::WebChat | Self::Node => QueueMode::Queue,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the conversation the message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Direct,
    Group,
    Channel,
}

impl ChatType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Channel => "channel",
        }
    }
}

// ── Media ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
}

impl MediaKind {
    /// Per-kind outbound size cap in bytes.
    #[must_use]
    pub fn max_bytes(self) -> u64 {
        match self {
            Self::Image => 6 * 1024 * 1024,
            Self::Audio | Self::Video => 16 * 1024 * 1024,
            Self::Document => 100 * 1024 * 1024,
        }
    }
}

/// An inbound or outbound media attachment. Carries either raw bytes or a
/// URL the transport can fetch, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    pub kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_base64")]
    pub bytes: Option<Vec<u8>>,
    pub mime: String,
    pub size_bytes: u64,
}

impl MediaPayload {
    #[must_use]
    pub fn within_cap(&self) -> bool {
        self.size_bytes <= self.kind.max_bytes()
    }
}

mod opt_base64 {
    use {
        base64::Engine,
        serde::{Deserialize, Deserializer, Serializer},
    };

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw {
            Some(s) => base64::engine::general_purpose::STANDARD
                .decode(s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// A normalized inbound message, regardless of transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub channel: Channel,
    /// Physical subprovider label, e.g. "whatsapp-web", "discord-bot".
    pub provider: String,
    /// Opaque sender identifier (E.164 phone, chat id, user id).
    pub from: String,
    pub chat_type: ChatType,
    /// Transport-scoped conversation identifier (phone JID, chat id, guild+channel).
    pub chat_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Normalized text: timestamp prefixes, quote headers, and markup
    /// stripped so directive parsing sees the message itself.
    pub body: String,
    pub raw_body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaPayload>,
    /// Identifiers the sender @-addressed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Monotonic receive timestamp in milliseconds.
    pub received_at: u64,
    /// Provider-stable id used for dedupe.
    pub message_id: String,
    /// When false the agent reply must not be sent back to any transport
    /// (display-only, e.g. node voice transcripts).
    #[serde(default = "default_true")]
    pub deliver: bool,
}

fn default_true() -> bool {
    true
}

impl Envelope {
    /// Whether `identifier` appears in the sender's mentions, either exactly
    /// or in `@name` form.
    #[must_use]
    pub fn mentions_identifier(&self, identifier: &str) -> bool {
        let id_lower = identifier.to_lowercase();
        self.mentions.iter().any(|m| {
            let m = m.to_lowercase();
            m == id_lower || m.trim_start_matches('@') == id_lower.trim_start_matches('@')
        })
    }
}

// ── Outbound ─────────────────────────────────────────────────────────────────

/// Where a reply should be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryTarget {
    pub channel: Channel,
    pub provider: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

/// A reply ready for a transport: text plus optional media.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaPayload>,
}

impl ReplyPayload {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: Vec::new(),
        }
    }
}

// ── Session knobs ────────────────────────────────────────────────────────────

/// Reasoning depth pinned on a session or applied inline for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    #[default]
    Off,
    Minimal,
    Low,
    Medium,
    High,
    Max,
}

impl ThinkingLevel {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "minimal" => Some(Self::Minimal),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "max" => Some(Self::Max),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Max => "max",
        }
    }
}

/// How much tool activity is mirrored back to the chat surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    #[default]
    Off,
    On,
    Full,
}

impl Verbosity {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "on" => Some(Self::On),
            "full" => Some(Self::Full),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::On => "on",
            Self::Full => "full",
        }
    }
}

/// What happens when a message lands while a run is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    /// Wait for the current run, then run with the merged bodies.
    Queue,
    /// Cancel the in-flight run and start fresh with the new message.
    Interrupt,
}

/// Group activation policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Only reply when the bot is @-mentioned.
    #[default]
    Mention,
    /// Reply to every eligible group message.
    Always,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_defaults_split_by_surface() {
        assert_eq!(Channel::WhatsApp.default_queue_mode(), QueueMode::Interrupt);
        assert_eq!(Channel::Telegram.default_queue_mode(), QueueMode::Interrupt);
        assert_eq!(Channel::Discord.default_queue_mode(), QueueMode::Queue);
        assert_eq!(Channel::WebChat.default_queue_mode(), QueueMode::Queue);
    }

    #[test]
    fn channel_parse_roundtrip() {
        for ch in [
            Channel::WhatsApp,
            Channel::Telegram,
            Channel::Discord,
            Channel::WebChat,
            Channel::Node,
        ] {
            assert_eq!(Channel::parse(ch.as_str()), Some(ch));
        }
        assert_eq!(Channel::parse("irc"), None);
    }

    #[test]
    fn media_caps_per_kind() {
        assert_eq!(MediaKind::Image.max_bytes(), 6 * 1024 * 1024);
        assert_eq!(MediaKind::Video.max_bytes(), 16 * 1024 * 1024);
        assert_eq!(MediaKind::Document.max_bytes(), 100 * 1024 * 1024);
    }

    #[test]
    fn envelope_serde_camel_case() {
        let env = Envelope {
            channel: Channel::Telegram,
            provider: "telegram-bot".into(),
            from: "12345".into(),
            chat_type: ChatType::Direct,
            chat_key: "chat:12345".into(),
            account_id: Some("work".into()),
            body: "hello".into(),
            raw_body: "hello".into(),
            media: vec![],
            mentions: vec![],
            reply_to: None,
            received_at: 1000,
            message_id: "m1".into(),
            deliver: true,
        };
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["chatType"], "direct");
        assert_eq!(v["chatKey"], "chat:12345");
        assert_eq!(v["accountId"], "work");
        let back: Envelope = serde_json::from_value(v).unwrap();
        assert_eq!(back.from, "12345");
        assert!(back.deliver);
    }

    #[test]
    fn deliver_defaults_true_for_old_payloads() {
        let json = r#"{
            "channel": "node",
            "provider": "node-bridge",
            "from": "node-abc",
            "chatType": "direct",
            "chatKey": "node-abc",
            "body": "hi",
            "rawBody": "hi",
            "receivedAt": 5,
            "messageId": "m"
        }"#;
        let env: Envelope = serde_json::from_str(json).unwrap();
        assert!(env.deliver);
    }

    #[test]
    fn mention_matching_ignores_at_prefix_and_case() {
        let env = Envelope {
            channel: Channel::WhatsApp,
            provider: "whatsapp-web".into(),
            from: "+15550001111".into(),
            chat_type: ChatType::Group,
            chat_key: "group@g.us".into(),
            account_id: None,
            body: "hey".into(),
            raw_body: "hey".into(),
            media: vec![],
            mentions: vec!["@Clawdis".into()],
            reply_to: None,
            received_at: 0,
            message_id: "m".into(),
            deliver: true,
        };
        assert!(env.mentions_identifier("clawdis"));
        assert!(env.mentions_identifier("@clawdis"));
        assert!(!env.mentions_identifier("otherbot"));
    }

    #[test]
    fn media_bytes_base64_roundtrip() {
        let m = MediaPayload {
            kind: MediaKind::Image,
            url: None,
            bytes: Some(vec![1, 2, 3, 255]),
            mime: "image/png".into(),
            size_bytes: 4,
        };
        let json = serde_json::to_string(&m).unwrap();
        let back: MediaPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bytes, Some(vec![1, 2, 3, 255]));
    }
}
