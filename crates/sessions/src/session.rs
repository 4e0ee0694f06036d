//! The per-conversation session record.

use serde::{Deserialize, Serialize};

use clawdis_common::{
    time::now_ms,
    types::{Activation, Channel, DeliveryTarget, QueueMode, ThinkingLevel, Verbosity},
};

/// Persistent state for one conversation thread.
///
/// Unknown JSON keys survive read-modify-write cycles via the flattened
/// `extra` map, so a newer gateway never drops fields an older one wrote.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Session {
    pub key: String,
    /// Opaque id minted by the agent runtime on the first turn; stable
    /// across turns until `/new` clears it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    // Where replies go when the delivery target is "last".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_channel: Option<Channel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_to: Option<String>,

    pub thinking_level: ThinkingLevel,
    pub verbose: Verbosity,
    /// Session override; `None` inherits the channel/global default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_mode: Option<QueueMode>,
    /// Group activation override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation: Option<Activation>,
    /// Session model override from `/model`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Set by a stop word; the next prompt carries an abort reminder and
    /// clears it.
    pub aborted: bool,
    /// Wall-clock millis. Never moves backward; the store merges with the
    /// on-disk value on every flush.
    pub updated_at: u64,
    /// Last reported token usage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_used: Option<u64>,
    /// Whether the group roster/subject primer has been emitted.
    pub primed: bool,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            key: String::new(),
            session_id: None,
            last_channel: None,
            last_provider: None,
            last_to: None,
            thinking_level: ThinkingLevel::Off,
            verbose: Verbosity::Off,
            queue_mode: None,
            activation: None,
            model: None,
            aborted: false,
            updated_at: now_ms(),
            context_used: None,
            primed: false,
            extra: serde_json::Map::new(),
        }
    }
}

impl Session {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Record where the latest user-driven reply went. Heartbeat sends must
    /// never call this.
    pub fn set_last_route(&mut self, channel: Channel, provider: &str, to: &str) {
        self.last_channel = Some(channel);
        self.last_provider = Some(provider.to_string());
        self.last_to = Some(to.to_string());
    }

    /// The stored "last" delivery target, when one exists.
    #[must_use]
    pub fn last_target(&self) -> Option<DeliveryTarget> {
        Some(DeliveryTarget {
            channel: self.last_channel?,
            provider: self.last_provider.clone()?,
            to: self.last_to.clone()?,
            account_id: None,
        })
    }

    /// Reset agent-side continuity (`/new`) while keeping routing and
    /// directive pins. Re-arms the group primer.
    pub fn reset_thread(&mut self) {
        self.session_id = None;
        self.context_used = None;
        self.primed = false;
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_roundtrip_preserves_unknown_keys() {
        let json = r#"{
            "key": "agent:main:main",
            "sessionId": "s-123",
            "thinkingLevel": "high",
            "verbose": "on",
            "aborted": false,
            "updatedAt": 1700000000000,
            "primed": false,
            "futureField": {"nested": [1, 2, 3]},
            "anotherUnknown": "keep me"
        }"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.session_id.as_deref(), Some("s-123"));
        assert_eq!(session.thinking_level, ThinkingLevel::High);

        let back = serde_json::to_value(&session).unwrap();
        assert_eq!(back["futureField"]["nested"][2], 3);
        assert_eq!(back["anotherUnknown"], "keep me");
    }

    #[test]
    fn reset_thread_rearms_primer_and_clears_id() {
        let mut s = Session::new("agent:main:whatsapp:group:g");
        s.session_id = Some("sid".into());
        s.primed = true;
        s.thinking_level = ThinkingLevel::High;
        s.reset_thread();
        assert!(s.session_id.is_none());
        assert!(!s.primed);
        assert_eq!(s.thinking_level, ThinkingLevel::High, "pins survive /new");
    }

    #[test]
    fn last_target_requires_all_route_fields() {
        let mut s = Session::new("k");
        assert!(s.last_target().is_none());
        s.set_last_route(Channel::WhatsApp, "whatsapp-web", "+1555");
        let target = s.last_target().unwrap();
        assert_eq!(target.channel, Channel::WhatsApp);
        assert_eq!(target.to, "+1555");
    }
}
