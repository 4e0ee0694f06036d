//! Config schema: agent runtime, channels, gateway listeners, bridge, admin.
//!
//! Every section is `#[serde(default)]` so a partial `config.json` (or none
//! at all) yields a working gateway. Wire names are camelCase to match the
//! control-plane protocol.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use clawdis_common::{
    redact::Secret,
    types::{Activation, Channel, QueueMode, ThinkingLevel},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClawdisConfig {
    pub agent: AgentConfig,
    pub session: SessionConfig,
    pub channels: ChannelsConfig,
    pub gateway: GatewayConfig,
    pub bridge: BridgeConfig,
    pub admin: AdminConfig,
    pub cron: CronConfig,
}

impl ClawdisConfig {
    /// Channel section lookup by logical channel.
    #[must_use]
    pub fn channel(&self, channel: Channel) -> &ChannelConfig {
        match channel {
            Channel::WhatsApp => &self.channels.whatsapp,
            Channel::Telegram => &self.channels.telegram,
            Channel::Discord => &self.channels.discord,
            Channel::WebChat | Channel::Node => &self.channels.webchat,
        }
    }

    /// Resolve the queue mode for a channel when the session has no
    /// override: config default wins, else the channel's built-in default.
    #[must_use]
    pub fn queue_mode_for(&self, channel: Channel) -> QueueMode {
        self.channel(channel)
            .queue_mode
            .unwrap_or_else(|| channel.default_queue_mode())
    }
}

// ── Agent runtime ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentConfig {
    /// Agent identity used in session keys.
    pub id: String,
    /// Command line used to spawn the NDJSON worker subprocess.
    pub worker_cmd: Vec<String>,
    /// Cross-session cap on parallel runs.
    pub max_concurrent: usize,
    /// Primary model plus fallbacks. Accepts a bare string or
    /// `{ "primary": …, "fallbacks": […] }`.
    pub model: ModelRef,
    /// Short aliases (`"sonnet"` → full ref) usable in `/model`.
    pub model_aliases: HashMap<String, String>,
    /// When set, fallback candidates must resolve from the alias table.
    pub restrict_fallbacks_to_aliases: bool,
    /// Default thinking level for new sessions.
    pub thinking: Option<ThinkingLevel>,
    /// Whether the worker understands `--thinking <level>`; when false the
    /// adapter appends cue tokens to the prompt instead.
    pub thinking_flag: bool,
    /// Per-run deadline for chat-driven runs.
    pub timeout_ms: u64,
    /// Absolute cap no run may exceed.
    pub hard_timeout_ms: u64,
    /// Grace between the soft cancel signal and SIGTERM, and again before
    /// SIGKILL.
    pub cancel_grace_ms: u64,
    /// Coalescing window for non-chat scheduler calls (heartbeat, index).
    pub debounce_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: "main".into(),
            worker_cmd: vec!["clawdis-agent".into()],
            max_concurrent: 4,
            model: ModelRef::default(),
            model_aliases: HashMap::new(),
            restrict_fallbacks_to_aliases: false,
            thinking: None,
            thinking_flag: true,
            timeout_ms: 120_000,
            hard_timeout_ms: 30 * 60 * 1000,
            cancel_grace_ms: 2_000,
            debounce_ms: 250,
        }
    }
}

/// A model reference as written in config: either a bare ref string or an
/// object carrying explicit fallbacks. Consumers only ever see the
/// normalized [`ModelChain`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelRef {
    Simple(String),
    Chain {
        primary: String,
        #[serde(default)]
        fallbacks: Vec<String>,
    },
}

impl Default for ModelRef {
    fn default() -> Self {
        Self::Simple("anthropic/claude-sonnet-4-5".into())
    }
}

/// Normalized model chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelChain {
    pub primary: String,
    pub fallbacks: Vec<String>,
}

impl ModelRef {
    #[must_use]
    pub fn normalize(&self) -> ModelChain {
        match self {
            Self::Simple(primary) => ModelChain {
                primary: primary.clone(),
                fallbacks: Vec::new(),
            },
            Self::Chain { primary, fallbacks } => ModelChain {
                primary: primary.clone(),
                fallbacks: fallbacks.clone(),
            },
        }
    }
}

// ── Sessions ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Collapse direct chats into the agent's `main` session key. Groups
    /// never collapse.
    pub main_collapse: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            main_collapse: true,
        }
    }
}

// ── Channels ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelsConfig {
    pub whatsapp: ChannelConfig,
    pub telegram: ChannelConfig,
    pub discord: ChannelConfig,
    pub webchat: ChannelConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelConfig {
    /// Sender allowlist; `*` matches anyone, empty denies all direct chats.
    pub allow_from: Vec<String>,
    /// Queue-vs-interrupt default for this channel.
    pub queue_mode: Option<QueueMode>,
    /// Outbound chunk size; falls back to 4000.
    pub max_chunk_chars: Option<usize>,
    pub heartbeat: Option<HeartbeatConfig>,
    /// Per-group overrides keyed by group chat key.
    pub groups: HashMap<String, GroupConfig>,
    /// Subaccounts (bot tokens etc.) keyed by account id.
    pub accounts: HashMap<String, AccountConfig>,
}

impl ChannelConfig {
    #[must_use]
    pub fn chunk_chars(&self) -> usize {
        self.max_chunk_chars.unwrap_or(4000)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GroupConfig {
    /// Unset means mention is required.
    pub require_mention: Option<bool>,
    pub activation: Option<Activation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccountConfig {
    pub bot_token: Option<Secret>,
}

// ── Heartbeat ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeartbeatConfig {
    /// Interval like `"5m"`, `"30m"`, `"1h"`. Unset disables the heartbeat
    /// for this channel.
    pub every: Option<String>,
    /// Channel override for delivery; default is the session's last route.
    pub target: Option<String>,
    pub to: Option<String>,
    pub account_id: Option<String>,
    /// `/think:<level>` directive prepended to the heartbeat prompt.
    pub think: Option<ThinkingLevel>,
    pub prompt: Option<String>,
    /// Size cap for acknowledgment replies; 0 disables the cap.
    pub ack_max_chars: usize,
    pub visibility: HeartbeatVisibility,
    pub active_hours: Option<ActiveHours>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            every: None,
            target: None,
            to: None,
            account_id: None,
            think: None,
            prompt: None,
            ack_max_chars: 300,
            visibility: HeartbeatVisibility::default(),
            active_hours: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeartbeatVisibility {
    /// Deliver `HEARTBEAT_OK` acknowledgments.
    pub show_ok: bool,
    /// Deliver non-OK heartbeat findings.
    pub show_alerts: bool,
    /// Raise a typing/presence indicator during heartbeat runs.
    pub use_indicator: bool,
}

impl Default for HeartbeatVisibility {
    fn default() -> Self {
        Self {
            show_ok: false,
            show_alerts: true,
            use_indicator: false,
        }
    }
}

impl HeartbeatVisibility {
    /// All outputs disabled — the heartbeat can be skipped entirely.
    #[must_use]
    pub fn all_disabled(&self) -> bool {
        !self.show_ok && !self.show_alerts && !self.use_indicator
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActiveHours {
    pub start: String,
    pub end: String,
    pub timezone: String,
}

// ── Gateway / bridge / admin ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
    /// Optional LAN listener in addition to loopback.
    pub lan_bind: Option<String>,
    pub lan_port: Option<u16>,
    /// Control-plane auth token. Without one, only loopback clients pass.
    pub token: Option<Secret>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 18789,
            lan_bind: None,
            lan_port: None,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
    /// Advertise the listener over mDNS.
    pub advertise: bool,
    pub display_name: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0".into(),
            port: 18790,
            advertise: true,
            display_name: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdminConfig {
    /// Senders allowed to issue privileged directives (`/restart`).
    pub allow_from: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CronConfig {
    pub enabled: bool,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let cfg: ClawdisConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.gateway.port, 18789);
        assert_eq!(cfg.agent.max_concurrent, 4);
        assert!(cfg.session.main_collapse);
        assert!(cfg.bridge.enabled);
    }

    #[test]
    fn model_ref_accepts_bare_string() {
        let cfg: ClawdisConfig =
            serde_json::from_str(r#"{"agent":{"model":"anthropic/claude-opus-4"}}"#).unwrap();
        let chain = cfg.agent.model.normalize();
        assert_eq!(chain.primary, "anthropic/claude-opus-4");
        assert!(chain.fallbacks.is_empty());
    }

    #[test]
    fn model_ref_accepts_chain_object() {
        let cfg: ClawdisConfig = serde_json::from_str(
            r#"{"agent":{"model":{"primary":"a/x","fallbacks":["b/y","c/z"]}}}"#,
        )
        .unwrap();
        let chain = cfg.agent.model.normalize();
        assert_eq!(chain.primary, "a/x");
        assert_eq!(chain.fallbacks, vec!["b/y".to_string(), "c/z".to_string()]);
    }

    #[test]
    fn queue_mode_resolution_prefers_config() {
        let cfg: ClawdisConfig =
            serde_json::from_str(r#"{"channels":{"whatsapp":{"queueMode":"queue"}}}"#).unwrap();
        assert_eq!(
            cfg.queue_mode_for(Channel::WhatsApp),
            QueueMode::Queue,
            "config overrides the channel default"
        );
        assert_eq!(cfg.queue_mode_for(Channel::Telegram), QueueMode::Interrupt);
        assert_eq!(cfg.queue_mode_for(Channel::Discord), QueueMode::Queue);
    }

    #[test]
    fn heartbeat_visibility_all_disabled() {
        let v = HeartbeatVisibility {
            show_ok: false,
            show_alerts: false,
            use_indicator: false,
        };
        assert!(v.all_disabled());
        assert!(!HeartbeatVisibility::default().all_disabled());
    }

    #[test]
    fn heartbeat_config_parses_camel_case() {
        let hb: HeartbeatConfig = serde_json::from_str(
            r#"{"every":"5m","target":"telegram","accountId":"work","ackMaxChars":0}"#,
        )
        .unwrap();
        assert_eq!(hb.every.as_deref(), Some("5m"));
        assert_eq!(hb.account_id.as_deref(), Some("work"));
        assert_eq!(hb.ack_max_chars, 0);
    }

    #[test]
    fn gateway_token_never_debug_prints() {
        let cfg: ClawdisConfig =
            serde_json::from_str(r#"{"gateway":{"token":"hunter2hunter2"}}"#).unwrap();
        let dbg = format!("{:?}", cfg.gateway);
        assert!(!dbg.contains("hunter2"));
    }
}
