//! Paired-node bridge wire protocol: line-delimited JSON over TCP.

use serde::{Deserialize, Serialize};

/// mDNS service type the bridge listener advertises under.
pub const SERVICE_TYPE: &str = "_clawdis-bridge._tcp.local.";

pub const PING_INTERVAL_MS: u64 = 20_000;
pub const IDLE_TIMEOUT_MS: u64 = 60_000;
pub const INVOKE_TIMEOUT_MS: u64 = 30_000;
pub const PAIRING_TIMEOUT_MS: u64 = 60_000;

/// Every message a bridge connection can carry, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeFrame {
    /// First frame from a node. Carries the stored token on reconnect;
    /// without a known token the node must follow up with `pair`.
    #[serde(rename_all = "camelCase")]
    Hello {
        node_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        platform: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_family: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_identifier: Option<String>,
        #[serde(default)]
        caps: Vec<String>,
        #[serde(default)]
        commands: Vec<String>,
    },
    /// Pairing request; the host operator approves or rejects.
    #[serde(rename_all = "camelCase")]
    Pair {
        node_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        platform: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    /// Authentication accepted. Carries the freshly minted token after a
    /// successful pairing; absent on plain reconnects.
    AuthOk {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    AuthError {
        code: String,
        message: String,
    },
    NotPaired {},
    /// Host → node RPC.
    #[serde(rename_all = "camelCase")]
    Invoke {
        id: String,
        command: String,
        #[serde(default, rename = "paramsJSON", skip_serializing_if = "Option::is_none")]
        params_json: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    InvokeResult {
        id: String,
        ok: bool,
        #[serde(default, rename = "resultJSON", skip_serializing_if = "Option::is_none")]
        result_json: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Node → host push (e.g. `voice.transcript`).
    #[serde(rename_all = "camelCase")]
    Event {
        event: String,
        #[serde(default, rename = "payloadJSON", skip_serializing_if = "Option::is_none")]
        payload_json: Option<String>,
    },
    Ping {},
    Pong {},
}

impl BridgeFrame {
    /// Serialize to a single protocol line (no trailing newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse one protocol line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}
