//! Wire protocol definitions for both gateway surfaces.
//!
//! Control plane (WebSocket, JSON Lines):
//! - `RequestFrame`  — client → gateway RPC call
//! - `ResponseFrame` — gateway → client RPC result
//! - `EventFrame`    — gateway → client server-push
//!
//! Node bridge (TCP, line-delimited JSON): [`BridgeFrame`].

pub mod bridge;

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PORT: u16 = 18789;
pub const MAX_PAYLOAD_BYTES: usize = 524_288; // 512 KB
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

// ── Error codes ──────────────────────────────────────────────────────────────

pub mod error_codes {
    pub const UNKNOWN_METHOD: &str = "UNKNOWN_METHOD";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const UNAVAILABLE: &str = "UNAVAILABLE";
    pub const NOT_PAIRED: &str = "NOT_PAIRED";
    pub const AGENT_TIMEOUT: &str = "AGENT_TIMEOUT";
    pub const UNSUPPORTED: &str = "UNSUPPORTED";
}

// ── Error shape ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorShape {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: None,
        }
    }
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// Client → gateway RPC request. `id` is caller-chosen and unique per socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// Gateway → client RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl ResponseFrame {
    pub fn ok(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: ErrorShape) -> Self {
        Self {
            id: id.into(),
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

/// Gateway → client server-push event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, payload: serde_json::Value, seq: u64) -> Self {
        Self {
            event: event.into(),
            payload: Some(payload),
            seq: Some(seq),
        }
    }
}

/// Anything a control-plane socket may carry. Requests have `method`,
/// responses have `ok`, events have `event`; the untagged decode tries in
/// that order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlFrame {
    Request(RequestFrame),
    Response(ResponseFrame),
    Event(EventFrame),
}

// ── Control-plane events ─────────────────────────────────────────────────────

pub mod events {
    pub const CHAT: &str = "chat";
    pub const PROVIDER: &str = "provider";
    pub const PRESENCE: &str = "presence";
    pub const PAIRING_PENDING: &str = "pairing.pending";
    pub const LOG: &str = "log";
}

/// Connection handshake sent as the first request (`method = "hello"`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HelloParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Gateway reply to `hello`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloOk {
    pub protocol: u32,
    pub server_version: String,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_roundtrip() {
        let f = RequestFrame {
            id: "1".into(),
            method: "health".into(),
            params: None,
        };
        let json = serde_json::to_string(&f).unwrap();
        assert!(!json.contains("params"));
        let back: ControlFrame = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, ControlFrame::Request(r) if r.method == "health"));
    }

    #[test]
    fn response_ok_and_err_shapes() {
        let ok = ResponseFrame::ok("7", serde_json::json!({"linked": true}));
        let v = serde_json::to_value(&ok).unwrap();
        assert_eq!(v["ok"], true);
        assert_eq!(v["result"]["linked"], true);

        let err = ResponseFrame::err("7", ErrorShape::new(error_codes::UNKNOWN_METHOD, "nope"));
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"]["code"], "UNKNOWN_METHOD");
        assert!(v.get("result").is_none());
    }

    #[test]
    fn untagged_decode_distinguishes_events() {
        let back: ControlFrame =
            serde_json::from_str(r#"{"event":"chat","payload":{"runId":"r1"}}"#).unwrap();
        assert!(matches!(back, ControlFrame::Event(e) if e.event == "chat"));
    }
}
