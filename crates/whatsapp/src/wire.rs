//! Sidecar wire contract: line-delimited JSON on the sidecar's stdio.
//!
//! This is the entire surface a WhatsApp Web implementation must provide;
//! everything else (auth storage, socket reconnects, QR pairing UX) stays
//! inside the sidecar.

use serde::{Deserialize, Serialize};

use clawdis_common::types::{ChatType, MediaPayload};

/// Sidecar → gateway frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarEvent {
    /// Link-state snapshot; sent on startup and whenever it changes.
    #[serde(rename_all = "camelCase")]
    Status {
        web_auth_exists: bool,
        has_active_web_listener: bool,
    },
    /// An inbound message, already in envelope terms.
    #[serde(rename_all = "camelCase")]
    Inbound {
        from: String,
        chat_type: ChatType,
        chat_key: String,
        body: String,
        #[serde(default)]
        media: Vec<MediaPayload>,
        #[serde(default)]
        mentions: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
        message_id: String,
    },
    /// Outcome of a send command, correlated by `id`.
    #[serde(rename_all = "camelCase")]
    SendResult {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Gateway → sidecar commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarCommand {
    #[serde(rename_all = "camelCase")]
    SendText { id: String, to: String, text: String },
    #[serde(rename_all = "camelCase")]
    SendMedia {
        id: String,
        to: String,
        media: MediaPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Typing { to: String },
    Probe {},
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_frame_roundtrip() {
        let line = r#"{"type":"status","webAuthExists":true,"hasActiveWebListener":false}"#;
        let ev: SidecarEvent = serde_json::from_str(line).unwrap();
        match ev {
            SidecarEvent::Status {
                web_auth_exists,
                has_active_web_listener,
            } => {
                assert!(web_auth_exists);
                assert!(!has_active_web_listener);
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn inbound_defaults_optional_fields() {
        let line = r#"{"type":"inbound","from":"+1555","chatType":"direct","chatKey":"+1555","body":"hi","messageId":"m1"}"#;
        let ev: SidecarEvent = serde_json::from_str(line).unwrap();
        assert!(matches!(ev, SidecarEvent::Inbound { ref media, .. } if media.is_empty()));
    }

    #[test]
    fn send_text_wire_shape() {
        let cmd = SidecarCommand::SendText {
            id: "c1".into(),
            to: "+1555".into(),
            text: "hello".into(),
        };
        let line = serde_json::to_string(&cmd).unwrap();
        assert!(line.contains("\"type\":\"send_text\""));
        assert!(line.contains("\"to\":\"+1555\""));
    }
}
