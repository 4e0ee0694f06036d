//! Bridge glue: operator pairing prompts and node event routing.

use std::sync::{Arc, Weak};

use {async_trait::async_trait, tokio::sync::oneshot, tracing::{info, warn}};

use {
    clawdis_bridge::{BridgeEventSink, OperatorPrompt, PairRequest},
    clawdis_channels::normalize::normalize_body,
    clawdis_common::{
        time::now_ms,
        types::{Channel, ChatType, Envelope},
    },
};

use crate::{dispatch, state::{GatewayState, PendingPairing}};

/// Pairing approval backed by the control plane: a `pairing.pending` event
/// goes out, and a `nodes.approve`/`nodes.reject` call resolves it.
pub struct GatewayOperatorPrompt {
    state: Weak<GatewayState>,
}

impl GatewayOperatorPrompt {
    #[must_use]
    pub fn new(state: &Arc<GatewayState>) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::downgrade(state),
        })
    }
}

#[async_trait]
impl OperatorPrompt for GatewayOperatorPrompt {
    async fn prompt_operator(&self, request: &PairRequest, is_repair: bool) -> bool {
        let Some(state) = self.state.upgrade() else {
            return false;
        };
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        state.pending_pairings.lock().await.insert(
            request_id.clone(),
            PendingPairing {
                request: request.clone(),
                is_repair,
                decision: tx,
            },
        );
        state
            .broadcaster
            .broadcast(
                clawdis_protocol::events::PAIRING_PENDING,
                serde_json::json!({
                    "requestId": request_id,
                    "isRepair": is_repair,
                    "request": {
                        "nodeId": request.node_id,
                        "displayName": request.display_name,
                        "platform": request.platform,
                        "version": request.version,
                    },
                }),
            )
            .await;
        info!(node_id = %request.node_id, repair = is_repair, "pairing approval pending");

        // The bridge wraps this in the pairing timeout; a dropped channel
        // (gateway shutdown) reads as rejection.
        let approved = rx.await.unwrap_or(false);
        state.pending_pairings.lock().await.remove(&request_id);
        approved
    }
}

/// Routes node events into the inbound pipeline and mirrors presence.
pub struct GatewayBridgeSink {
    state: Weak<GatewayState>,
}

impl GatewayBridgeSink {
    #[must_use]
    pub fn new(state: &Arc<GatewayState>) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::downgrade(state),
        })
    }
}

#[async_trait]
impl BridgeEventSink for GatewayBridgeSink {
    async fn node_event(&self, node_id: &str, event: &str, payload: Option<serde_json::Value>) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        match event {
            "voice.transcript" => {
                let Some(payload) = payload else {
                    warn!(node_id, "voice.transcript without payload");
                    return;
                };
                let Some(text) = payload.get("text").and_then(|t| t.as_str()) else {
                    warn!(node_id, "voice.transcript without text");
                    return;
                };
                let chat_key = payload
                    .get("sessionKey")
                    .and_then(|k| k.as_str())
                    .map(ToString::to_string)
                    .unwrap_or_else(|| format!("node-{node_id}"));
                let deliver = payload
                    .get("deliver")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(true);

                let envelope = Envelope {
                    channel: Channel::Node,
                    provider: "node-bridge".into(),
                    from: format!("node-{node_id}"),
                    chat_type: ChatType::Direct,
                    chat_key,
                    account_id: None,
                    body: normalize_body(text),
                    raw_body: text.to_string(),
                    media: vec![],
                    mentions: vec![],
                    reply_to: None,
                    received_at: now_ms(),
                    message_id: uuid::Uuid::new_v4().to_string(),
                    deliver,
                };
                dispatch::handle_inbound(&state, envelope).await;
            },
            other => {
                state
                    .broadcaster
                    .broadcast(
                        clawdis_protocol::events::LOG,
                        serde_json::json!({
                            "level": "info",
                            "msg": "node event",
                            "meta": { "nodeId": node_id, "event": other },
                        }),
                    )
                    .await;
            },
        }
    }

    async fn presence(&self, node_id: &str, online: bool) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        state
            .broadcaster
            .broadcast(
                clawdis_protocol::events::PRESENCE,
                serde_json::json!({
                    "nodeId": node_id,
                    "state": if online { "online" } else { "offline" },
                }),
            )
            .await;
    }
}
