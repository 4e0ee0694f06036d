//! Control-plane WebSocket connection lifecycle: handshake (with auth) →
//! request loop → cleanup.

use std::{net::SocketAddr, sync::Arc};

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, stream::StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use clawdis_protocol::{
    ControlFrame, ErrorShape, HANDSHAKE_TIMEOUT_MS, HelloOk, HelloParams, MAX_PAYLOAD_BYTES,
    PROTOCOL_VERSION, RequestFrame, ResponseFrame, error_codes,
};

use crate::{
    broadcast::ConnectedClient,
    methods::{MethodContext, MethodRegistry},
    state::GatewayState,
};

/// Handle one WebSocket connection end to end.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    methods: Arc<MethodRegistry>,
    remote_addr: SocketAddr,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, remote = %remote_addr, "ws: new connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<String>();

    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(line) = client_rx.recv().await {
            if ws_tx.send(Message::Text(line.into())).await.is_err() {
                debug!(conn_id = %write_conn_id, "ws: write loop closed");
                break;
            }
        }
    });

    // ── Handshake ────────────────────────────────────────────────────────
    let hello = tokio::time::timeout(
        std::time::Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
        wait_for_hello(&mut ws_rx),
    )
    .await;
    let (request_id, params) = match hello {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            warn!(conn_id = %conn_id, error = %e, "ws: handshake failed");
            write_handle.abort();
            return;
        },
        Err(_) => {
            warn!(conn_id = %conn_id, "ws: handshake timeout");
            write_handle.abort();
            return;
        },
    };

    if !authorize(&state, &params, remote_addr) {
        warn!(conn_id = %conn_id, "ws: auth failed");
        let err = ResponseFrame::err(
            &request_id,
            ErrorShape::new(error_codes::UNAUTHORIZED, "authentication failed"),
        );
        send_json(&client_tx, &err);
        write_handle.abort();
        return;
    }

    let hello_ok = HelloOk {
        protocol: PROTOCOL_VERSION,
        server_version: state.version.clone(),
        methods: methods.method_names(),
        events: vec![
            clawdis_protocol::events::CHAT.into(),
            clawdis_protocol::events::PROVIDER.into(),
            clawdis_protocol::events::PRESENCE.into(),
            clawdis_protocol::events::PAIRING_PENDING.into(),
            clawdis_protocol::events::LOG.into(),
        ],
    };
    if let Ok(payload) = serde_json::to_value(&hello_ok) {
        send_json(&client_tx, &ResponseFrame::ok(&request_id, payload));
    }
    info!(conn_id = %conn_id, client = ?params.client, "ws: handshake complete");

    state
        .broadcaster
        .register(ConnectedClient {
            conn_id: conn_id.clone(),
            sender: client_tx.clone(),
            connected_at: std::time::Instant::now(),
        })
        .await;

    // ── Request loop ─────────────────────────────────────────────────────
    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "ws: read error");
                break;
            },
        };
        if text.len() > MAX_PAYLOAD_BYTES {
            warn!(conn_id = %conn_id, size = text.len(), "ws: payload too large");
            send_json(
                &client_tx,
                &ResponseFrame::err(
                    "",
                    ErrorShape::new(error_codes::INVALID_REQUEST, "payload too large"),
                ),
            );
            continue;
        }

        match serde_json::from_str::<ControlFrame>(&text) {
            Ok(ControlFrame::Request(req)) => {
                let ctx = MethodContext {
                    request_id: req.id.clone(),
                    method: req.method.clone(),
                    params: req.params.unwrap_or(serde_json::Value::Null),
                    conn_id: conn_id.clone(),
                    state: Arc::clone(&state),
                };
                let response = methods.dispatch(ctx).await;
                send_json(&client_tx, &response);
            },
            Ok(_) => debug!(conn_id = %conn_id, "ws: ignoring non-request frame"),
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "ws: invalid frame");
                send_json(
                    &client_tx,
                    &ResponseFrame::err(
                        "",
                        ErrorShape::new(error_codes::INVALID_REQUEST, "invalid frame"),
                    ),
                );
            },
        }
    }

    // ── Cleanup ──────────────────────────────────────────────────────────
    state.broadcaster.remove(&conn_id).await;
    info!(conn_id = %conn_id, "ws: connection closed");
    write_handle.abort();
}

/// Token beats everything; without one, only loopback peers pass.
fn authorize(state: &GatewayState, params: &HelloParams, remote: SocketAddr) -> bool {
    if let (Some(required), Some(provided)) = (&state.cfg().gateway.token, &params.token)
        && required.expose() == provided
    {
        return true;
    }
    remote.ip().is_loopback()
}

async fn wait_for_hello(
    rx: &mut futures::stream::SplitStream<WebSocket>,
) -> anyhow::Result<(String, HelloParams)> {
    while let Some(msg) = rx.next().await {
        let text = match msg? {
            Message::Text(t) => t.to_string(),
            Message::Close(_) => anyhow::bail!("closed before handshake"),
            _ => continue,
        };
        let frame: RequestFrame = serde_json::from_str(&text)?;
        if frame.method != "hello" && frame.method != "connect" {
            anyhow::bail!("first request must be 'hello', got '{}'", frame.method);
        }
        let params: HelloParams =
            serde_json::from_value(frame.params.unwrap_or(serde_json::Value::Null))
                .unwrap_or_default();
        return Ok((frame.id, params));
    }
    anyhow::bail!("closed before handshake")
}

fn send_json<T: serde::Serialize>(tx: &mpsc::UnboundedSender<String>, value: &T) {
    if let Ok(line) = serde_json::to_string(value) {
        let _ = tx.send(line);
    }
}
