//! The bridge TCP server: handshake, auth, invoke/event multiplex.

use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use {
    anyhow::Result,
    async_trait::async_trait,
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::{TcpListener, TcpStream},
        sync::{Mutex, mpsc, oneshot},
        time::Instant,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    clawdis_common::{Error, redact::Secret, time::now_ms},
    clawdis_protocol::{
        bridge::{
            BridgeFrame, IDLE_TIMEOUT_MS, INVOKE_TIMEOUT_MS, PAIRING_TIMEOUT_MS, PING_INTERVAL_MS,
        },
        error_codes,
    },
};

use crate::{
    pairing::{OperatorPrompt, PairRequest, generate_token},
    store::{NodeStore, PairedNode},
};

type PendingInvokes = Arc<Mutex<HashMap<String, oneshot::Sender<InvokeOutcome>>>>;
type InvokeOutcome = std::result::Result<Option<String>, String>;

/// Where node events and presence changes land (the gateway).
#[async_trait]
pub trait BridgeEventSink: Send + Sync {
    /// A node pushed an event (e.g. `voice.transcript`).
    async fn node_event(&self, node_id: &str, event: &str, payload: Option<serde_json::Value>);

    /// A node connected or disconnected.
    async fn presence(&self, node_id: &str, online: bool);
}

struct NodeConn {
    tx: mpsc::UnboundedSender<String>,
    commands: Vec<String>,
    caps: Vec<String>,
    pending: PendingInvokes,
    cancel: CancellationToken,
}

pub struct BridgeServer {
    store: Arc<NodeStore>,
    prompt: Arc<dyn OperatorPrompt>,
    sink: Arc<dyn BridgeEventSink>,
    nodes: Mutex<HashMap<String, NodeConn>>,
}

impl BridgeServer {
    #[must_use]
    pub fn new(
        store: Arc<NodeStore>,
        prompt: Arc<dyn OperatorPrompt>,
        sink: Arc<dyn BridgeEventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            prompt,
            sink,
            nodes: Mutex::new(HashMap::new()),
        })
    }

    /// Bind and serve until the token is cancelled.
    pub async fn listen(
        self: Arc<Self>,
        bind: String,
        port: u16,
        cancel: CancellationToken,
    ) -> Result<()> {
        let listener = TcpListener::bind((bind.as_str(), port))
            .await
            .map_err(|e| anyhow::anyhow!("bridge bind {bind}:{port} failed: {e}"))?;
        info!(bind, port, "bridge listening");
        self.serve_listener(listener, cancel).await
    }

    /// Serve on an already-bound listener (tests bind to port 0).
    pub async fn serve_listener(
        self: Arc<Self>,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "bridge accept failed");
                            continue;
                        },
                    };
                    debug!(peer = %peer, "bridge connection");
                    let server = Arc::clone(&self);
                    tokio::spawn(async move { server.handle_conn(stream).await });
                },
            }
        }
        Ok(())
    }

    /// Host-side RPC to a connected node. `UNAVAILABLE` when the node is
    /// offline; times out after 30 s unless overridden.
    pub async fn invoke(
        &self,
        node_id: &str,
        command: &str,
        params_json: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, Error> {
        let (tx_line, pending) = {
            let nodes = self.nodes.lock().await;
            let Some(conn) = nodes.get(node_id) else {
                return Err(Error::transport(format!("node not connected: {node_id}")));
            };
            (conn.tx.clone(), Arc::clone(&conn.pending))
        };

        let id = uuid::Uuid::new_v4().to_string();
        let (done_tx, done_rx) = oneshot::channel();
        pending.lock().await.insert(id.clone(), done_tx);

        let frame = BridgeFrame::Invoke {
            id: id.clone(),
            command: command.to_string(),
            params_json,
        };
        let line = frame
            .to_line()
            .map_err(|e| Error::input(format!("bad invoke params: {e}")))?;
        if tx_line.send(line).is_err() {
            pending.lock().await.remove(&id);
            return Err(Error::transport(format!("node not connected: {node_id}")));
        }

        let timeout = timeout.unwrap_or(Duration::from_millis(INVOKE_TIMEOUT_MS));
        match tokio::time::timeout(timeout, done_rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(message))) => Err(Error::agent(message)),
            Ok(Err(_)) => Err(Error::transport("node disconnected mid-invoke")),
            Err(_) => {
                pending.lock().await.remove(&id);
                Err(Error::Timeout {
                    ms: timeout.as_millis() as u64,
                    partial: None,
                })
            },
        }
    }

    /// The persistent paired-node store behind this bridge.
    #[must_use]
    pub fn store(&self) -> &Arc<NodeStore> {
        &self.store
    }

    pub async fn is_connected(&self, node_id: &str) -> bool {
        self.nodes.lock().await.contains_key(node_id)
    }

    /// `(nodeId, caps, commands)` for every live connection.
    pub async fn connected(&self) -> Vec<(String, Vec<String>, Vec<String>)> {
        self.nodes
            .lock()
            .await
            .iter()
            .map(|(id, c)| (id.clone(), c.caps.clone(), c.commands.clone()))
            .collect()
    }

    // ── Connection lifecycle ─────────────────────────────────────────────

    async fn handle_conn(self: Arc<Self>, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(async move {
            let mut write_half = write_half;
            while let Some(line) = rx.recv().await {
                if write_half.write_all(line.as_bytes()).await.is_err()
                    || write_half.write_all(b"\n").await.is_err()
                {
                    break;
                }
            }
        });

        let send = |frame: &BridgeFrame| {
            if let Ok(line) = frame.to_line() {
                let _ = tx.send(line);
            }
        };

        // ── Handshake ────────────────────────────────────────────────────
        let hello = tokio::time::timeout(
            Duration::from_millis(PAIRING_TIMEOUT_MS),
            lines.next_line(),
        )
        .await;
        let Ok(Ok(Some(first))) = hello else {
            writer.abort();
            return;
        };

        let (node_id, caps, commands) = match BridgeFrame::from_line(&first) {
            Ok(BridgeFrame::Hello {
                node_id,
                display_name,
                token,
                platform,
                version,
                device_family,
                model_identifier,
                caps,
                commands,
            }) => {
                if node_id.trim().is_empty() {
                    send(&BridgeFrame::AuthError {
                        code: error_codes::INVALID_REQUEST.into(),
                        message: "empty nodeId".into(),
                    });
                    writer.abort();
                    return;
                }

                let authed = match &token {
                    Some(token) => self.store.verify_token(&node_id, token).await,
                    None => false,
                };
                if authed {
                    let _ = self.store.touch_last_seen(&node_id).await;
                    send(&BridgeFrame::AuthOk { token: None });
                    (node_id, caps, commands)
                } else if token.is_some() && self.store.contains(&node_id).await {
                    // Known node, wrong token.
                    send(&BridgeFrame::AuthError {
                        code: error_codes::UNAUTHORIZED.into(),
                        message: "token mismatch".into(),
                    });
                    writer.abort();
                    return;
                } else {
                    // Unpaired: request pairing.
                    send(&BridgeFrame::NotPaired {});
                    match self
                        .run_pairing(
                            &mut lines,
                            &send,
                            &node_id,
                            display_name,
                            platform,
                            version,
                            device_family,
                            model_identifier,
                            caps.clone(),
                            commands.clone(),
                        )
                        .await
                    {
                        Some(()) => (node_id, caps, commands),
                        None => {
                            writer.abort();
                            return;
                        },
                    }
                }
            },
            _ => {
                send(&BridgeFrame::AuthError {
                    code: error_codes::INVALID_REQUEST.into(),
                    message: "expected hello".into(),
                });
                writer.abort();
                return;
            },
        };

        // ── Registered session ───────────────────────────────────────────
        let pending: PendingInvokes = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();
        {
            let mut nodes = self.nodes.lock().await;
            // A second connection for the same node replaces the first.
            if let Some(old) = nodes.insert(
                node_id.clone(),
                NodeConn {
                    tx: tx.clone(),
                    commands,
                    caps,
                    pending: Arc::clone(&pending),
                    cancel: cancel.clone(),
                },
            ) {
                old.cancel.cancel();
            }
        }
        info!(node_id, "node connected");
        self.sink.presence(&node_id, true).await;

        let mut ping = tokio::time::interval(Duration::from_millis(PING_INTERVAL_MS));
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let idle_limit = Duration::from_millis(IDLE_TIMEOUT_MS);
        let mut last_rx = Instant::now();

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ping.tick() => {
                    if last_rx.elapsed() > idle_limit {
                        warn!(node_id, "node idle, disconnecting");
                        break;
                    }
                    send(&BridgeFrame::Ping {});
                },
                line = lines.next_line() => {
                    let Ok(Some(line)) = line else { break };
                    last_rx = Instant::now();
                    match BridgeFrame::from_line(&line) {
                        Ok(BridgeFrame::Ping {}) => send(&BridgeFrame::Pong {}),
                        Ok(BridgeFrame::Pong {}) => {},
                        Ok(BridgeFrame::InvokeResult { id, ok, result_json, error }) => {
                            if let Some(waiter) = pending.lock().await.remove(&id) {
                                let outcome = if ok {
                                    Ok(result_json)
                                } else {
                                    Err(error.unwrap_or_else(|| "invoke failed".into()))
                                };
                                let _ = waiter.send(outcome);
                            }
                        },
                        Ok(BridgeFrame::Event { event, payload_json }) => {
                            let payload = payload_json
                                .as_deref()
                                .and_then(|p| serde_json::from_str(p).ok());
                            self.sink.node_event(&node_id, &event, payload).await;
                        },
                        Ok(other) => debug!(node_id, frame = ?other, "ignoring frame"),
                        Err(e) => debug!(node_id, error = %e, "malformed bridge line"),
                    }
                },
            }
        }

        // ── Cleanup ──────────────────────────────────────────────────────
        let removed = {
            let mut nodes = self.nodes.lock().await;
            // Only remove our own registration; a replacement connection
            // may own the slot already.
            if nodes.get(&node_id).is_some_and(|c| c.tx.same_channel(&tx)) {
                nodes.remove(&node_id);
                true
            } else {
                false
            }
        };
        for (_, waiter) in pending.lock().await.drain() {
            let _ = waiter.send(Err("node disconnected".into()));
        }
        if removed {
            self.sink.presence(&node_id, false).await;
        }
        info!(node_id, "node disconnected");
        writer.abort();
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_pairing(
        &self,
        lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
        send: &impl Fn(&BridgeFrame),
        hello_node_id: &str,
        display_name: Option<String>,
        platform: Option<String>,
        version: Option<String>,
        device_family: Option<String>,
        model_identifier: Option<String>,
        caps: Vec<String>,
        commands: Vec<String>,
    ) -> Option<()> {
        let pair = tokio::time::timeout(
            Duration::from_millis(PAIRING_TIMEOUT_MS),
            lines.next_line(),
        )
        .await;
        let Ok(Ok(Some(line))) = pair else {
            return None;
        };
        let Ok(BridgeFrame::Pair {
            node_id,
            display_name: pair_name,
            platform: pair_platform,
            version: pair_version,
        }) = BridgeFrame::from_line(&line)
        else {
            send(&BridgeFrame::AuthError {
                code: error_codes::INVALID_REQUEST.into(),
                message: "expected pair".into(),
            });
            return None;
        };
        if node_id != hello_node_id {
            send(&BridgeFrame::AuthError {
                code: error_codes::INVALID_REQUEST.into(),
                message: "pair nodeId does not match hello".into(),
            });
            return None;
        }

        let request = PairRequest {
            node_id: node_id.clone(),
            display_name: pair_name.or(display_name),
            platform: pair_platform.or(platform),
            version: pair_version.or(version),
        };
        let is_repair = self.store.contains(&node_id).await;

        let approved = tokio::time::timeout(
            Duration::from_millis(PAIRING_TIMEOUT_MS),
            self.prompt.prompt_operator(&request, is_repair),
        )
        .await
        .unwrap_or(false);

        if !approved {
            send(&BridgeFrame::AuthError {
                code: error_codes::UNAUTHORIZED.into(),
                message: "pairing rejected".into(),
            });
            return None;
        }

        let token = generate_token();
        let now = now_ms();
        let record = PairedNode {
            node_id: node_id.clone(),
            display_name: request.display_name.clone(),
            platform: request.platform.clone(),
            version: request.version.clone(),
            device_family,
            model_identifier,
            token: Secret::new(token.clone()),
            caps,
            commands,
            created_at_ms: now,
            last_seen_at_ms: now,
        };
        if let Err(e) = self.store.insert(record).await {
            warn!(node_id, error = %e, "failed to persist paired node");
            send(&BridgeFrame::AuthError {
                code: error_codes::UNAVAILABLE.into(),
                message: "could not persist pairing".into(),
            });
            return None;
        }
        info!(node_id, repair = is_repair, "node paired");
        send(&BridgeFrame::AuthOk { token: Some(token) });
        Some(())
    }
}
