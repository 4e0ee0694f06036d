//! Control-plane client registry and event fan-out.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use {
    tokio::sync::{RwLock, mpsc},
    tracing::debug,
};

use clawdis_protocol::EventFrame;

/// A WebSocket client currently connected to the gateway.
#[derive(Debug)]
pub struct ConnectedClient {
    pub conn_id: String,
    /// Serialized frames destined for this client's write loop.
    pub sender: mpsc::UnboundedSender<String>,
    pub connected_at: std::time::Instant,
}

impl ConnectedClient {
    pub fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }
}

/// Fan-out of server-push events to every connected client.
#[derive(Default)]
pub struct Broadcaster {
    clients: RwLock<HashMap<String, ConnectedClient>>,
    seq: AtomicU64,
}

impl Broadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub async fn register(&self, client: ConnectedClient) {
        self.clients
            .write()
            .await
            .insert(client.conn_id.clone(), client);
    }

    pub async fn remove(&self, conn_id: &str) -> Option<ConnectedClient> {
        self.clients.write().await.remove(conn_id)
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Push a typed event to every connected client.
    pub async fn broadcast(&self, event: &str, payload: serde_json::Value) {
        let frame = EventFrame::new(event, payload, self.next_seq());
        let Ok(line) = serde_json::to_string(&frame) else {
            return;
        };
        let clients = self.clients.read().await;
        for client in clients.values() {
            if !client.send(&line) {
                debug!(conn_id = %client.conn_id, "client send failed");
            }
        }
    }
}
