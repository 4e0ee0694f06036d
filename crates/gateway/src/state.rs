//! Gateway state assembly.

use std::{sync::Arc, time::Instant};

use {
    anyhow::Result,
    tokio::sync::{Mutex, RwLock, oneshot},
};

use {
    clawdis_agents::{AgentWorker, WorkerConfig},
    clawdis_bridge::BridgeServer,
    clawdis_channels::ChannelRegistry,
    clawdis_config::{ClawdisConfig, ConfigHandle, state_dir},
    clawdis_cron::CronService,
    clawdis_sessions::{SessionStore, TranscriptStore},
};

use crate::{
    broadcast::Broadcaster,
    outbound::OutboundDelivery,
    run::GatewayExecutor,
    scheduler::SessionScheduler,
};

/// A pairing request waiting on operator approval.
pub struct PendingPairing {
    pub request: clawdis_bridge::PairRequest,
    pub is_repair: bool,
    pub decision: oneshot::Sender<bool>,
}

/// TTL-based idempotency cache for inbound message ids. Transports can
/// redeliver after reconnects; the pipeline must not double-schedule.
pub struct DedupeCache {
    entries: std::collections::HashMap<String, u64>,
    ttl_ms: u64,
    max_entries: usize,
}

impl Default for DedupeCache {
    fn default() -> Self {
        Self {
            entries: std::collections::HashMap::new(),
            ttl_ms: 5 * 60 * 1000,
            max_entries: 1_000,
        }
    }
}

impl DedupeCache {
    /// Record `id`; returns true when it was already seen within the TTL.
    pub fn seen(&mut self, id: &str, now_ms: u64) -> bool {
        if self.entries.len() >= self.max_entries {
            let ttl = self.ttl_ms;
            self.entries.retain(|_, at| now_ms.saturating_sub(*at) < ttl);
        }
        match self.entries.get(id) {
            Some(at) if now_ms.saturating_sub(*at) < self.ttl_ms => true,
            _ => {
                self.entries.insert(id.to_string(), now_ms);
                false
            },
        }
    }
}

/// Everything the gateway owns. Constructed once at startup; components
/// that need a back-reference hold a `Weak` to avoid reference cycles.
pub struct GatewayState {
    pub config: ConfigHandle,
    pub sessions: SessionStore,
    pub transcripts: TranscriptStore,
    pub registry: Arc<RwLock<ChannelRegistry>>,
    pub agent: AgentWorker,
    pub outbound: Arc<OutboundDelivery>,
    pub broadcaster: Arc<Broadcaster>,
    pub scheduler: SessionScheduler,
    /// Set during server assembly when the bridge is enabled.
    pub bridge: std::sync::OnceLock<Arc<BridgeServer>>,
    /// Set during server assembly when cron is enabled.
    pub cron: std::sync::OnceLock<Arc<CronService>>,
    pub pending_pairings: Mutex<std::collections::HashMap<String, PendingPairing>>,
    pub dedupe: Mutex<DedupeCache>,
    pub started_at: Instant,
    pub version: String,
    restart: tokio::sync::Notify,
}

impl GatewayState {
    /// Build the state graph from config: stores, agent worker, executor,
    /// scheduler.
    pub fn new(config: ConfigHandle) -> Result<Arc<Self>> {
        Self::new_at(config, state_dir())
    }

    /// Build against an explicit state root (tests use a temp dir).
    pub fn new_at(config: ConfigHandle, root: std::path::PathBuf) -> Result<Arc<Self>> {
        let sessions = SessionStore::open(root.join("sessions.json"))?;
        let transcripts = TranscriptStore::new(root.join("sessions"));
        let registry = Arc::new(RwLock::new(ChannelRegistry::new()));
        let broadcaster = Arc::new(Broadcaster::new());
        let outbound = Arc::new(OutboundDelivery::new(Arc::clone(&registry), config.clone()));

        let agent_cfg = config.current().agent.clone();
        let agent = AgentWorker::spawn(WorkerConfig {
            cmd: agent_cfg.worker_cmd.clone(),
            thinking_flag: agent_cfg.thinking_flag,
            cancel_grace_ms: agent_cfg.cancel_grace_ms,
        });

        let executor = Arc::new(GatewayExecutor {
            config: config.clone(),
            sessions: sessions.clone(),
            transcripts: transcripts.clone(),
            agent: agent.clone(),
            outbound: Arc::clone(&outbound),
            broadcaster: Arc::clone(&broadcaster),
        });
        let scheduler = SessionScheduler::new(
            executor,
            agent_cfg.max_concurrent,
            agent_cfg.debounce_ms,
        );

        Ok(Arc::new(Self {
            config,
            sessions,
            transcripts,
            registry,
            agent,
            outbound,
            broadcaster,
            scheduler,
            bridge: std::sync::OnceLock::new(),
            cron: std::sync::OnceLock::new(),
            pending_pairings: Mutex::new(std::collections::HashMap::new()),
            dedupe: Mutex::new(DedupeCache::default()),
            started_at: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            restart: tokio::sync::Notify::new(),
        }))
    }

    /// Ask the gateway to shut down so the service manager relaunches it.
    pub fn request_restart(&self) {
        self.restart.notify_waiters();
    }

    /// Resolves when a restart has been requested.
    pub async fn restart_requested(&self) {
        self.restart.notified().await;
    }

    /// Current config snapshot.
    #[must_use]
    pub fn cfg(&self) -> Arc<ClawdisConfig> {
        self.config.current()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_is_ttl_scoped() {
        let mut cache = DedupeCache::default();
        assert!(!cache.seen("telegram:m1", 1_000));
        assert!(cache.seen("telegram:m1", 2_000));
        // Past the TTL the id is fresh again.
        assert!(!cache.seen("telegram:m1", 1_000 + 5 * 60 * 1000 + 1));
        assert!(!cache.seen("telegram:m2", 2_000));
    }
}
