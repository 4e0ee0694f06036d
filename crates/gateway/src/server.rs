//! Gateway assembly and the axum listeners.

use std::{net::SocketAddr, sync::{Arc, Weak}};

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    axum::{
        Router,
        extract::{ConnectInfo, State, WebSocketUpgrade},
        response::Response,
        routing::get,
    },
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use {
    clawdis_bridge::{BridgeServer, NodeStore, advertise::BridgeAdvertiser},
    clawdis_channels::plugin::{ChannelPlugin, InboundSink},
    clawdis_common::types::{Channel, DeliveryTarget, QueueMode, ReplyPayload},
    clawdis_config::{ConfigHandle, state_dir},
    clawdis_cron::{CronService, CronSink},
    clawdis_discord::DiscordPlugin,
    clawdis_telegram::TelegramPlugin,
    clawdis_whatsapp::WhatsAppPlugin,
};

use crate::{
    dispatch::DispatchSink,
    heartbeat::spawn_heartbeats,
    methods::MethodRegistry,
    nodes::{GatewayBridgeSink, GatewayOperatorPrompt},
    scheduler::{HeartbeatSpec, JobKind, PromptJob},
    state::GatewayState,
    ws,
};

#[derive(Clone)]
struct AppState {
    state: Arc<GatewayState>,
    methods: Arc<MethodRegistry>,
}

/// Build and run the gateway until shutdown or a restart request.
pub async fn run_gateway(config: ConfigHandle) -> Result<()> {
    let state = GatewayState::new(config)?;
    let cancel = CancellationToken::new();
    let sink: Arc<dyn InboundSink> = DispatchSink::new(&state);

    register_channels(&state, &sink).await;
    start_channels(&state).await;

    // ── Node bridge ──────────────────────────────────────────────────────
    let mut _advertiser = None;
    {
        let cfg = state.cfg();
        if cfg.bridge.enabled {
            let store = Arc::new(NodeStore::open(
                state_dir().join("bridge/paired-nodes.json"),
            )?);
            let bridge = BridgeServer::new(
                store,
                GatewayOperatorPrompt::new(&state),
                GatewayBridgeSink::new(&state),
            );
            let _ = state.bridge.set(Arc::clone(&bridge));
            let bind = cfg.bridge.bind.clone();
            let port = cfg.bridge.port;
            tokio::spawn(Arc::clone(&bridge).listen(bind, port, cancel.clone()));
            if cfg.bridge.advertise {
                match BridgeAdvertiser::start(cfg.bridge.display_name.as_deref(), port) {
                    Ok(adv) => _advertiser = Some(adv),
                    Err(e) => warn!(error = %e, "mdns advertise failed"),
                }
            }
        }
    }

    // ── Cron ─────────────────────────────────────────────────────────────
    if state.cfg().cron.enabled {
        let sink = Arc::new(GatewayCronSink {
            state: Arc::downgrade(&state),
        });
        let service = CronService::open(state_dir().join("cron.json"), sink)?;
        let _ = state.cron.set(Arc::clone(&service));
        tokio::spawn(service.run());
    }

    spawn_heartbeats(&state, cancel.clone());

    // ── Control plane ────────────────────────────────────────────────────
    let methods = Arc::new(MethodRegistry::new());
    let app_state = AppState {
        state: Arc::clone(&state),
        methods,
    };
    let app = Router::new()
        .route("/", get(ws_upgrade))
        .route("/ws", get(ws_upgrade))
        .with_state(app_state);

    let cfg = state.cfg();
    let addr = format!("{}:{}", cfg.gateway.bind, cfg.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("control plane bind {addr} failed"))?;
    info!(addr, "gateway listening");

    let mut lan_serve = None;
    if let (Some(lan_bind), Some(lan_port)) = (&cfg.gateway.lan_bind, cfg.gateway.lan_port) {
        let lan_addr = format!("{lan_bind}:{lan_port}");
        let lan_listener = tokio::net::TcpListener::bind(&lan_addr)
            .await
            .with_context(|| format!("lan bind {lan_addr} failed"))?;
        info!(addr = lan_addr, "lan listener up");
        let lan_app = app.clone();
        lan_serve = Some(tokio::spawn(async move {
            let _ = axum::serve(
                lan_listener,
                lan_app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await;
        }));
    }

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    tokio::select! {
        result = serve => result.context("control plane serve failed")?,
        _ = tokio::signal::ctrl_c() => info!("shutdown signal"),
        () = state.restart_requested() => info!("restart requested, shutting down"),
    }

    cancel.cancel();
    if let Some(handle) = lan_serve {
        handle.abort();
    }
    state.agent.shutdown().await;
    stop_channels(&state).await;
    Ok(())
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(app): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| ws::handle_connection(socket, app.state, app.methods, addr))
}

// ── Channel wiring ───────────────────────────────────────────────────────────

async fn register_channels(state: &Arc<GatewayState>, sink: &Arc<dyn InboundSink>) {
    let cfg = state.cfg();
    let mut registry = state.registry.write().await;

    if !cfg.channels.telegram.accounts.is_empty() {
        registry.register(Arc::new(TelegramPlugin::new(
            cfg.channels.telegram.clone(),
            Arc::clone(sink),
        )));
    }
    if !cfg.channels.discord.accounts.is_empty() {
        registry.register(Arc::new(DiscordPlugin::new(
            cfg.channels.discord.clone(),
            Arc::clone(sink),
        )));
    }
    // The WhatsApp sidecar registers unconditionally so probes and health
    // report its (un)linked state.
    let sidecar_cmd = std::env::var("CLAWDIS_WHATSAPP_SIDECAR")
        .map(|cmd| cmd.split_whitespace().map(String::from).collect())
        .unwrap_or_else(|_| vec!["clawdis-whatsapp-sidecar".to_string()]);
    registry.register(Arc::new(WhatsAppPlugin::new(sidecar_cmd, Arc::clone(sink))));
}

async fn start_channels(state: &Arc<GatewayState>) {
    let registry = state.registry.read().await;
    for channel in registry.channels() {
        let Some(plugin) = registry.get(channel) else {
            continue;
        };
        if let Err(e) = plugin.start().await {
            warn!(channel = %channel, error = %e, "channel start failed");
        }
        let health = plugin.probe().await;
        state
            .broadcaster
            .broadcast(
                clawdis_protocol::events::PROVIDER,
                serde_json::json!({
                    "channel": channel.as_str(),
                    "linked": health.linked,
                }),
            )
            .await;
    }
}

async fn stop_channels(state: &Arc<GatewayState>) {
    let registry = state.registry.read().await;
    for channel in registry.channels() {
        if let Some(plugin) = registry.get(channel) {
            let _ = plugin.stop().await;
        }
    }
}

// ── Cron sink ────────────────────────────────────────────────────────────────

/// Wires cron payloads onto the scheduler and outbound delivery.
struct GatewayCronSink {
    state: Weak<GatewayState>,
}

impl GatewayCronSink {
    async fn resolve_target(
        &self,
        state: &Arc<GatewayState>,
        channel: Option<&str>,
        to: Option<&str>,
    ) -> Option<DeliveryTarget> {
        if let (Some(channel), Some(to)) = (channel.and_then(Channel::parse), to) {
            let provider = match state.registry.read().await.get(channel) {
                Some(plugin) => plugin.provider().to_string(),
                None => channel.as_str().to_string(),
            };
            return Some(DeliveryTarget {
                channel,
                provider,
                to: to.to_string(),
                account_id: None,
            });
        }
        let key = format!("agent:{}:main", state.cfg().agent.id);
        state.sessions.get(&key).await.and_then(|s| s.last_target())
    }
}

#[async_trait]
impl CronSink for GatewayCronSink {
    async fn run_agent_turn(
        &self,
        message: &str,
        deliver: bool,
        channel: Option<&str>,
        to: Option<&str>,
    ) -> Result<()> {
        let state = self
            .state
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("gateway gone"))?;
        let target = self.resolve_target(&state, channel, to).await;
        let job = PromptJob {
            run_id: String::new(),
            session_key: format!("agent:{}:main", state.cfg().agent.id),
            sender: None,
            body: message.to_string(),
            body_prefix: None,
            kind: JobKind::System {
                reason: "cron".into(),
            },
            mode: QueueMode::Queue,
            envelope: None,
            target: target.clone(),
            deliver: deliver && target.is_some(),
            think_override: None,
            verbose_override: None,
            heartbeat: deliver.then_some(HeartbeatSpec {
                show_ok: true,
                show_alerts: true,
                ack_max_chars: 0,
                target: None,
            }),
        };
        state.scheduler.submit_system(job, true).await;
        Ok(())
    }

    async fn announce(&self, text: &str, channel: Option<&str>, to: Option<&str>) -> Result<()> {
        let state = self
            .state
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("gateway gone"))?;
        let target = self
            .resolve_target(&state, channel, to)
            .await
            .ok_or_else(|| anyhow::anyhow!("no delivery target for announce"))?;
        state
            .outbound
            .deliver(&target, &ReplyPayload::text(text))
            .await
    }
}
