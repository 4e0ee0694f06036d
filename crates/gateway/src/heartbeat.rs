//! Per-channel heartbeat runner.
//!
//! Each configured channel gets a periodic forced-sync "HEARTBEAT" prompt
//! on the agent's main session. Skips apply before any run is scheduled:
//! no last route, unlinked provider, all outputs disabled, outside active
//! hours, or a queued-mode user run in flight.

use std::sync::{Arc, Weak};

use {
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    clawdis_common::types::{Channel, DeliveryTarget, QueueMode},
    clawdis_config::HeartbeatConfig,
    clawdis_cron::{
        heartbeat::{HEARTBEAT_PROMPT, is_within_active_hours},
        parse::parse_interval_ms,
    },
};

use crate::{
    scheduler::{HeartbeatSpec, JobKind, PromptJob},
    state::GatewayState,
};

const HEARTBEAT_CHANNELS: [Channel; 4] = [
    Channel::WhatsApp,
    Channel::Telegram,
    Channel::Discord,
    Channel::WebChat,
];

/// Spawn one heartbeat loop per channel with `heartbeat.every` configured.
pub fn spawn_heartbeats(state: &Arc<GatewayState>, cancel: CancellationToken) {
    for channel in HEARTBEAT_CHANNELS {
        let cfg = state.cfg();
        let Some(hb) = cfg.channel(channel).heartbeat.clone() else {
            continue;
        };
        let Some(every) = hb.every.as_deref() else {
            continue;
        };
        let Ok(interval_ms) = parse_interval_ms(every) else {
            warn!(channel = %channel, every, "unparseable heartbeat interval");
            continue;
        };
        info!(channel = %channel, interval_ms, "heartbeat armed");
        tokio::spawn(heartbeat_loop(
            Arc::downgrade(state),
            channel,
            interval_ms,
            cancel.clone(),
        ));
    }
}

async fn heartbeat_loop(
    state: Weak<GatewayState>,
    channel: Channel,
    interval_ms: u64,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tick.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = tick.tick() => {},
        }
        let Some(state) = state.upgrade() else { break };
        // Config may have changed since the loop was armed.
        let Some(hb) = state.cfg().channel(channel).heartbeat.clone() else {
            continue;
        };
        run_heartbeat_once(&state, channel, &hb).await;
    }
}

/// One heartbeat pass: apply the skip rules, then schedule a forced sync.
pub async fn run_heartbeat_once(state: &Arc<GatewayState>, channel: Channel, hb: &HeartbeatConfig) {
    let cfg = state.cfg();
    let session_key = format!("agent:{}:main", cfg.agent.id);

    // Resolve where the result would go; nothing to reply to means skip.
    let session = state.sessions.get(&session_key).await;
    let target = resolve_heartbeat_target(state, hb, session.as_ref()).await;
    let Some(target) = target else {
        debug!(channel = %channel, "heartbeat skipped: no delivery route");
        return;
    };

    // Provider must be linked and running.
    let health = match state.registry.read().await.get(target.channel) {
        Some(plugin) => plugin.probe().await,
        None => {
            debug!(channel = %target.channel, "heartbeat skipped: channel not registered");
            return;
        },
    };
    if !health.linked {
        debug!(channel = %target.channel, "heartbeat skipped: provider not linked");
        return;
    }

    if hb.visibility.all_disabled() {
        debug!(channel = %channel, "heartbeat skipped: all outputs disabled");
        return;
    }

    if let Some(hours) = &hb.active_hours
        && !is_within_active_hours(&hours.start, &hours.end, &hours.timezone)
    {
        debug!(channel = %channel, "heartbeat skipped: outside active hours");
        return;
    }

    // Backpressure: a queued-mode user run wins; the heartbeat is skipped,
    // not queued.
    if state.scheduler.has_active_chat_run(&session_key).await
        && cfg.queue_mode_for(channel) == QueueMode::Queue
    {
        debug!(channel = %channel, "heartbeat skipped: user run active in queue mode");
        return;
    }

    let body = hb
        .prompt
        .clone()
        .unwrap_or_else(|| HEARTBEAT_PROMPT.to_string());
    let job = PromptJob {
        run_id: String::new(),
        session_key,
        sender: None,
        body,
        body_prefix: None,
        kind: JobKind::System {
            reason: "heartbeat".into(),
        },
        mode: QueueMode::Queue,
        envelope: None,
        target: Some(target),
        deliver: true,
        think_override: hb.think,
        verbose_override: None,
        heartbeat: Some(HeartbeatSpec {
            show_ok: hb.visibility.show_ok,
            show_alerts: hb.visibility.show_alerts,
            ack_max_chars: hb.ack_max_chars,
            target: None,
        }),
    };
    state.scheduler.submit_system(job, true).await;
}

/// `heartbeat.target`/`to`/`accountId` override the session's last route.
async fn resolve_heartbeat_target(
    state: &Arc<GatewayState>,
    hb: &HeartbeatConfig,
    session: Option<&clawdis_sessions::Session>,
) -> Option<DeliveryTarget> {
    if let Some(target_channel) = hb.target.as_deref() {
        let channel = Channel::parse(target_channel)?;
        let to = hb
            .to
            .clone()
            .or_else(|| session.and_then(|s| s.last_to.clone()))?;
        let provider = match state.registry.read().await.get(channel) {
            Some(plugin) => plugin.provider().to_string(),
            None => format!("{channel}-heartbeat"),
        };
        return Some(DeliveryTarget {
            channel,
            provider,
            to,
            account_id: hb.account_id.clone(),
        });
    }
    let mut target = session.and_then(clawdis_sessions::Session::last_target)?;
    if hb.account_id.is_some() {
        target.account_id = hb.account_id.clone();
    }
    if let Some(to) = &hb.to {
        target.to = to.clone();
    }
    Some(target)
}
