//! Core methods: health, status, send, config, models, telemetry fan-in.

use serde::Deserialize;

use {
    clawdis_common::types::{Channel, MediaPayload, ReplyPayload},
    clawdis_protocol::{ErrorShape, error_codes},
};

use super::{MethodContext, MethodRegistry, MethodResult, handler};

pub fn register(registry: &mut MethodRegistry) {
    registry.register("health", handler!(health));
    registry.register("status", handler!(status));
    registry.register("send", handler!(send));
    registry.register("config.get", handler!(config_get));
    registry.register("config.set", handler!(config_set));
    registry.register("models.list", handler!(models_list));
    registry.register("system-event", handler!(system_event));
    registry.register("heartbeat.run", handler!(heartbeat_run));
}

async fn health(ctx: MethodContext) -> MethodResult {
    let probes = ctx.state.registry.read().await.probe_all().await;
    let mut providers = serde_json::Map::new();
    for (channel, health) in probes {
        providers.insert(
            channel.as_str().to_string(),
            serde_json::json!({
                "linked": health.linked,
                "lastLinkedAt": health.last_linked_at,
            }),
        );
    }
    Ok(serde_json::json!({ "ok": true, "providers": providers }))
}

async fn status(ctx: MethodContext) -> MethodResult {
    let state = &ctx.state;
    let cfg = state.cfg();
    let mut heartbeats = serde_json::Map::new();
    for channel in [
        Channel::WhatsApp,
        Channel::Telegram,
        Channel::Discord,
        Channel::WebChat,
    ] {
        if let Some(hb) = &cfg.channel(channel).heartbeat
            && let Some(every) = &hb.every
        {
            heartbeats.insert(channel.as_str().into(), serde_json::json!(every));
        }
    }
    Ok(serde_json::json!({
        "sessions": state.sessions.count().await,
        "runsInFlight": state.scheduler.runs_in_flight().await,
        "clients": state.broadcaster.client_count().await,
        "heartbeats": heartbeats,
        "uptimeMs": state.started_at.elapsed().as_millis() as u64,
        "version": state.version,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendParams {
    to: String,
    message: String,
    channel: Option<String>,
    provider: Option<String>,
    account_id: Option<String>,
    #[serde(default)]
    media: Vec<MediaPayload>,
}

async fn send(ctx: MethodContext) -> MethodResult {
    let params: SendParams = ctx.parse_params()?;
    let channel = params
        .channel
        .as_deref()
        .and_then(Channel::parse)
        .unwrap_or(Channel::WhatsApp);
    let target = clawdis_common::types::DeliveryTarget {
        channel,
        provider: params.provider.unwrap_or_else(|| channel.as_str().into()),
        to: params.to,
        account_id: params.account_id,
    };
    let payload = ReplyPayload {
        text: params.message,
        media: params.media,
    };
    ctx.state
        .outbound
        .deliver(&target, &payload)
        .await
        .map_err(|e| ErrorShape::new(error_codes::UNAVAILABLE, e.to_string()))?;
    Ok(serde_json::json!({ "messageId": uuid::Uuid::new_v4().to_string() }))
}

async fn config_get(ctx: MethodContext) -> MethodResult {
    let cfg = ctx.state.cfg();
    let mut value = serde_json::to_value(&*cfg)
        .map_err(|e| ErrorShape::new(error_codes::UNAVAILABLE, e.to_string()))?;
    redact_secrets(&mut value);
    Ok(value)
}

async fn config_set(ctx: MethodContext) -> MethodResult {
    let incoming: clawdis_config::ClawdisConfig = ctx.parse_params()?;
    ctx.state.config.update(|cfg| *cfg = incoming.clone());
    clawdis_config::save_config(&ctx.state.cfg())
        .map_err(|e| ErrorShape::new(error_codes::UNAVAILABLE, e.to_string()))?;
    Ok(serde_json::json!({ "ok": true }))
}

async fn models_list(ctx: MethodContext) -> MethodResult {
    let cfg = ctx.state.cfg();
    let chain = cfg.agent.model.normalize();
    Ok(serde_json::json!({
        "primary": chain.primary,
        "fallbacks": chain.fallbacks,
        "aliases": cfg.agent.model_aliases,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SystemEventParams {
    text: String,
    instance_id: Option<String>,
    mode: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

async fn system_event(ctx: MethodContext) -> MethodResult {
    let params: SystemEventParams = ctx.parse_params()?;
    ctx.state
        .broadcaster
        .broadcast(
            clawdis_protocol::events::LOG,
            serde_json::json!({
                "level": "info",
                "msg": params.text,
                "meta": {
                    "instanceId": params.instance_id,
                    "mode": params.mode,
                    "tags": params.tags,
                },
            }),
        )
        .await;
    Ok(serde_json::json!({ "ok": true }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatRunParams {
    message: Option<String>,
}

/// Operator-triggered heartbeat: a forced sync on the main session,
/// delivered to the last route with acknowledgments visible.
async fn heartbeat_run(ctx: MethodContext) -> MethodResult {
    let params: HeartbeatRunParams = ctx.parse_params()?;
    let state = &ctx.state;
    let session_key = format!("agent:{}:main", state.cfg().agent.id);
    let target = state
        .sessions
        .get(&session_key)
        .await
        .and_then(|s| s.last_target());

    let job = crate::scheduler::PromptJob {
        run_id: String::new(),
        session_key,
        sender: None,
        body: params
            .message
            .unwrap_or_else(|| clawdis_cron::heartbeat::HEARTBEAT_PROMPT.to_string()),
        body_prefix: None,
        kind: crate::scheduler::JobKind::System {
            reason: "operator-heartbeat".into(),
        },
        mode: clawdis_common::types::QueueMode::Queue,
        envelope: None,
        target: target.clone(),
        deliver: target.is_some(),
        think_override: None,
        verbose_override: None,
        heartbeat: Some(crate::scheduler::HeartbeatSpec {
            show_ok: true,
            show_alerts: true,
            ack_max_chars: 0,
            target: None,
        }),
    };
    state.scheduler.submit_system(job, true).await;
    Ok(serde_json::json!({ "ok": true }))
}

/// Strip token-bearing fields from a config JSON tree before it crosses the
/// wire.
fn redact_secrets(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == "token" || key == "botToken" {
                    if !child.is_null() {
                        *child = serde_json::Value::String(clawdis_common::redact::REDACTED.into());
                    }
                } else {
                    redact_secrets(child);
                }
            }
        },
        serde_json::Value::Array(items) => {
            for item in items {
                redact_secrets(item);
            }
        },
        _ => {},
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redaction_covers_nested_tokens() {
        let mut v = serde_json::json!({
            "gateway": { "token": "sekrit" },
            "channels": { "telegram": { "accounts": { "default": { "botToken": "t0k" } } } },
            "agent": { "id": "main" },
        });
        redact_secrets(&mut v);
        assert_eq!(v["gateway"]["token"], clawdis_common::redact::REDACTED);
        assert_eq!(
            v["channels"]["telegram"]["accounts"]["default"]["botToken"],
            clawdis_common::redact::REDACTED
        );
        assert_eq!(v["agent"]["id"], "main");
    }
}
