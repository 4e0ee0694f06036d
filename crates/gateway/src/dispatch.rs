//! The inbound pipeline: authorization → activation → stop words →
//! directives → session routing → scheduler admission.

use std::sync::{Arc, Weak};

use {async_trait::async_trait, tracing::{debug, info}};

use {
    clawdis_channels::{
        directives::{self, Directive, QueueDirective},
        gating::{GroupDecision, evaluate_group, is_allowed},
        normalize::is_stop_word,
        plugin::InboundSink,
    },
    clawdis_common::types::{
        Activation, Channel, ChatType, Envelope, QueueMode, ReplyPayload, ThinkingLevel, Verbosity,
    },
    clawdis_sessions::derive_session_key,
};

use crate::{
    run::origin_target,
    scheduler::{JobKind, PromptJob},
    state::GatewayState,
};

/// The production [`InboundSink`]: routes transport envelopes into the
/// gateway pipeline. Holds a weak reference so plugins never keep the
/// gateway alive.
pub struct DispatchSink {
    state: Weak<GatewayState>,
}

impl DispatchSink {
    #[must_use]
    pub fn new(state: &Arc<GatewayState>) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::downgrade(state),
        })
    }
}

#[async_trait]
impl InboundSink for DispatchSink {
    async fn dispatch(&self, envelope: Envelope) {
        if let Some(state) = self.state.upgrade() {
            handle_inbound(&state, envelope).await;
        }
    }
}

/// Carry one inbound envelope through the full pipeline.
pub async fn handle_inbound(state: &Arc<GatewayState>, envelope: Envelope) {
    {
        let dedupe_key = format!("{}:{}", envelope.channel, envelope.message_id);
        let mut dedupe = state.dedupe.lock().await;
        if dedupe.seen(&dedupe_key, envelope.received_at) {
            debug!(message_id = %envelope.message_id, "duplicate inbound dropped");
            return;
        }
    }

    let cfg = state.cfg();
    let channel_cfg = cfg.channel(envelope.channel);
    let session_key = derive_session_key(
        &cfg.agent.id,
        envelope.channel,
        envelope.chat_type,
        &envelope.chat_key,
        cfg.session.main_collapse,
    );

    // ── Authorization / activation ───────────────────────────────────────
    match envelope.chat_type {
        ChatType::Group => {
            let allowlisted = is_allowed(&envelope.chat_key, &channel_cfg.allow_from)
                || is_allowed(&envelope.from, &channel_cfg.allow_from);
            let group_cfg = channel_cfg.groups.get(&envelope.chat_key);
            let activation = match state.sessions.get(&session_key).await {
                Some(session) => session.activation,
                None => None,
            }
            .or_else(|| group_cfg.and_then(|g| g.activation))
            .unwrap_or(Activation::Mention);
            let require_mention = group_cfg.and_then(|g| g.require_mention);

            match evaluate_group(
                &envelope,
                allowlisted,
                require_mention,
                activation,
                &cfg.agent.id,
            ) {
                GroupDecision::Skip => {
                    debug!(chat_key = %envelope.chat_key, "group message not activated");
                    return;
                },
                GroupDecision::Engage | GroupDecision::EngageTransient => {},
            }
        },
        ChatType::Direct | ChatType::Channel => {
            // WebChat and node envelopes come from already-authenticated
            // surfaces; messaging transports go through the allowlist.
            let allowed = matches!(envelope.channel, Channel::WebChat | Channel::Node)
                || is_allowed(&envelope.from, &channel_cfg.allow_from);
            if !allowed {
                info!(channel = %envelope.channel, from = %envelope.from, "sender not allowlisted");
                return;
            }
        },
    }

    // ── Stop words ───────────────────────────────────────────────────────
    if is_stop_word(&envelope.body) {
        state.scheduler.cancel_active(&session_key).await;
        let _ = state
            .sessions
            .update(&session_key, |s| s.aborted = true)
            .await;
        reply_text(state, &envelope, "Agent was aborted.").await;
        return;
    }

    // ── Directives ───────────────────────────────────────────────────────
    let parsed = match directives::parse(&envelope.body) {
        Ok(parsed) => parsed,
        Err(hint) => {
            reply_text(state, &envelope, &hint).await;
            return;
        },
    };

    let mut body = parsed.rest.clone();
    let mut think_override: Option<ThinkingLevel> = None;
    let mut verbose_override: Option<Verbosity> = None;
    let mut queue_override: Option<QueueMode> = None;

    if let Some(directive) = &parsed.directive {
        match directive {
            Directive::Status => {
                let text = status_reply(state, &session_key).await;
                reply_text(state, &envelope, &text).await;
                return;
            },
            Directive::Restart => {
                if is_allowed(&envelope.from, &cfg.admin.allow_from) {
                    info!(from = %envelope.from, "restart requested");
                    reply_text(state, &envelope, "Restarting gateway.").await;
                    state.request_restart();
                } else {
                    reply_text(state, &envelope, "Not authorized.").await;
                }
                return;
            },
            Directive::New => {
                let _ = state
                    .sessions
                    .update(&session_key, |s| s.reset_thread())
                    .await;
                if parsed.directive_only {
                    reply_text(state, &envelope, &directives::confirmation(directive)).await;
                    return;
                }
            },
            Directive::Think(level) => {
                if parsed.directive_only {
                    let level = *level;
                    let _ = state
                        .sessions
                        .update(&session_key, move |s| s.thinking_level = level)
                        .await;
                    reply_text(state, &envelope, &directives::confirmation(directive)).await;
                    return;
                }
                think_override = Some(*level);
            },
            Directive::Verbose(v) => {
                if parsed.directive_only {
                    let v = *v;
                    let _ = state
                        .sessions
                        .update(&session_key, move |s| s.verbose = v)
                        .await;
                    reply_text(state, &envelope, &directives::confirmation(directive)).await;
                    return;
                }
                verbose_override = Some(*v);
            },
            Directive::Queue(qd) => {
                if parsed.directive_only {
                    let pinned = match qd {
                        QueueDirective::Queue => Some(QueueMode::Queue),
                        QueueDirective::Interrupt => Some(QueueMode::Interrupt),
                        QueueDirective::Reset => None,
                    };
                    let _ = state
                        .sessions
                        .update(&session_key, move |s| s.queue_mode = pinned)
                        .await;
                    reply_text(state, &envelope, &directives::confirmation(directive)).await;
                    return;
                }
                queue_override = match qd {
                    QueueDirective::Queue => Some(QueueMode::Queue),
                    QueueDirective::Interrupt => Some(QueueMode::Interrupt),
                    QueueDirective::Reset => None,
                };
            },
            Directive::Model(model_ref) => {
                // `/model` always pins the session; trailing text rides
                // along as the next prompt.
                match resolve_model(&cfg, model_ref) {
                    Some(resolved) => {
                        let pinned = resolved.clone();
                        let _ = state
                            .sessions
                            .update(&session_key, move |s| s.model = Some(pinned))
                            .await;
                        if parsed.directive_only {
                            reply_text(
                                state,
                                &envelope,
                                &directives::confirmation(&Directive::Model(resolved)),
                            )
                            .await;
                            return;
                        }
                    },
                    None => {
                        let known: Vec<&str> =
                            cfg.agent.model_aliases.keys().map(String::as_str).collect();
                        reply_text(
                            state,
                            &envelope,
                            &format!(
                                "Unknown model '{model_ref}'. Known aliases: {}.",
                                known.join(", ")
                            ),
                        )
                        .await;
                        return;
                    },
                }
            },
        }
    }

    if body.trim().is_empty() && envelope.media.is_empty() {
        return;
    }
    if body.trim().is_empty() {
        body = envelope.raw_body.clone();
    }

    // ── Session bookkeeping ──────────────────────────────────────────────
    let is_group = envelope.chat_type == ChatType::Group;
    let route_env = envelope.clone();
    let session = match state
        .sessions
        .update(&session_key, move |s| {
            if route_env.deliver && route_env.channel != Channel::Node {
                s.set_last_route(route_env.channel, &route_env.provider, &route_env.chat_key);
            }
        })
        .await
    {
        Ok(session) => session,
        Err(e) => {
            info!(session_key = %session_key, error = %e, "session store write failed");
            return;
        },
    };

    let mut prefix_parts: Vec<String> = Vec::new();
    if is_group && !session.primed {
        prefix_parts.push(format!(
            "[Group chat {}: messages are attributed as 'sender: text'; replies go to the whole group.]",
            envelope.chat_key
        ));
    }
    if session.aborted {
        prefix_parts.push("[Note: the previous request was aborted by the user.]".into());
        let _ = state
            .sessions
            .update(&session_key, |s| s.aborted = false)
            .await;
    }

    let mode = queue_override
        .or(session.queue_mode)
        .unwrap_or_else(|| cfg.queue_mode_for(envelope.channel));

    // WebChat and node replies travel over control-plane events; there is
    // no transport adapter behind them.
    let deliver_to_transport =
        envelope.deliver && !matches!(envelope.channel, Channel::WebChat | Channel::Node);
    let target = deliver_to_transport.then(|| origin_target(&envelope));

    let job = PromptJob {
        run_id: String::new(),
        session_key: session_key.clone(),
        sender: Some(envelope.from.clone()),
        body,
        body_prefix: (!prefix_parts.is_empty()).then(|| prefix_parts.join("\n")),
        kind: JobKind::Chat,
        mode,
        envelope: Some(envelope),
        target,
        deliver: deliver_to_transport,
        think_override,
        verbose_override,
        heartbeat: None,
    };
    let run_id = state.scheduler.submit_chat(job).await;
    debug!(session_key = %session_key, run_id = %run_id, "inbound scheduled");
}

/// Validate a `/model` argument against aliases and the configured chain.
fn resolve_model(cfg: &clawdis_config::ClawdisConfig, model_ref: &str) -> Option<String> {
    if let Some(full) = cfg.agent.model_aliases.get(model_ref) {
        return Some(full.clone());
    }
    let chain = cfg.agent.model.normalize();
    if model_ref == chain.primary || chain.fallbacks.iter().any(|f| f == model_ref) {
        return Some(model_ref.to_string());
    }
    if cfg.agent.model_aliases.values().any(|v| v == model_ref) {
        return Some(model_ref.to_string());
    }
    // Free-form provider/model refs are allowed unless the allowlist is
    // restricted to aliases.
    (!cfg.agent.restrict_fallbacks_to_aliases && model_ref.contains('/'))
        .then(|| model_ref.to_string())
}

/// Synthesized `/status` reply.
async fn status_reply(state: &Arc<GatewayState>, session_key: &str) -> String {
    let session = state.sessions.get(session_key).await.unwrap_or_default();
    let running = state.scheduler.has_active_chat_run(session_key).await;
    let cfg = state.cfg();
    let model = session
        .model
        .clone()
        .unwrap_or_else(|| cfg.agent.model.normalize().primary);
    let context = session
        .context_used
        .map(|used| format!("{:.0}%", (used as f64 / 200_000.0) * 100.0))
        .unwrap_or_else(|| "n/a".into());

    let whatsapp = state.registry.read().await.get(Channel::WhatsApp).cloned();
    let whatsapp_line = match whatsapp {
        Some(plugin) => {
            let health = plugin.probe().await;
            match (health.linked, health.last_linked_at) {
                (true, Some(at)) => format!("linked (since {at})"),
                (true, None) => "linked".into(),
                (false, _) => "not linked".into(),
            }
        },
        None => "not configured".into(),
    };

    format!(
        "Session: {session_key}\nAgent: {}\nThinking: {} · Verbose: {}\nModel: {model}\nContext used: {context}\nWhatsApp: {whatsapp_line}",
        if running { "running" } else { "idle" },
        session.thinking_level.as_str(),
        session.verbose.as_str(),
    )
}

/// Send a short gateway-synthesized reply back to the sender's surface.
pub async fn reply_text(state: &Arc<GatewayState>, envelope: &Envelope, text: &str) {
    match envelope.channel {
        Channel::WebChat | Channel::Node => {
            state
                .broadcaster
                .broadcast(
                    clawdis_protocol::events::CHAT,
                    serde_json::json!({
                        "runId": uuid::Uuid::new_v4().to_string(),
                        "state": "final",
                        "text": text,
                    }),
                )
                .await;
        },
        _ if envelope.deliver => {
            let _ = state
                .outbound
                .deliver(&origin_target(envelope), &ReplyPayload::text(text))
                .await;
        },
        _ => {
            state
                .broadcaster
                .broadcast(
                    clawdis_protocol::events::CHAT,
                    serde_json::json!({ "state": "final", "text": text }),
                )
                .await;
        },
    }
}
