//! Run execution: drive the agent worker for one prompt, stream events to
//! control-plane subscribers, deliver the final payload.

use std::{sync::Arc, time::Duration};

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    tracing::{debug, info, warn},
};

use {
    clawdis_agents::{
        AgentWorker, RunRequest, ToolCoalescer, Usage, WorkerEvent,
        fallback::{candidate_chain, run_with_fallback},
    },
    clawdis_common::{
        Error,
        time::now_ms,
        types::{
            DeliveryTarget, Envelope, MediaKind, MediaPayload, ReplyPayload, ThinkingLevel,
            Verbosity,
        },
    },
    clawdis_config::ConfigHandle,
    clawdis_cron::heartbeat::{HEARTBEAT_OK, cap_ack, strip_heartbeat_token},
    clawdis_sessions::{Session, SessionStore, TranscriptStore},
};

use crate::{
    broadcast::Broadcaster,
    outbound::{OutboundDelivery, TRUNCATED_SUFFIX},
    scheduler::{PromptJob, RunContext, RunExecutor, RunOutcome, TerminalStatus},
};

/// Images above this are clamped before they reach the model input.
const MODEL_IMAGE_CAP: u64 = 5 * 1024 * 1024;

/// Cap on partial output surfaced after a timeout.
const PARTIAL_CAP_CHARS: usize = 800;

/// Result of one model attempt.
struct TurnResult {
    text: String,
    usage: Option<Usage>,
    session_id: Option<String>,
    truncated: bool,
}

pub struct GatewayExecutor {
    pub config: ConfigHandle,
    pub sessions: SessionStore,
    pub transcripts: TranscriptStore,
    pub agent: AgentWorker,
    pub outbound: Arc<OutboundDelivery>,
    pub broadcaster: Arc<Broadcaster>,
}

#[async_trait]
impl RunExecutor for GatewayExecutor {
    async fn execute(&self, job: PromptJob, ctx: RunContext) -> RunOutcome {
        let session = match self.sessions.update(&job.session_key, |_| {}).await {
            Ok(session) => session,
            Err(e) => {
                warn!(session_key = %job.session_key, error = %e, "session store unavailable");
                return RunOutcome {
                    status: TerminalStatus::Failed,
                    error: Some(e.to_string()),
                };
            },
        };

        let cfg = self.config.current();
        let thinking = job
            .think_override
            .or_else(|| {
                (session.thinking_level != ThinkingLevel::Off).then_some(session.thinking_level)
            })
            .or(cfg.agent.thinking)
            .unwrap_or_default();
        let verbosity = job.verbose_override.unwrap_or(session.verbose);

        let chain = cfg.agent.model.normalize();
        let primary = session.model.clone().unwrap_or(chain.primary);
        let candidates = candidate_chain(
            &primary,
            &chain.fallbacks,
            &cfg.agent.model_aliases,
            cfg.agent.restrict_fallbacks_to_aliases,
        );

        let media = clamp_media(job.envelope.as_ref());
        let target = resolve_target(&job, &session);
        let timeout_ms = cfg.agent.timeout_ms.min(cfg.agent.hard_timeout_ms);
        let session_id = session.session_id.clone();

        let result = run_with_fallback(&candidates, &ctx.cancel, |model_ref| {
            let media = media.clone();
            let session_id = session_id.clone();
            let target = target.clone();
            self.attempt(
                &job, &ctx, model_ref, thinking, verbosity, media, session_id, timeout_ms, target,
            )
        })
        .await;

        match result {
            Ok(turn) => {
                self.finish_turn(&job, &target, turn).await;
                RunOutcome {
                    status: TerminalStatus::Final,
                    error: None,
                }
            },
            Err(err) if ctx.cancel.is_cancelled() => {
                debug!(run_id = %job.run_id, "run cancelled");
                self.broadcaster
                    .broadcast(
                        clawdis_protocol::events::CHAT,
                        serde_json::json!({
                            "runId": job.run_id,
                            "state": "cancelled",
                        }),
                    )
                    .await;
                RunOutcome {
                    status: TerminalStatus::Cancelled,
                    error: Some(err.to_string()),
                }
            },
            Err(err) => {
                warn!(run_id = %job.run_id, error = %err, "run failed");
                // Only direct user input earns a visible failure reply.
                if job.is_chat()
                    && job.deliver
                    && job.envelope.is_some()
                    && let Some(target) = &target
                {
                    let _ = self
                        .outbound
                        .deliver(target, &ReplyPayload::text(err.user_summary()))
                        .await;
                }
                self.broadcaster
                    .broadcast(
                        clawdis_protocol::events::CHAT,
                        serde_json::json!({
                            "runId": job.run_id,
                            "state": "failed",
                            "error": err.user_summary(),
                        }),
                    )
                    .await;
                RunOutcome {
                    status: TerminalStatus::Failed,
                    error: Some(err.to_string()),
                }
            },
        }
    }
}

impl GatewayExecutor {
    /// One attempt against one model candidate: stream worker events until
    /// the run resolves or the deadline passes.
    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        job: &PromptJob,
        ctx: &RunContext,
        model_ref: String,
        thinking: ThinkingLevel,
        verbosity: Verbosity,
        media: Vec<MediaPayload>,
        session_id: Option<String>,
        timeout_ms: u64,
        target: Option<DeliveryTarget>,
    ) -> Result<TurnResult> {
        let request = RunRequest {
            run_id: job.run_id.clone(),
            session_key: job.session_key.clone(),
            session_id,
            system_prompt: None,
            body_prefix: job.body_prefix.clone(),
            body: job.body.clone(),
            thinking,
            media,
            model_ref,
            timeout_ms,
        };
        let mut events = self.agent.start_run(request).await?;

        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        let mut coalescer = ToolCoalescer::new(verbosity);
        let mut partial = String::new();
        let mut final_text: Option<String> = None;
        let mut usage: Option<Usage> = None;
        let mut new_session_id: Option<String> = None;

        loop {
            tokio::select! {
                () = ctx.cancel.cancelled() => {
                    self.agent.cancel_escalating(&job.run_id);
                    bail!("run cancelled");
                },
                () = tokio::time::sleep_until(deadline) => {
                    self.agent.cancel_escalating(&job.run_id);
                    info!(run_id = %job.run_id, "run deadline reached");
                    let text = final_text.unwrap_or_else(|| truncate_chars(&partial, PARTIAL_CAP_CHARS));
                    return Ok(TurnResult {
                        text,
                        usage,
                        session_id: new_session_id,
                        truncated: true,
                    });
                },
                event = events.recv() => {
                    let Some(event) = event else {
                        // A crashing worker may drop the stream after `final`
                        // without an `agent_end`; the final still counts.
                        if let Some(text) = final_text {
                            return Ok(TurnResult {
                                text,
                                usage,
                                session_id: new_session_id,
                                truncated: false,
                            });
                        }
                        bail!("worker event stream closed");
                    };
                    match event {
                        WorkerEvent::SessionStart { session_id, .. } => {
                            new_session_id = session_id;
                        },
                        WorkerEvent::Text { delta, .. } => {
                            partial.push_str(&delta);
                            ctx.on_payload(Some(&delta)).await;
                            // Streaming deltas go to control-plane
                            // subscribers only, never to messaging surfaces.
                            self.broadcaster
                                .broadcast(
                                    clawdis_protocol::events::CHAT,
                                    serde_json::json!({
                                        "runId": job.run_id,
                                        "state": "streaming",
                                        "text": delta,
                                    }),
                                )
                                .await;
                        },
                        WorkerEvent::ToolStart { tool, arg, .. } => {
                            let line = coalescer.on_tool_start(&tool, arg.as_deref(), now_ms());
                            self.emit_tool_line(job, &target, line).await;
                            ctx.on_payload(None).await;
                            self.broadcaster
                                .broadcast(
                                    clawdis_protocol::events::CHAT,
                                    serde_json::json!({
                                        "runId": job.run_id,
                                        "state": "streaming",
                                        "toolEvent": { "phase": "start", "tool": tool, "arg": arg },
                                    }),
                                )
                                .await;
                        },
                        WorkerEvent::ToolEnd { tool, preview, .. } => {
                            let line = coalescer.on_tool_end(&tool, preview.as_deref(), now_ms());
                            self.emit_tool_line(job, &target, line).await;
                            self.broadcaster
                                .broadcast(
                                    clawdis_protocol::events::CHAT,
                                    serde_json::json!({
                                        "runId": job.run_id,
                                        "state": "streaming",
                                        "toolEvent": { "phase": "end", "tool": tool },
                                    }),
                                )
                                .await;
                        },
                        WorkerEvent::Final { text, usage: u, .. } => {
                            final_text = Some(text);
                            usage = u;
                        },
                        WorkerEvent::Error { message, kind, .. } => {
                            bail!("{kind}: {message}");
                        },
                        WorkerEvent::AgentEnd { .. } => {
                            let line = coalescer.flush();
                            self.emit_tool_line(job, &target, line).await;
                            let text = final_text.unwrap_or(partial);
                            return Ok(TurnResult {
                                text,
                                usage,
                                session_id: new_session_id,
                                truncated: false,
                            });
                        },
                    }
                },
            }
        }
    }

    /// Verbose tool metadata line → transport, when the session asks for it.
    async fn emit_tool_line(
        &self,
        job: &PromptJob,
        target: &Option<DeliveryTarget>,
        line: Option<String>,
    ) {
        let Some(line) = line else { return };
        if !job.deliver || job.heartbeat.is_some() {
            return;
        }
        if let Some(target) = target {
            let _ = self.outbound.deliver(target, &ReplyPayload::text(line)).await;
        }
    }

    /// Successful turn: deliver, persist session changes, log transcript.
    async fn finish_turn(&self, job: &PromptJob, target: &Option<DeliveryTarget>, turn: TurnResult) {
        let mut reply_text = turn.text.clone();
        if turn.truncated && !reply_text.is_empty() {
            reply_text = format!("{reply_text}\n{TRUNCATED_SUFFIX}");
        }

        if let Some(hb) = &job.heartbeat {
            // Heartbeats filter through visibility rules and never touch
            // session routing fields.
            if let Some(target) = target {
                let strip = strip_heartbeat_token(&turn.text);
                if strip.is_ok_ack && strip.text.is_empty() {
                    if hb.show_ok {
                        let ack = cap_ack(HEARTBEAT_OK, hb.ack_max_chars);
                        let _ = self.outbound.deliver(target, &ReplyPayload::text(ack)).await;
                    }
                } else if hb.show_alerts && !strip.text.is_empty() {
                    let _ = self
                        .outbound
                        .deliver(target, &ReplyPayload::text(strip.text))
                        .await;
                }
            }
        } else if job.deliver
            && !reply_text.is_empty()
            && let Some(target) = target
        {
            if let Err(e) = self
                .outbound
                .deliver(target, &ReplyPayload::text(reply_text.clone()))
                .await
            {
                warn!(run_id = %job.run_id, error = %e, "reply delivery failed");
            }
        }

        self.broadcaster
            .broadcast(
                clawdis_protocol::events::CHAT,
                serde_json::json!({
                    "runId": job.run_id,
                    "state": "final",
                    "text": turn.text,
                    "usage": turn.usage,
                }),
            )
            .await;

        if job.is_chat() {
            let new_session_id = turn.session_id.clone();
            let context_used = turn.usage.as_ref().and_then(|u| u.context_used);
            let result = self
                .sessions
                .update_and_touch(&job.session_key, move |s: &mut Session| {
                    if let Some(id) = new_session_id {
                        s.session_id.get_or_insert(id);
                    }
                    if let Some(used) = context_used {
                        s.context_used = Some(used);
                    }
                    s.primed = true;
                })
                .await;
            if let Err(e) = result {
                warn!(session_key = %job.session_key, error = %e, "session update failed");
            }

            let _ = self.transcripts.append(&job.session_key, "user", &job.body).await;
            let _ = self
                .transcripts
                .append(&job.session_key, "assistant", &turn.text)
                .await;
        }
    }
}

/// Delivery target resolution: explicit job target, then the originating
/// envelope, then the session's last route.
fn resolve_target(job: &PromptJob, session: &Session) -> Option<DeliveryTarget> {
    if !job.deliver {
        return None;
    }
    if let Some(target) = &job.target {
        return Some(target.clone());
    }
    if let Some(env) = &job.envelope {
        return Some(origin_target(env));
    }
    session.last_target()
}

/// Reply target for an envelope's originating conversation.
#[must_use]
pub fn origin_target(envelope: &Envelope) -> DeliveryTarget {
    DeliveryTarget {
        channel: envelope.channel,
        provider: envelope.provider.clone(),
        to: envelope.chat_key.clone(),
        account_id: envelope.account_id.clone(),
    }
}

/// Drop oversized images before they reach the model input.
fn clamp_media(envelope: Option<&Envelope>) -> Vec<MediaPayload> {
    envelope
        .map(|e| {
            e.media
                .iter()
                .filter(|m| {
                    let keep = m.kind != MediaKind::Image || m.size_bytes <= MODEL_IMAGE_CAP;
                    if !keep {
                        warn!(size = m.size_bytes, "image exceeds model input cap, dropped");
                    }
                    keep
                })
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use clawdis_common::types::{Channel, ChatType};

    fn envelope() -> Envelope {
        Envelope {
            channel: Channel::Telegram,
            provider: "telegram-bot".into(),
            from: "u1".into(),
            chat_type: ChatType::Direct,
            chat_key: "chat:1".into(),
            account_id: Some("work".into()),
            body: "hi".into(),
            raw_body: "hi".into(),
            media: vec![
                MediaPayload {
                    kind: MediaKind::Image,
                    url: None,
                    bytes: None,
                    mime: "image/png".into(),
                    size_bytes: 6 * 1024 * 1024,
                },
                MediaPayload {
                    kind: MediaKind::Image,
                    url: None,
                    bytes: None,
                    mime: "image/png".into(),
                    size_bytes: 1024,
                },
            ],
            mentions: vec![],
            reply_to: None,
            received_at: 0,
            message_id: "m".into(),
            deliver: true,
        }
    }

    #[test]
    fn oversized_images_are_clamped() {
        let env = envelope();
        let media = clamp_media(Some(&env));
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].size_bytes, 1024);
    }

    #[test]
    fn origin_target_mirrors_envelope() {
        let env = envelope();
        let t = origin_target(&env);
        assert_eq!(t.channel, Channel::Telegram);
        assert_eq!(t.to, "chat:1");
        assert_eq!(t.account_id.as_deref(), Some("work"));
    }

    #[test]
    fn partial_truncation_caps_chars() {
        let long = "x".repeat(2000);
        assert_eq!(truncate_chars(&long, PARTIAL_CAP_CHARS).len(), PARTIAL_CAP_CHARS);
    }
}
