//! Chat methods: agent invocation and history.

use serde::Deserialize;

use {
    clawdis_common::{
        time::now_ms,
        types::{Channel, ChatType, Envelope, QueueMode, ThinkingLevel},
    },
    clawdis_protocol::{ErrorShape, error_codes},
    clawdis_sessions::derive_session_key,
};

use crate::scheduler::{JobKind, PromptJob};

use super::{MethodContext, MethodRegistry, MethodResult, handler};

pub fn register(registry: &mut MethodRegistry) {
    registry.register("agent", handler!(agent));
    registry.register("chat.send", handler!(chat_send));
    registry.register("chat.history", handler!(chat_history));
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentParams {
    message: String,
    session_key: Option<String>,
    thinking: Option<String>,
    #[serde(default)]
    deliver: Option<bool>,
    to: Option<String>,
    channel: Option<String>,
    run_id: Option<String>,
}

/// `agent` and `chat.send` share the same submission path; `chat.send`
/// just makes the caller-chosen run id explicit.
async fn submit(ctx: MethodContext) -> MethodResult {
    let params: AgentParams = ctx.parse_params()?;
    if params.message.trim().is_empty() {
        return Err(ErrorShape::new(error_codes::INVALID_REQUEST, "empty message"));
    }
    let cfg = ctx.state.cfg();
    let session_key = params.session_key.clone().unwrap_or_else(|| {
        derive_session_key(
            &cfg.agent.id,
            Channel::WebChat,
            ChatType::Direct,
            &ctx.conn_id,
            cfg.session.main_collapse,
        )
    });

    let think_override = params.thinking.as_deref().and_then(ThinkingLevel::parse);
    let deliver = params.deliver.unwrap_or(false);
    let target = match (&params.channel, &params.to) {
        (Some(channel), Some(to)) => {
            let channel = Channel::parse(channel).ok_or_else(|| {
                ErrorShape::new(error_codes::INVALID_REQUEST, "unknown channel")
            })?;
            Some(clawdis_common::types::DeliveryTarget {
                channel,
                provider: channel.as_str().to_string(),
                to: to.clone(),
                account_id: None,
            })
        },
        _ => None,
    };

    let envelope = Envelope {
        channel: Channel::WebChat,
        provider: "webchat".into(),
        from: format!("client-{}", ctx.conn_id),
        chat_type: ChatType::Direct,
        chat_key: ctx.conn_id.clone(),
        account_id: None,
        body: params.message.clone(),
        raw_body: params.message.clone(),
        media: vec![],
        mentions: vec![],
        reply_to: None,
        received_at: now_ms(),
        message_id: uuid::Uuid::new_v4().to_string(),
        deliver,
    };

    let job = PromptJob {
        run_id: params.run_id.unwrap_or_default(),
        session_key,
        sender: None,
        body: params.message,
        body_prefix: None,
        kind: JobKind::Chat,
        mode: QueueMode::Queue,
        envelope: Some(envelope),
        target: target.clone(),
        deliver: deliver && target.is_some(),
        think_override,
        verbose_override: None,
        heartbeat: None,
    };
    let run_id = ctx.state.scheduler.submit_chat(job).await;
    Ok(serde_json::json!({ "runId": run_id }))
}

async fn agent(ctx: MethodContext) -> MethodResult {
    submit(ctx).await
}

async fn chat_send(ctx: MethodContext) -> MethodResult {
    submit(ctx).await
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryParams {
    session_key: String,
}

async fn chat_history(ctx: MethodContext) -> MethodResult {
    let params: HistoryParams = ctx.parse_params()?;
    let messages = ctx
        .state
        .transcripts
        .read(&params.session_key)
        .await
        .map_err(|e| ErrorShape::new(error_codes::UNAVAILABLE, e.to_string()))?;
    Ok(serde_json::json!({ "messages": messages }))
}
