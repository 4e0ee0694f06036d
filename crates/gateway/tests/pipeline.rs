//! End-to-end pipeline tests over a scripted agent worker: directive pins,
//! stop words, group gating, and heartbeat visibility.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{sync::Arc, time::Duration};

use {anyhow::Result, async_trait::async_trait, tokio::sync::Mutex};

use {
    clawdis_channels::plugin::{ChannelHealth, ChannelOutbound, ChannelPlugin},
    clawdis_common::{
        time::now_ms,
        types::{Channel, ChatType, Envelope, MediaPayload, ThinkingLevel},
    },
    clawdis_config::{ClawdisConfig, ConfigHandle, HeartbeatConfig, HeartbeatVisibility},
    clawdis_gateway::{GatewayState, dispatch::handle_inbound, heartbeat::run_heartbeat_once},
};

// ── Recording channel plugin ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct SentMessage {
    account_id: Option<String>,
    to: String,
    text: String,
}

struct RecordingPlugin {
    channel: Channel,
    provider: String,
    linked: bool,
    sent: Arc<Mutex<Vec<SentMessage>>>,
}

impl RecordingPlugin {
    fn new(channel: Channel, linked: bool) -> Arc<Self> {
        Arc::new(Self {
            channel,
            provider: format!("{channel}-test"),
            linked,
            sent: Arc::new(Mutex::new(Vec::new())),
        })
    }

    async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }
}

struct RecordingOutbound {
    sent: Arc<Mutex<Vec<SentMessage>>>,
}

#[async_trait]
impl ChannelOutbound for RecordingOutbound {
    async fn send_text(&self, account_id: Option<&str>, to: &str, text: &str) -> Result<()> {
        self.sent.lock().await.push(SentMessage {
            account_id: account_id.map(ToString::to_string),
            to: to.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_media(
        &self,
        _account_id: Option<&str>,
        _to: &str,
        _media: &MediaPayload,
        _caption: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ChannelPlugin for RecordingPlugin {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn outbound(&self) -> Arc<dyn ChannelOutbound> {
        Arc::new(RecordingOutbound {
            sent: Arc::clone(&self.sent),
        })
    }

    async fn probe(&self) -> ChannelHealth {
        ChannelHealth {
            linked: self.linked,
            last_linked_at: self.linked.then(now_ms),
            detail: None,
        }
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

/// Scripted worker: answers every `run` request with a fixed reply.
fn echo_worker_cmd(reply: &str) -> Vec<String> {
    let script = format!(
        r#"while IFS= read -r line; do
            case "$line" in
                *'"type":"run"'*)
                    id=$(printf '%s' "$line" | sed -n 's/.*"runId":"\([^"]*\)".*/\1/p')
                    printf '{{"type":"session_start","runId":"%s","sessionId":"sess-1"}}\n' "$id"
                    printf '{{"type":"final","runId":"%s","text":"{reply}"}}\n' "$id"
                    printf '{{"type":"agent_end","runId":"%s"}}\n' "$id"
                    ;;
            esac
        done"#
    );
    vec!["sh".into(), "-c".into(), script]
}

struct Harness {
    state: Arc<GatewayState>,
    telegram: Arc<RecordingPlugin>,
    whatsapp: Arc<RecordingPlugin>,
    _tmp: tempfile::TempDir,
}

async fn harness(reply: &str, mutate: impl FnOnce(&mut ClawdisConfig)) -> Harness {
    let mut cfg = ClawdisConfig::default();
    cfg.agent.worker_cmd = echo_worker_cmd(reply);
    cfg.channels.telegram.allow_from = vec!["*".into()];
    cfg.channels.whatsapp.allow_from = vec!["*".into()];
    mutate(&mut cfg);

    let tmp = tempfile::TempDir::new().unwrap();
    let state = GatewayState::new_at(ConfigHandle::new(cfg), tmp.path().to_path_buf()).unwrap();

    let telegram = RecordingPlugin::new(Channel::Telegram, true);
    let whatsapp = RecordingPlugin::new(Channel::WhatsApp, true);
    {
        let mut registry = state.registry.write().await;
        registry.register(Arc::clone(&telegram) as Arc<dyn ChannelPlugin>);
        registry.register(Arc::clone(&whatsapp) as Arc<dyn ChannelPlugin>);
    }
    // Let the worker supervisor spawn the child.
    tokio::time::sleep(Duration::from_millis(200)).await;

    Harness {
        state,
        telegram,
        whatsapp,
        _tmp: tmp,
    }
}

fn telegram_direct(body: &str) -> Envelope {
    Envelope {
        channel: Channel::Telegram,
        provider: "telegram-test".into(),
        from: "1001".into(),
        chat_type: ChatType::Direct,
        chat_key: "1001".into(),
        account_id: None,
        body: body.into(),
        raw_body: body.into(),
        media: vec![],
        mentions: vec![],
        reply_to: None,
        received_at: now_ms(),
        message_id: uuid::Uuid::new_v4().to_string(),
        deliver: true,
    }
}

fn group_message(body: &str, mentions: Vec<String>) -> Envelope {
    Envelope {
        channel: Channel::Telegram,
        provider: "telegram-test".into(),
        from: "2002".into(),
        chat_type: ChatType::Group,
        chat_key: "-100500".into(),
        account_id: None,
        body: body.into(),
        raw_body: body.into(),
        media: vec![],
        mentions,
        reply_to: None,
        received_at: now_ms(),
        message_id: uuid::Uuid::new_v4().to_string(),
        deliver: true,
    }
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn thinking_pin_directive() {
    let h = harness("agent says hi", |_| {}).await;

    handle_inbound(&h.state, telegram_direct("/think high")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sent = h.telegram.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, "Thinking level set to high.");

    let session = h.state.sessions.get("agent:main:main").await.unwrap();
    assert_eq!(session.thinking_level, ThinkingLevel::High);

    // The next prompt runs through the agent (with the pinned level) and
    // delivers the reply to the originating chat.
    handle_inbound(&h.state, telegram_direct("hi")).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    let sent = h.telegram.sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].text, "agent says hi");
    assert_eq!(sent[1].to, "1001");
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_thinking_level_replies_hint_without_mutation() {
    let h = harness("x", |_| {}).await;
    handle_inbound(&h.state, telegram_direct("/think enormous")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sent = h.telegram.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("Unknown thinking level"));

    let session = h.state.sessions.get("agent:main:main").await;
    assert!(
        session.is_none() || session.unwrap().thinking_level == ThinkingLevel::Off,
        "invalid level must not mutate state"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_word_aborts_and_primes_reminder() {
    let h = harness("later reply", |_| {}).await;

    handle_inbound(&h.state, telegram_direct("abort")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sent = h.telegram.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, "Agent was aborted.");
    let session = h.state.sessions.get("agent:main:main").await.unwrap();
    assert!(session.aborted);

    // Next non-stop message runs and clears the flag.
    handle_inbound(&h.state, telegram_direct("hello again")).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    let session = h.state.sessions.get("agent:main:main").await.unwrap();
    assert!(!session.aborted);
    let sent = h.telegram.sent().await;
    assert_eq!(sent.len(), 2, "agent reply delivered after abort reminder");
}

#[tokio::test(flavor = "multi_thread")]
async fn unallowlisted_direct_sender_never_schedules() {
    let h = harness("should not appear", |cfg| {
        cfg.channels.telegram.allow_from = vec!["someone-else".into()];
    })
    .await;

    handle_inbound(&h.state, telegram_direct("hello?")).await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(h.telegram.sent().await.is_empty());
    assert!(
        h.state.sessions.get("agent:main:main").await.is_none(),
        "rejected envelopes must not create sessions"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn group_requires_mention_by_default() {
    let h = harness("group reply", |cfg| {
        cfg.channels.telegram.allow_from = vec!["-100500".into()];
        cfg.agent.id = "main".into();
    })
    .await;

    handle_inbound(&h.state, group_message("hello", vec![])).await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(h.telegram.sent().await.is_empty(), "no mention, no run");

    handle_inbound(&h.state, group_message("@main hello", vec!["@main".into()])).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    let sent = h.telegram.sent().await;
    assert_eq!(sent.len(), 1, "mention activates exactly one run");
    assert_eq!(sent[0].to, "-100500");
}

#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_ok_is_filtered_when_show_ok_off() {
    let h = harness("<b>HEARTBEAT_OK</b>", |_| {}).await;

    // Establish a last route on the main session via a normal turn.
    handle_inbound(&h.state, telegram_direct("hi")).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    let before = h.state.sessions.get("agent:main:main").await.unwrap();
    let sends_before = h.telegram.sent().await.len();

    let hb = HeartbeatConfig {
        every: Some("5m".into()),
        visibility: HeartbeatVisibility {
            show_ok: false,
            show_alerts: true,
            use_indicator: false,
        },
        ..Default::default()
    };
    run_heartbeat_once(&h.state, Channel::Telegram, &hb).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(
        h.telegram.sent().await.len(),
        sends_before,
        "HEARTBEAT_OK must not be delivered when showOk is off"
    );
    let after = h.state.sessions.get("agent:main:main").await.unwrap();
    assert!(after.updated_at >= before.updated_at, "updatedAt never regresses");
    assert_eq!(after.last_to, before.last_to, "heartbeat must not touch the route");
    assert_eq!(after.last_channel, before.last_channel);
}

#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_alert_delivers_with_account_override() {
    let h = harness("Disk almost full on the home server", |_| {}).await;

    handle_inbound(&h.state, telegram_direct("hi")).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    let sends_before = h.telegram.sent().await.len();

    let hb = HeartbeatConfig {
        every: Some("5m".into()),
        target: Some("telegram".into()),
        account_id: Some("work".into()),
        ..Default::default()
    };
    run_heartbeat_once(&h.state, Channel::Telegram, &hb).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    let sent = h.telegram.sent().await;
    assert_eq!(sent.len(), sends_before + 1, "exactly one heartbeat send");
    let last = sent.last().unwrap();
    assert_eq!(last.account_id.as_deref(), Some("work"));
    assert!(last.text.contains("Disk almost full"));
}

#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_skips_unlinked_provider() {
    let h = harness("HEARTBEAT_OK", |_| {}).await;
    // Route points at WhatsApp, which is not linked in this harness.
    let unlinked = RecordingPlugin::new(Channel::WhatsApp, false);
    {
        let mut registry = h.state.registry.write().await;
        registry.register(Arc::clone(&unlinked) as Arc<dyn ChannelPlugin>);
    }
    let _ = h
        .state
        .sessions
        .update("agent:main:main", |s| {
            s.set_last_route(Channel::WhatsApp, "whatsapp-test", "+1555");
        })
        .await;

    let hb = HeartbeatConfig {
        every: Some("5m".into()),
        visibility: HeartbeatVisibility {
            show_ok: true,
            show_alerts: true,
            use_indicator: false,
        },
        ..Default::default()
    };
    run_heartbeat_once(&h.state, Channel::WhatsApp, &hb).await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(unlinked.sent().await.is_empty(), "unlinked provider skips heartbeat");
    assert!(h.whatsapp.sent().await.is_empty());
}
