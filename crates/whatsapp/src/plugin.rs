//! WhatsApp channel plugin over the sidecar contract.

use std::sync::{Arc, RwLock};

use {anyhow::Result, async_trait::async_trait, tracing::warn};

use {
    clawdis_channels::{
        normalize::normalize_body,
        plugin::{ChannelHealth, ChannelOutbound, ChannelPlugin, InboundSink},
    },
    clawdis_common::{
        time::now_ms,
        types::{Channel, Envelope, MediaPayload},
    },
};

use crate::{
    sidecar::Sidecar,
    wire::{SidecarCommand, SidecarEvent},
};

pub const PROVIDER: &str = "whatsapp-web";

#[derive(Debug, Clone, Copy, Default)]
struct LinkState {
    web_auth_exists: bool,
    has_active_web_listener: bool,
    linked_at: Option<u64>,
}

pub struct WhatsAppPlugin {
    sidecar_cmd: Vec<String>,
    sidecar: Arc<Sidecar>,
    sink: Arc<dyn InboundSink>,
    link: Arc<RwLock<LinkState>>,
}

impl WhatsAppPlugin {
    #[must_use]
    pub fn new(sidecar_cmd: Vec<String>, sink: Arc<dyn InboundSink>) -> Self {
        Self {
            sidecar_cmd,
            sidecar: Arc::new(Sidecar::new()),
            sink,
            link: Arc::new(RwLock::new(LinkState::default())),
        }
    }
}

#[async_trait]
impl ChannelPlugin for WhatsAppPlugin {
    fn channel(&self) -> Channel {
        Channel::WhatsApp
    }

    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn start(&self) -> Result<()> {
        let sink = Arc::clone(&self.sink);
        let link = Arc::clone(&self.link);
        let handler = Arc::new(move |event: SidecarEvent| match event {
            SidecarEvent::Status {
                web_auth_exists,
                has_active_web_listener,
            } => {
                let mut state = link.write().unwrap_or_else(|e| e.into_inner());
                let was_linked = state.web_auth_exists && state.has_active_web_listener;
                state.web_auth_exists = web_auth_exists;
                state.has_active_web_listener = has_active_web_listener;
                if !was_linked && web_auth_exists && has_active_web_listener {
                    state.linked_at = Some(now_ms());
                }
            },
            SidecarEvent::Inbound {
                from,
                chat_type,
                chat_key,
                body,
                media,
                mentions,
                reply_to,
                message_id,
            } => {
                let envelope = Envelope {
                    channel: Channel::WhatsApp,
                    provider: PROVIDER.into(),
                    from,
                    chat_type,
                    chat_key,
                    account_id: None,
                    body: normalize_body(&body),
                    raw_body: body,
                    media,
                    mentions,
                    reply_to,
                    received_at: now_ms(),
                    message_id,
                    deliver: true,
                };
                let sink = Arc::clone(&sink);
                tokio::spawn(async move { sink.dispatch(envelope).await });
            },
            SidecarEvent::SendResult { .. } => {},
        });
        self.sidecar.start(&self.sidecar_cmd, handler).await?;
        self.sidecar.send(SidecarCommand::Probe {}).await
    }

    async fn stop(&self) -> Result<()> {
        self.sidecar.stop().await;
        Ok(())
    }

    fn outbound(&self) -> Arc<dyn ChannelOutbound> {
        Arc::new(WhatsAppOutbound {
            sidecar: Arc::clone(&self.sidecar),
        })
    }

    async fn probe(&self) -> ChannelHealth {
        let state = *self.link.read().unwrap_or_else(|e| e.into_inner());
        let running = self.sidecar.is_running().await;
        if !running {
            warn!("whatsapp sidecar not running");
        }
        ChannelHealth {
            linked: running && state.web_auth_exists && state.has_active_web_listener,
            last_linked_at: state.linked_at,
            detail: (!state.web_auth_exists).then(|| "web credentials missing".into()),
        }
    }
}

struct WhatsAppOutbound {
    sidecar: Arc<Sidecar>,
}

#[async_trait]
impl ChannelOutbound for WhatsAppOutbound {
    async fn send_text(&self, _account_id: Option<&str>, to: &str, text: &str) -> Result<()> {
        self.sidecar
            .send(SidecarCommand::SendText {
                id: uuid::Uuid::new_v4().to_string(),
                to: to.to_string(),
                text: text.to_string(),
            })
            .await
    }

    async fn send_media(
        &self,
        _account_id: Option<&str>,
        to: &str,
        media: &MediaPayload,
        caption: Option<&str>,
    ) -> Result<()> {
        self.sidecar
            .send(SidecarCommand::SendMedia {
                id: uuid::Uuid::new_v4().to_string(),
                to: to.to_string(),
                media: media.clone(),
                caption: caption.map(ToString::to_string),
            })
            .await
    }

    async fn send_typing(&self, _account_id: Option<&str>, to: &str) -> Result<()> {
        self.sidecar
            .send(SidecarCommand::Typing { to: to.to_string() })
            .await
    }
}
