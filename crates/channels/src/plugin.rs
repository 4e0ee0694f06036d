//! Channel plugin traits — the seam between the gateway core and each
//! transport SDK. A plugin normalizes inbound messages into [`Envelope`]s,
//! pushed through an [`InboundSink`], and carries out outbound sends.

use {anyhow::Result, async_trait::async_trait};

use clawdis_common::types::{Channel, Envelope, MediaPayload};

/// Health snapshot for a transport connection.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelHealth {
    /// Credentials present and the transport listener is live.
    pub linked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_linked_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Where plugins push normalized inbound traffic. The gateway's dispatch
/// pipeline is the only production implementation.
#[async_trait]
pub trait InboundSink: Send + Sync {
    async fn dispatch(&self, envelope: Envelope);
}

/// One messaging transport (WhatsApp, Telegram, Discord, …).
#[async_trait]
pub trait ChannelPlugin: Send + Sync {
    fn channel(&self) -> Channel;

    /// Physical subprovider label carried on envelopes ("whatsapp-web").
    fn provider(&self) -> &str;

    /// Bring up the transport connection(s).
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Outbound sender for this transport.
    fn outbound(&self) -> std::sync::Arc<dyn ChannelOutbound>;

    /// Probe link state; heartbeats skip unlinked channels.
    async fn probe(&self) -> ChannelHealth;
}

/// Send messages out through a transport.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    async fn send_text(&self, account_id: Option<&str>, to: &str, text: &str) -> Result<()>;

    async fn send_media(
        &self,
        account_id: Option<&str>,
        to: &str,
        media: &MediaPayload,
        caption: Option<&str>,
    ) -> Result<()>;

    /// Raise a typing indicator. No-op by default.
    async fn send_typing(&self, _account_id: Option<&str>, _to: &str) -> Result<()> {
        Ok(())
    }
}
