//! Discord channel plugin: gateway connection, normalization, outbound.

use std::sync::Arc;

use {
    anyhow::Result,
    async_trait::async_trait,
    serenity::all::{
        ChannelId, Client, Context, CreateAttachment, CreateMessage, EventHandler, GatewayIntents,
        Http, Message, Ready,
    },
    tokio::sync::RwLock,
    tracing::{info, warn},
};

use {
    clawdis_channels::{
        chunk::chunk_text,
        normalize::normalize_body,
        plugin::{ChannelHealth, ChannelOutbound, ChannelPlugin, InboundSink},
    },
    clawdis_common::{
        time::now_ms,
        types::{Channel, ChatType, Envelope, MediaKind, MediaPayload},
    },
    clawdis_config::ChannelConfig,
};

use crate::MAX_MESSAGE_LEN;

pub const PROVIDER: &str = "discord-bot";

type HttpHolder = Arc<RwLock<Option<Arc<Http>>>>;

pub struct DiscordPlugin {
    config: ChannelConfig,
    sink: Arc<dyn InboundSink>,
    http: HttpHolder,
    shard_manager: RwLock<Option<Arc<serenity::gateway::ShardManager>>>,
    linked_at: RwLock<Option<u64>>,
}

impl DiscordPlugin {
    #[must_use]
    pub fn new(config: ChannelConfig, sink: Arc<dyn InboundSink>) -> Self {
        Self {
            config,
            sink,
            http: Arc::new(RwLock::new(None)),
            shard_manager: RwLock::new(None),
            linked_at: RwLock::new(None),
        }
    }
}

#[async_trait]
impl ChannelPlugin for DiscordPlugin {
    fn channel(&self) -> Channel {
        Channel::Discord
    }

    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn start(&self) -> Result<()> {
        let Some(token) = self
            .config
            .accounts
            .values()
            .find_map(|a| a.bot_token.clone())
        else {
            warn!("no discord bot token configured, adapter idle");
            return Ok(());
        };

        let intents = GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;
        let handler = Handler {
            sink: Arc::clone(&self.sink),
            http: Arc::clone(&self.http),
        };
        let mut client = Client::builder(token.expose(), intents)
            .event_handler(handler)
            .await?;
        *self.shard_manager.write().await = Some(client.shard_manager.clone());
        *self.linked_at.write().await = Some(now_ms());
        tokio::spawn(async move {
            if let Err(e) = client.start().await {
                warn!(error = %e, "discord client stopped");
            }
        });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(manager) = self.shard_manager.write().await.take() {
            manager.shutdown_all().await;
        }
        self.http.write().await.take();
        *self.linked_at.write().await = None;
        Ok(())
    }

    fn outbound(&self) -> Arc<dyn ChannelOutbound> {
        Arc::new(DiscordOutbound {
            http: Arc::clone(&self.http),
        })
    }

    async fn probe(&self) -> ChannelHealth {
        ChannelHealth {
            linked: self.http.read().await.is_some(),
            last_linked_at: *self.linked_at.read().await,
            detail: None,
        }
    }
}

// ── Inbound ──────────────────────────────────────────────────────────────────

struct Handler {
    sink: Arc<dyn InboundSink>,
    http: HttpHolder,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, "discord bot connected");
        *self.http.write().await = Some(ctx.http.clone());
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let (chat_type, chat_key) = match msg.guild_id {
            Some(guild) => (
                ChatType::Group,
                format!("guild:{guild}:channel:{}", msg.channel_id),
            ),
            None => (ChatType::Direct, format!("dm:{}", msg.channel_id)),
        };

        let mut mentions: Vec<String> = msg
            .mentions
            .iter()
            .flat_map(|u| [format!("@{}", u.name), u.id.to_string()])
            .collect();
        mentions.dedup();

        let media = msg
            .attachments
            .iter()
            .map(|a| MediaPayload {
                kind: media_kind(a.content_type.as_deref()),
                url: Some(a.url.clone()),
                bytes: None,
                mime: a
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".into()),
                size_bytes: a.size as u64,
            })
            .collect();

        let envelope = Envelope {
            channel: Channel::Discord,
            provider: PROVIDER.into(),
            from: msg.author.id.to_string(),
            chat_type,
            chat_key,
            account_id: None,
            body: normalize_body(&msg.content),
            raw_body: msg.content.clone(),
            media,
            mentions,
            reply_to: msg
                .referenced_message
                .as_ref()
                .map(|m| m.id.to_string()),
            received_at: now_ms(),
            message_id: msg.id.to_string(),
            deliver: true,
        };
        self.sink.dispatch(envelope).await;
    }
}

fn media_kind(content_type: Option<&str>) -> MediaKind {
    match content_type {
        Some(ct) if ct.starts_with("image/") => MediaKind::Image,
        Some(ct) if ct.starts_with("audio/") => MediaKind::Audio,
        Some(ct) if ct.starts_with("video/") => MediaKind::Video,
        _ => MediaKind::Document,
    }
}

// ── Outbound ─────────────────────────────────────────────────────────────────

struct DiscordOutbound {
    http: HttpHolder,
}

impl DiscordOutbound {
    async fn http(&self) -> Result<Arc<Http>> {
        self.http
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow::anyhow!("discord is not connected"))
    }
}

/// Extract the numeric channel id from a chat key
/// (`guild:<g>:channel:<id>` or `dm:<id>`).
fn channel_id(to: &str) -> Result<ChannelId> {
    let id = to
        .rsplit(':')
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| anyhow::anyhow!("bad discord target: {to}"))?;
    Ok(ChannelId::new(id))
}

#[async_trait]
impl ChannelOutbound for DiscordOutbound {
    async fn send_text(&self, _account_id: Option<&str>, to: &str, text: &str) -> Result<()> {
        let http = self.http().await?;
        let channel = channel_id(to)?;
        for piece in chunk_text(text, MAX_MESSAGE_LEN) {
            channel.say(&http, piece).await?;
        }
        Ok(())
    }

    async fn send_media(
        &self,
        _account_id: Option<&str>,
        to: &str,
        media: &MediaPayload,
        caption: Option<&str>,
    ) -> Result<()> {
        let http = self.http().await?;
        let channel = channel_id(to)?;
        let mut message = CreateMessage::new();
        if let Some(caption) = caption {
            message = message.content(caption.to_string());
        }
        if let Some(bytes) = &media.bytes {
            let name = format!("attachment.{}", extension(&media.mime));
            message = message.add_file(CreateAttachment::bytes(bytes.clone(), name));
        } else if let Some(url) = &media.url {
            message = message.content(match caption {
                Some(c) => format!("{c}\n{url}"),
                None => url.clone(),
            });
        }
        channel.send_message(&http, message).await?;
        Ok(())
    }

    async fn send_typing(&self, _account_id: Option<&str>, to: &str) -> Result<()> {
        let http = self.http().await?;
        channel_id(to)?.broadcast_typing(&http).await?;
        Ok(())
    }
}

fn extension(mime: &str) -> &str {
    match mime {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "audio/mpeg" => "mp3",
        "video/mp4" => "mp4",
        _ => "bin",
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_from_guild_and_dm_keys() {
        assert_eq!(
            channel_id("guild:1:channel:42").unwrap(),
            ChannelId::new(42)
        );
        assert_eq!(channel_id("dm:7").unwrap(), ChannelId::new(7));
        assert!(channel_id("nonsense").is_err());
    }

    #[test]
    fn media_kind_from_content_type() {
        assert_eq!(media_kind(Some("image/png")), MediaKind::Image);
        assert_eq!(media_kind(Some("video/mp4")), MediaKind::Video);
        assert_eq!(media_kind(None), MediaKind::Document);
    }
}
