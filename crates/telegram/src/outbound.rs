//! Outbound sends for Telegram accounts.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use {
    anyhow::Result,
    async_trait::async_trait,
    teloxide::{
        Bot,
        payloads::{SendDocumentSetters, SendPhotoSetters, SendVideoSetters},
        prelude::*,
        types::{ChatAction, ChatId, InputFile},
    },
};

use {
    clawdis_channels::{chunk::chunk_text, plugin::ChannelOutbound},
    clawdis_common::types::{MediaKind, MediaPayload},
};

use crate::MAX_MESSAGE_LEN;

pub(crate) type BotMap = Arc<RwLock<HashMap<String, Bot>>>;

/// Sends replies through whichever account the caller names; a lone
/// configured account is the implicit default.
pub struct TelegramOutbound {
    pub(crate) bots: BotMap,
}

impl TelegramOutbound {
    fn bot_for(&self, account_id: Option<&str>) -> Result<Bot> {
        let bots = self.bots.read().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = account_id {
            return bots
                .get(id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown telegram account: {id}"));
        }
        if let Some(bot) = bots.get("default") {
            return Ok(bot.clone());
        }
        let mut iter = bots.values();
        match (iter.next(), iter.next()) {
            (Some(bot), None) => Ok(bot.clone()),
            (None, _) => Err(anyhow::anyhow!("no telegram accounts configured")),
            _ => Err(anyhow::anyhow!("multiple telegram accounts; accountId required")),
        }
    }

    fn chat(to: &str) -> Result<ChatId> {
        Ok(ChatId(to.parse::<i64>()?))
    }
}

#[async_trait]
impl ChannelOutbound for TelegramOutbound {
    async fn send_text(&self, account_id: Option<&str>, to: &str, text: &str) -> Result<()> {
        let bot = self.bot_for(account_id)?;
        let chat = Self::chat(to)?;
        for piece in chunk_text(text, MAX_MESSAGE_LEN) {
            bot.send_message(chat, piece).await?;
        }
        Ok(())
    }

    async fn send_media(
        &self,
        account_id: Option<&str>,
        to: &str,
        media: &MediaPayload,
        caption: Option<&str>,
    ) -> Result<()> {
        let bot = self.bot_for(account_id)?;
        let chat = Self::chat(to)?;
        let input = input_file(media)?;
        match media.kind {
            MediaKind::Image => {
                let mut req = bot.send_photo(chat, input);
                if let Some(c) = caption {
                    req = req.caption(c.to_string());
                }
                req.await?;
            },
            MediaKind::Video => {
                let mut req = bot.send_video(chat, input);
                if let Some(c) = caption {
                    req = req.caption(c.to_string());
                }
                req.await?;
            },
            MediaKind::Audio => {
                bot.send_audio(chat, input).await?;
            },
            MediaKind::Document => {
                let mut req = bot.send_document(chat, input);
                if let Some(c) = caption {
                    req = req.caption(c.to_string());
                }
                req.await?;
            },
        }
        Ok(())
    }

    async fn send_typing(&self, account_id: Option<&str>, to: &str) -> Result<()> {
        let bot = self.bot_for(account_id)?;
        bot.send_chat_action(Self::chat(to)?, ChatAction::Typing)
            .await?;
        Ok(())
    }
}

fn input_file(media: &MediaPayload) -> Result<InputFile> {
    if let Some(bytes) = &media.bytes {
        return Ok(InputFile::memory(bytes.clone()));
    }
    if let Some(url) = &media.url {
        if let Some(file_id) = url.strip_prefix("tgfile:") {
            return Ok(InputFile::file_id(file_id.to_string()));
        }
        return Ok(InputFile::url(url::Url::parse(url)?));
    }
    Err(anyhow::anyhow!("media payload carries neither bytes nor url"))
}
