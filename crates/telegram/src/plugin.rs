//! Telegram channel plugin: account lifecycle and health probing.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use {
    anyhow::Result,
    async_trait::async_trait,
    teloxide::{Bot, prelude::*},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use {
    clawdis_channels::plugin::{ChannelHealth, ChannelOutbound, ChannelPlugin, InboundSink},
    clawdis_common::{time::now_ms, types::Channel},
    clawdis_config::ChannelConfig,
};

use crate::{
    bot::{PROVIDER, poll_account},
    outbound::{BotMap, TelegramOutbound},
};

pub struct TelegramPlugin {
    config: ChannelConfig,
    sink: Arc<dyn InboundSink>,
    bots: BotMap,
    cancels: RwLock<Vec<CancellationToken>>,
    linked_at: RwLock<Option<u64>>,
}

impl TelegramPlugin {
    #[must_use]
    pub fn new(config: ChannelConfig, sink: Arc<dyn InboundSink>) -> Self {
        Self {
            config,
            sink,
            bots: Arc::new(RwLock::new(HashMap::new())),
            cancels: RwLock::new(Vec::new()),
            linked_at: RwLock::new(None),
        }
    }
}

#[async_trait]
impl ChannelPlugin for TelegramPlugin {
    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn start(&self) -> Result<()> {
        for (account_id, account) in &self.config.accounts {
            let Some(token) = &account.bot_token else {
                warn!(account_id, "telegram account has no bot token, skipped");
                continue;
            };
            let bot = Bot::new(token.expose());

            // Verify credentials and clear any webhook so long polling works.
            let me = bot.get_me().await?;
            bot.delete_webhook().send().await?;
            info!(account_id, username = ?me.username, "telegram bot connected");

            self.bots
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(account_id.clone(), bot.clone());

            let cancel = CancellationToken::new();
            self.cancels
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .push(cancel.clone());
            tokio::spawn(poll_account(
                bot,
                account_id.clone(),
                Arc::clone(&self.sink),
                cancel,
            ));
        }
        let any_started = !self
            .bots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty();
        if any_started {
            *self.linked_at.write().unwrap_or_else(|e| e.into_inner()) = Some(now_ms());
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        for cancel in self.cancels.write().unwrap_or_else(|e| e.into_inner()).drain(..) {
            cancel.cancel();
        }
        self.bots.write().unwrap_or_else(|e| e.into_inner()).clear();
        *self.linked_at.write().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    fn outbound(&self) -> Arc<dyn ChannelOutbound> {
        Arc::new(TelegramOutbound {
            bots: Arc::clone(&self.bots),
        })
    }

    async fn probe(&self) -> ChannelHealth {
        let linked = !self
            .bots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty();
        ChannelHealth {
            linked,
            last_linked_at: *self.linked_at.read().unwrap_or_else(|e| e.into_inner()),
            detail: None,
        }
    }
}
