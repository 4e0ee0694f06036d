//! Registry of active channel plugins.

use std::{collections::HashMap, sync::Arc};

use clawdis_common::types::Channel;

use crate::plugin::{ChannelHealth, ChannelOutbound, ChannelPlugin};

/// Maps logical channels to their active plugin.
#[derive(Default)]
pub struct ChannelRegistry {
    plugins: HashMap<Channel, Arc<dyn ChannelPlugin>>,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn ChannelPlugin>) {
        self.plugins.insert(plugin.channel(), plugin);
    }

    #[must_use]
    pub fn get(&self, channel: Channel) -> Option<&Arc<dyn ChannelPlugin>> {
        self.plugins.get(&channel)
    }

    #[must_use]
    pub fn outbound(&self, channel: Channel) -> Option<Arc<dyn ChannelOutbound>> {
        self.plugins.get(&channel).map(|p| p.outbound())
    }

    #[must_use]
    pub fn channels(&self) -> Vec<Channel> {
        self.plugins.keys().copied().collect()
    }

    /// Probe every registered channel.
    pub async fn probe_all(&self) -> HashMap<Channel, ChannelHealth> {
        let mut out = HashMap::new();
        for (channel, plugin) in &self.plugins {
            out.insert(*channel, plugin.probe().await);
        }
        out
    }
}
