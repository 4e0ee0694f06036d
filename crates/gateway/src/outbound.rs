//! Outbound delivery: think-stripping, chunking, media caps, degrade
//! paths, typing indicators.

use std::sync::Arc;

use {anyhow::Result, tracing::warn};

use {
    clawdis_channels::{ChannelRegistry, chunk::chunk_text},
    clawdis_common::types::{Channel, DeliveryTarget, ReplyPayload},
    clawdis_config::ConfigHandle,
};

/// Suffix appended when a timed-out run delivers its partial output.
pub const TRUNCATED_SUFFIX: &str = "(truncated due to timeout)";

pub struct OutboundDelivery {
    registry: Arc<tokio::sync::RwLock<ChannelRegistry>>,
    config: ConfigHandle,
}

impl OutboundDelivery {
    #[must_use]
    pub fn new(registry: Arc<tokio::sync::RwLock<ChannelRegistry>>, config: ConfigHandle) -> Self {
        Self { registry, config }
    }

    /// Deliver a reply to a transport target: strip think segments, raise
    /// the typing indicator, chunk text, enforce media caps, degrade failed
    /// media to caption-only with a trailing warning.
    pub async fn deliver(&self, target: &DeliveryTarget, payload: &ReplyPayload) -> Result<()> {
        let outbound = self
            .registry
            .read()
            .await
            .outbound(target.channel)
            .ok_or_else(|| anyhow::anyhow!("no adapter for channel {}", target.channel))?;

        let text = strip_think_segments(&payload.text);
        let account_id = target.account_id.as_deref();

        // Typing goes up as soon as we have any payload to push.
        if !text.is_empty() || !payload.media.is_empty() {
            let _ = outbound.send_typing(account_id, &target.to).await;
        }

        let mut warnings: Vec<String> = Vec::new();
        let mut caption_used = false;
        for media in &payload.media {
            if !media.within_cap() {
                warn!(kind = ?media.kind, size = media.size_bytes, "media over cap, dropped");
                warnings.push(format!("(attachment dropped: {:?} over size limit)", media.kind));
                continue;
            }
            let caption = (!caption_used && !text.is_empty()).then_some(text.as_str());
            match outbound
                .send_media(account_id, &target.to, media, caption)
                .await
            {
                Ok(()) => caption_used |= caption.is_some(),
                Err(e) => {
                    warn!(error = %e, kind = ?media.kind, "media send failed, degrading to text");
                    warnings.push(format!("(attachment could not be sent: {:?})", media.kind));
                },
            }
        }

        let mut remaining = if caption_used { String::new() } else { text };
        if !warnings.is_empty() {
            if !remaining.is_empty() {
                remaining.push('\n');
            }
            remaining.push_str(&warnings.join("\n"));
        }
        if !remaining.is_empty() {
            let max = self.chunk_chars(target.channel);
            for piece in chunk_text(&remaining, max) {
                outbound.send_text(account_id, &target.to, &piece).await?;
            }
        }
        Ok(())
    }

    fn chunk_chars(&self, channel: Channel) -> usize {
        self.config.current().channel(channel).chunk_chars()
    }
}

/// Remove `<think>…</think>` spans; reasoning never reaches external
/// surfaces.
#[must_use]
pub fn strip_think_segments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("<think>") {
        out.push_str(&rest[..open]);
        match rest[open..].find("</think>") {
            Some(close) => rest = &rest[open + close + "</think>".len()..],
            None => {
                // Unterminated span: drop the tail.
                rest = "";
            },
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}
