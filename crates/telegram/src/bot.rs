//! Long-polling loop and inbound normalization for one bot account.

use std::sync::Arc;

use {
    teloxide::{
        ApiError, Bot, RequestError,
        prelude::*,
        types::{AllowedUpdate, Message, UpdateKind},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    clawdis_channels::{InboundSink, normalize::normalize_body},
    clawdis_common::{
        time::now_ms,
        types::{Channel, ChatType, Envelope, MediaKind, MediaPayload},
    },
};

pub const PROVIDER: &str = "telegram-bot";

/// Run the polling loop for one account until cancelled. Spawned by the
/// plugin; errors back off and retry, a token conflict stops the account.
pub async fn poll_account(
    bot: Bot,
    account_id: String,
    sink: Arc<dyn InboundSink>,
    cancel: CancellationToken,
) {
    info!(account_id, "starting telegram polling loop");
    let mut offset: i32 = 0;

    loop {
        if cancel.is_cancelled() {
            info!(account_id, "telegram polling stopped");
            break;
        }

        let result = bot
            .get_updates()
            .offset(offset)
            .timeout(30)
            .allowed_updates(vec![AllowedUpdate::Message])
            .await;

        match result {
            Ok(updates) => {
                for update in updates {
                    offset = update.id.as_offset();
                    if let UpdateKind::Message(msg) = update.kind {
                        debug!(account_id, chat_id = msg.chat.id.0, "telegram message");
                        if let Some(envelope) = message_to_envelope(&msg, &account_id) {
                            sink.dispatch(envelope).await;
                        }
                    }
                }
            },
            Err(e) => {
                if matches!(&e, RequestError::Api(ApiError::TerminatedByOtherGetUpdates)) {
                    warn!(
                        account_id,
                        "telegram account stopped: another instance holds this token"
                    );
                    break;
                }
                warn!(account_id, error = %e, "telegram getUpdates failed");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            },
        }
    }
}

/// Normalize a Telegram message into an [`Envelope`]. Returns `None` for
/// payloads with neither text nor media (joins, stickers, …).
pub fn message_to_envelope(msg: &Message, account_id: &str) -> Option<Envelope> {
    let raw_body = msg
        .text()
        .or_else(|| msg.caption())
        .map(str::to_string)
        .unwrap_or_default();
    let media = collect_media(msg);
    if raw_body.is_empty() && media.is_empty() {
        return None;
    }

    let chat_type = if msg.chat.is_channel() {
        ChatType::Channel
    } else if msg.chat.is_private() {
        ChatType::Direct
    } else {
        ChatType::Group
    };

    let from = msg
        .from
        .as_ref()
        .map(|u| u.id.0.to_string())
        .unwrap_or_else(|| msg.chat.id.0.to_string());

    Some(Envelope {
        channel: Channel::Telegram,
        provider: PROVIDER.into(),
        from,
        chat_type,
        chat_key: msg.chat.id.0.to_string(),
        account_id: Some(account_id.to_string()),
        body: normalize_body(&raw_body),
        mentions: extract_mentions(&raw_body),
        raw_body,
        media,
        reply_to: msg.reply_to_message().map(|m| m.id.0.to_string()),
        received_at: now_ms(),
        message_id: format!("{}:{}", msg.chat.id.0, msg.id.0),
        deliver: true,
    })
}

/// `@name` tokens from the text or caption; mention detection includes
/// media captions by construction since captions feed the body.
fn extract_mentions(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter(|w| w.len() > 1 && w.starts_with('@'))
        .map(|w| w.trim_end_matches([',', '.', ':', '!', '?']).to_string())
        .collect()
}

fn collect_media(msg: &Message) -> Vec<MediaPayload> {
    let mut out = Vec::new();
    if let Some(sizes) = msg.photo()
        && let Some(best) = sizes.last()
    {
        out.push(MediaPayload {
            kind: MediaKind::Image,
            url: Some(format!("tgfile:{}", best.file.id)),
            bytes: None,
            mime: "image/jpeg".into(),
            size_bytes: best.file.size as u64,
        });
    }
    if let Some(audio) = msg.audio() {
        out.push(MediaPayload {
            kind: MediaKind::Audio,
            url: Some(format!("tgfile:{}", audio.file.id)),
            bytes: None,
            mime: audio
                .mime_type
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "audio/mpeg".into()),
            size_bytes: audio.file.size as u64,
        });
    }
    if let Some(video) = msg.video() {
        out.push(MediaPayload {
            kind: MediaKind::Video,
            url: Some(format!("tgfile:{}", video.file.id)),
            bytes: None,
            mime: video
                .mime_type
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "video/mp4".into()),
            size_bytes: video.file.size as u64,
        });
    }
    if let Some(doc) = msg.document() {
        out.push(MediaPayload {
            kind: MediaKind::Document,
            url: Some(format!("tgfile:{}", doc.file.id)),
            bytes: None,
            mime: doc
                .mime_type
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "application/octet-stream".into()),
            size_bytes: doc.file.size as u64,
        });
    }
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mention_extraction_trims_punctuation() {
        let mentions = extract_mentions("hey @clawdis, ping @other_bot! not@this");
        assert_eq!(mentions, vec!["@clawdis".to_string(), "@other_bot".to_string()]);
    }

    #[test]
    fn bare_at_is_not_a_mention() {
        assert!(extract_mentions("an @ sign").is_empty());
    }
}
