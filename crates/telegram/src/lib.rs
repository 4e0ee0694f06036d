//! Telegram transport adapter (Bot API long polling via teloxide).

pub mod bot;
pub mod outbound;
pub mod plugin;

pub use plugin::TelegramPlugin;

/// Telegram's hard message length cap.
pub const MAX_MESSAGE_LEN: usize = 4096;
