//! Discord transport adapter (gateway connection via serenity).

pub mod plugin;

pub use plugin::DiscordPlugin;

/// Discord's message length cap.
pub const MAX_MESSAGE_LEN: usize = 2000;
