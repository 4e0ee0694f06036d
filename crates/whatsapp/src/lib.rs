//! WhatsApp Web transport adapter.
//!
//! The WhatsApp Web library itself runs in a sidecar process; this crate
//! owns the process lifecycle and speaks the line-delimited JSON envelope
//! contract with it. The gateway never links the library directly.

pub mod plugin;
pub mod sidecar;
pub mod wire;

pub use plugin::WhatsAppPlugin;
