//! Persistent per-conversation session state.
//!
//! The index lives in `sessions.json` (`{ [sessionKey]: Session }`) behind a
//! single writer actor; per-session transcripts are JSONL files under
//! `sessions/`.

pub mod key;
pub mod session;
pub mod store;
pub mod transcript;

pub use {
    key::derive_session_key,
    session::Session,
    store::SessionStore,
    transcript::TranscriptStore,
};
