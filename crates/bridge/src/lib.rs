//! Paired-node bridge: an mDNS-advertised TCP listener speaking
//! line-delimited JSON with companion devices. Handles pairing approval,
//! token auth, host→node invokes, and node→host events.

pub mod advertise;
pub mod pairing;
pub mod server;
pub mod store;

pub use {
    pairing::{OperatorPrompt, PairRequest},
    server::{BridgeEventSink, BridgeServer},
    store::{NodeStore, PairedNode},
};
