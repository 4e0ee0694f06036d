//! The Clawdis gateway daemon: inbound pipeline, session scheduler, agent
//! runs, heartbeats, node bridge glue, and the control-plane WebSocket.

pub mod broadcast;
pub mod dispatch;
pub mod heartbeat;
pub mod methods;
pub mod nodes;
pub mod outbound;
pub mod run;
pub mod scheduler;
pub mod server;
pub mod state;
pub mod ws;

pub use {
    scheduler::{JobKind, PromptJob, RunExecutor, RunOutcome, RunState, SessionScheduler},
    server::run_gateway,
    state::GatewayState,
};
