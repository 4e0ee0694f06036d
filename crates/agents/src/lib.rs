//! Agent runtime adapter: a supervised NDJSON worker subprocess, thinking
//! directives, verbose tool coalescing, and the model fallback chain.

pub mod coalesce;
pub mod fallback;
pub mod protocol;
pub mod thinking;
pub mod worker;

pub use {
    coalesce::ToolCoalescer,
    protocol::{RunRequest, Usage, WorkerEvent, WorkerRequest},
    worker::{AgentWorker, WorkerConfig},
};
