//! Scheduled jobs and heartbeat helpers.

pub mod heartbeat;
pub mod parse;
pub mod service;
pub mod store_file;
pub mod types;

pub use {
    service::{CronService, CronSink},
    types::{CronJob, CronJobCreate, CronPayload, CronSchedule, RunStatus},
};
