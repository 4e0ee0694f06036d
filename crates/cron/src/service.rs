//! Cron service loop: wake at the earliest due job, dispatch, reschedule.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Result,
    async_trait::async_trait,
    tokio::sync::{Mutex, Notify},
    tracing::{info, warn},
};

use clawdis_common::time::now_ms;

use crate::{
    parse::next_run_at,
    store_file::FileStore,
    types::{CronJob, CronJobCreate, CronPayload, RunStatus},
};

/// Executes job payloads. The gateway wires this to the session scheduler
/// and outbound delivery.
#[async_trait]
pub trait CronSink: Send + Sync {
    /// Run an agent turn as a forced-sync prompt.
    async fn run_agent_turn(
        &self,
        message: &str,
        deliver: bool,
        channel: Option<&str>,
        to: Option<&str>,
    ) -> Result<()>;

    /// Deliver fixed text to a channel (or the last route when unset).
    async fn announce(&self, text: &str, channel: Option<&str>, to: Option<&str>) -> Result<()>;
}

pub struct CronService {
    store: Mutex<FileStore>,
    sink: Arc<dyn CronSink>,
    wake: Notify,
}

impl CronService {
    pub fn open(path: PathBuf, sink: Arc<dyn CronSink>) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            store: Mutex::new(FileStore::open(path)?),
            sink,
            wake: Notify::new(),
        }))
    }

    pub async fn list(&self) -> Vec<CronJob> {
        self.store.lock().await.list().to_vec()
    }

    pub async fn add(&self, create: CronJobCreate) -> Result<CronJob> {
        let mut store = self.store.lock().await;
        let schedule = create.schedule.clone();
        let job = store.add(create)?;
        let next = next_run_at(&schedule, now_ms());
        store.update_state(&job.id, |s| s.next_run_at_ms = next)?;
        drop(store);
        self.wake.notify_one();
        Ok(job)
    }

    pub async fn remove(&self, id: &str) -> Result<bool> {
        let removed = self.store.lock().await.remove(id)?;
        self.wake.notify_one();
        Ok(removed)
    }

    /// Run a job immediately, outside its schedule.
    pub async fn run_now(&self, id: &str) -> Result<()> {
        let job = self
            .store
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown cron job: {id}"))?;
        self.execute(&job).await;
        Ok(())
    }

    /// Earliest scheduled fire time across enabled jobs.
    pub async fn next_run_at_ms(&self) -> Option<u64> {
        self.store
            .lock()
            .await
            .list()
            .iter()
            .filter(|j| j.enabled)
            .filter_map(|j| j.state.next_run_at_ms)
            .min()
    }

    /// Main loop; run as a task. Ticks on the earliest due job, re-arms on
    /// add/remove.
    pub async fn run(self: Arc<Self>) {
        // Seed next-run times for jobs loaded from disk.
        {
            let mut store = self.store.lock().await;
            let seeds: Vec<(String, Option<u64>)> = store
                .list()
                .iter()
                .filter(|j| j.state.next_run_at_ms.is_none())
                .map(|j| (j.id.clone(), next_run_at(&j.schedule, now_ms())))
                .collect();
            for (id, next) in seeds {
                let _ = store.update_state(&id, |s| s.next_run_at_ms = next);
            }
        }

        loop {
            let next = self.next_run_at_ms().await;
            let sleep_ms = next
                .map(|at| at.saturating_sub(now_ms()).max(250))
                .unwrap_or(60_000);

            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {},
                () = self.wake.notified() => continue,
            }

            let now = now_ms();
            let due: Vec<CronJob> = self
                .store
                .lock()
                .await
                .list()
                .iter()
                .filter(|j| j.enabled && j.state.next_run_at_ms.is_some_and(|at| at <= now))
                .cloned()
                .collect();

            for job in due {
                self.execute(&job).await;
            }
        }
    }

    async fn execute(&self, job: &CronJob) {
        info!(job = %job.name, id = %job.id, "cron job firing");
        let started = now_ms();
        let result = match &job.payload {
            CronPayload::AgentTurn {
                message,
                deliver,
                channel,
                to,
            } => self
                .sink
                .run_agent_turn(message, *deliver, channel.as_deref(), to.as_deref())
                .await,
            CronPayload::Announce { text, channel, to } => {
                self.sink
                    .announce(text, channel.as_deref(), to.as_deref())
                    .await
            },
        };

        let status = match &result {
            Ok(()) => RunStatus::Ok,
            Err(e) => {
                warn!(job = %job.name, error = %e, "cron job failed");
                RunStatus::Error
            },
        };
        let error = result.err().map(|e| e.to_string());
        let next = next_run_at(&job.schedule, now_ms());

        let mut store = self.store.lock().await;
        if job.delete_after_run || (next.is_none() && matches!(job.schedule, crate::types::CronSchedule::At { .. })) {
            let _ = store.remove(&job.id);
            return;
        }
        let _ = store.update_state(&job.id, |s| {
            s.last_run_at_ms = Some(started);
            s.last_status = Some(status);
            s.last_error = error;
            s.next_run_at_ms = next;
        });
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::types::CronSchedule;

    #[derive(Default)]
    struct RecordingSink {
        agent_turns: AtomicUsize,
        announces: AtomicUsize,
    }

    #[async_trait]
    impl CronSink for RecordingSink {
        async fn run_agent_turn(
            &self,
            _message: &str,
            _deliver: bool,
            _channel: Option<&str>,
            _to: Option<&str>,
        ) -> Result<()> {
            self.agent_turns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn announce(&self, _text: &str, _channel: Option<&str>, _to: Option<&str>) -> Result<()> {
            self.announces.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn announce_job(name: &str) -> CronJobCreate {
        CronJobCreate {
            name: name.into(),
            schedule: CronSchedule::Every { every_ms: 3_600_000 },
            payload: CronPayload::Announce {
                text: "reminder".into(),
                channel: Some("telegram".into()),
                to: Some("42".into()),
            },
            delete_after_run: false,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn add_list_remove() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let service = CronService::open(tmp.path().join("cron.json"), sink).unwrap();

        let job = service.add(announce_job("j1")).await.unwrap();
        assert_eq!(service.list().await.len(), 1);
        assert!(service.next_run_at_ms().await.is_some());

        assert!(service.remove(&job.id).await.unwrap());
        assert!(service.list().await.is_empty());
    }

    #[tokio::test]
    async fn run_now_dispatches_payload() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let service = CronService::open(tmp.path().join("cron.json"), Arc::clone(&sink) as _).unwrap();

        let job = service.add(announce_job("j1")).await.unwrap();
        service.run_now(&job.id).await.unwrap();
        assert_eq!(sink.announces.load(Ordering::SeqCst), 1);

        let listed = service.list().await;
        assert_eq!(listed[0].state.last_status, Some(RunStatus::Ok));
    }

    #[tokio::test]
    async fn one_shot_jobs_delete_after_firing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let service = CronService::open(tmp.path().join("cron.json"), sink).unwrap();

        let job = service
            .add(CronJobCreate {
                name: "once".into(),
                schedule: CronSchedule::At { at_ms: 1 },
                payload: CronPayload::Announce {
                    text: "x".into(),
                    channel: None,
                    to: None,
                },
                delete_after_run: false,
                enabled: true,
            })
            .await
            .unwrap();
        service.run_now(&job.id).await.unwrap();
        assert!(service.list().await.is_empty());
    }
}
