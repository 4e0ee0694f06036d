//! JSON-file cron job store.

use std::path::PathBuf;

use anyhow::Result;

use clawdis_common::{fsio, time::now_ms};

use crate::types::{CronJob, CronJobCreate, CronJobState};

/// Jobs persisted as a single JSON array under the state dir.
pub struct FileStore {
    path: PathBuf,
    jobs: Vec<CronJob>,
}

impl FileStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        let jobs = fsio::read_json(&path)?.unwrap_or_default();
        Ok(Self { path, jobs })
    }

    fn flush(&self) -> Result<()> {
        fsio::write_json_atomic(&self.path, &self.jobs)
    }

    #[must_use]
    pub fn list(&self) -> &[CronJob] {
        &self.jobs
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&CronJob> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn add(&mut self, create: CronJobCreate) -> Result<CronJob> {
        let now = now_ms();
        let job = CronJob {
            id: uuid::Uuid::new_v4().to_string(),
            name: create.name,
            enabled: create.enabled,
            delete_after_run: create.delete_after_run,
            schedule: create.schedule,
            payload: create.payload,
            state: CronJobState::default(),
            created_at_ms: now,
            updated_at_ms: now,
        };
        self.jobs.push(job.clone());
        self.flush()?;
        Ok(job)
    }

    pub fn remove(&mut self, id: &str) -> Result<bool> {
        let before = self.jobs.len();
        self.jobs.retain(|j| j.id != id);
        let removed = self.jobs.len() != before;
        if removed {
            self.flush()?;
        }
        Ok(removed)
    }

    pub fn update_state(
        &mut self,
        id: &str,
        mutate: impl FnOnce(&mut CronJobState),
    ) -> Result<()> {
        if let Some(job) = self.jobs.iter_mut().find(|j| j.id == id) {
            mutate(&mut job.state);
            job.updated_at_ms = now_ms();
            self.flush()?;
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CronPayload, CronSchedule, RunStatus};

    fn create(name: &str) -> CronJobCreate {
        CronJobCreate {
            name: name.into(),
            schedule: CronSchedule::Every { every_ms: 60_000 },
            payload: CronPayload::Announce {
                text: "ping".into(),
                channel: None,
                to: None,
            },
            delete_after_run: false,
            enabled: true,
        }
    }

    #[test]
    fn add_persists_across_reopen() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("cron.json");
        let mut store = FileStore::open(path.clone()).unwrap();
        let job = store.add(create("a")).unwrap();

        let reopened = FileStore::open(path).unwrap();
        assert_eq!(reopened.list().len(), 1);
        assert_eq!(reopened.get(&job.id).unwrap().name, "a");
    }

    #[test]
    fn remove_and_state_updates() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut store = FileStore::open(tmp.path().join("cron.json")).unwrap();
        let job = store.add(create("a")).unwrap();

        store
            .update_state(&job.id, |s| s.last_status = Some(RunStatus::Ok))
            .unwrap();
        assert_eq!(
            store.get(&job.id).unwrap().state.last_status,
            Some(RunStatus::Ok)
        );

        assert!(store.remove(&job.id).unwrap());
        assert!(!store.remove(&job.id).unwrap());
    }
}
