//! Session index store: one writer actor, atomic flushes, monotonic
//! `updated_at`.
//!
//! All mutation goes through a single task owning the in-memory map and the
//! `sessions.json` file. On every flush the actor re-reads the on-disk copy
//! and takes the max of the intended and on-disk `updated_at`, so
//! concurrent writers (another gateway instance, a manual edit) can never
//! move a session's clock backward.

use std::{collections::HashMap, path::PathBuf};

use {
    anyhow::Result,
    tokio::sync::{mpsc, oneshot},
    tracing::{error, warn},
};

use clawdis_common::{fsio, time::now_ms};

use crate::session::Session;

type Mutator = Box<dyn FnOnce(&mut Session) + Send>;

enum Command {
    Get {
        key: String,
        resp: oneshot::Sender<Option<Session>>,
    },
    Update {
        key: String,
        mutate: Mutator,
        /// Whether this write advances `updated_at` (only terminal `final`
        /// run states do).
        advance_clock: bool,
        resp: oneshot::Sender<Result<Session>>,
    },
    List {
        resp: oneshot::Sender<Vec<Session>>,
    },
}

/// Handle to the session store actor. Cheap to clone.
#[derive(Clone)]
pub struct SessionStore {
    tx: mpsc::Sender<Command>,
}

impl SessionStore {
    /// Open (or create) the index at `path` and spawn the writer actor.
    pub fn open(path: PathBuf) -> Result<Self> {
        let sessions: HashMap<String, Session> = fsio::read_json(&path)?.unwrap_or_default();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(actor(path, sessions, rx));
        Ok(Self { tx })
    }

    pub async fn get(&self, key: &str) -> Option<Session> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Command::Get {
                key: key.to_string(),
                resp,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Read-modify-write a session, creating it on first touch. The closure
    /// runs inside the actor, so per-key updates are serialized.
    pub async fn update(
        &self,
        key: &str,
        mutate: impl FnOnce(&mut Session) + Send + 'static,
    ) -> Result<Session> {
        self.update_inner(key, Box::new(mutate), false).await
    }

    /// Like [`update`](Self::update), but also advances `updated_at`.
    pub async fn update_and_touch(
        &self,
        key: &str,
        mutate: impl FnOnce(&mut Session) + Send + 'static,
    ) -> Result<Session> {
        self.update_inner(key, Box::new(mutate), true).await
    }

    async fn update_inner(&self, key: &str, mutate: Mutator, advance_clock: bool) -> Result<Session> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Command::Update {
                key: key.to_string(),
                mutate,
                advance_clock,
                resp,
            })
            .await
            .map_err(|_| anyhow::anyhow!("session store closed"))?;
        rx.await.map_err(|_| anyhow::anyhow!("session store closed"))?
    }

    pub async fn list(&self) -> Vec<Session> {
        let (resp, rx) = oneshot::channel();
        if self.tx.send(Command::List { resp }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn count(&self) -> usize {
        self.list().await.len()
    }
}

async fn actor(path: PathBuf, mut sessions: HashMap<String, Session>, mut rx: mpsc::Receiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Get { key, resp } => {
                let _ = resp.send(sessions.get(&key).cloned());
            },
            Command::List { resp } => {
                let _ = resp.send(sessions.values().cloned().collect());
            },
            Command::Update {
                key,
                mutate,
                advance_clock,
                resp,
            } => {
                let result = apply_update(&path, &mut sessions, &key, mutate, advance_clock);
                if let Err(e) = &result {
                    error!(key, error = %e, "session flush failed");
                }
                let _ = resp.send(result);
            },
        }
    }
}

fn apply_update(
    path: &PathBuf,
    sessions: &mut HashMap<String, Session>,
    key: &str,
    mutate: Mutator,
    advance_clock: bool,
) -> Result<Session> {
    let entry = sessions
        .entry(key.to_string())
        .or_insert_with(|| Session::new(key));
    mutate(entry);
    if advance_clock {
        entry.updated_at = entry.updated_at.max(now_ms());
    }

    // Re-read the on-disk copy: our flush must not regress updated_at or
    // drop keys another writer added since we loaded.
    let mut disk: HashMap<String, Session> = match fsio::read_json(path) {
        Ok(map) => map.unwrap_or_default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable session index, rewriting");
            HashMap::new()
        },
    };
    if let Some(on_disk) = disk.get(key) {
        entry.updated_at = entry.updated_at.max(on_disk.updated_at);
        for (k, v) in &on_disk.extra {
            entry.extra.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    disk.insert(key.to_string(), entry.clone());
    fsio::write_json_atomic(path, &disk)?;
    Ok(entry.clone())
}
