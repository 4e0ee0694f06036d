//! The agent worker subprocess: spawn, supervise, route events.
//!
//! One long-lived worker speaks NDJSON over stdio. A supervisor task
//! restarts it on crash with bounded exponential backoff; an event router
//! demultiplexes stdout frames to per-run subscribers by `runId`.

use std::{collections::HashMap, process::Stdio, sync::Arc, time::Duration};

use {
    anyhow::{Result, bail},
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        process::{Child, Command},
        sync::{Mutex, mpsc},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use clawdis_common::types::ThinkingLevel;

use crate::{
    protocol::{RunRequest, WorkerEvent, WorkerRequest},
    thinking,
};

/// Restart backoff floor/ceiling and the healthy-uptime reset threshold.
const BACKOFF_MIN: Duration = Duration::from_millis(250);
const BACKOFF_MAX: Duration = Duration::from_secs(30);
const HEALTHY_UPTIME: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Command line for the worker process (argv[0] plus args).
    pub cmd: Vec<String>,
    /// Whether the worker applies the `thinking` field natively. When
    /// false, the adapter rewrites the prompt with cue tokens instead.
    pub thinking_flag: bool,
    /// Grace between soft cancel, SIGTERM, and SIGKILL.
    pub cancel_grace_ms: u64,
}

struct Inner {
    config: WorkerConfig,
    /// Lines destined for the current child's stdin.
    stdin_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// runId → event subscriber.
    routes: Mutex<HashMap<String, mpsc::UnboundedSender<WorkerEvent>>>,
    child_pid: Mutex<Option<i32>>,
    shutdown: CancellationToken,
}

/// Handle to the supervised worker. Cheap to clone.
#[derive(Clone)]
pub struct AgentWorker {
    inner: Arc<Inner>,
}

impl AgentWorker {
    /// Spawn the supervisor. The worker process itself starts lazily inside
    /// the supervisor loop.
    #[must_use]
    pub fn spawn(config: WorkerConfig) -> Self {
        let inner = Arc::new(Inner {
            config,
            stdin_tx: Mutex::new(None),
            routes: Mutex::new(HashMap::new()),
            child_pid: Mutex::new(None),
            shutdown: CancellationToken::new(),
        });
        tokio::spawn(supervisor(Arc::clone(&inner)));
        Self { inner }
    }

    /// Submit a run. Returns the event stream for this `runId`.
    pub async fn start_run(
        &self,
        mut request: RunRequest,
    ) -> Result<mpsc::UnboundedReceiver<WorkerEvent>> {
        if !self.inner.config.thinking_flag && request.thinking != ThinkingLevel::Off {
            request.body = thinking::apply_cue(&request.body, request.thinking);
            request.thinking = ThinkingLevel::Off;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .routes
            .lock()
            .await
            .insert(request.run_id.clone(), tx);

        let line = serde_json::to_string(&WorkerRequest::Run(request.clone()))?;
        if let Err(e) = self.send_line(line).await {
            self.inner.routes.lock().await.remove(&request.run_id);
            return Err(e);
        }
        Ok(rx)
    }

    /// Soft-cancel a run: the worker gets a typed cancel frame.
    pub async fn cancel(&self, run_id: &str) -> Result<()> {
        let line = serde_json::to_string(&WorkerRequest::Cancel {
            run_id: run_id.to_string(),
        })?;
        self.send_line(line).await
    }

    /// Cancel with escalation: soft frame, then SIGTERM after the grace
    /// window, then SIGKILL after another. Escalation stops as soon as the
    /// run resolves.
    pub fn cancel_escalating(&self, run_id: &str) {
        let worker = self.clone();
        let run_id = run_id.to_string();
        let grace = Duration::from_millis(worker.inner.config.cancel_grace_ms);
        tokio::spawn(async move {
            let _ = worker.cancel(&run_id).await;
            tokio::time::sleep(grace).await;
            if !worker.is_run_live(&run_id).await {
                return;
            }
            warn!(run_id, "cancel grace elapsed, sending SIGTERM to worker");
            worker.signal_child(nix::sys::signal::Signal::SIGTERM).await;
            tokio::time::sleep(grace).await;
            if worker.is_run_live(&run_id).await {
                warn!(run_id, "worker ignored SIGTERM, sending SIGKILL");
                worker.signal_child(nix::sys::signal::Signal::SIGKILL).await;
            }
        });
    }

    /// Whether a run still has a registered event route.
    pub async fn is_run_live(&self, run_id: &str) -> bool {
        self.inner.routes.lock().await.contains_key(run_id)
    }

    /// Stop the supervisor and the child for good.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.signal_child(nix::sys::signal::Signal::SIGTERM).await;
    }

    async fn send_line(&self, line: String) -> Result<()> {
        let guard = self.inner.stdin_tx.lock().await;
        match guard.as_ref() {
            Some(tx) if tx.send(line).is_ok() => Ok(()),
            _ => bail!("agent worker is not running"),
        }
    }

    async fn signal_child(&self, signal: nix::sys::signal::Signal) {
        if let Some(pid) = *self.inner.child_pid.lock().await {
            let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), signal);
        }
    }
}

// ── Supervisor ───────────────────────────────────────────────────────────────

async fn supervisor(inner: Arc<Inner>) {
    let mut backoff = BACKOFF_MIN;
    loop {
        if inner.shutdown.is_cancelled() {
            break;
        }

        let started = tokio::time::Instant::now();
        match spawn_child(&inner.config.cmd) {
            Ok(child) => {
                info!(cmd = ?inner.config.cmd, "agent worker started");
                run_child(&inner, child).await;
            },
            Err(e) => {
                warn!(error = %e, "failed to spawn agent worker");
            },
        }

        inner.stdin_tx.lock().await.take();
        *inner.child_pid.lock().await = None;
        fail_inflight_runs(&inner, "agent worker exited").await;

        if inner.shutdown.is_cancelled() {
            break;
        }
        if started.elapsed() >= HEALTHY_UPTIME {
            backoff = BACKOFF_MIN;
        }
        debug!(backoff_ms = backoff.as_millis() as u64, "restarting agent worker");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(BACKOFF_MAX);
    }
}

fn spawn_child(cmd: &[String]) -> Result<Child> {
    let Some((program, args)) = cmd.split_first() else {
        bail!("empty worker command");
    };
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;
    Ok(child)
}

/// Drive one child process until it exits: pump stdin, route stdout events,
/// log stderr.
async fn run_child(inner: &Arc<Inner>, mut child: Child) {
    let Some(stdin) = child.stdin.take() else {
        return;
    };
    let Some(stdout) = child.stdout.take() else {
        return;
    };
    *inner.child_pid.lock().await = child.id().map(|pid| pid as i32);

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    *inner.stdin_tx.lock().await = Some(tx);

    let write_task = tokio::spawn(async move {
        let mut stdin = stdin;
        while let Some(line) = rx.recv().await {
            if stdin.write_all(line.as_bytes()).await.is_err()
                || stdin.write_all(b"\n").await.is_err()
            {
                break;
            }
            let _ = stdin.flush().await;
        }
    });

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "agent_worker", "{line}");
            }
        });
    }

    let mut lines = BufReader::new(stdout).lines();
    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => route_line(inner, &line).await,
                Ok(None) | Err(_) => break,
            },
        }
    }

    write_task.abort();
    let _ = child.kill().await;
}

async fn route_line(inner: &Arc<Inner>, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let event: WorkerEvent = match serde_json::from_str(line) {
        Ok(ev) => ev,
        Err(e) => {
            debug!(error = %e, "ignoring malformed worker line");
            return;
        },
    };

    let run_id = event.run_id().to_string();
    let terminal = matches!(event, WorkerEvent::AgentEnd { .. });
    let mut routes = inner.routes.lock().await;
    if let Some(tx) = routes.get(&run_id) {
        let _ = tx.send(event);
    } else {
        debug!(run_id, "worker event for unknown run");
    }
    if terminal {
        routes.remove(&run_id);
    }
}

/// On worker death, resolve every in-flight run with a synthetic error so
/// schedulers don't hang on a stream that will never finish.
async fn fail_inflight_runs(inner: &Arc<Inner>, reason: &str) {
    let mut routes = inner.routes.lock().await;
    for (run_id, tx) in routes.drain() {
        let _ = tx.send(WorkerEvent::Error {
            run_id: run_id.clone(),
            message: reason.to_string(),
            kind: "worker_exit".into(),
        });
        let _ = tx.send(WorkerEvent::AgentEnd { run_id });
    }
}
