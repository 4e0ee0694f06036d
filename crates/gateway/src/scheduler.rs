//! The session scheduler: per-session serialization, the cross-session
//! concurrency cap, queue/interrupt semantics, forced sync, and
//! debouncing.
//!
//! Each session key owns one task. At most one run is in flight per
//! session; a global FIFO semaphore caps runs across sessions. While a run
//! is in flight, chat arrivals either merge into the next prompt (queue
//! mode) or cancel the run and take its place (interrupt mode). Forced
//! entries (heartbeat, operator commands) bypass debouncing, collapse to a
//! single pending slot, and are guaranteed to run after the in-flight run.

use std::{
    collections::HashMap,
    pin::pin,
    sync::Arc,
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio::sync::{Mutex, Semaphore, mpsc},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use clawdis_common::{
    time::now_ms,
    types::{DeliveryTarget, Envelope, QueueMode, ThinkingLevel, Verbosity},
};

// ── Jobs ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    /// User-driven chat turn.
    Chat,
    /// Forced-sync system work (heartbeat, operator command).
    System { reason: String },
}

/// Heartbeat delivery policy carried on system jobs.
#[derive(Debug, Clone)]
pub struct HeartbeatSpec {
    pub show_ok: bool,
    pub show_alerts: bool,
    pub ack_max_chars: usize,
    /// Override target; `None` delivers to the session's last route.
    pub target: Option<DeliveryTarget>,
}

/// One prompt waiting for (or holding) an agent run.
#[derive(Debug, Clone)]
pub struct PromptJob {
    pub run_id: String,
    pub session_key: String,
    /// Sender attribution used when merging queued messages.
    pub sender: Option<String>,
    pub body: String,
    /// Prefix (abort reminder, group primer) prepended to the prompt.
    pub body_prefix: Option<String>,
    pub kind: JobKind,
    /// Resolved queue mode (session override > channel default > global).
    pub mode: QueueMode,
    pub envelope: Option<Envelope>,
    /// Explicit delivery target; `None` falls back to the envelope origin.
    pub target: Option<DeliveryTarget>,
    pub deliver: bool,
    pub think_override: Option<ThinkingLevel>,
    pub verbose_override: Option<Verbosity>,
    pub heartbeat: Option<HeartbeatSpec>,
}

impl PromptJob {
    #[must_use]
    pub fn is_chat(&self) -> bool {
        self.kind == JobKind::Chat
    }
}

// ── Run records ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Running,
    Streaming,
    Final,
    Cancelled,
    Failed,
}

/// Ephemeral record of one agent invocation.
#[derive(Debug)]
pub struct RunRecord {
    pub run_id: String,
    pub session_key: String,
    pub is_chat: bool,
    pub started_at: u64,
    pub state: RunState,
    pub first_payload_at: Option<u64>,
    /// Buffered for debugging; external delivery may have discarded it.
    pub last_text_payload: Option<String>,
}

/// Shared view the executor updates while the run streams.
#[derive(Clone)]
pub struct RunContext {
    pub record: Arc<Mutex<RunRecord>>,
    pub cancel: CancellationToken,
}

impl RunContext {
    /// Mark streaming progress and remember the latest text payload.
    pub async fn on_payload(&self, text: Option<&str>) {
        let mut rec = self.record.lock().await;
        if rec.first_payload_at.is_none() {
            rec.first_payload_at = Some(now_ms());
        }
        if matches!(rec.state, RunState::Running) {
            rec.state = RunState::Streaming;
        }
        if let Some(text) = text {
            rec.last_text_payload = Some(text.to_string());
        }
    }
}

/// Terminal status of a run. Exactly one is reported per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    Final,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: TerminalStatus,
    pub error: Option<String>,
}

/// Executes one prompt against the agent runtime and handles delivery.
#[async_trait]
pub trait RunExecutor: Send + Sync {
    async fn execute(&self, job: PromptJob, ctx: RunContext) -> RunOutcome;
}

// ── Scheduler ────────────────────────────────────────────────────────────────

enum Msg {
    Chat(PromptJob),
    Forced(PromptJob),
    Debounced(PromptJob),
    CancelActive,
}

struct Inner {
    executor: Arc<dyn RunExecutor>,
    admission: Arc<Semaphore>,
    debounce: Duration,
    sessions: Mutex<HashMap<String, mpsc::UnboundedSender<Msg>>>,
    records: Mutex<HashMap<String, Arc<Mutex<RunRecord>>>>,
}

#[derive(Clone)]
pub struct SessionScheduler {
    inner: Arc<Inner>,
}

impl SessionScheduler {
    #[must_use]
    pub fn new(executor: Arc<dyn RunExecutor>, max_concurrent: usize, debounce_ms: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                admission: Arc::new(Semaphore::new(max_concurrent.max(1))),
                debounce: Duration::from_millis(debounce_ms),
                sessions: Mutex::new(HashMap::new()),
                records: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Submit a chat turn. Returns the run id the prompt will carry (queued
    /// messages may coalesce into an earlier id).
    pub async fn submit_chat(&self, mut job: PromptJob) -> String {
        if job.run_id.is_empty() {
            job.run_id = uuid::Uuid::new_v4().to_string();
        }
        let run_id = job.run_id.clone();
        self.send(job.session_key.clone(), Msg::Chat(job)).await;
        run_id
    }

    /// Submit system work. `force` bypasses the debounce window and lands
    /// in the forced queue directly.
    pub async fn submit_system(&self, mut job: PromptJob, force: bool) {
        if job.run_id.is_empty() {
            job.run_id = uuid::Uuid::new_v4().to_string();
        }
        let key = job.session_key.clone();
        let msg = if force { Msg::Forced(job) } else { Msg::Debounced(job) };
        self.send(key, msg).await;
    }

    /// Cancel whatever run is in flight for a session (stop words).
    pub async fn cancel_active(&self, session_key: &str) {
        self.send(session_key.to_string(), Msg::CancelActive).await;
    }

    /// Whether a user-driven run is currently in flight for the session.
    pub async fn has_active_chat_run(&self, session_key: &str) -> bool {
        let records = self.inner.records.lock().await;
        for record in records.values() {
            let rec = record.lock().await;
            if rec.session_key == session_key
                && rec.is_chat
                && matches!(rec.state, RunState::Running | RunState::Streaming)
            {
                return true;
            }
        }
        false
    }

    pub async fn runs_in_flight(&self) -> usize {
        let records = self.inner.records.lock().await;
        let mut count = 0;
        for record in records.values() {
            let rec = record.lock().await;
            if matches!(rec.state, RunState::Running | RunState::Streaming) {
                count += 1;
            }
        }
        count
    }

    async fn send(&self, session_key: String, msg: Msg) {
        let mut sessions = self.inner.sessions.lock().await;
        let tx = sessions.entry(session_key.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            let inner = Arc::clone(&self.inner);
            tokio::spawn(session_task(inner, session_key.clone(), rx));
            tx
        });
        if tx.send(msg).is_err() {
            warn!(session_key = %session_key, "session task gone, dropping message");
            sessions.remove(&session_key);
        }
    }
}

// ── Per-session loop ─────────────────────────────────────────────────────────

struct SessionQueue {
    pending_chat: Vec<PromptJob>,
    pending_forced: Option<PromptJob>,
    debounce_slot: Option<(tokio::time::Instant, PromptJob)>,
}

impl SessionQueue {
    fn handle(&mut self, msg: Msg, debounce: Duration, active_cancel: Option<&CancellationToken>) {
        match msg {
            Msg::Chat(job) => {
                if job.mode == QueueMode::Interrupt
                    && let Some(cancel) = active_cancel
                {
                    // Interrupt: kill the in-flight run, the new message
                    // replaces anything queued behind it.
                    cancel.cancel();
                    self.pending_chat.clear();
                }
                self.pending_chat.push(job);
            },
            Msg::Forced(job) => {
                // Forced entries collapse while one is pending.
                if self.pending_forced.is_none() {
                    self.pending_forced = Some(job);
                }
            },
            Msg::Debounced(job) => {
                if active_cancel.is_some() {
                    // Busy: fold into the forced slot, it runs after the
                    // in-flight run anyway.
                    if self.pending_forced.is_none() {
                        self.pending_forced = Some(job);
                    }
                } else {
                    // Idle: (re)arm the window, latest reason wins.
                    let deadline = tokio::time::Instant::now() + debounce;
                    self.debounce_slot = Some((deadline, job));
                }
            },
            Msg::CancelActive => {
                if let Some(cancel) = active_cancel {
                    cancel.cancel();
                }
            },
        }
    }

    fn next_job(&mut self) -> Option<PromptJob> {
        if let Some(job) = self.pending_forced.take() {
            return Some(job);
        }
        if self.pending_chat.is_empty() {
            return None;
        }
        Some(merge_chat(std::mem::take(&mut self.pending_chat)))
    }
}

/// Merge queued chat jobs into one prompt, newline-joined with sender
/// attribution, preserving arrival order.
fn merge_chat(mut jobs: Vec<PromptJob>) -> PromptJob {
    if jobs.len() == 1 {
        return jobs.remove(0);
    }
    let body = jobs
        .iter()
        .map(|j| match &j.sender {
            Some(sender) => format!("{sender}: {}", j.body),
            None => j.body.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n");
    let first = jobs.remove(0);
    let last = jobs.pop().unwrap_or_else(|| first.clone());
    PromptJob {
        run_id: first.run_id,
        session_key: first.session_key,
        sender: None,
        body,
        body_prefix: first.body_prefix,
        kind: first.kind,
        mode: last.mode,
        envelope: last.envelope,
        target: last.target,
        deliver: first.deliver || last.deliver,
        think_override: last.think_override,
        verbose_override: last.verbose_override,
        heartbeat: None,
    }
}

async fn session_task(
    inner: Arc<Inner>,
    session_key: String,
    mut rx: mpsc::UnboundedReceiver<Msg>,
) {
    let mut queue = SessionQueue {
        pending_chat: Vec::new(),
        pending_forced: None,
        debounce_slot: None,
    };

    'outer: loop {
        // ── Idle: wait for work ──────────────────────────────────────────
        while queue.pending_chat.is_empty() && queue.pending_forced.is_none() {
            if let Some(deadline) = queue.debounce_slot.as_ref().map(|(d, _)| *d) {
                tokio::select! {
                    () = tokio::time::sleep_until(deadline) => {
                        if let Some((_, job)) = queue.debounce_slot.take() {
                            queue.pending_forced = Some(job);
                        }
                    },
                    msg = rx.recv() => match msg {
                        Some(msg) => queue.handle(msg, inner.debounce, None),
                        None => break 'outer,
                    },
                }
            } else {
                match rx.recv().await {
                    Some(msg) => queue.handle(msg, inner.debounce, None),
                    None => break 'outer,
                }
            }
        }

        let Some(job) = queue.next_job() else {
            continue;
        };

        // ── Global admission (FIFO) ──────────────────────────────────────
        let Ok(permit) = Arc::clone(&inner.admission).acquire_owned().await else {
            break;
        };

        let cancel = CancellationToken::new();
        let record = Arc::new(Mutex::new(RunRecord {
            run_id: job.run_id.clone(),
            session_key: session_key.clone(),
            is_chat: job.is_chat(),
            started_at: now_ms(),
            state: RunState::Running,
            first_payload_at: None,
            last_text_payload: None,
        }));
        inner
            .records
            .lock()
            .await
            .insert(job.run_id.clone(), Arc::clone(&record));

        let ctx = RunContext {
            record: Arc::clone(&record),
            cancel: cancel.clone(),
        };
        let run_id = job.run_id.clone();
        debug!(session_key = %session_key, run_id = %run_id, "run starting");

        let executor = Arc::clone(&inner.executor);
        let mut exec = pin!(executor.execute(job, ctx));

        // ── In flight: race the run against new arrivals ─────────────────
        let mut rx_closed = false;
        let outcome = loop {
            tokio::select! {
                outcome = &mut exec => break outcome,
                msg = rx.recv(), if !rx_closed => match msg {
                    Some(msg) => queue.handle(msg, inner.debounce, Some(&cancel)),
                    None => {
                        rx_closed = true;
                        cancel.cancel();
                    },
                },
            }
        };

        {
            let mut rec = record.lock().await;
            rec.state = match outcome.status {
                TerminalStatus::Final => RunState::Final,
                TerminalStatus::Cancelled => RunState::Cancelled,
                TerminalStatus::Failed => RunState::Failed,
            };
        }
        debug!(session_key = %session_key, run_id = %run_id, status = ?outcome.status, "run finished");
        inner.records.lock().await.remove(&run_id);
        drop(permit);
    }
}
