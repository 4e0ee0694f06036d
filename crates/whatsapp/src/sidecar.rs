//! Sidecar process management and frame I/O.

use std::{collections::HashMap, process::Stdio, sync::Arc, time::Duration};

use {
    anyhow::{Result, bail},
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        process::{Child, Command},
        sync::{Mutex, mpsc, oneshot},
    },
    tracing::{debug, info, warn},
};

use crate::wire::{SidecarCommand, SidecarEvent};

/// How long a send command may wait for its `send_result`.
const SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Where inbound sidecar events land (the plugin).
pub type EventHandler = Arc<dyn Fn(SidecarEvent) + Send + Sync>;

/// A running sidecar process plus its command writer and pending sends.
pub struct Sidecar {
    child: Mutex<Option<Child>>,
    stdin_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<Result<()>>>>>,
}

impl Sidecar {
    #[must_use]
    pub fn new() -> Self {
        Self {
            child: Mutex::new(None),
            stdin_tx: Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn the sidecar and start routing its stdout events into
    /// `handler`. `send_result` frames resolve pending sends instead.
    pub async fn start(&self, cmd: &[String], handler: EventHandler) -> Result<()> {
        let Some((program, args)) = cmd.split_first() else {
            bail!("empty sidecar command");
        };
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        info!(cmd = ?cmd, "whatsapp sidecar started");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("sidecar stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("sidecar stdout unavailable"))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
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

        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let event: SidecarEvent = match serde_json::from_str(&line) {
                    Ok(ev) => ev,
                    Err(e) => {
                        debug!(error = %e, "ignoring malformed sidecar line");
                        continue;
                    },
                };
                if let SidecarEvent::SendResult { id, ok, error } = &event {
                    if let Some(waiter) = pending.lock().await.remove(id) {
                        let result = if *ok {
                            Ok(())
                        } else {
                            Err(anyhow::anyhow!(
                                error.clone().unwrap_or_else(|| "send failed".into())
                            ))
                        };
                        let _ = waiter.send(result);
                    }
                    continue;
                }
                handler(event);
            }
            warn!("whatsapp sidecar stdout closed");
        });

        *self.stdin_tx.lock().await = Some(tx);
        *self.child.lock().await = Some(child);
        Ok(())
    }

    /// Write a command; send commands wait for their correlated result.
    pub async fn send(&self, command: SidecarCommand) -> Result<()> {
        let correlation = match &command {
            SidecarCommand::SendText { id, .. } | SidecarCommand::SendMedia { id, .. } => {
                let (tx, rx) = oneshot::channel();
                self.pending.lock().await.insert(id.clone(), tx);
                Some((id.clone(), rx))
            },
            _ => None,
        };

        let line = serde_json::to_string(&command)?;
        {
            let guard = self.stdin_tx.lock().await;
            match guard.as_ref() {
                Some(tx) if tx.send(line).is_ok() => {},
                _ => {
                    if let Some((id, _)) = &correlation {
                        self.pending.lock().await.remove(id);
                    }
                    bail!("whatsapp sidecar is not running");
                },
            }
        }

        if let Some((id, rx)) = correlation {
            match tokio::time::timeout(SEND_TIMEOUT, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => bail!("sidecar dropped send {id}"),
                Err(_) => {
                    self.pending.lock().await.remove(&id);
                    bail!("sidecar send {id} timed out")
                },
            }
        } else {
            Ok(())
        }
    }

    /// Graceful stop: SIGTERM, bounded wait, then kill.
    pub async fn stop(&self) {
        self.stdin_tx.lock().await.take();
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        if let Some(pid) = child.id() {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGTERM,
            );
        }
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(Ok(status)) => info!(?status, "whatsapp sidecar exited"),
            _ => {
                warn!("sidecar did not exit gracefully, killing");
                let _ = child.kill().await;
            },
        }
    }

    pub async fn is_running(&self) -> bool {
        match self.child.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

impl Default for Sidecar {
    fn default() -> Self {
        Self::new()
    }
}
