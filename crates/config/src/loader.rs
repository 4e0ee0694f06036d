//! Config loading: state-dir resolution, file + env merge, runtime handle.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    tokio::sync::watch,
    tracing::{debug, warn},
};

use clawdis_common::redact::Secret;

use crate::{env_subst::substitute_env, schema::ClawdisConfig};

/// Environment variable overriding the state root (`~/.clawdis`).
pub const STATE_DIR_ENV: &str = "OPENCLAW_STATE_DIR";

/// Resolve the state root directory.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(STATE_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }
    directories::BaseDirs::new()
        .map(|d| d.home_dir().join(".clawdis"))
        .unwrap_or_else(|| PathBuf::from(".clawdis"))
}

/// Path of the merged config file under the state root.
pub fn config_path() -> PathBuf {
    state_dir().join("config.json")
}

/// Load config from an explicit path. Missing file yields defaults.
pub fn load_config(path: &Path) -> anyhow::Result<ClawdisConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(ClawdisConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    let mut cfg: ClawdisConfig =
        serde_json::from_str(&raw).map_err(|e| anyhow::anyhow!("invalid config: {e}"))?;
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Discover and load config from the state dir, falling back to defaults on
/// parse failure so a typo cannot keep the gateway down.
pub fn discover_and_load() -> ClawdisConfig {
    let path = config_path();
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            let mut cfg = ClawdisConfig::default();
            apply_env_overrides(&mut cfg);
            cfg
        },
    }
}

/// Serialize `config` and write it atomically to the state dir.
pub fn save_config(config: &ClawdisConfig) -> anyhow::Result<PathBuf> {
    let path = config_path();
    clawdis_common::fsio::write_json_atomic(&path, config)?;
    debug!(path = %path.display(), "saved config");
    Ok(path)
}

/// Environment variables beat file config for the secrets they carry.
fn apply_env_overrides(cfg: &mut ClawdisConfig) {
    if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN")
        && !token.trim().is_empty()
    {
        let account = cfg
            .channels
            .telegram
            .accounts
            .entry("default".into())
            .or_default();
        if account.bot_token.is_none() {
            account.bot_token = Some(Secret::new(token));
        }
    }
    if let Ok(token) = std::env::var("CLAWDIS_GATEWAY_TOKEN")
        && !token.trim().is_empty()
    {
        cfg.gateway.token = Some(Secret::new(token));
    }
    if let Ok(port) = std::env::var("CLAWDIS_GATEWAY_PORT")
        && let Ok(port) = port.parse::<u16>()
    {
        cfg.gateway.port = port;
    }
}

// ── Runtime handle ───────────────────────────────────────────────────────────

/// Shared, watchable view of the merged config. Consumers hold the handle
/// and read `current()`; long-lived tasks subscribe for change
/// notifications instead of caching fields.
#[derive(Clone)]
pub struct ConfigHandle {
    tx: Arc<watch::Sender<Arc<ClawdisConfig>>>,
}

impl ConfigHandle {
    #[must_use]
    pub fn new(config: ClawdisConfig) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(config));
        Self { tx: Arc::new(tx) }
    }

    /// Snapshot of the current config.
    #[must_use]
    pub fn current(&self) -> Arc<ClawdisConfig> {
        self.tx.borrow().clone()
    }

    /// Subscribe for change notifications.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<ClawdisConfig>> {
        self.tx.subscribe()
    }

    /// Apply a runtime override and notify subscribers. Returns the new
    /// snapshot.
    pub fn update(&self, mutate: impl FnOnce(&mut ClawdisConfig)) -> Arc<ClawdisConfig> {
        let mut next = (**self.tx.borrow()).clone();
        mutate(&mut next);
        let next = Arc::new(next);
        let _ = self.tx.send(next.clone());
        next
    }
}
