//! mDNS advertisement of the bridge listener.

use {
    anyhow::Result,
    mdns_sd::{ServiceDaemon, ServiceInfo},
    tracing::{info, warn},
};

use clawdis_protocol::bridge::SERVICE_TYPE;

/// Registers `_clawdis-bridge._tcp` while alive; deregisters on drop.
pub struct BridgeAdvertiser {
    daemon: ServiceDaemon,
    fullname: String,
}

impl BridgeAdvertiser {
    /// Advertise `display_name` (defaults to the hostname) on `port`.
    pub fn start(display_name: Option<&str>, port: u16) -> Result<Self> {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "clawdis".into());
        let instance = display_name.unwrap_or(&host).to_string();

        let daemon = ServiceDaemon::new()?;
        let info = ServiceInfo::new(
            SERVICE_TYPE,
            &instance,
            &format!("{host}.local."),
            "",
            port,
            None,
        )?
        .enable_addr_auto();
        let fullname = info.get_fullname().to_string();
        daemon.register(info)?;
        info!(instance, port, "bridge advertised over mDNS");
        Ok(Self { daemon, fullname })
    }
}

impl Drop for BridgeAdvertiser {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            warn!(error = %e, "mdns unregister failed");
        }
        let _ = self.daemon.shutdown();
    }
}
