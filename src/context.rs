//! The agent context
//!
//! Everything the runtimes share lives in one [`Agent`], created at
//! startup and handed to every task as an `Arc<Agent>`.  Only the
//! applicator replaces the applied config; everyone else reads
//! snapshots of it.

use crate::{
    avahi,
    config::AgentSettings,
    ledger::KnownClients,
    model::{DeviceConfig, DeviceStatus, Heartbeat, Identity, LatencyStats, SoundCardType},
    shell::Shell,
    supervisor::Supervisor,
};
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Agent {
    pub settings: AgentSettings,
    pub identity: Identity,
    pub card_type: SoundCardType,
    /// Participants seen in the audio graph
    pub clients: KnownClients,
    pub supervisor: Arc<dyn Supervisor>,
    pub shell: Arc<dyn Shell>,
    /// Cancelled once the process should wind down
    pub cancel: CancellationToken,

    applied: RwLock<Arc<DeviceConfig>>,
    latency: RwLock<LatencyStats>,
    status: Mutex<Option<DeviceStatus>>,
}

impl Agent {
    pub fn new(
        settings: AgentSettings,
        identity: Identity,
        supervisor: Arc<dyn Supervisor>,
        shell: Arc<dyn Shell>,
    ) -> Arc<Self> {
        let card_type = identity
            .sound_card_type
            .parse()
            .unwrap_or_else(|e: std::convert::Infallible| match e {});

        Arc::new(Self {
            settings,
            identity,
            card_type,
            clients: KnownClients::new(),
            supervisor,
            shell,
            cancel: CancellationToken::new(),
            applied: RwLock::new(Arc::new(DeviceConfig::default())),
            latency: RwLock::new(LatencyStats::default()),
            status: Mutex::new(None),
        })
    }

    /// Snapshot of the applied config
    pub fn applied(&self) -> Arc<DeviceConfig> {
        Arc::clone(&self.applied.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Replace the applied config.  Only the applicator calls this.
    pub(crate) fn publish_applied(&self, cfg: DeviceConfig) {
        *self.applied.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(cfg);
    }

    pub fn latency(&self) -> LatencyStats {
        self.latency.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_latency(&self, stats: LatencyStats) {
        *self.latency.write().unwrap_or_else(|e| e.into_inner()) = stats;
    }

    pub fn status(&self) -> Option<DeviceStatus> {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a status transition and rewrite the mDNS record.  Writing
    /// the record is best effort.
    pub fn set_status(&self, status: DeviceStatus) {
        let mut last = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if *last == Some(status) {
            return;
        }
        info!("device status: {}", status);
        *last = Some(status);

        if let Err(e) = avahi::write_status(&self.settings.paths.avahi_service, &self.identity, status) {
            warn!("failed to update mDNS record: {}", e);
        }
    }

    /// Heartbeat body from the current snapshot
    pub fn heartbeat(&self) -> Heartbeat {
        let applied = self.applied();
        Heartbeat {
            mac: self.identity.mac.clone(),
            version: self.identity.patch_version.clone(),
            sound_card_type: self.identity.sound_card_type.clone(),
            alsa_name: self.identity.sound_card_name.clone(),
            enabled: applied.engine.enabled,
            status: self
                .status()
                .map(|s| s.to_string())
                .unwrap_or_default(),
            latency: self.latency(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::agent;
    use super::*;
    use std::fs;

    #[test]
    fn status_transitions_rewrite_mdns_record() {
        let t = agent("USB Audio Device");
        let path = t.agent.settings.paths.avahi_service.clone();

        t.agent.set_status(DeviceStatus::Starting);
        let body = fs::read_to_string(&path).unwrap();
        assert!(body.contains("status=starting"));
        assert!(body.contains("mac=aa:bb:cc:dd:ee:ff"));

        fs::remove_file(&path).unwrap();
        t.agent.set_status(DeviceStatus::Starting);
        assert!(!path.exists(), "unchanged status must not rewrite");

        t.agent.set_status(DeviceStatus::Connected);
        assert!(fs::read_to_string(&path).unwrap().contains("status=connected"));
    }

    #[test]
    fn heartbeat_reflects_applied_config() {
        let t = agent("USB Audio Device");
        let mut cfg = DeviceConfig::default();
        cfg.engine.enabled = true;
        t.agent.publish_applied(cfg);
        let hb = t.agent.heartbeat();
        assert!(hb.enabled);
        assert_eq!(hb.sound_card_type, "USB Audio Device");
        assert_eq!(t.agent.card_type, SoundCardType::UsbAudioDevice);
    }
}
