//! jacktrip-agent
//!
//! Runs on a JackTrip device (or audio server) and keeps it in line
//! with the control plane: it reports heartbeats, applies the configs
//! it gets back, wires participants into the mixing server and bridges
//! USB sound cards into the audio graph.

mod applicator;
mod avahi;
mod config;
mod context;
mod error;
mod heartbeat;
mod http;
mod jack;
mod ledger;
mod levels;
mod log;
mod model;
mod retry;
mod shell;
mod supervisor;
mod templates;
mod usb;

use crate::{
    config::{AgentSettings, Paths, Role, DEFAULT_ORIGIN},
    context::Agent,
    heartbeat::HeartbeatLoop,
    jack::{Autoconnector, JackServer},
    log::oops,
    model::{DeviceStatus, Identity},
    shell::SystemShell,
    supervisor::Systemd,
    usb::DeviceMixer,
};
use async_std::{channel::bounded, task};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

pub(crate) const BUILD_SHA: &str = env!("JACKTRIP_AGENT_SHA");

/// Capacity of the config channel between heartbeat and applicator
const CONFIG_CAPACITY: usize = 100;

/// JACK client name of the autoconnector
const CLIENT_NAME: &str = "jacktrip-agent";

#[derive(Debug, Parser)]
#[command(name = "jacktrip-agent", about = "JackTrip device agent")]
struct Cli {
    /// Control plane origin
    #[arg(short, long, default_value = DEFAULT_ORIGIN)]
    origin: String,

    /// Print the build SHA and exit
    #[arg(short = 'v', long = "version-sha")]
    version_sha: bool,

    /// Run the audio server service set
    #[arg(long)]
    server: bool,

    /// Port of the local HTTP surface
    #[arg(long, default_value_t = 80)]
    http_port: u16,
}

impl Cli {
    fn settings(self) -> AgentSettings {
        AgentSettings {
            origin: self.origin,
            role: if self.server { Role::Server } else { Role::Device },
            http_port: self.http_port,
            paths: Paths::default(),
        }
    }
}

#[async_std::main]
async fn main() {
    let cli = Cli::parse();
    if cli.version_sha {
        println!("{}", BUILD_SHA);
        return;
    }

    if unsafe { libc::geteuid() } != 0 {
        eprintln!("jacktrip-agent must be run as root");
        std::process::exit(1);
    }

    log::parse_log_level();

    let settings = cli.settings();
    let identity = Identity::load(&settings.paths)
        .unwrap_or_else(|e| oops(format!("failed to load device identity: {}", e), 1));
    info!(
        "device {} with {} ({})",
        identity.mac, identity.sound_card_name, identity.sound_card_type
    );

    let agent = Agent::new(settings, identity, Arc::new(Systemd), Arc::new(SystemShell));
    agent.set_status(DeviceStatus::Starting);

    {
        let token = agent.cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || token.cancel()) {
            oops(format!("failed to install signal handler: {}", e), 1);
        }
    }

    let (config_tx, config_rx) = bounded(CONFIG_CAPACITY);

    let autoconnector = Autoconnector::new(Arc::clone(&agent), JackServer::new(CLIENT_NAME));
    let worker = autoconnector
        .start()
        .unwrap_or_else(|e| oops(format!("failed to start autoconnector: {}", e), 1));
    let mixer = Arc::new(DeviceMixer::new(Arc::clone(&agent), autoconnector));
    let heartbeat = HeartbeatLoop::new(Arc::clone(&agent), config_tx);

    let tasks = vec![
        task::spawn(applicator::run(Arc::clone(&agent), config_rx)),
        task::spawn(mixer.run()),
        task::spawn(heartbeat.run()),
        task::spawn(heartbeat::probe::run(Arc::clone(&agent))),
        task::spawn({
            let agent = Arc::clone(&agent);
            async move {
                if let Err(e) = http::serve(agent).await {
                    error!("http server failed: {}", e);
                }
            }
        }),
    ];

    for t in tasks {
        t.await;
    }

    if task::spawn_blocking(move || worker.join()).await.is_err() {
        error!("autoconnector worker panicked");
    }
    info!("jacktrip-agent exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let s = Cli::parse_from(["jacktrip-agent"]).settings();
        assert_eq!(s.origin, DEFAULT_ORIGIN);
        assert_eq!(s.role, Role::Device);
        assert_eq!(s.http_port, 80);
    }

    #[test]
    fn cli_flags() {
        let cli = Cli::parse_from(["jacktrip-agent", "-o", "http://localhost:8080/api", "--server", "-v"]);
        assert!(cli.version_sha);
        let s = cli.settings();
        assert_eq!(s.origin, "http://localhost:8080/api");
        assert_eq!(s.role, Role::Server);
    }
}
