//! Config applicator
//!
//! The only writer of the applied config, the service environment
//! files and the managed services.  Configs are taken off the channel
//! strictly in order, diffed against the applied config, and the
//! smallest matching reaction is run:
//!
//! 1. nothing changed: nothing happens
//! 2. only mixer levels changed: `amixer`, no services touched
//! 3. only the mix branch/code changed: rewrite the SuperCollider
//!    files and restart `sclang`
//! 4. anything else: rewrite every file, stop every managed service and
//!    start the set this config needs

use crate::{
    config::Role,
    context::Agent,
    error::ApplyError,
    levels,
    log::oops,
    model::{ConfigChange, DeviceConfig, DeviceStatus, ServerType},
    templates,
};
use async_std::channel::Receiver;
use futures::{future, pin_mut};
use std::{fs, path::Path, sync::Arc};
use tracing::{debug, info};

pub const JACK: &str = "jack.service";
pub const JACKTRIP: &str = "jacktrip.service";
pub const JAMULUS: &str = "jamulus.service";
pub const JAMULUS_SERVER: &str = "jamulus-server.service";
pub const JAMULUS_BRIDGE: &str = "jamulus-bridge.service";
pub const SUPERCOLLIDER: &str = "supercollider.service";
pub const SUPERNOVA: &str = "supernova.service";
pub const SCLANG: &str = "sclang.service";

/// Machines with at least this many CPUs run the multi-core engine
const SUPERNOVA_MIN_CPUS: u64 = 4;

/// Every unit the applicator may start for a role, in start order
pub fn managed_services(role: Role) -> &'static [&'static str] {
    match role {
        Role::Device => &[JACK, JACKTRIP, JAMULUS],
        Role::Server => &[
            JACK,
            SUPERCOLLIDER,
            SUPERNOVA,
            SCLANG,
            JACKTRIP,
            JAMULUS_SERVER,
            JAMULUS_BRIDGE,
        ],
    }
}

/// Units to start for `cfg`, in start order
pub fn services_for(role: Role, cfg: &DeviceConfig, cpus: u64) -> Vec<&'static str> {
    let e = &cfg.engine;
    match role {
        Role::Device => {
            let transport = match (e.server_type, e.quality) {
                (ServerType::JackTrip, _) => JACKTRIP,
                (ServerType::Jamulus, _) => JAMULUS,
                (ServerType::JackTripJamulus, 2) => JACKTRIP,
                (ServerType::JackTripJamulus, _) => JAMULUS,
            };
            vec![JACK, transport]
        }
        Role::Server => {
            let engine = if cpus >= SUPERNOVA_MIN_CPUS {
                SUPERNOVA
            } else {
                SUPERCOLLIDER
            };
            let mut units = vec![JACK, engine, SCLANG];
            if matches!(e.server_type, ServerType::JackTrip | ServerType::JackTripJamulus) {
                units.push(JACKTRIP);
            }
            if matches!(e.server_type, ServerType::Jamulus | ServerType::JackTripJamulus) {
                units.push(JAMULUS_SERVER);
                units.push(JAMULUS_BRIDGE);
            }
            units
        }
    }
}

fn cpu_count() -> u64 {
    psutil::cpu::cpu_count()
}

fn write_file(path: &Path, body: &str) -> Result<(), ApplyError> {
    let wrap = |source| ApplyError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(wrap)?;
    }
    fs::write(path, body).map_err(wrap)?;
    debug!("wrote {}", path.display());
    Ok(())
}

fn client_name(agent: &Agent) -> String {
    format!("jacktrip-{}", agent.identity.mac.replace(':', ""))
}

/// The SuperCollider environment files and startup file
fn write_sc_files(agent: &Agent, cfg: &DeviceConfig) -> Result<(), ApplyError> {
    let paths = &agent.settings.paths;
    let channels = match agent.settings.role {
        Role::Device => cfg.engine.input_channels.max(2),
        Role::Server => 64,
    };
    write_file(&paths.service_file("supercollider"), &templates::supercollider(cfg, channels))?;
    write_file(&paths.service_file("sclang"), &templates::sclang(cfg))?;
    write_file(&paths.sc_startup, &templates::sc_startup(cfg))
}

/// Every environment file for the agent's role
fn write_all_files(agent: &Agent, cfg: &DeviceConfig) -> Result<(), ApplyError> {
    let paths = &agent.settings.paths;
    let name = client_name(agent);

    write_file(
        &paths.service_file("jack"),
        &templates::jack(cfg, &agent.identity.sound_card_name),
    )?;
    match agent.settings.role {
        Role::Device => {
            write_file(&paths.service_file("jacktrip"), &templates::jacktrip(cfg, &name))?;
            write_file(&paths.service_file("jamulus"), &templates::jamulus(cfg))?;
        }
        Role::Server => {
            write_file(&paths.service_file("jacktrip"), &templates::jacktrip_hub(cfg))?;
            write_file(&paths.service_file("jamulus"), &templates::jamulus_server(cfg))?;
        }
    }
    write_file(&paths.jamulus_ini, &templates::jamulus_ini(cfg, &name))?;
    write_sc_files(agent, cfg)
}

async fn push_levels(agent: &Agent, cfg: &DeviceConfig) {
    levels::apply(
        agent.shell.as_ref(),
        &agent.identity.sound_card_name,
        &agent.card_type,
        &cfg.levels,
    )
    .await;
}

/// Apply one desired config.  Any error is fatal to the agent.
pub async fn apply(agent: &Agent, new: DeviceConfig) -> Result<(), ApplyError> {
    let current = agent.applied();
    let (levels_changed, change) = new.classify(&current);

    if change == ConfigChange::None {
        debug!("config unchanged");
        return Ok(());
    }

    let mut next = (*current).clone();
    if levels_changed && change != ConfigChange::Full {
        info!("applying mixer levels");
        push_levels(agent, &new).await;
        next.levels = new.levels.clone();
    }

    match change {
        ConfigChange::None | ConfigChange::Levels => {}
        ConfigChange::Mix => {
            info!("mix changed to branch {:?}, restarting {}", new.mix.mix_branch, SCLANG);
            next.mix = new.mix.clone();
            write_sc_files(agent, &next)?;
            agent.supervisor.restart(SCLANG).await?;
        }
        ConfigChange::Full => {
            info!(
                "reconfiguring: enabled={} type={:?} host={:?}",
                new.engine.enabled, new.engine.server_type, new.engine.host
            );
            write_all_files(agent, &new)?;

            let role = agent.settings.role;
            for unit in managed_services(role).iter().rev() {
                agent.supervisor.stop(unit).await?;
            }
            if new.engine.enabled {
                for unit in services_for(role, &new, cpu_count()) {
                    agent.supervisor.start(unit).await?;
                }
            }
            // restarted services reset the card mixer
            push_levels(agent, &new).await;
            next = new;
        }
    }

    let connected = next.is_connected();
    agent.publish_applied(next);
    agent.set_status(if connected {
        DeviceStatus::Connected
    } else {
        DeviceStatus::NotConnected
    });
    Ok(())
}

/// Drain the config channel until it closes or the agent is cancelled
pub async fn run(agent: Arc<Agent>, configs: Receiver<DeviceConfig>) {
    loop {
        let cancelled = agent.cancel.cancelled();
        let next = configs.recv();
        pin_mut!(cancelled, next);

        let cfg = match future::select(cancelled, next).await {
            future::Either::Left(_) => break,
            future::Either::Right((Ok(cfg), _)) => cfg,
            future::Either::Right((Err(_), _)) => break,
        };

        if let Err(e) = apply(&agent, cfg).await {
            oops(format!("failed to apply config: {}", e), 1);
        }
    }
    info!("config applicator stopped");
}
