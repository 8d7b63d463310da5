//! Agent settings
//!
//! ## Paths
//!
//! Every file the agent reads or writes is listed in [`Paths`].  The
//! defaults match the layout of a JackTrip device image; tests root
//! the whole table under a temporary directory with
//! [`Paths::rooted`].
//!
//! ## Role
//!
//! The agent either runs on a participant's device or on an audio
//! server.  The role only changes which services are started for a
//! config, see [`crate::applicator`].

use std::path::{Path, PathBuf};

/// The default control plane origin
pub const DEFAULT_ORIGIN: &str = "https://app.jacktrip.org/api";

/// Location of every file owned by the agent
#[derive(Clone, Debug)]
pub struct Paths {
    /// `PREFIX.SECRET`
    pub credentials: PathBuf,
    pub device_name: PathBuf,
    pub device_type: PathBuf,
    pub patch: PathBuf,
    /// MAC address of the primary interface
    pub mac: PathBuf,
    /// `/proc/asound`
    pub asound: PathBuf,
    /// Directory for service environment files and bridge configs
    pub service_dir: PathBuf,
    pub avahi_service: PathBuf,
    pub sc_startup: PathBuf,
    pub jamulus_ini: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::rooted("/")
    }
}

impl Paths {
    /// Build the standard layout below `root`
    pub fn rooted(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            credentials: root.join("etc/jacktrip/credentials"),
            device_name: root.join("etc/jacktrip/devicename"),
            device_type: root.join("etc/jacktrip/devicetype"),
            patch: root.join("etc/jacktrip/patch"),
            mac: root.join("sys/class/net/eth0/address"),
            asound: root.join("proc/asound"),
            service_dir: root.join("tmp/default"),
            avahi_service: root.join("tmp/avahi/services/jacktrip-agent.service"),
            sc_startup: root.join("tmp/jacktrip.scd"),
            jamulus_ini: root.join("tmp/jamulus.ini"),
        }
    }

    pub fn asound_cards(&self) -> PathBuf {
        self.asound.join("cards")
    }

    pub fn stream0(&self, card: u32) -> PathBuf {
        self.asound.join(format!("card{}", card)).join("stream0")
    }

    /// Environment file read by a managed service unit
    pub fn service_file(&self, name: &str) -> PathBuf {
        self.service_dir.join(name)
    }
}

/// Which side of a session this node plays
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Device,
    Server,
}

/// Settings for one agent process, derived from the command line
#[derive(Clone, Debug)]
pub struct AgentSettings {
    /// Control plane origin, e.g. `https://app.jacktrip.org/api`
    pub origin: String,
    pub role: Role,
    pub http_port: u16,
    pub paths: Paths,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_owned(),
            role: Role::Device,
            http_port: 80,
            paths: Paths::default(),
        }
    }
}
