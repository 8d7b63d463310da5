//! Desired and applied device configuration.
//!
//! A [`DeviceConfig`] arrives from the control plane as one flat JSON
//! object.  Internally the fields are split into three groups, because
//! each group reacts differently when it changes:
//!
//! - [`MixerLevels`] only touch the sound card mixer
//! - [`MixConfig`] only restarts the SuperCollider language runtime
//! - [`EngineConfig`] rewrites every service config and restarts services

use serde::{Deserialize, Serialize};

/// Which transport(s) the node runs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerType {
    JackTrip,
    Jamulus,
    #[serde(rename = "JackTrip+Jamulus")]
    JackTripJamulus,
}

impl Default for ServerType {
    fn default() -> Self {
        Self::JackTrip
    }
}

/// The eight fields pushed to the sound card by `amixer`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MixerLevels {
    pub capture_volume: i32,
    pub capture_boost: bool,
    pub capture_mute: bool,
    pub playback_volume: i32,
    pub playback_boost: bool,
    pub playback_mute: bool,
    pub monitor_volume: i32,
    pub monitor_mute: bool,
}

/// Everything that is baked into service configuration files
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub server_type: ServerType,
    pub host: String,
    pub port: u16,
    pub device_port: u16,
    pub sample_rate: u32,
    pub period: u32,
    pub queue_buffer: u32,
    pub stereo: bool,
    pub input_channels: u32,
    pub output_channels: u32,
    pub limiter: bool,
    pub compressor: bool,
    pub reverb: i32,
    pub quality: u8,
    #[serde(rename = "enableUsb")]
    pub usb_enabled: bool,
}

/// The SuperCollider mix program
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MixConfig {
    pub mix_branch: String,
    pub mix_code: String,
}

/// One unit of instruction from the control plane
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(flatten)]
    pub levels: MixerLevels,
    #[serde(flatten)]
    pub engine: EngineConfig,
    #[serde(flatten)]
    pub mix: MixConfig,
}

/// How a new config differs from the applied one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigChange {
    /// Identical, nothing to do
    None,
    /// Only mixer level fields differ
    Levels,
    /// Only the mix branch/code differ (possibly alongside levels)
    Mix,
    /// Engine fields differ, everything gets rebuilt
    Full,
}

impl DeviceConfig {
    /// Classify how `self` differs from `current`.
    ///
    /// Levels are checked independently of the other two groups: the
    /// applicator always pushes new levels first, and then looks at
    /// what is left.
    pub fn classify(&self, current: &DeviceConfig) -> (bool, ConfigChange) {
        let levels = self.levels != current.levels;
        let change = if self.engine != current.engine {
            ConfigChange::Full
        } else if self.mix != current.mix {
            ConfigChange::Mix
        } else if levels {
            ConfigChange::Levels
        } else {
            ConfigChange::None
        };
        (levels, change)
    }

    /// An audio host has been assigned to this node
    pub fn has_host(&self) -> bool {
        !self.engine.host.is_empty()
    }

    /// The node is enabled and knows where to send audio
    pub fn is_connected(&self) -> bool {
        self.engine.enabled && self.has_host()
    }
}
