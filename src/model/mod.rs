//! Data shared between the agent's runtimes

pub mod card;
pub mod config;
pub mod identity;
pub mod status;

pub use card::SoundCardType;
pub use config::{ConfigChange, DeviceConfig, MixerLevels, ServerType};
pub use identity::{Credentials, Identity};
pub use status::{DeviceStatus, Heartbeat, LatencyStats};
