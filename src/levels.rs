//! Mixer level driver
//!
//! Pushes the eight [`MixerLevels`] fields to the sound card with
//! `amixer`.  Which controls exist, and how a 0-100 level maps onto
//! each, depends on the card family, see [`SoundCardType::controls`].
//! Failures are logged and never propagated.

use crate::{
    model::{
        card::{Control, Level},
        MixerLevels, SoundCardType,
    },
    shell::{argv, Shell},
};
use tracing::{info, warn};

/// Value written to one control
fn control_value(control: &Control, levels: &MixerLevels) -> i32 {
    let scaled = |v: i32| v.clamp(0, 100) * control.scale / 100;
    match control.level {
        Level::CaptureVolume => scaled(levels.capture_volume),
        Level::PlaybackVolume => scaled(levels.playback_volume),
        Level::MonitorVolume => scaled(levels.monitor_volume),
        Level::CaptureBoost => levels.capture_boost as i32,
        Level::PlaybackBoost => levels.playback_boost as i32,
        Level::CaptureMute => !levels.capture_mute as i32,
        Level::PlaybackMute => !levels.playback_mute as i32,
        Level::MonitorMute => !levels.monitor_mute as i32,
    }
}

/// `amixer` argument lists for a card, in order
pub fn commands(card: &str, card_type: &SoundCardType, levels: &MixerLevels) -> Vec<Vec<String>> {
    card_type
        .controls()
        .iter()
        .map(|c| {
            argv([
                "-q".to_owned(),
                "-c".to_owned(),
                card.to_owned(),
                "cset".to_owned(),
                format!("name={}", c.name),
                control_value(c, levels).to_string(),
            ])
        })
        .collect()
}

/// Apply `levels` to `card`
pub async fn apply(shell: &dyn Shell, card: &str, card_type: &SoundCardType, levels: &MixerLevels) {
    if let SoundCardType::Unknown(name) = card_type {
        info!("no mixer settings for sound card type {:?}", name);
        return;
    }

    for args in commands(card, card_type, levels) {
        if let Err(e) = shell.run("amixer", &args).await {
            warn!("amixer {:?}: {}", args, e);
        }
    }
}
