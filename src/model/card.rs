//! Sound card families and their mixer controls

use std::str::FromStr;

/// Which [`MixerLevels`](super::config::MixerLevels) field drives a control
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    CaptureVolume,
    CaptureBoost,
    CaptureMute,
    PlaybackVolume,
    PlaybackBoost,
    PlaybackMute,
    MonitorVolume,
    MonitorMute,
}

/// A single `amixer` control and how its value is derived.
///
/// Volume controls take `level * scale / 100`, boosts and mutes take
/// 0 or 1.  Mute levels drive a switch, so a muted channel writes 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Control {
    pub name: &'static str,
    pub level: Level,
    pub scale: i32,
}

const fn vol(name: &'static str, level: Level, scale: i32) -> Control {
    Control { name, level, scale }
}

const fn switch(name: &'static str, level: Level) -> Control {
    Control {
        name,
        level,
        scale: 1,
    }
}

use Level::*;

const HIFIBERRY: &[Control] = &[
    vol("ADC Capture Volume", CaptureVolume, 104),
    vol("Digital Playback Volume", PlaybackVolume, 207),
    switch("Analogue Playback Boost Volume", PlaybackBoost),
    switch("Digital Playback Switch", PlaybackMute),
];

const HIFIBERRY_PRO: &[Control] = &[
    vol("ADC Capture Volume", CaptureVolume, 104),
    switch("ADC Mic Bias", CaptureBoost),
    vol("Digital Playback Volume", PlaybackVolume, 207),
    switch("Analogue Playback Boost Volume", PlaybackBoost),
    switch("Digital Playback Switch", PlaybackMute),
];

const AUDIO_INJECTOR: &[Control] = &[
    vol("Capture Volume", CaptureVolume, 31),
    switch("Mic Boost Volume", CaptureBoost),
    switch("Capture Switch", CaptureMute),
    vol("Master Playback Volume", PlaybackVolume, 127),
    switch("Master Playback ZC Switch", PlaybackMute),
    vol("Sidetone Playback Volume", MonitorVolume, 3),
    switch("Output Mixer Mic Sidetone Switch", MonitorMute),
];

const USB_AUDIO_DEVICE: &[Control] = &[
    vol("Mic Capture Volume", CaptureVolume, 35),
    switch("Auto Gain Control", CaptureBoost),
    switch("Mic Capture Switch", CaptureMute),
    vol("Speaker Playback Volume", PlaybackVolume, 37),
    switch("Speaker Playback Switch", PlaybackMute),
    vol("Mic Playback Volume", MonitorVolume, 31),
    switch("Mic Playback Switch", MonitorMute),
];

const USB_PNP_SOUND_DEVICE: &[Control] = &[
    vol("Mic Capture Volume", CaptureVolume, 16),
    switch("Auto Gain Control", CaptureBoost),
    switch("Mic Capture Switch", CaptureMute),
    vol("Speaker Playback Volume", PlaybackVolume, 151),
    switch("Speaker Playback Switch", PlaybackMute),
];

/// Sound card families the agent knows how to drive
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SoundCardType {
    HifiBerry,
    HifiBerryPro,
    AudioInjector,
    UsbAudioDevice,
    UsbPnpSoundDevice,
    Unknown(String),
}

impl FromStr for SoundCardType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "Audio Injector", "audioinjector-pi" and "snd_rpi_..." all name
        // the same family once case and separators are dropped
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .flat_map(char::to_lowercase)
            .collect();
        Ok(match key.as_str() {
            "hifiberry" | "hifiberrydac+adc" | "sndrpihifiberrydacplusadc" => Self::HifiBerry,
            "hifiberrypro" | "hifiberrydac+adcpro" | "sndrpihifiberrydacplusadcpro" => {
                Self::HifiBerryPro
            }
            "audioinjector" | "audioinjectorpi" => Self::AudioInjector,
            "usbaudiodevice" => Self::UsbAudioDevice,
            "usbpnpsounddevice" => Self::UsbPnpSoundDevice,
            _ => Self::Unknown(s.trim().to_owned()),
        })
    }
}

impl SoundCardType {
    /// Mixer controls in the order they get written
    pub fn controls(&self) -> &'static [Control] {
        match self {
            Self::HifiBerry => HIFIBERRY,
            Self::HifiBerryPro => HIFIBERRY_PRO,
            Self::AudioInjector => AUDIO_INJECTOR,
            Self::UsbAudioDevice => USB_AUDIO_DEVICE,
            Self::UsbPnpSoundDevice => USB_PNP_SOUND_DEVICE,
            Self::Unknown(_) => &[],
        }
    }

    /// Is this the on-board card (which never gets a USB bridge)
    pub fn is_onboard_name(name: &str) -> bool {
        name.to_lowercase().contains("hifiberry")
    }
}
