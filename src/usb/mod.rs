//! Device mixer
//!
//! Once a second, look for USB sound cards and bridge each one into the
//! audio graph with a `zita-a2j` (capture) or `zita-j2a` (playback)
//! unit.  Bridges only exist while USB is enabled in the applied
//! config, the device is connected to a server and the audio server is
//! reachable.  Otherwise everything is torn down again.
//!
//! Every bridge in the registry has exactly one config file on disk and
//! a started unit.  Before a card is first bridged its ALSA state is
//! saved, and it is restored once the card has no bridges left.

mod cards;
mod stream0;

pub use cards::{parse_card_listing, parse_proc_cards};
pub use stream0::{choose_rate, supported_formats};

use crate::{
    context::Agent,
    jack::AudioServerLink,
    levels,
    model::{DeviceConfig, DeviceStatus},
    shell::argv,
    templates,
};
use async_std::{future, sync::Mutex};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs, io,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tracing::{debug, info, warn};

const TICK: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Direction {
    /// Card to graph
    Capture,
    /// Graph to card
    Playback,
}

impl Direction {
    pub fn other(self) -> Self {
        match self {
            Self::Capture => Self::Playback,
            Self::Playback => Self::Capture,
        }
    }

    /// The zita bridge flavour
    fn bridge(self) -> &'static str {
        match self {
            Self::Capture => "a2j",
            Self::Playback => "j2a",
        }
    }

    /// Tool that lists cards for this direction
    fn lister(self) -> &'static str {
        match self {
            Self::Capture => "arecord",
            Self::Playback => "aplay",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Playback => "playback",
        }
    }
}

pub fn bridge_unit(direction: Direction, device: &str) -> String {
    format!("zita-{}@{}.service", direction.bridge(), device)
}

fn bridge_conf_name(direction: Direction, device: &str) -> String {
    format!("zita-{}-{}-conf", direction.bridge(), device)
}

fn state_file_name(device: &str) -> String {
    format!("asound-{}.state", device)
}

#[derive(Default)]
struct Registry {
    capture: BTreeSet<String>,
    playback: BTreeSet<String>,
    /// Raw stream0 contents, read once per card
    stream0: BTreeMap<String, Vec<String>>,
    /// Cards already reported as having no usable rate
    unusable: BTreeSet<(Direction, String)>,
}

impl Registry {
    fn current(&mut self, d: Direction) -> &mut BTreeSet<String> {
        match d {
            Direction::Capture => &mut self.capture,
            Direction::Playback => &mut self.playback,
        }
    }

    fn bridged(&self, d: Direction, device: &str) -> bool {
        match d {
            Direction::Capture => self.capture.contains(device),
            Direction::Playback => self.playback.contains(device),
        }
    }

    /// Forget cached facts about cards the kernel no longer lists
    fn prune(&mut self, cards: &BTreeMap<String, u32>) {
        self.stream0.retain(|name, _| cards.contains_key(name));
        self.unusable.retain(|(_, name)| cards.contains_key(name));
    }
}

pub struct DeviceMixer {
    agent: Arc<Agent>,
    link: Arc<dyn AudioServerLink>,
    registry: Mutex<Registry>,
}

impl DeviceMixer {
    pub fn new(agent: Arc<Agent>, link: Arc<dyn AudioServerLink>) -> Self {
        Self {
            agent,
            link,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Tick until cancelled, then tear every bridge down
    pub async fn run(self: Arc<Self>) {
        loop {
            if future::timeout(TICK, self.agent.cancel.cancelled()).await.is_ok() {
                break;
            }
            self.tick().await;
        }

        info!("device mixer shutting down");
        self.reset().await;
    }

    /// Remove every bridge
    pub async fn reset(&self) {
        let mut reg = self.registry.lock().await;
        self.reset_locked(&mut reg).await;
    }

    async fn reset_locked(&self, reg: &mut Registry) {
        for direction in [Direction::Capture, Direction::Playback] {
            let devices: Vec<String> = reg.current(direction).iter().cloned().collect();
            for device in devices {
                self.remove_bridge(reg, direction, &device).await;
            }
        }
        reg.stream0.clear();
        reg.unusable.clear();
    }

    /// One reconciliation pass
    pub async fn tick(&self) {
        let mut reg = self.registry.lock().await;
        let cfg = self.agent.applied();

        if !cfg.engine.usb_enabled
            || self.agent.status() != Some(DeviceStatus::Connected)
            || !self.link.is_attached()
        {
            self.reset_locked(&mut reg).await;
            return;
        }

        let cards_path = self.agent.settings.paths.asound_cards();
        let cards = match fs::read_to_string(&cards_path) {
            Ok(c) => parse_proc_cards(&c),
            Err(e) => {
                warn!("failed to read {}: {}", cards_path.display(), e);
                return;
            }
        };
        reg.prune(&cards);

        let mut added = false;
        for direction in [Direction::Capture, Direction::Playback] {
            let listing = match self
                .agent
                .shell
                .run(direction.lister(), &argv(["-l"]))
                .await
            {
                Ok(out) => out,
                Err(e) => {
                    warn!("failed to list {} devices: {}", direction.label(), e);
                    continue;
                }
            };

            let present: BTreeSet<String> = parse_card_listing(&listing)
                .into_iter()
                .filter(|name| cards.contains_key(name))
                .collect();

            let stale: Vec<String> = reg.current(direction).difference(&present).cloned().collect();
            for device in stale {
                self.remove_bridge(&mut reg, direction, &device).await;
            }

            let new: Vec<String> = present
                .iter()
                .filter(|name| !reg.bridged(direction, name))
                .cloned()
                .collect();
            for device in new {
                let number = cards[&device];
                added |= self.add_bridge(&mut reg, direction, &device, number, &cfg).await;
            }
        }

        // restarted cards come back with default levels
        if added {
            levels::apply(
                &*self.agent.shell,
                &self.agent.identity.sound_card_name,
                &self.agent.card_type,
                &cfg.levels,
            )
            .await;
        }
    }

    fn service_path(&self, name: &str) -> PathBuf {
        self.agent.settings.paths.service_file(name)
    }

    fn stream0_lines(&self, reg: &mut Registry, device: &str, number: u32) -> io::Result<Vec<String>> {
        if let Some(lines) = reg.stream0.get(device) {
            return Ok(lines.clone());
        }
        let raw = fs::read_to_string(self.agent.settings.paths.stream0(number))?;
        let lines: Vec<String> = raw.lines().map(str::to_owned).collect();
        reg.stream0.insert(device.to_owned(), lines.clone());
        Ok(lines)
    }

    async fn add_bridge(
        &self,
        reg: &mut Registry,
        direction: Direction,
        device: &str,
        number: u32,
        cfg: &DeviceConfig,
    ) -> bool {
        let lines = match self.stream0_lines(reg, device, number) {
            Ok(l) => l,
            Err(e) => {
                warn!("no stream description for {}: {}", device, e);
                return false;
            }
        };

        let formats = supported_formats(&lines, direction);
        let (rate, channels) = match choose_rate(&formats, cfg.engine.sample_rate) {
            Some(rc) => rc,
            None => {
                if reg.unusable.insert((direction, device.to_owned())) {
                    info!(
                        "{} {} supports none of {}, 48000 or 44100 Hz",
                        device,
                        direction.label(),
                        cfg.engine.sample_rate
                    );
                }
                return false;
            }
        };
        reg.unusable.remove(&(direction, device.to_owned()));

        let state = self.service_path(&state_file_name(device));
        if !state.exists() {
            let args = argv(["-f".to_owned(), state.display().to_string(), "store".to_owned(), device.to_owned()]);
            if let Err(e) = self.agent.shell.run("alsactl", &args).await {
                warn!("failed to save mixer state of {}: {}", device, e);
            }
        }

        let conf = self.service_path(&bridge_conf_name(direction, device));
        let jack_name = format!("{}-{}", device, direction.label());
        let body = templates::zita_bridge(device, channels, cfg.engine.period, rate, &jack_name);
        if let Err(e) = fs::create_dir_all(&self.agent.settings.paths.service_dir)
            .and_then(|_| fs::write(&conf, body))
        {
            warn!("failed to write {}: {}", conf.display(), e);
            return false;
        }

        let unit = bridge_unit(direction, device);
        if let Err(e) = self.agent.supervisor.start(&unit).await {
            warn!("failed to start {}: {}", unit, e);
            remove_quietly(&conf);
            return false;
        }

        info!(
            "bridged {} {} at {} Hz with {} channels",
            device,
            direction.label(),
            rate,
            channels
        );
        reg.current(direction).insert(device.to_owned());
        true
    }

    async fn remove_bridge(&self, reg: &mut Registry, direction: Direction, device: &str) {
        let unit = bridge_unit(direction, device);
        if let Err(e) = self.agent.supervisor.stop(&unit).await {
            warn!("failed to stop {}: {}", unit, e);
        }
        remove_quietly(&self.service_path(&bridge_conf_name(direction, device)));
        reg.current(direction).remove(device);
        info!("removed {} bridge for {}", direction.label(), device);

        if reg.bridged(direction.other(), device) {
            return;
        }

        let state = self.service_path(&state_file_name(device));
        if state.exists() {
            let args = argv(["-f".to_owned(), state.display().to_string(), "restore".to_owned(), device.to_owned()]);
            if let Err(e) = self.agent.shell.run("alsactl", &args).await {
                debug!("failed to restore mixer state of {}: {}", device, e);
            }
            remove_quietly(&state);
        }
        reg.stream0.remove(device);
    }
}

fn remove_quietly(path: &std::path::Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("failed to remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::test_support::{agent, TestAgent},
        supervisor::fake::Call,
    };
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Link(AtomicBool);

    impl AudioServerLink for Link {
        fn is_attached(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    const CARDS: &str = " 0 [sndrpihifiberry]: HifiberryDacp - snd_rpi_hifiberry_dacplusadc
 2 [Blue           ]: USB-Audio - Yeti Stereo Microphone
";

    const STREAM0: &str = "Playback:
  Status: Stop
  Interface 1
    Altset 1
    Channels: 2
    Rates: 48000, 44100
Capture:
  Status: Stop
  Interface 2
    Altset 1
    Channels: 2
    Rates: 48000, 44100
";

    const ARECORD: &str = "card 2: Blue [Yeti Stereo Microphone], device 0: USB Audio [USB Audio]\n";

    fn setup() -> (TestAgent, Arc<Link>, DeviceMixer) {
        let t = agent("Audio Injector");
        let asound = &t.agent.settings.paths.asound;
        fs::create_dir_all(asound.join("card2")).unwrap();
        fs::write(asound.join("cards"), CARDS).unwrap();
        fs::write(asound.join("card2/stream0"), STREAM0).unwrap();

        let mut cfg = DeviceConfig::default();
        cfg.engine.enabled = true;
        cfg.engine.host = "server.example".into();
        cfg.engine.usb_enabled = true;
        cfg.engine.sample_rate = 48000;
        cfg.engine.period = 128;
        t.agent.publish_applied(cfg);
        t.agent.set_status(DeviceStatus::Connected);

        t.shell.set_stdout("arecord", ARECORD);
        t.shell.set_stdout("aplay", "");

        let link = Arc::new(Link(AtomicBool::new(true)));
        let mixer = DeviceMixer::new(Arc::clone(&t.agent), link.clone());
        (t, link, mixer)
    }

    #[async_std::test]
    async fn hotplug_add() {
        let (t, _link, mixer) = setup();
        mixer.tick().await;

        let conf = t.agent.settings.paths.service_file("zita-a2j-Blue-conf");
        let body = fs::read_to_string(&conf).unwrap();
        assert!(body.contains("CHANNELS=2"));
        assert!(body.contains("RATE=48000"));
        assert!(body.contains("PERIOD=128"));
        assert_eq!(t.supervisor.calls(), vec![Call::Start("zita-a2j@Blue.service".into())]);

        let stores = t.shell.calls_to("alsactl");
        assert_eq!(stores.len(), 1);
        assert_eq!(stores[0][2], "store");
        assert!(stores[0][1].ends_with("asound-Blue.state"));
        // levels re-applied after the addition
        assert!(!t.shell.calls_to("amixer").is_empty());

        // a second tick with nothing new is quiet
        t.supervisor.clear();
        t.shell.clear();
        mixer.tick().await;
        assert!(t.supervisor.calls().is_empty());
        assert!(t.shell.calls_to("amixer").is_empty());
    }

    #[async_std::test]
    async fn hotplug_remove() {
        let (t, _link, mixer) = setup();
        mixer.tick().await;
        let state = t.agent.settings.paths.service_file("asound-Blue.state");
        // alsactl would have created it
        fs::write(&state, "state").unwrap();

        t.shell.set_stdout("arecord", "");
        t.supervisor.clear();
        t.shell.clear();
        mixer.tick().await;

        assert_eq!(t.supervisor.calls(), vec![Call::Stop("zita-a2j@Blue.service".into())]);
        assert!(!t.agent.settings.paths.service_file("zita-a2j-Blue-conf").exists());
        assert!(!state.exists());
        let restores = t.shell.calls_to("alsactl");
        assert_eq!(restores.len(), 1);
        assert_eq!(restores[0][2], "restore");
    }

    #[async_std::test]
    async fn usb_disabled_resets() {
        let (t, _link, mixer) = setup();
        mixer.tick().await;
        assert!(t.supervisor.is_active("zita-a2j@Blue.service"));

        let mut cfg = (*t.agent.applied()).clone();
        cfg.engine.usb_enabled = false;
        t.agent.publish_applied(cfg);
        mixer.tick().await;
        assert!(!t.supervisor.is_active("zita-a2j@Blue.service"));
        assert!(!t.agent.settings.paths.service_file("zita-a2j-Blue-conf").exists());
    }

    #[async_std::test]
    async fn detached_audio_server_resets() {
        let (t, link, mixer) = setup();
        mixer.tick().await;
        link.0.store(false, Ordering::SeqCst);
        mixer.tick().await;
        assert!(t.supervisor.active_units().is_empty());
    }

    #[async_std::test]
    async fn unsupported_rate_is_skipped() {
        let (t, _link, mixer) = setup();
        let asound = &t.agent.settings.paths.asound;
        fs::write(asound.join("card2/stream0"), "Capture:\n Channels: 1\n Rates: 96000\n").unwrap();
        mixer.tick().await;
        assert!(t.supervisor.calls().is_empty());
        assert!(t.shell.calls_to("amixer").is_empty());

        // retried quietly on the next tick
        mixer.tick().await;
        assert!(t.supervisor.calls().is_empty());
        {
            let reg = mixer.registry.lock().await;
            assert_eq!(reg.stream0.len(), 1);
            assert_eq!(reg.unusable.len(), 1);
        }

        mixer.reset().await;
        let reg = mixer.registry.lock().await;
        assert!(reg.stream0.is_empty());
        assert!(reg.unusable.is_empty());
    }

    #[async_std::test]
    async fn vanished_card_is_forgotten() {
        let (t, _link, mixer) = setup();
        let asound = &t.agent.settings.paths.asound;
        fs::write(asound.join("card2/stream0"), "Capture:\n Channels: 1\n Rates: 96000\n").unwrap();
        mixer.tick().await;
        assert_eq!(mixer.registry.lock().await.stream0.len(), 1);

        // unplugged, then a different card shows up under the same name
        fs::write(asound.join("cards"), " 0 [sndrpihifiberry]: HifiberryDacp - x\n").unwrap();
        mixer.tick().await;
        assert!(mixer.registry.lock().await.stream0.is_empty());

        fs::write(asound.join("cards"), CARDS).unwrap();
        fs::write(asound.join("card2/stream0"), STREAM0).unwrap();
        mixer.tick().await;
        assert!(t.supervisor.is_active("zita-a2j@Blue.service"));
    }

    #[async_std::test]
    async fn failed_start_leaves_no_config() {
        let (t, _link, mixer) = setup();
        t.supervisor.fail("zita-a2j@Blue.service");
        mixer.tick().await;
        assert!(!t.agent.settings.paths.service_file("zita-a2j-Blue-conf").exists());
        assert!(t.shell.calls_to("amixer").is_empty());
    }

    #[async_std::test]
    async fn cancel_tears_down() {
        let (t, _link, mixer) = setup();
        let mixer = Arc::new(mixer);
        mixer.tick().await;
        t.agent.cancel.cancel();
        Arc::clone(&mixer).run().await;
        assert!(t.supervisor.active_units().is_empty());
    }
}
