//! Config file bodies for the managed services.
//!
//! These are environment files read by the unit files shipped on the
//! image, plus the SuperCollider startup file and the Jamulus ini.

use crate::model::config::DeviceConfig;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};

/// Audio interface options for `jackd`
pub fn jack(cfg: &DeviceConfig, alsa_device: &str) -> String {
    let e = &cfg.engine;
    format!(
        "JACK_OPTS=-dalsa -dhw:{} -r{} -p{} -n2 -s -S\n",
        alsa_device, e.sample_rate, e.period
    )
}

pub fn jacktrip(cfg: &DeviceConfig, client_name: &str) -> String {
    let e = &cfg.engine;
    let mut opts = format!(
        "-C {} --clientname {} --receivechannels {} --sendchannels {} --remotename {} -q {} -p {}",
        e.host,
        client_name,
        e.output_channels.max(1),
        e.input_channels.max(1),
        client_name,
        e.queue_buffer.max(2),
        e.port,
    );
    if e.device_port != 0 {
        opts.push_str(&format!(" -B {}", e.device_port));
    }
    if e.limiter {
        opts.push_str(" -Oio");
    }
    format!("JACKTRIP_OPTS={}\n", opts)
}

pub fn jamulus(cfg: &DeviceConfig) -> String {
    format!(
        "JAMULUS_OPTS=--nogui --connect {}:{} --inifile /tmp/jamulus.ini\n",
        cfg.engine.host, cfg.engine.port
    )
}

/// Hub server options for the JackTrip server role
pub fn jacktrip_hub(cfg: &DeviceConfig) -> String {
    let e = &cfg.engine;
    format!(
        "JACKTRIP_OPTS=-S -p5 -D --udprt -q {} --bindport {}\n",
        e.queue_buffer.max(2),
        e.port
    )
}

pub fn jamulus_server(cfg: &DeviceConfig) -> String {
    format!(
        "JAMULUS_OPTS=--server --nogui --port {} --numchannels 64 --inifile /tmp/jamulus.ini\n",
        cfg.engine.port
    )
}

/// Settings consumed by the Jamulus client
pub fn jamulus_ini(cfg: &DeviceConfig, client_name: &str) -> String {
    let e = &cfg.engine;
    format!(
        "<client>\n  <name_base64>{}</name_base64>\n  <audioquality>{}</audioquality>\n  <stereo>{}</stereo>\n  <reverb>{}</reverb>\n</client>\n",
        BASE64_STANDARD.encode(client_name),
        e.quality,
        e.stereo as u8,
        e.reverb
    )
}

pub fn supercollider(cfg: &DeviceConfig, channels: u32) -> String {
    format!(
        "SC_JACK_DEFAULT_INPUTS=system\nSC_JACK_DEFAULT_OUTPUTS=system\nSC_OPTS=-u 57110 -a 1024 -i {ch} -o {ch} -z {}\n",
        cfg.engine.period,
        ch = channels
    )
}

pub fn sclang(cfg: &DeviceConfig) -> String {
    format!(
        "MIX_BRANCH={}\nSC_STARTUP=/tmp/jacktrip.scd\n",
        if cfg.mix.mix_branch.is_empty() {
            "main"
        } else {
            &cfg.mix.mix_branch
        }
    )
}

/// SuperCollider language startup file wrapping the mix code
pub fn sc_startup(cfg: &DeviceConfig) -> String {
    let e = &cfg.engine;
    let code = if cfg.mix.mix_code.is_empty() {
        "JackTripDefaultMix.new.start;"
    } else {
        &cfg.mix.mix_code
    };
    format!(
        "(\n~limiter = {};\n~compressor = {};\n~reverb = {};\n~stereo = {};\ns.waitForBoot {{\n{}\n}};\n)\n",
        e.limiter, e.compressor, e.reverb, e.stereo, code
    )
}

/// Config for one `zita-a2j`/`zita-j2a` bridge
pub fn zita_bridge(device: &str, channels: u32, period: u32, rate: u32, jack_name: &str) -> String {
    format!(
        "DEVICE=hw:{}\nCHANNELS={}\nPERIOD={}\nRATE={}\nJACK_NAME={}\n",
        device, channels, period, rate, jack_name
    )
}

/// mDNS advertisement record
pub fn avahi_service(status: &str, version: &str, mac: &str, api_hash: &str) -> String {
    format!(
        r#"<?xml version="1.0" standalone='no'?>
<!DOCTYPE service-group SYSTEM "avahi-service.dtd">
<service-group>
  <name replace-wildcards="yes">JackTrip Agent on %h</name>
  <service>
    <type>_jacktrip-agent._tcp</type>
    <port>80</port>
    <txt-record>status={}</txt-record>
    <txt-record>version={}</txt-record>
    <txt-record>mac={}</txt-record>
    <txt-record>apiHash={}</txt-record>
  </service>
</service-group>
"#,
        status, version, mac, api_hash
    )
}
