//! Wiring rules between participants and the mixing server
//!
//! A participant `alice` registers `alice:send_N` (audio it sends us)
//! and `alice:receive_N` (audio we send it).  With alice in slot `s`,
//! `send_N` feeds server input `s * 2 + N` and `receive_N` is fed from
//! server output `s * 2 + N`.  The Jamulus bridge sits in slot 0.

use super::graph::PortGraph;
use crate::{
    ledger::{server_channel, KnownClients, JAMULUS_SLOT},
    retry::Backoff,
};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

static PARTICIPANT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+):(send|receive)_(\d+)$").expect("valid regex"));

/// Port name families of the two mixing servers, tried in order
const SERVER_FAMILIES: [ServerFamily; 2] = [
    ServerFamily {
        input: "SuperCollider:in_",
        output: "SuperCollider:out_",
    },
    ServerFamily {
        input: "supernova:input_",
        output: "supernova:output_",
    },
];

struct ServerFamily {
    input: &'static str,
    output: &'static str,
}

/// Jamulus ports, left then right
const JAMULUS_OUTPUTS: [&str; 2] = ["Jamulus:output left", "Jamulus:output right"];
const JAMULUS_INPUTS: [&str; 2] = ["Jamulus:input left", "Jamulus:input right"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// `send_N`, an output of the participant
    Send,
    /// `receive_N`, an input of the participant
    Receive,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantPort {
    pub client: String,
    pub flow: Flow,
    pub channel: u32,
}

impl ParticipantPort {
    pub fn parse(name: &str) -> Option<Self> {
        let caps = PARTICIPANT.captures(name)?;
        let flow = match &caps[2] {
            "send" => Flow::Send,
            _ => Flow::Receive,
        };
        Some(Self {
            client: caps[1].to_owned(),
            flow,
            channel: caps[3].parse().ok()?,
        })
    }
}

pub struct Patchbay<'a, G: PortGraph + ?Sized> {
    graph: &'a G,
    clients: &'a KnownClients,
    backoff: Backoff,
}

impl<'a, G: PortGraph + ?Sized> Patchbay<'a, G> {
    pub fn new(graph: &'a G, clients: &'a KnownClients, backoff: Backoff) -> Self {
        Self {
            graph,
            clients,
            backoff,
        }
    }

    /// First existing server input for a 1-based channel
    pub fn server_input(&self, channel: u32) -> Option<String> {
        SERVER_FAMILIES
            .iter()
            .map(|f| format!("{}{}", f.input, channel))
            .find(|name| self.graph.exists(name))
    }

    pub fn server_output(&self, channel: u32) -> Option<String> {
        SERVER_FAMILIES
            .iter()
            .map(|f| format!("{}{}", f.output, channel))
            .find(|name| self.graph.exists(name))
    }

    /// Apply the wiring rule for one port, if it belongs to a participant
    pub fn wire_port(&self, name: &str) {
        let port = match ParticipantPort::parse(name) {
            Some(p) => p,
            None => return,
        };
        let slot = self.clients.slot(&port.client);
        let channel = match server_channel(slot, port.channel) {
            Some(c) => c,
            None => {
                debug!("{} is past the last server channel", name);
                return;
            }
        };

        match port.flow {
            Flow::Send => match self.server_input(channel) {
                Some(input) => self.connect(name, &input),
                None => debug!("no server input {} for {}", channel, name),
            },
            Flow::Receive => match self.server_output(channel) {
                Some(output) => self.connect(&output, name),
                None => debug!("no server output {} for {}", channel, name),
            },
        }
    }

    /// Wire the Jamulus bridge into slot 0 if all four of its ports exist
    pub fn wire_jamulus(&self) {
        if !JAMULUS_OUTPUTS
            .iter()
            .chain(JAMULUS_INPUTS.iter())
            .all(|p| self.graph.exists(p))
        {
            return;
        }

        for (i, (out, inp)) in JAMULUS_OUTPUTS.iter().zip(JAMULUS_INPUTS.iter()).enumerate() {
            let channel = match server_channel(JAMULUS_SLOT, i as u32 + 1) {
                Some(c) => c,
                None => continue,
            };
            if let Some(server_in) = self.server_input(channel) {
                self.connect(out, &server_in);
            }
            if let Some(server_out) = self.server_output(channel) {
                self.connect(&server_out, inp);
            }
        }
    }

    /// Apply every rule to everything currently in the graph
    pub fn full_scan(&self) {
        let ports = self.graph.ports();
        debug!("full scan over {} ports", ports.len());
        for name in &ports {
            self.wire_port(name);
        }
        self.wire_jamulus();
    }

    fn connect(&self, source: &str, destination: &str) {
        if self.graph.is_connected(source, destination) {
            return;
        }
        match self.backoff.retry(|| self.graph.connect(source, destination)) {
            Ok(()) => info!("connected {} to {}", source, destination),
            Err(e) => warn!("giving up on {} to {}: {}", source, destination, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jack::graph::fake::FakeGraph;

    fn sc_ports() -> Vec<String> {
        (1..=8)
            .flat_map(|n| vec![format!("SuperCollider:in_{}", n), format!("SuperCollider:out_{}", n)])
            .collect()
    }

    fn graph(extra: &[&str]) -> FakeGraph {
        let g = FakeGraph::default();
        for p in sc_ports() {
            g.register(&p);
        }
        for p in extra {
            g.register(p);
        }
        g
    }

    fn pair(a: &str, b: &str) -> (String, String) {
        (a.to_owned(), b.to_owned())
    }

    #[test]
    fn parse_participant_ports() {
        assert_eq!(
            ParticipantPort::parse("alice:send_1"),
            Some(ParticipantPort {
                client: "alice".into(),
                flow: Flow::Send,
                channel: 1
            })
        );
        let p = ParticipantPort::parse("10.0.0.2:receive_12").unwrap();
        assert_eq!(p.client, "10.0.0.2");
        assert_eq!(p.flow, Flow::Receive);
        assert_eq!(p.channel, 12);
        assert!(ParticipantPort::parse("SuperCollider:in_3").is_none());
        assert!(ParticipantPort::parse("alice:send_").is_none());
        assert!(ParticipantPort::parse("system:capture_1").is_none());
    }

    #[test]
    fn send_goes_to_slot_input() {
        let g = graph(&["alice:send_1"]);
        let clients = KnownClients::new();
        Patchbay::new(&g, &clients, Backoff::default()).wire_port("alice:send_1");
        assert_eq!(g.requests(), vec![pair("alice:send_1", "SuperCollider:in_3")]);
    }

    #[test]
    fn receive_is_fed_from_slot_output() {
        let g = graph(&["alice:receive_2"]);
        let clients = KnownClients::new();
        Patchbay::new(&g, &clients, Backoff::default()).wire_port("alice:receive_2");
        assert!(g.connected("SuperCollider:out_4", "alice:receive_2"));
    }

    #[test]
    fn existing_connection_is_not_requested_again() {
        let g = graph(&["alice:send_1"]);
        let clients = KnownClients::new();
        let bay = Patchbay::new(&g, &clients, Backoff::default());
        bay.wire_port("alice:send_1");
        bay.wire_port("alice:send_1");
        bay.full_scan();
        assert_eq!(g.requests().len(), 1);
    }

    #[test]
    fn supernova_when_supercollider_is_absent() {
        let g = FakeGraph::with_ports(["supernova:input_3", "supernova:output_3", "bob:send_1"]);
        let clients = KnownClients::new();
        Patchbay::new(&g, &clients, Backoff::default()).wire_port("bob:send_1");
        assert!(g.connected("bob:send_1", "supernova:input_3"));
    }

    #[test]
    fn slots_follow_first_sight() {
        let g = graph(&["bob:send_1", "alice:send_1"]);
        let clients = KnownClients::new();
        let bay = Patchbay::new(&g, &clients, Backoff::default());
        bay.wire_port("bob:send_1");
        bay.wire_port("alice:send_1");
        // bob keeps slot 1 no matter how often he is seen
        bay.wire_port("bob:send_1");
        assert!(g.connected("bob:send_1", "SuperCollider:in_3"));
        assert!(g.connected("alice:send_1", "SuperCollider:in_5"));
        assert_eq!(clients.slot("bob"), 1);
    }

    #[test]
    fn jamulus_takes_slot_zero() {
        let g = graph(&[
            "Jamulus:output left",
            "Jamulus:output right",
            "Jamulus:input left",
            "Jamulus:input right",
        ]);
        let clients = KnownClients::new();
        Patchbay::new(&g, &clients, Backoff::default()).full_scan();
        assert!(g.connected("Jamulus:output left", "SuperCollider:in_1"));
        assert!(g.connected("Jamulus:output right", "SuperCollider:in_2"));
        assert!(g.connected("SuperCollider:out_1", "Jamulus:input left"));
        assert!(g.connected("SuperCollider:out_2", "Jamulus:input right"));
        assert!(clients.is_empty());
    }

    #[test]
    fn partial_jamulus_is_ignored() {
        let g = graph(&["Jamulus:output left", "Jamulus:output right"]);
        let clients = KnownClients::new();
        Patchbay::new(&g, &clients, Backoff::default()).full_scan();
        assert!(g.requests().is_empty());
    }

    #[test]
    fn missing_server_port_is_skipped() {
        let g = FakeGraph::with_ports(["alice:send_1"]);
        let clients = KnownClients::new();
        Patchbay::new(&g, &clients, Backoff::default()).wire_port("alice:send_1");
        assert!(g.requests().is_empty());
        assert_eq!(clients.len(), 1);
    }

    #[test]
    fn channel_past_the_end_is_skipped() {
        let g = graph(&["x:send_4294967295"]);
        let clients = KnownClients::new();
        Patchbay::new(&g, &clients, Backoff::default()).wire_port("x:send_4294967295");
        assert!(g.requests().is_empty());
    }
}
