//! Latency probe
//!
//! Measures the round trip to the assigned audio host.  The host's own
//! agent echoes websocket frames on `/ping`; when that cannot be
//! reached we fall back to ICMP.

use crate::{
    context::Agent,
    error::{ParseError, TransportError},
    model::LatencyStats,
    shell::argv,
};
use async_std::{future, task};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

/// Frames (or echo requests) per run
pub const PROBE_COUNT: u32 = 5;
const FRAME_INTERVAL: Duration = Duration::from_secs(1);
const FRAME_TIMEOUT: Duration = Duration::from_secs(1);
/// Pause between probe runs
const PROBE_INTERVAL: Duration = Duration::from_secs(10);

static PING_TIME: Lazy<Regex> = Lazy::new(|| Regex::new(r"time=(\S+) ms").expect("valid regex"));

/// Round trip times from `ping` output.  Malformed times are skipped.
pub fn parse_ping(output: &str) -> Vec<Duration> {
    output
        .lines()
        .filter_map(|line| match parse_ping_line(line) {
            Ok(rtt) => rtt,
            Err(e) => {
                debug!("{}", e);
                None
            }
        })
        .collect()
}

fn parse_ping_line(line: &str) -> Result<Option<Duration>, ParseError> {
    let caps = match PING_TIME.captures(line) {
        Some(c) => c,
        None => return Ok(None),
    };
    let ms: f64 = caps[1]
        .parse()
        .map_err(|_| ParseError::Number(caps[1].to_owned()))?;
    if !ms.is_finite() || ms < 0.0 {
        return Err(ParseError::Line(line.to_owned()));
    }
    Ok(Some(Duration::from_micros((ms * 1000.0).round() as u64)))
}

/// Echo probe against `ws://{host}/ping`
async fn ws_probe(host: &str) -> Result<(Vec<Duration>, u32), TransportError> {
    let url = format!("ws://{}/ping", host);
    let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    let (mut sink, mut stream) = ws.split();

    let mut rtts = Vec::new();
    for i in 0..PROBE_COUNT {
        let payload = (i % 10).to_string();
        let sent = Instant::now();
        sink.send(Message::Text(payload.clone())).await?;

        // wait for our byte, skipping anything else
        let deadline = sent + FRAME_TIMEOUT;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match future::timeout(left, stream.next()).await {
                Ok(Some(Ok(Message::Text(t)))) if t == payload => {
                    rtts.push(sent.elapsed());
                    break;
                }
                Ok(Some(Ok(_))) => trace!("ignoring non-echo frame"),
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(None) => return Err(TransportError::Closed),
                Err(_) => break,
            }
        }

        if i + 1 < PROBE_COUNT {
            task::sleep(FRAME_INTERVAL.saturating_sub(sent.elapsed())).await;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
    Ok((rtts, PROBE_COUNT))
}

async fn icmp_probe(agent: &Agent, host: &str) -> (Vec<Duration>, u32) {
    let count = PROBE_COUNT.to_string();
    let args = argv(["-c", count.as_str(), "-i", "1", "-w", count.as_str(), host]);
    match agent.shell.run("ping", &args).await {
        Ok(out) => (parse_ping(&out), PROBE_COUNT),
        Err(e) => {
            debug!("ping {}: {}", host, e);
            (Vec::new(), PROBE_COUNT)
        }
    }
}

/// One probe run against the assigned host.  `None` without a host.
pub async fn measure(agent: &Agent) -> Option<LatencyStats> {
    let host = agent.applied().engine.host.clone();
    if host.is_empty() {
        return None;
    }

    let (rtts, sent) = match ws_probe(&host).await {
        Ok(r) => r,
        Err(e) => {
            debug!("echo probe to {} failed ({}), using ICMP", host, e);
            icmp_probe(agent, &host).await
        }
    };
    Some(LatencyStats::from_rtts(&rtts, sent, Utc::now()))
}

pub async fn run(agent: Arc<Agent>) {
    loop {
        if let Some(stats) = measure(&agent).await {
            trace!("latency: {:?}", stats);
            agent.set_latency(stats);
        }
        if future::timeout(PROBE_INTERVAL, agent.cancel.cancelled())
            .await
            .is_ok()
        {
            break;
        }
    }
}
