//! Duplex control plane session
//!
//! Config frames are read from `{origin}/devices/{MAC}/status` while
//! heartbeat frames are written to it.  Reads give up after
//! [`IDLE_TIMEOUT`] of silence.  The writer sends a websocket ping
//! every half of that and ends the session once the server has been
//! quiet for the whole window.

use super::{HeartbeatLoop, HEARTBEAT_INTERVAL, PREFIX_HEADER, SECRET_HEADER};
use crate::{error::TransportError, model::DeviceConfig};
use async_std::future;
use futures::{
    future::{select, Either},
    pin_mut, Sink, SinkExt, Stream, StreamExt,
};
use std::{
    sync::Mutex,
    time::{Duration, Instant},
};
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    http::{HeaderName, HeaderValue},
    Error as WsError, Message,
};
use tracing::{debug, info, warn};
use url::Url;

pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const KEEPALIVE: Duration = Duration::from_secs(150);
const ORIGIN: &str = "http://jacktrip.local";

/// Websocket address of the status session for `mac`
pub fn status_url(origin: &str, mac: &str) -> Result<Url, TransportError> {
    let raw = format!("{}/devices/{}/status", origin.trim_end_matches('/'), mac);
    let mut url = Url::parse(&raw).map_err(|e| TransportError::Url(format!("{}: {}", raw, e)))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => other,
    }
    .to_owned();
    url.set_scheme(&scheme)
        .map_err(|_| TransportError::Url(raw.clone()))?;
    Ok(url)
}

fn header(name: &'static str, value: &str) -> Result<(HeaderName, HeaderValue), TransportError> {
    let value = HeaderValue::from_str(value).map_err(|_| TransportError::Header(name))?;
    Ok((HeaderName::from_static(name), value))
}

/// Hold one session until it fails, the host is unassigned or the
/// agent is cancelled
pub async fn run(hb: &HeartbeatLoop) -> Result<(), TransportError> {
    let agent = hb.agent();
    let url = status_url(&agent.settings.origin, &agent.identity.mac)?;
    let creds = &agent.identity.credentials;

    let mut request = url.as_str().into_client_request()?;
    let headers = request.headers_mut();
    for (name, value) in [
        header("origin", ORIGIN)?,
        header(PREFIX_HEADER, &creds.api_prefix)?,
        header(SECRET_HEADER, &creds.api_secret)?,
    ] {
        headers.insert(name, value);
    }

    let (ws, _) = tokio_tungstenite::connect_async(request).await?;
    info!("control plane session open: {}", url);
    let (sink, stream) = ws.split();
    let last_seen = Mutex::new(Instant::now());

    let reader = read_configs(hb, stream, &last_seen);
    let writer = write_heartbeats(hb, sink, &last_seen);
    pin_mut!(reader, writer);
    match select(reader, writer).await {
        Either::Left((res, _)) | Either::Right((res, _)) => res,
    }
}

async fn read_configs<S>(hb: &HeartbeatLoop, mut stream: S, last_seen: &Mutex<Instant>) -> Result<(), TransportError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let msg = match future::timeout(IDLE_TIMEOUT, stream.next()).await {
            Err(_) => return Err(TransportError::Idle(IDLE_TIMEOUT)),
            Ok(None) => return Err(TransportError::Closed),
            Ok(Some(m)) => m?,
        };
        *last_seen.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();

        match msg {
            Message::Text(text) => match serde_json::from_str::<DeviceConfig>(&text) {
                Ok(cfg) => hb.offer(cfg).await?,
                Err(e) => warn!("ignoring malformed config frame: {}", e),
            },
            Message::Close(_) => return Err(TransportError::Closed),
            _ => {}
        }
    }
}

async fn write_heartbeats<S>(hb: &HeartbeatLoop, mut sink: S, last_seen: &Mutex<Instant>) -> Result<(), TransportError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let agent = hb.agent();
    let mut last_ping = Instant::now();
    loop {
        if !agent.applied().has_host() {
            debug!("audio host unassigned, leaving session");
            break;
        }

        let frame = serde_json::to_string(&agent.heartbeat())?;
        sink.send(Message::Text(frame)).await?;

        if last_ping.elapsed() >= KEEPALIVE {
            sink.send(Message::Ping(Vec::new())).await?;
            last_ping = Instant::now();
        }

        let quiet = last_seen.lock().unwrap_or_else(|e| e.into_inner()).elapsed();
        if quiet > IDLE_TIMEOUT {
            return Err(TransportError::Idle(quiet));
        }

        if future::timeout(HEARTBEAT_INTERVAL, agent.cancel.cancelled())
            .await
            .is_ok()
        {
            break;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
    Ok(())
}
