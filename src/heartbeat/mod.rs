//! Heartbeat loop
//!
//! Without an audio host the agent polls `POST {origin}/agents/ping`
//! and takes a config from each answer.  Once a host is assigned it
//! keeps a websocket session open instead, see [`session`].  A session
//! that fails drops the loop back to polling until a ping gets through
//! again.  Either way, configs that were already seen are not passed on.

pub mod probe;
pub mod session;

use crate::{
    context::Agent,
    error::TransportError,
    model::{DeviceConfig, DeviceStatus},
};
use async_std::{channel::Sender, future};
use reqwest::StatusCode;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tracing::{debug, info, warn};

/// Pause between heartbeats, in both modes
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

const PREFIX_HEADER: &str = "apiprefix";
const SECRET_HEADER: &str = "apisecret";

/// Remembers the last config handed to the applicator
#[derive(Debug, Default)]
pub struct Dedup {
    last: Option<DeviceConfig>,
}

impl Dedup {
    /// Whether `cfg` should be published
    pub fn admit(&mut self, cfg: &DeviceConfig, applied: &DeviceConfig) -> bool {
        if cfg == applied || self.last.as_ref() == Some(cfg) {
            return false;
        }
        self.last = Some(cfg.clone());
        true
    }
}

/// Which exchange the next iteration runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Session,
    Ping,
}

pub struct HeartbeatLoop {
    agent: Arc<Agent>,
    http: reqwest::Client,
    configs: Sender<DeviceConfig>,
    dedup: Mutex<Dedup>,
    /// Set when the last session failed, cleared by a successful ping
    session_failed: AtomicBool,
}

impl HeartbeatLoop {
    pub fn new(agent: Arc<Agent>, configs: Sender<DeviceConfig>) -> Arc<Self> {
        Arc::new(Self {
            agent,
            http: reqwest::Client::new(),
            configs,
            dedup: Mutex::new(Dedup::default()),
            session_failed: AtomicBool::new(false),
        })
    }

    pub async fn run(self: Arc<Self>) {
        while !self.agent.cancel.is_cancelled() {
            self.step().await;

            if future::timeout(HEARTBEAT_INTERVAL, self.agent.cancel.cancelled())
                .await
                .is_ok()
            {
                break;
            }
        }
        debug!("heartbeat loop done");
    }

    fn mode(&self) -> Mode {
        if self.agent.applied().has_host() && !self.session_failed.load(Ordering::SeqCst) {
            Mode::Session
        } else {
            Mode::Ping
        }
    }

    /// One iteration: hold a session, or send a single heartbeat
    async fn step(&self) {
        match self.mode() {
            Mode::Session => match session::run(self).await {
                Ok(()) => info!("control plane session closed"),
                Err(e) => {
                    warn!("control plane session failed: {}", e);
                    self.session_failed.store(true, Ordering::SeqCst);
                }
            },
            Mode::Ping => match self.ping().await {
                Ok(()) => {
                    self.session_failed.store(false, Ordering::SeqCst);
                    self.clear_error();
                }
                Err(e) => {
                    warn!("heartbeat failed: {}", e);
                    self.agent.set_status(DeviceStatus::Error);
                }
            },
        }
    }

    /// One request/response heartbeat
    async fn ping(&self) -> Result<(), TransportError> {
        let url = format!("{}/agents/ping", self.agent.settings.origin.trim_end_matches('/'));
        let creds = &self.agent.identity.credentials;
        let res = self
            .http
            .post(&url)
            .header(PREFIX_HEADER, &creds.api_prefix)
            .header(SECRET_HEADER, &creds.api_secret)
            .json(&self.agent.heartbeat())
            .send()
            .await?;

        if res.status() != StatusCode::OK {
            warn!("heartbeat answered with {}", res.status());
            return Ok(());
        }

        let body = res.text().await?;
        match serde_json::from_str::<DeviceConfig>(&body) {
            Ok(cfg) => self.offer(cfg).await,
            Err(e) => {
                warn!("ignoring malformed config: {}", e);
                Ok(())
            }
        }
    }

    /// Publish `cfg` to the applicator unless it was seen already
    pub(crate) async fn offer(&self, cfg: DeviceConfig) -> Result<(), TransportError> {
        let fresh = self
            .dedup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .admit(&cfg, &self.agent.applied());
        if !fresh {
            return Ok(());
        }
        debug!("new config from control plane");
        self.configs
            .send(cfg)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Leave the error state after a successful exchange
    fn clear_error(&self) {
        if self.agent.status() == Some(DeviceStatus::Error) {
            let status = if self.agent.applied().is_connected() {
                DeviceStatus::Connected
            } else {
                DeviceStatus::NotConnected
            };
            self.agent.set_status(status);
        }
    }

    pub(crate) fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::{agent, agent_with, TestAgent};
    use async_std::channel::bounded;

    fn cfg(volume: i32) -> DeviceConfig {
        let mut c = DeviceConfig::default();
        c.levels.capture_volume = volume;
        c
    }

    #[test]
    fn dedup_suppresses_repeats() {
        let mut d = Dedup::default();
        let applied = DeviceConfig::default();
        assert!(!d.admit(&applied, &applied));
        assert!(d.admit(&cfg(50), &applied));
        assert!(!d.admit(&cfg(50), &applied));
        assert!(d.admit(&cfg(60), &applied));
        // going back is a change again
        assert!(d.admit(&cfg(50), &applied));
    }

    #[async_std::test]
    async fn offer_publishes_once() {
        let t = agent("USB Audio Device");
        let (tx, rx) = bounded(100);
        let hb = HeartbeatLoop::new(t.agent.clone(), tx);
        hb.offer(cfg(50)).await.unwrap();
        hb.offer(cfg(50)).await.unwrap();
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.recv().await.unwrap(), cfg(50));
    }

    #[async_std::test]
    async fn unreachable_control_plane_is_an_error() {
        // nothing listens on the discard port
        let t = agent_with("USB Audio Device", |s| s.origin = "http://127.0.0.1:9".into());
        let (tx, _rx) = bounded(100);
        let hb = HeartbeatLoop::new(t.agent.clone(), tx);
        assert!(hb.ping().await.is_err());
    }

    fn with_host(t: &TestAgent) {
        let mut cfg = DeviceConfig::default();
        cfg.engine.enabled = true;
        cfg.engine.host = "h".into();
        t.agent.publish_applied(cfg);
    }

    #[async_std::test]
    async fn failed_session_falls_back_to_ping() {
        let t = agent_with("USB Audio Device", |s| s.origin = "http://127.0.0.1:9".into());
        with_host(&t);
        let (tx, _rx) = bounded(100);
        let hb = HeartbeatLoop::new(t.agent.clone(), tx);
        assert_eq!(hb.mode(), Mode::Session);

        hb.step().await;
        assert_eq!(hb.mode(), Mode::Ping);

        // the ping cannot get through either
        hb.step().await;
        assert_eq!(t.agent.status(), Some(DeviceStatus::Error));
        assert_eq!(hb.mode(), Mode::Ping);
    }

    #[tokio::test]
    async fn session_is_retried_after_a_ping_gets_through() {
        use axum::{http::StatusCode as Code, routing::post, Json, Router};
        use std::sync::atomic::AtomicUsize;

        let pings = Arc::new(AtomicUsize::new(0));
        let dials = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/api/agents/ping",
                post({
                    let pings = Arc::clone(&pings);
                    move || {
                        pings.fetch_add(1, Ordering::SeqCst);
                        async { Json(serde_json::json!({})) }
                    }
                }),
            )
            .fallback({
                let dials = Arc::clone(&dials);
                move || {
                    dials.fetch_add(1, Ordering::SeqCst);
                    async { Code::SERVICE_UNAVAILABLE }
                }
            });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let t = agent_with("USB Audio Device", |s| s.origin = format!("http://{}/api", addr));
        with_host(&t);
        let (tx, _rx) = bounded(100);
        let hb = HeartbeatLoop::new(t.agent.clone(), tx);

        hb.step().await;
        assert_eq!(dials.load(Ordering::SeqCst), 1);
        assert_eq!(pings.load(Ordering::SeqCst), 0);

        hb.step().await;
        assert_eq!(pings.load(Ordering::SeqCst), 1);
        assert_eq!(hb.mode(), Mode::Session);
    }

    #[test]
    fn error_clears_after_success() {
        let t = agent("USB Audio Device");
        let (tx, _rx) = bounded(1);
        let hb = HeartbeatLoop::new(t.agent.clone(), tx);
        t.agent.set_status(DeviceStatus::Error);
        hb.clear_error();
        assert_eq!(t.agent.status(), Some(DeviceStatus::NotConnected));
    }
}
