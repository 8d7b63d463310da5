//! Port autoconnector
//!
//! A passive JACK client that watches port registrations and patches
//! participants onto the mixing server.  The notification callbacks
//! only queue [`PortEvent`]s; a single worker thread drains the queue
//! and does every graph mutation while holding the client handle lock.
//!
//! The worker starts detached.  Any event attaches it, and the first
//! event after attaching also triggers a scan of the whole graph.  When
//! the server shuts the client down the handle is dropped, a rescan is
//! queued and the worker sleeps before trying to attach again.

mod graph;
mod notify;
mod patchbay;

pub use graph::PortGraph;
pub use notify::{PortEvent, PortWatcher};
use patchbay::Patchbay;

use crate::{context::Agent, error::GraphError, retry::Backoff};
use async_std::{
    channel::{bounded, Receiver, Sender},
    task,
};
use futures::{
    future::{self, Either},
    pin_mut,
};
use jack::{AsyncClient, ClientOptions};
use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};
use tracing::{debug, info, warn};

/// Capacity of the port event queue
pub const EVENT_CAPACITY: usize = 200;

/// Pause after the server went away before attaching again
const REATTACH_DELAY: Duration = Duration::from_secs(5);

/// Whether an audio server client is currently open
pub trait AudioServerLink: Send + Sync {
    fn is_attached(&self) -> bool;
}

/// Something that can open a client on an audio server
pub trait AudioServer: Send + Sync {
    type Graph: PortGraph + Send;

    fn open(&self, events: Sender<PortEvent>) -> Result<Self::Graph, GraphError>;
}

/// The local JACK server.  Never started on demand.
pub struct JackServer {
    client_name: String,
}

impl JackServer {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }
}

impl AudioServer for JackServer {
    type Graph = AsyncClient<PortWatcher, ()>;

    fn open(&self, events: Sender<PortEvent>) -> Result<Self::Graph, GraphError> {
        let (client, status) = jack::Client::new(&self.client_name, ClientOptions::NO_START_SERVER)?;
        debug!("jack client {} opened: {:?}", client.name(), status);
        Ok(client.activate_async(PortWatcher::new(events), ())?)
    }
}

struct Attachment<G> {
    graph: Option<G>,
    full_scanned: bool,
}

pub struct Autoconnector<S: AudioServer> {
    agent: Arc<Agent>,
    server: S,
    state: Mutex<Attachment<S::Graph>>,
    /// Mirrors `state.graph.is_some()` for readers that must not wait
    /// on a wiring pass
    attached: AtomicBool,
    events_tx: Sender<PortEvent>,
    events_rx: Receiver<PortEvent>,
    reattach_delay: Duration,
    backoff: Backoff,
}

impl<S: AudioServer + 'static> Autoconnector<S> {
    pub fn new(agent: Arc<Agent>, server: S) -> Arc<Self> {
        Self::with_reattach_delay(agent, server, REATTACH_DELAY)
    }

    pub fn with_reattach_delay(agent: Arc<Agent>, server: S, reattach_delay: Duration) -> Arc<Self> {
        let (events_tx, events_rx) = bounded(EVENT_CAPACITY);
        Arc::new(Self {
            agent,
            server,
            state: Mutex::new(Attachment {
                graph: None,
                full_scanned: false,
            }),
            attached: AtomicBool::new(false),
            events_tx,
            events_rx,
            reattach_delay,
            backoff: Backoff::default(),
        })
    }

    /// Run the worker on a dedicated thread until cancelled
    pub fn start(self: &Arc<Self>) -> io::Result<thread::JoinHandle<()>> {
        let this = Arc::clone(self);
        thread::Builder::new()
            .name("autoconnect".into())
            .spawn(move || this.run())
    }

    fn run(&self) {
        self.queue(PortEvent::Rescan);
        while let Some(event) = task::block_on(self.next_event()) {
            self.handle(event);
        }

        info!("autoconnector shutting down");
        self.detach();
    }

    async fn next_event(&self) -> Option<PortEvent> {
        let cancelled = self.agent.cancel.cancelled();
        let recv = self.events_rx.recv();
        pin_mut!(cancelled, recv);
        match future::select(cancelled, recv).await {
            Either::Left(_) => None,
            Either::Right((event, _)) => event.ok(),
        }
    }

    fn queue(&self, event: PortEvent) {
        if self.events_tx.try_send(event).is_err() {
            debug!("port event queue full, dropped {:?}", event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Attachment<S::Graph>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn detach(&self) {
        let mut state = self.lock();
        state.graph = None;
        state.full_scanned = false;
        self.attached.store(false, Ordering::SeqCst);
    }

    /// Process one event
    pub fn handle(&self, event: PortEvent) {
        if event == PortEvent::Shutdown {
            warn!("audio server shut our client down");
            self.detach();
            self.queue(PortEvent::Rescan);
            thread::sleep(self.reattach_delay);
            return;
        }

        let mut state = self.lock();
        if state.graph.is_none() {
            match self.server.open(self.events_tx.clone()) {
                Ok(graph) => {
                    info!("attached to the audio server");
                    state.graph = Some(graph);
                    self.attached.store(true, Ordering::SeqCst);
                }
                Err(e) => {
                    debug!("audio server unavailable: {}", e);
                    drop(state);
                    thread::sleep(self.reattach_delay);
                    self.queue(PortEvent::Rescan);
                    return;
                }
            }
        }

        let Attachment {
            graph,
            full_scanned,
        } = &mut *state;
        let graph: &S::Graph = match graph {
            Some(g) => g,
            None => return,
        };
        let bay = Patchbay::new(graph, &self.agent.clients, self.backoff);

        if let PortEvent::Registered(id) = event {
            if let Some(name) = graph.port_name(id) {
                bay.wire_port(&name);
            }
        }

        if !*full_scanned {
            bay.full_scan();
            *full_scanned = true;
        }
    }
}

impl<S: AudioServer> AudioServerLink for Autoconnector<S> {
    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }
}
