//! JACK notification handler
//!
//! Callbacks run on the JACK notification thread.  They only push onto
//! the event channel, and drop the event if it is full.

use async_std::channel::Sender;
use jack::{Client, ClientStatus, NotificationHandler, PortId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortEvent {
    /// A port appeared in the graph
    Registered(PortId),
    /// The server shut our client down
    Shutdown,
    /// Attach if needed and scan the whole graph
    Rescan,
}

pub struct PortWatcher {
    events: Sender<PortEvent>,
}

impl PortWatcher {
    pub fn new(events: Sender<PortEvent>) -> Self {
        Self { events }
    }

    /// Queue an event without blocking.  Returns `false` if it was
    /// dropped.
    pub fn notify(&self, event: PortEvent) -> bool {
        self.events.try_send(event).is_ok()
    }
}

impl NotificationHandler for PortWatcher {
    fn shutdown(&mut self, _status: ClientStatus, _reason: &str) {
        self.notify(PortEvent::Shutdown);
    }

    fn port_registration(&mut self, _: &Client, port_id: PortId, is_registered: bool) {
        if is_registered {
            self.notify(PortEvent::Registered(port_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::channel::bounded;

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (tx, rx) = bounded(2);
        let w = PortWatcher::new(tx);
        assert!(w.notify(PortEvent::Registered(1)));
        assert!(w.notify(PortEvent::Registered(2)));
        assert!(!w.notify(PortEvent::Registered(3)));

        assert_eq!(rx.try_recv(), Ok(PortEvent::Registered(1)));
        assert_eq!(rx.try_recv(), Ok(PortEvent::Registered(2)));
        assert!(rx.try_recv().is_err());
    }
}
