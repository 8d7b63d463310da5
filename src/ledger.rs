//! Known participant ledger
//!
//! Every participant seen in the audio graph gets a slot the first
//! time it shows up.  Slots are never handed back, so a participant
//! keeps its server channels for the lifetime of the process.

use std::collections::BTreeMap;
use std::sync::Mutex;

/// Slot reserved for the Jamulus bridge
pub const JAMULUS_SLOT: u32 = 0;

/// Channels each participant occupies on the server
pub const CHANNELS_PER_CLIENT: u32 = 2;

#[derive(Debug, Default)]
struct Slots {
    by_name: BTreeMap<String, u32>,
    next: u32,
}

/// Append-only mapping of participant names to slots
#[derive(Debug, Default)]
pub struct KnownClients {
    inner: Mutex<Slots>,
}

impl KnownClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the slot for `client`, assigning the next free one on
    /// first sight
    pub fn slot(&self, client: &str) -> u32 {
        let mut slots = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.by_name.get(client) {
            return *slot;
        }
        slots.next += 1;
        let slot = slots.next;
        slots.by_name.insert(client.to_owned(), slot);
        slot
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The 1-based server channel a participant channel lands on, `None`
/// past the end of the channel space
pub fn server_channel(slot: u32, client_channel: u32) -> Option<u32> {
    slot.checked_mul(CHANNELS_PER_CLIENT)?.checked_add(client_channel)
}
