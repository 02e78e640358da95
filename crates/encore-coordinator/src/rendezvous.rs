//! Pending rendezvous table.
//!
//! One entry per key, each holding a single-use completion handle. Relays
//! are keyed by (node endpoint, player endpoint), instance creations by
//! server secret. Removing the entry is the resolution: the
//! acknowledgment path and the timeout path both race to remove it, and
//! whichever removes it first decides the outcome. The loser finds nothing
//! and does nothing.

use std::hash::Hash;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

/// (node endpoint, player endpoint).
pub type RendezvousKey = (SocketAddr, SocketAddr);

struct Pending {
    ticket: u64,
    tx: oneshot::Sender<()>,
}

pub(crate) struct RendezvousTable<K = RendezvousKey> {
    entries: DashMap<K, Pending>,
    next_ticket: AtomicU64,
}

impl<K: Eq + Hash> Default for RendezvousTable<K> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            next_ticket: AtomicU64::new(0),
        }
    }
}

impl<K: Eq + Hash + Clone> RendezvousTable<K> {
    /// Claim `key`. `None` if a rendezvous for it is already in flight.
    pub fn register(&self, key: K) -> Option<(PendingGuard<'_, K>, oneshot::Receiver<()>)> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        match self.entries.entry(key.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(Pending { ticket, tx });
                Some((
                    PendingGuard {
                        table: self,
                        key,
                        ticket,
                    },
                    rx,
                ))
            }
        }
    }

    /// Settle `key` as acknowledged. False if nothing was waiting.
    pub fn resolve(&self, key: &K) -> bool {
        match self.entries.remove(key) {
            Some((_, pending)) => {
                // Receiver may already be gone if the caller was cancelled
                let _ = pending.tx.send(());
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }
}

/// Ownership of one registered entry. Dropping it withdraws the entry if it
/// is still the one this guard registered.
pub(crate) struct PendingGuard<'a, K: Eq + Hash + Clone = RendezvousKey> {
    table: &'a RendezvousTable<K>,
    key: K,
    ticket: u64,
}

impl<K: Eq + Hash + Clone> PendingGuard<'_, K> {
    /// Remove our entry. True if it was still present, meaning no
    /// acknowledgment claimed it first.
    pub fn withdraw(&self) -> bool {
        self.table
            .entries
            .remove_if(&self.key, |_, pending| pending.ticket == self.ticket)
            .is_some()
    }
}

impl<K: Eq + Hash + Clone> Drop for PendingGuard<'_, K> {
    fn drop(&mut self) {
        self.withdraw();
    }
}
