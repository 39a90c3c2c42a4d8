//! Connection registry.
//!
//! Maps each live transport connection to the entity id it controls and holds
//! the connection's outbound queue. An entry exists from connect until
//! disconnect; a disconnected connection has no entry at all.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use flight_shared::{entity::EntityId, net::ServerMsg};
use rand::Rng;
use tokio::sync::mpsc;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Transport-level identity of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(pub u64);

impl ConnectionHandle {
    pub fn new_unique() -> Self {
        ConnectionHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

/// Outbound message queue of one connection.
pub type Outbox = mpsc::UnboundedSender<Arc<ServerMsg>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Registered, initial snapshot not yet delivered.
    Connecting,
    /// Receives incremental and full-sync broadcasts.
    Active,
}

#[derive(Debug)]
pub struct Peer {
    pub handle: ConnectionHandle,
    pub phase: ConnectionPhase,
    outbox: Outbox,
}

impl Peer {
    /// Queues a message. A closed queue is ignored; its disconnect follows.
    pub fn send(&self, msg: Arc<ServerMsg>) -> bool {
        self.outbox.send(msg).is_ok()
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    by_handle: HashMap<ConnectionHandle, EntityId>,
    peers: HashMap<EntityId, Peer>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and allocates an id unique among live entries.
    ///
    /// Handles are per-socket and never reconnect. Registering a live handle
    /// twice is a caller bug; the existing entry is left untouched and its id
    /// returned.
    pub fn on_connect<R: Rng + ?Sized>(
        &mut self,
        handle: ConnectionHandle,
        outbox: Outbox,
        rng: &mut R,
    ) -> EntityId {
        // Guard against double registration.
        if let Some(id) = self.by_handle.get(&handle) {
            return id.clone();
        }
        let id = loop {
            let candidate = EntityId::random(rng);
            if !self.peers.contains_key(&candidate) {
                break candidate;
            }
        };
        self.by_handle.insert(handle, id.clone());
        self.peers.insert(
            id.clone(),
            Peer {
                handle,
                phase: ConnectionPhase::Connecting,
                outbox,
            },
        );
        id
    }

    /// Promotes a connection to `Active`. Returns `false` if unknown.
    pub fn activate(&mut self, id: &EntityId) -> bool {
        match self.peers.get_mut(id) {
            Some(peer) => {
                peer.phase = ConnectionPhase::Active;
                true
            }
            None => false,
        }
    }

    /// Drops all bookkeeping for `id`. Returns `false` if it was already gone.
    pub fn on_disconnect(&mut self, id: &EntityId) -> bool {
        match self.peers.remove(id) {
            Some(peer) => {
                self.by_handle.remove(&peer.handle);
                true
            }
            None => false,
        }
    }

    pub fn entity_of(&self, handle: ConnectionHandle) -> Option<&EntityId> {
        self.by_handle.get(&handle)
    }

    pub fn peer(&self, id: &EntityId) -> Option<&Peer> {
        self.peers.get(id)
    }

    pub fn is_active(&self, id: &EntityId) -> bool {
        self.peers
            .get(id)
            .is_some_and(|p| p.phase == ConnectionPhase::Active)
    }

    /// Every `Active` peer, with its entity id.
    pub fn active_peers(&self) -> impl Iterator<Item = (&EntityId, &Peer)> {
        self.peers
            .iter()
            .filter(|(_, p)| p.phase == ConnectionPhase::Active)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
