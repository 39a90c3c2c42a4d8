//! Sync engine.
//!
//! Binds transport events to store mutations and broadcast decisions. Every
//! event goes through [`SyncEngine::handle`] on one task, so handlers never
//! overlap and the store needs no lock.
//!
//! Per-connection lifecycle:
//! - `Connecting -> Active`: welcome + snapshot to the new peer, then
//!   `Joined` to every other active peer.
//! - `Active -> Active`: a `Move` overwrites the store and is relayed as
//!   `Moved` to every other active peer.
//! - `Active -> gone`: the entry is dropped and `Left` goes to everyone left.
//!
//! Independently, [`SyncEngine::reconcile`] broadcasts the whole store so
//! clients can repair any incremental message they missed.

use std::sync::Arc;

use flight_shared::{
    entity::{Color, EntityId, EntityState},
    math::Vec3,
    net::{ClientMsg, ServerMsg},
    store::StateStore,
};
use rand::{rngs::StdRng, SeedableRng};
use tracing::{debug, error, info, warn};

use crate::registry::{ConnectionHandle, ConnectionRegistry, Outbox};

/// Inbound event for the dispatch loop.
#[derive(Debug)]
pub enum SyncEvent {
    /// Handshake completed on a new connection.
    Connected {
        handle: ConnectionHandle,
        outbox: Outbox,
    },
    /// Decoded client message.
    Message {
        handle: ConnectionHandle,
        msg: ClientMsg,
    },
    /// Transport closed or failed.
    Disconnected { handle: ConnectionHandle },
    /// Reconciliation timer fired.
    Reconcile,
}

pub struct SyncEngine {
    registry: ConnectionRegistry,
    store: StateStore,
    rng: StdRng,
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncEngine {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Engine with deterministic id and color allocation.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            store: StateStore::new(),
            rng,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Dispatches one event.
    pub fn handle(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Connected { handle, outbox } => {
                self.on_connect(handle, outbox);
            }
            SyncEvent::Message { handle, msg } => match msg {
                ClientMsg::Move {
                    position,
                    orientation,
                } => {
                    self.on_move(handle, position, orientation);
                }
                ClientMsg::Hello { protocol } => {
                    debug!(?handle, protocol, "Repeated hello ignored");
                }
            },
            SyncEvent::Disconnected { handle } => {
                self.on_disconnect(handle);
            }
            SyncEvent::Reconcile => {
                self.reconcile();
            }
        }
    }

    /// Registers a connection, sends it the current world, announces it.
    pub fn on_connect(&mut self, handle: ConnectionHandle, outbox: Outbox) -> EntityId {
        let id = self.registry.on_connect(handle, outbox, &mut self.rng);
        let state = EntityState::spawn(id.clone(), Color::random(&mut self.rng));
        if let Err(e) = self.store.create(state.clone()) {
            error!(?handle, entity = %id, error = %e, "Entity already in store");
            return id;
        }

        if let Some(peer) = self.registry.peer(&id) {
            peer.send(Arc::new(ServerMsg::Welcome { id: id.clone() }));
            peer.send(Arc::new(ServerMsg::Snapshot {
                entities: self.store.snapshot_all(),
            }));
        }
        self.registry.activate(&id);

        let notified = self.broadcast(ServerMsg::Joined(state), Some(&id));
        info!(?handle, entity = %id, notified, "Client connected");
        id
    }

    /// Applies a reported pose. Returns `false` if nothing was changed.
    pub fn on_move(
        &mut self,
        handle: ConnectionHandle,
        position: Vec3,
        orientation: Vec3,
    ) -> bool {
        let Some(id) = self.registry.entity_of(handle).cloned() else {
            debug!(?handle, "Move from unregistered connection");
            return false;
        };
        if !self.registry.is_active(&id) {
            debug!(?handle, entity = %id, "Move before activation");
            return false;
        }
        if !self.store.update(&id, position, orientation) {
            debug!(entity = %id, "Move for entity missing from store");
            return false;
        }

        self.broadcast(
            ServerMsg::Moved {
                id: id.clone(),
                position,
                orientation,
            },
            Some(&id),
        );
        true
    }

    /// Handles a transport close. Returns `false` if already processed.
    pub fn on_disconnect(&mut self, handle: ConnectionHandle) -> bool {
        match self.registry.entity_of(handle).cloned() {
            Some(id) => self.disconnect_entity(&id),
            None => false,
        }
    }

    /// Removes an entity and announces it. Second call is a no-op.
    pub fn disconnect_entity(&mut self, id: &EntityId) -> bool {
        if !self.registry.on_disconnect(id) {
            return false;
        }
        if self.store.remove(id).is_none() {
            warn!(entity = %id, "Disconnected entity had no state");
        }

        let notified = self.broadcast(ServerMsg::Left { id: id.clone() }, None);
        info!(entity = %id, notified, "Client disconnected");
        true
    }

    /// Broadcasts the full store to every active peer.
    pub fn reconcile(&mut self) -> usize {
        let entities = self.store.snapshot_all();
        let count = entities.len();
        let sent = self.broadcast(ServerMsg::FullSync { entities }, None);
        debug!(entities = count, recipients = sent, "Full sync");
        sent
    }

    /// Queues `msg` for every active peer except `skip`. Returns recipients.
    fn broadcast(&self, msg: ServerMsg, skip: Option<&EntityId>) -> usize {
        let msg = Arc::new(msg);
        let mut sent = 0;
        for (id, peer) in self.registry.active_peers() {
            if Some(id) == skip {
                continue;
            }
            if peer.send(Arc::clone(&msg)) {
                sent += 1;
            } else {
                debug!(entity = %id, kind = msg.kind(), "Outbox closed, dropping message");
            }
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flight_shared::entity::SPAWN_POSITION;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    type Inbox = UnboundedReceiver<Arc<ServerMsg>>;

    fn connect(engine: &mut SyncEngine, n: u64) -> (ConnectionHandle, EntityId, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle(n);
        let id = engine.on_connect(handle, tx);
        (handle, id, rx)
    }

    fn drain(rx: &mut Inbox) -> Vec<ServerMsg> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push((*msg).clone());
        }
        out
    }

    #[test]
    fn new_client_gets_welcome_then_snapshot_and_no_self_join() {
        let mut engine = SyncEngine::with_seed(1);
        let (_, x, mut x_rx) = connect(&mut engine, 1);

        let msgs = drain(&mut x_rx);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0], ServerMsg::Welcome { id: x.clone() });
        match &msgs[1] {
            ServerMsg::Snapshot { entities } => {
                assert_eq!(entities.len(), 1);
                assert_eq!(entities[&x].position, SPAWN_POSITION);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn join_is_announced_to_others_only() {
        let mut engine = SyncEngine::with_seed(2);
        let (_, x, mut x_rx) = connect(&mut engine, 1);
        drain(&mut x_rx);
        let (_, y, mut y_rx) = connect(&mut engine, 2);

        let to_x = drain(&mut x_rx);
        assert_eq!(to_x.len(), 1);
        assert!(matches!(&to_x[0], ServerMsg::Joined(s) if s.id == y));

        let to_y = drain(&mut y_rx);
        assert!(to_y
            .iter()
            .all(|m| !matches!(m, ServerMsg::Joined(s) if s.id == y)));
        match &to_y[1] {
            ServerMsg::Snapshot { entities } => {
                assert!(entities.contains_key(&x));
                assert!(entities.contains_key(&y));
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn move_updates_store_and_skips_origin() {
        let mut engine = SyncEngine::with_seed(3);
        let (hx, x, mut x_rx) = connect(&mut engine, 1);
        let (_, _, mut y_rx) = connect(&mut engine, 2);
        drain(&mut x_rx);
        drain(&mut y_rx);

        let pos = Vec3::new(1.0, 2.0, 3.0);
        assert!(engine.on_move(hx, pos, Vec3::ZERO));
        assert_eq!(engine.store().get(&x).unwrap().position, pos);

        assert!(drain(&mut x_rx).is_empty());
        assert_eq!(
            drain(&mut y_rx),
            vec![ServerMsg::Moved {
                id: x,
                position: pos,
                orientation: Vec3::ZERO
            }]
        );
    }

    #[test]
    fn move_from_unknown_connection_is_noop() {
        let mut engine = SyncEngine::with_seed(4);
        let (_, _, mut x_rx) = connect(&mut engine, 1);
        drain(&mut x_rx);
        let before = engine.store().snapshot_all();

        assert!(!engine.on_move(ConnectionHandle(99), Vec3::new(5.0, 5.0, 5.0), Vec3::ZERO));
        assert_eq!(engine.store().snapshot_all(), before);
        assert!(drain(&mut x_rx).is_empty());
    }

    #[test]
    fn move_after_disconnect_is_noop() {
        let mut engine = SyncEngine::with_seed(5);
        let (hx, _, _x_rx) = connect(&mut engine, 1);
        let (_, _, mut y_rx) = connect(&mut engine, 2);
        engine.on_disconnect(hx);
        drain(&mut y_rx);

        assert!(!engine.on_move(hx, Vec3::new(1.0, 1.0, 1.0), Vec3::ZERO));
        assert_eq!(engine.store().len(), 1);
        assert!(drain(&mut y_rx).is_empty());
    }

    #[test]
    fn later_move_wins() {
        let mut engine = SyncEngine::with_seed(6);
        let (hx, x, _x_rx) = connect(&mut engine, 1);
        let a = Vec3::new(1.0, 0.0, 0.0);
        let b = Vec3::new(2.0, 0.0, 0.0);
        engine.on_move(hx, a, Vec3::ZERO);
        engine.on_move(hx, b, Vec3::ZERO);
        assert_eq!(engine.store().get(&x).unwrap().position, b);
    }

    #[test]
    fn disconnect_twice_broadcasts_left_once() {
        let mut engine = SyncEngine::with_seed(7);
        let (hx, x, _x_rx) = connect(&mut engine, 1);
        let (_, y, mut y_rx) = connect(&mut engine, 2);
        drain(&mut y_rx);

        assert!(engine.on_disconnect(hx));
        assert!(!engine.on_disconnect(hx));
        assert!(!engine.disconnect_entity(&x));

        assert_eq!(drain(&mut y_rx), vec![ServerMsg::Left { id: x }]);
        assert_eq!(engine.store().len(), 1);
        assert!(engine.store().contains(&y));
        assert_eq!(engine.registry().len(), 1);
    }

    #[test]
    fn reconcile_sends_store_to_every_active_peer() {
        let mut engine = SyncEngine::with_seed(8);
        let (hx, _, mut x_rx) = connect(&mut engine, 1);
        let (_, _, mut y_rx) = connect(&mut engine, 2);
        engine.on_move(hx, Vec3::new(4.0, 4.0, 4.0), Vec3::ZERO);
        drain(&mut x_rx);
        drain(&mut y_rx);

        assert_eq!(engine.reconcile(), 2);
        let expected = ServerMsg::FullSync {
            entities: engine.store().snapshot_all(),
        };
        assert_eq!(drain(&mut x_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut y_rx), vec![expected]);
    }

    #[test]
    fn closed_outbox_does_not_block_others() {
        let mut engine = SyncEngine::with_seed(9);
        let (_, _, x_rx) = connect(&mut engine, 1);
        let (_, _, mut y_rx) = connect(&mut engine, 2);
        drop(x_rx);
        drain(&mut y_rx);

        assert_eq!(engine.reconcile(), 1);
        assert_eq!(drain(&mut y_rx).len(), 1);
    }

    #[test]
    fn store_tracks_open_connections_through_event_sequence() {
        let mut engine = SyncEngine::with_seed(10);
        let mut open = Vec::new();
        let mut inboxes = Vec::new();
        for n in 1..=5 {
            let (h, id, rx) = connect(&mut engine, n);
            open.push((h, id));
            inboxes.push(rx);
        }
        for (h, _) in open.drain(..2) {
            engine.handle(SyncEvent::Disconnected { handle: h });
        }
        engine.handle(SyncEvent::Message {
            handle: open[0].0,
            msg: ClientMsg::Move {
                position: Vec3::new(1.0, 1.0, 1.0),
                orientation: Vec3::ZERO,
            },
        });
        engine.handle(SyncEvent::Disconnected {
            handle: ConnectionHandle(1),
        });

        let mut live: Vec<_> = open.iter().map(|(_, id)| id.clone()).collect();
        live.sort();
        let stored: Vec<_> = engine.store().snapshot_all().into_keys().collect();
        assert_eq!(stored, live);
        assert_eq!(engine.registry().len(), live.len());
    }

    #[test]
    fn store_tracks_open_connections_for_random_event_sequences() {
        use rand::Rng;
        use std::collections::BTreeMap;

        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut engine = SyncEngine::with_seed(seed);
            let mut open: BTreeMap<ConnectionHandle, EntityId> = BTreeMap::new();
            let mut inboxes = Vec::new();
            let mut next = 1u64;

            for step in 0..200 {
                // Handles that were ever issued, live or closed.
                let any_handle = ConnectionHandle(rng.gen_range(1..=next));
                match rng.gen_range(0..5) {
                    0 | 1 => {
                        let (tx, rx) = mpsc::unbounded_channel();
                        let handle = ConnectionHandle(next);
                        next += 1;
                        engine.handle(SyncEvent::Connected { handle, outbox: tx });
                        let id = engine
                            .registry()
                            .entity_of(handle)
                            .cloned()
                            .expect("connected handle is registered");
                        open.insert(handle, id);
                        // Some peers go away without reading.
                        if rng.gen_bool(0.8) {
                            inboxes.push(rx);
                        }
                    }
                    2 => {
                        engine.handle(SyncEvent::Disconnected { handle: any_handle });
                        open.remove(&any_handle);
                    }
                    3 => {
                        let position = Vec3::new(rng.gen(), rng.gen(), rng.gen());
                        engine.handle(SyncEvent::Message {
                            handle: any_handle,
                            msg: ClientMsg::Move {
                                position,
                                orientation: Vec3::ZERO,
                            },
                        });
                        if let Some(id) = open.get(&any_handle) {
                            assert_eq!(engine.store().get(id).map(|e| e.position), Some(position));
                        }
                    }
                    _ => engine.handle(SyncEvent::Reconcile),
                }

                let mut live: Vec<_> = open.values().cloned().collect();
                live.sort();
                let stored: Vec<_> = engine.store().snapshot_all().into_keys().collect();
                assert_eq!(stored, live, "seed {seed} step {step}");
                assert_eq!(engine.registry().len(), open.len(), "seed {seed} step {step}");
            }
        }
    }
}
