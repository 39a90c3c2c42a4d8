//! Remote roster.
//!
//! The client's view of every *other* connected vehicle, rebuilt from
//! incremental messages and repaired by each full sync.

use std::collections::BTreeMap;

use flight_shared::{
    entity::{EntityId, EntityState},
    net::ServerMsg,
    store::Snapshot,
};

/// What a single message changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RosterDelta {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

impl RosterDelta {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0
    }
}

#[derive(Debug, Default)]
pub struct Roster {
    own_id: Option<EntityId>,
    remotes: BTreeMap<EntityId, EntityState>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn own_id(&self) -> Option<&EntityId> {
        self.own_id.as_ref()
    }

    pub fn get(&self, id: &EntityId) -> Option<&EntityState> {
        self.remotes.get(id)
    }

    pub fn len(&self) -> usize {
        self.remotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.remotes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityState> {
        self.remotes.values()
    }

    fn is_own(&self, id: &EntityId) -> bool {
        self.own_id.as_ref() == Some(id)
    }

    /// Applies one server message.
    pub fn apply(&mut self, msg: &ServerMsg) -> RosterDelta {
        let mut delta = RosterDelta::default();
        match msg {
            ServerMsg::Welcome { id } => {
                if self.remotes.remove(id).is_some() {
                    delta.removed += 1;
                }
                self.own_id = Some(id.clone());
            }
            ServerMsg::Snapshot { entities } | ServerMsg::FullSync { entities } => {
                delta = self.reconcile(entities);
            }
            ServerMsg::Joined(state) => {
                if !self.is_own(&state.id) {
                    match self.remotes.insert(state.id.clone(), state.clone()) {
                        Some(_) => delta.updated += 1,
                        None => delta.added += 1,
                    }
                }
            }
            ServerMsg::Moved {
                id,
                position,
                orientation,
            } => {
                // Unknown ids wait for the next full sync.
                if let Some(e) = self.remotes.get_mut(id) {
                    e.position = *position;
                    e.orientation = *orientation;
                    delta.updated += 1;
                }
            }
            ServerMsg::Left { id } => {
                if self.remotes.remove(id).is_some() {
                    delta.removed += 1;
                }
            }
        }
        delta
    }

    /// Makes the roster equal to `entities` minus the own entity.
    fn reconcile(&mut self, entities: &Snapshot) -> RosterDelta {
        let mut delta = RosterDelta::default();

        let before = self.remotes.len();
        self.remotes.retain(|id, _| entities.contains_key(id));
        delta.removed = before - self.remotes.len();

        for (id, state) in entities {
            if self.is_own(id) {
                continue;
            }
            match self.remotes.insert(id.clone(), state.clone()) {
                Some(_) => delta.updated += 1,
                None => delta.added += 1,
            }
        }
        delta
    }
}
