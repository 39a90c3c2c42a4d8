//! Shared state store.
//!
//! Authoritative in-memory mapping `EntityId -> EntityState`. The store has no
//! lock of its own: it is owned by the sync engine, which runs on a single
//! dispatch task, so every operation is already serialized.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::{
    entity::{EntityId, EntityState},
    math::Vec3,
};

/// Point-in-time copy of the store, ordered by id.
pub type Snapshot = BTreeMap<EntityId, EntityState>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("entity {0} already exists")]
    DuplicateId(EntityId),
}

/// Authoritative entity store.
#[derive(Debug, Default)]
pub struct StateStore {
    entities: BTreeMap<EntityId, EntityState>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new entity. The existing entry is left untouched on collision.
    pub fn create(&mut self, state: EntityState) -> Result<(), StoreError> {
        if self.entities.contains_key(&state.id) {
            return Err(StoreError::DuplicateId(state.id));
        }
        self.entities.insert(state.id.clone(), state);
        Ok(())
    }

    /// Overwrites position and orientation. Returns `false` if `id` is absent.
    pub fn update(&mut self, id: &EntityId, position: Vec3, orientation: Vec3) -> bool {
        match self.entities.get_mut(id) {
            Some(e) => {
                e.position = position;
                e.orientation = orientation;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &EntityId) -> Option<EntityState> {
        self.entities.remove(id)
    }

    /// Owned copy of every entity; later mutations do not affect it.
    pub fn snapshot_all(&self) -> Snapshot {
        self.entities.clone()
    }

    pub fn get(&self, id: &EntityId) -> Option<&EntityState> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityState> {
        self.entities.values()
    }
}
