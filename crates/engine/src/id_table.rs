//! Stable-Id Table
//!
//! Bidirectional map between process-independent `StableId`s and the
//! transient `EntityHandle`s of the live collection.
//!
//! ## Lifecycle of an id
//!
//! - Assigned on first capture of an entity (or bound from the entity's
//!   intrinsic id, or from a record during restore)
//! - Tombstoned by `mark_destroyed`: the id stays reserved and is written
//!   to the destroyed-entities section of later saves
//! - Released by `collect_garbage` once no record references it
//!
//! Ids are UUID v4 and are never handed out twice.
//!
//! Handle bindings belong to one store at a time. `attach` switches the
//! table to another store and drops every handle binding made against the
//! previous one; ids, types and tombstones survive the switch.

use crate::entity::StoreId;
use rustc_hash::{FxHashMap, FxHashSet};
use starfire_core::{EntityHandle, EntityTypeId, StableId};
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

/// Lookup of an id with no live entity bound to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Stable id {0} is not registered")]
pub struct NotYetRegistered(pub StableId);

#[derive(Debug, Clone)]
struct IdEntry {
    handle: Option<EntityHandle>,
    type_id: EntityTypeId,
}

/// Bidirectional StableId <-> EntityHandle map
#[derive(Debug, Default)]
pub struct StableIdTable {
    by_id: FxHashMap<StableId, IdEntry>,
    by_handle: FxHashMap<EntityHandle, StableId>,
    destroyed: FxHashSet<StableId>,
    released: u64,
    store: Option<StoreId>,
}

impl StableIdTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `store` the collection the handle bindings refer to
    ///
    /// A table with no store yet adopts the bindings it already holds.
    /// Switching to a different store unbinds every handle. Returns whether
    /// bindings were dropped.
    pub fn attach(&mut self, store: StoreId) -> bool {
        match self.store.replace(store) {
            Some(previous) if previous != store => {
                let dropped = self.by_handle.len();
                self.by_handle.clear();
                for entry in self.by_id.values_mut() {
                    entry.handle = None;
                }
                debug!(target: "starfire::persistence", from = %previous, to = %store, dropped, "Switched store, handle bindings dropped");
                dropped > 0
            }
            _ => false,
        }
    }

    /// Store the handle bindings refer to
    pub fn attached(&self) -> Option<StoreId> {
        self.store
    }

    /// Id of `handle`, assigning a fresh one if it has none
    ///
    /// Idempotent: repeated calls return the same id.
    pub fn assign(&mut self, handle: EntityHandle, type_id: &EntityTypeId) -> StableId {
        if let Some(id) = self.by_handle.get(&handle) {
            return *id;
        }
        let id = StableId::new();
        self.by_id.insert(
            id,
            IdEntry {
                handle: Some(handle),
                type_id: type_id.clone(),
            },
        );
        self.by_handle.insert(handle, id);
        debug!(target: "starfire::capture", stable_id = %id, handle = %handle, "Assigned stable id");
        id
    }

    /// Bind `id` to `handle`, replacing any previous binding of either side
    pub fn bind(&mut self, id: StableId, handle: EntityHandle, type_id: &EntityTypeId) {
        if let Some(old_id) = self.by_handle.insert(handle, id) {
            if old_id != id {
                if let Some(entry) = self.by_id.get_mut(&old_id) {
                    entry.handle = None;
                }
            }
        }
        let previous = self.by_id.insert(
            id,
            IdEntry {
                handle: Some(handle),
                type_id: type_id.clone(),
            },
        );
        if let Some(IdEntry {
            handle: Some(old_handle),
            ..
        }) = previous
        {
            if old_handle != handle {
                self.by_handle.remove(&old_handle);
            }
        }
        self.destroyed.remove(&id);
    }

    /// Live handle bound to `id`
    pub fn lookup(&self, id: StableId) -> Result<EntityHandle, NotYetRegistered> {
        self.by_id
            .get(&id)
            .and_then(|entry| entry.handle)
            .ok_or(NotYetRegistered(id))
    }

    /// Id bound to `handle`
    pub fn id_of(&self, handle: EntityHandle) -> Option<StableId> {
        self.by_handle.get(&handle).copied()
    }

    /// Type recorded for `id`
    pub fn type_of(&self, id: StableId) -> Option<&EntityTypeId> {
        self.by_id.get(&id).map(|entry| &entry.type_id)
    }

    /// Drop the handle side of a binding, keeping the id known
    ///
    /// Used when an entity leaves the collection without being destroyed;
    /// references to it then capture as external.
    pub fn unbind_handle(&mut self, handle: EntityHandle) -> Option<StableId> {
        let id = self.by_handle.remove(&handle)?;
        if let Some(entry) = self.by_id.get_mut(&id) {
            entry.handle = None;
        }
        Some(id)
    }

    /// Tombstone the id of a destroyed entity
    ///
    /// Returns the id, or None if the handle never had one.
    pub fn mark_destroyed(&mut self, handle: EntityHandle) -> Option<StableId> {
        let id = self.unbind_handle(handle)?;
        self.destroyed.insert(id);
        debug!(target: "starfire::persistence", stable_id = %id, "Entity marked destroyed");
        Some(id)
    }

    /// Tombstone an id read from a container's destroyed-entities section
    pub fn record_destroyed(&mut self, id: StableId, type_id: Option<&EntityTypeId>) {
        if let Some(entry) = self.by_id.get_mut(&id) {
            if let Some(handle) = entry.handle.take() {
                self.by_handle.remove(&handle);
            }
        } else if let Some(type_id) = type_id {
            self.by_id.insert(
                id,
                IdEntry {
                    handle: None,
                    type_id: type_id.clone(),
                },
            );
        }
        self.destroyed.insert(id);
    }

    /// Remove a tombstone so the id may be bound again
    ///
    /// Returns false if the id was not tombstoned.
    pub fn clear_destroyed(&mut self, id: StableId) -> bool {
        self.destroyed.remove(&id)
    }

    /// Whether `id` is tombstoned
    pub fn is_destroyed(&self, id: StableId) -> bool {
        self.destroyed.contains(&id)
    }

    /// Tombstoned ids, sorted
    pub fn destroyed(&self) -> Vec<StableId> {
        let mut ids: Vec<_> = self.destroyed.iter().copied().collect();
        ids.sort();
        ids
    }

    /// Release tombstoned ids that nothing references any more
    ///
    /// Returns the released ids, sorted.
    pub fn collect_garbage(&mut self, referenced: &HashSet<StableId>) -> Vec<StableId> {
        let mut released: Vec<_> = self
            .destroyed
            .iter()
            .filter(|id| !referenced.contains(id))
            .copied()
            .collect();
        released.sort();
        for id in &released {
            self.destroyed.remove(id);
            self.by_id.remove(id);
        }
        self.released += released.len() as u64;
        if !released.is_empty() {
            debug!(target: "starfire::persistence", count = released.len(), "Released stable ids");
        }
        released
    }

    /// Total ids released over the table's lifetime
    pub fn released_count(&self) -> u64 {
        self.released
    }

    /// Number of ids bound to a live handle
    pub fn bound_count(&self) -> usize {
        self.by_handle.len()
    }

    /// Number of known ids, bound or not
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the table knows no id
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_handle.clear();
        self.destroyed.clear();
        self.store = None;
    }
}
