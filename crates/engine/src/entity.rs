//! Entity traits and an in-memory entity collection
//!
//! The engine never owns game objects. It reaches them through two traits:
//!
//! - `Persistent`: one entity, exposing its type and named field values
//! - `EntityStore`: the live collection, including the factory used to
//!   spawn entities that a container names but the collection lacks
//!
//! `DynamicEntity` and `EntityArena` are ready-made implementations backed
//! by a field map. They suit tools, tests and data-driven entities.

use rustc_hash::FxHashSet;
use starfire_core::{
    EntityHandle, EntityTypeId, Error, FieldCodec, FieldPath, Result, StableId, Value,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Traits
// =============================================================================

/// An entity whose declared fields can be captured and restored
pub trait Persistent {
    /// Registered type of this entity
    fn entity_type(&self) -> &EntityTypeId;

    /// Id the entity carries independently of the engine
    ///
    /// Level-placed entities return the id baked into the level, so a
    /// restore binds to them instead of spawning duplicates.
    fn intrinsic_id(&self) -> Option<StableId> {
        None
    }

    /// Current value of a declared field, `None` if the entity lacks it
    fn get_field(&self, name: &str) -> Option<Value>;

    /// Overwrite a declared field
    fn set_field(&mut self, name: &str, value: Value) -> Result<()>;

    /// Called once after every record of a restore has been applied
    fn post_restore(&mut self) {}
}

/// Identity of one live collection
///
/// Handles are only meaningful to the store that issued them. The id table
/// drops its handle bindings when it is used with a different store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId(u64);

impl StoreId {
    /// Allocate an id no other store in this process has
    pub fn unique() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        StoreId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store#{}", self.0)
    }
}

/// The live collection of entities
pub trait EntityStore {
    /// Entity type held by the collection
    type Entity: Persistent;

    /// Identity of this collection, fixed for its lifetime
    fn store_id(&self) -> StoreId;

    /// Handles of all live entities, in a stable order
    fn handles(&self) -> Vec<EntityHandle>;

    /// Borrow an entity
    fn get(&self, handle: EntityHandle) -> Option<&Self::Entity>;

    /// Borrow an entity mutably
    fn get_mut(&mut self, handle: EntityHandle) -> Option<&mut Self::Entity>;

    /// Create a default-initialized entity of the given type
    ///
    /// Fails with `SpawnFailed` when the collection cannot build the type.
    fn spawn(&mut self, type_id: &EntityTypeId) -> Result<EntityHandle>;

    /// Remove an entity, returning whether it existed
    fn despawn(&mut self, handle: EntityHandle) -> bool;

    /// Whether the handle names a live entity
    fn contains(&self, handle: EntityHandle) -> bool {
        self.get(handle).is_some()
    }
}

// =============================================================================
// DynamicEntity
// =============================================================================

/// Entity backed by a name -> value map
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicEntity {
    type_id: EntityTypeId,
    intrinsic_id: Option<StableId>,
    fields: BTreeMap<String, Value>,
    restored_count: u32,
}

impl DynamicEntity {
    /// Create an entity with no fields set
    pub fn new(type_id: impl Into<EntityTypeId>) -> Self {
        DynamicEntity {
            type_id: type_id.into(),
            intrinsic_id: None,
            fields: BTreeMap::new(),
            restored_count: 0,
        }
    }

    /// Give the entity an intrinsic id
    pub fn with_intrinsic_id(mut self, id: StableId) -> Self {
        self.intrinsic_id = Some(id);
        self
    }

    /// Builder-style typed field assignment
    pub fn with<T: FieldCodec>(mut self, name: impl Into<String>, value: T) -> Self {
        self.fields.insert(name.into(), value.to_value());
        self
    }

    /// Builder-style raw field assignment
    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Set a field from a native value
    pub fn set<T: FieldCodec>(&mut self, name: impl Into<String>, value: T) {
        self.fields.insert(name.into(), value.to_value());
    }

    /// Read a field as a native value
    ///
    /// An unset field reads as `Null`, so only `Option<T>` accepts it.
    pub fn get<T: FieldCodec>(&self, name: &str) -> Result<T> {
        let path = FieldPath::field(name);
        match self.fields.get(name) {
            Some(value) => T::from_value(value, &path),
            None => T::from_value(&Value::Null, &path),
        }
    }

    /// Raw field value
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// All fields, sorted by name
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Number of `post_restore` notifications received
    pub fn restored_count(&self) -> u32 {
        self.restored_count
    }
}

impl Persistent for DynamicEntity {
    fn entity_type(&self) -> &EntityTypeId {
        &self.type_id
    }

    fn intrinsic_id(&self) -> Option<StableId> {
        self.intrinsic_id
    }

    fn get_field(&self, name: &str) -> Option<Value> {
        self.fields.get(name).cloned()
    }

    fn set_field(&mut self, name: &str, value: Value) -> Result<()> {
        self.fields.insert(name.to_string(), value);
        Ok(())
    }

    fn post_restore(&mut self) {
        self.restored_count += 1;
    }
}

// =============================================================================
// EntityArena
// =============================================================================

/// In-memory collection of `DynamicEntity` values
///
/// Handles are allocated from a counter and never reused within one arena.
/// Two arenas hand out the same handle values, so each carries its own
/// `StoreId`.
#[derive(Debug)]
pub struct EntityArena {
    store_id: StoreId,
    entities: BTreeMap<EntityHandle, DynamicEntity>,
    next_handle: u64,
    unspawnable: FxHashSet<EntityTypeId>,
}

impl Default for EntityArena {
    fn default() -> Self {
        EntityArena {
            store_id: StoreId::unique(),
            entities: BTreeMap::new(),
            next_handle: 0,
            unspawnable: FxHashSet::default(),
        }
    }
}

impl EntityArena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity, returning its handle
    pub fn insert(&mut self, entity: DynamicEntity) -> EntityHandle {
        self.next_handle += 1;
        let handle = EntityHandle::new(self.next_handle);
        self.entities.insert(handle, entity);
        handle
    }

    /// Remove an entity without going through the store trait
    pub fn remove(&mut self, handle: EntityHandle) -> Option<DynamicEntity> {
        self.entities.remove(&handle)
    }

    /// Make `spawn` fail for a type
    pub fn deny_spawn(&mut self, type_id: impl Into<EntityTypeId>) {
        self.unspawnable.insert(type_id.into());
    }

    /// Handle of the entity carrying an intrinsic id
    pub fn find_intrinsic(&self, id: StableId) -> Option<EntityHandle> {
        self.entities
            .iter()
            .find(|(_, e)| e.intrinsic_id == Some(id))
            .map(|(h, _)| *h)
    }

    /// Iterate entities in handle order
    pub fn iter(&self) -> impl Iterator<Item = (EntityHandle, &DynamicEntity)> {
        self.entities.iter().map(|(h, e)| (*h, e))
    }

    /// Entities of one type, in handle order
    pub fn of_type<'a>(
        &'a self,
        type_id: &'a EntityTypeId,
    ) -> impl Iterator<Item = (EntityHandle, &'a DynamicEntity)> + 'a {
        self.iter().filter(move |(_, e)| &e.type_id == type_id)
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the arena is empty
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl EntityStore for EntityArena {
    type Entity = DynamicEntity;

    fn store_id(&self) -> StoreId {
        self.store_id
    }

    fn handles(&self) -> Vec<EntityHandle> {
        self.entities.keys().copied().collect()
    }

    fn get(&self, handle: EntityHandle) -> Option<&DynamicEntity> {
        self.entities.get(&handle)
    }

    fn get_mut(&mut self, handle: EntityHandle) -> Option<&mut DynamicEntity> {
        self.entities.get_mut(&handle)
    }

    fn spawn(&mut self, type_id: &EntityTypeId) -> Result<EntityHandle> {
        if self.unspawnable.contains(type_id) {
            return Err(Error::SpawnFailed {
                type_id: type_id.clone(),
                reason: "type is not spawnable in this arena".to_string(),
            });
        }
        Ok(self.insert(DynamicEntity::new(type_id.clone())))
    }

    fn despawn(&mut self, handle: EntityHandle) -> bool {
        self.entities.remove(&handle).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_fields() {
        let mut door = DynamicEntity::new("door").with("open", true).with("code", 1234i64);
        assert!(door.get::<bool>("open").unwrap());
        assert_eq!(door.get::<i64>("code").unwrap(), 1234);
        assert_eq!(door.get::<Option<String>>("label").unwrap(), None);

        door.set("label", "front".to_string());
        assert_eq!(door.get::<String>("label").unwrap(), "front");
    }

    #[test]
    fn test_typed_field_mismatch() {
        let door = DynamicEntity::new("door").with("open", true);
        let err = door.get::<f64>("open").unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        assert!(door.get::<i64>("missing").is_err());
    }

    #[test]
    fn test_arena_handles_not_reused() {
        let mut arena = EntityArena::new();
        let a = arena.insert(DynamicEntity::new("npc"));
        assert!(arena.despawn(a));
        assert!(!arena.despawn(a));
        let b = arena.insert(DynamicEntity::new("npc"));
        assert_ne!(a, b);
        assert_eq!(arena.handles(), vec![b]);
    }

    #[test]
    fn test_arenas_have_distinct_store_ids() {
        let a = EntityArena::new();
        let b = EntityArena::new();
        assert_ne!(a.store_id(), b.store_id());
        assert_eq!(a.store_id(), a.store_id());
    }

    #[test]
    fn test_new_entity_is_empty() {
        let entity = DynamicEntity::new("chest");
        assert_eq!(entity.entity_type(), &EntityTypeId::from("chest"));
        assert!(entity.fields().is_empty());
        assert_eq!(entity.intrinsic_id(), None);
        assert_eq!(entity.restored_count(), 0);
    }

    #[test]
    fn test_spawn_and_deny() {
        let mut arena = EntityArena::new();
        let h = arena.spawn(&"chest".into()).unwrap();
        assert_eq!(arena.get(h).unwrap().entity_type().as_str(), "chest");

        arena.deny_spawn("boss");
        let err = arena.spawn(&"boss".into()).unwrap_err();
        assert!(matches!(err, Error::SpawnFailed { .. }));
    }

    #[test]
    fn test_find_intrinsic() {
        let mut arena = EntityArena::new();
        let id = StableId::new();
        arena.insert(DynamicEntity::new("lever"));
        let placed = arena.insert(DynamicEntity::new("lever").with_intrinsic_id(id));
        assert_eq!(arena.find_intrinsic(id), Some(placed));
        assert_eq!(arena.find_intrinsic(StableId::new()), None);
    }

    #[test]
    fn test_post_restore_counts() {
        let mut e = DynamicEntity::new("npc");
        e.post_restore();
        e.post_restore();
        assert_eq!(e.restored_count(), 2);
    }
}
