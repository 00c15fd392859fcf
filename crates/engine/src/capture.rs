//! Snapshot Capturer
//!
//! Walks live entities and produces one `EntityRecord` per entity, in
//! depth-first order from the roots.
//!
//! ## Rules
//!
//! - Fields are encoded in the layout's declared order; a field the entity
//!   does not expose is left out of the record
//! - Every referenced entity gets a stable id and is captured too, once per
//!   pass; cycles are cut by the captured set
//! - Recursion stops at the capture depth limit; deeper entities are queued
//!   and captured iteratively
//! - A reference to a handle that left the collection is written as an
//!   external reference if its id is still known, otherwise as `Null`
//! - Entities of unregistered types are not captured

use crate::entity::{EntityStore, Persistent};
use crate::id_table::StableIdTable;
use crate::registry::SchemaRegistry;
use rustc_hash::FxHashSet;
use starfire_core::{
    codec, EntityHandle, EntityRecord, EntityRef, EntityTypeId, FieldPath, Limits, Result,
    ReferenceEncoder, StableId,
};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Captures entities of one store into records
pub struct Capturer<'a, S: EntityStore> {
    registry: &'a SchemaRegistry,
    ids: &'a mut StableIdTable,
    store: &'a S,
    limits: Limits,
    captured: FxHashSet<EntityHandle>,
    queue: VecDeque<EntityHandle>,
    records: Vec<EntityRecord>,
    skipped: usize,
}

impl<'a, S: EntityStore> Capturer<'a, S> {
    /// Start a capture pass
    ///
    /// Attaches the id table to `store`, so handle bindings made against
    /// another collection are never reused.
    pub fn new(registry: &'a SchemaRegistry, ids: &'a mut StableIdTable, store: &'a S) -> Self {
        ids.attach(store.store_id());
        Capturer {
            registry,
            ids,
            store,
            limits: Limits::default(),
            captured: FxHashSet::default(),
            queue: VecDeque::new(),
            records: Vec::new(),
            skipped: 0,
        }
    }

    /// Override the default limits
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Capture every live entity, or only roots of the listed types
    pub fn capture_roots(&mut self, filter: Option<&[EntityTypeId]>) -> Result<()> {
        let store = self.store;
        for handle in store.handles() {
            let Some(entity) = store.get(handle) else {
                continue;
            };
            let type_id = entity.entity_type();
            if let Some(types) = filter {
                if !types.contains(type_id) {
                    continue;
                }
            }
            if !self.registry.contains(type_id) {
                debug!(target: "starfire::capture", type_id = %type_id, handle = %handle, "Skipping unregistered entity type");
                self.skipped += 1;
                continue;
            }
            self.capture(handle)?;
        }
        Ok(())
    }

    /// Capture one entity and everything it references
    pub fn capture(&mut self, handle: EntityHandle) -> Result<Option<StableId>> {
        let id = self.capture_at(handle, 0)?;
        while let Some(next) = self.queue.pop_front() {
            self.capture_at(next, 0)?;
        }
        Ok(id)
    }

    /// Number of roots skipped for lack of a schema
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Finish the pass, returning records in capture order
    pub fn finish(self) -> Vec<EntityRecord> {
        debug!(target: "starfire::capture", records = self.records.len(), skipped = self.skipped, "Capture pass complete");
        self.records
    }

    fn capture_at(&mut self, handle: EntityHandle, depth: usize) -> Result<Option<StableId>> {
        let store = self.store;
        let registry = self.registry;

        let Some(entity) = store.get(handle) else {
            return Ok(None);
        };
        if !self.captured.insert(handle) {
            return Ok(self.ids.id_of(handle));
        }

        let type_id = entity.entity_type();
        let schema = registry.describe(type_id)?;
        let id = stable_id_for(self.ids, entity, handle);

        let mut refs = CaptureRefs {
            registry,
            ids: &mut *self.ids,
            store,
            discovered: Vec::new(),
        };
        let mut record = EntityRecord::new(id, type_id.clone(), schema.version);
        for field in &schema.fields {
            let Some(value) = entity.get_field(&field.name) else {
                continue;
            };
            let encoded = codec::encode_with_limit(
                &value,
                &field.ty,
                &FieldPath::field(field.name.as_str()),
                &mut refs,
                self.limits.max_nesting_depth,
            )?;
            record.fields.push((field.name.clone(), encoded));
        }
        let discovered = refs.discovered;

        debug!(target: "starfire::capture", type_id = %type_id, stable_id = %id, depth, "Captured entity");
        self.records.push(record);

        for target in discovered {
            if self.captured.contains(&target) {
                continue;
            }
            if depth + 1 < self.limits.max_capture_depth {
                self.capture_at(target, depth + 1)?;
            } else {
                self.queue.push_back(target);
            }
        }
        Ok(Some(id))
    }
}

/// Capture a whole store in one call
pub fn capture_store<S: EntityStore>(
    registry: &SchemaRegistry,
    ids: &mut StableIdTable,
    store: &S,
    filter: Option<&[EntityTypeId]>,
    limits: Limits,
) -> Result<Vec<EntityRecord>> {
    let mut capturer = Capturer::new(registry, ids, store).with_limits(limits);
    capturer.capture_roots(filter)?;
    Ok(capturer.finish())
}

fn stable_id_for<E: Persistent>(ids: &mut StableIdTable, entity: &E, handle: EntityHandle) -> StableId {
    match entity.intrinsic_id() {
        Some(id) => {
            if ids.id_of(handle) != Some(id) {
                ids.bind(id, handle, entity.entity_type());
            }
            id
        }
        None => ids.assign(handle, entity.entity_type()),
    }
}

struct CaptureRefs<'a, S: EntityStore> {
    registry: &'a SchemaRegistry,
    ids: &'a mut StableIdTable,
    store: &'a S,
    discovered: Vec<EntityHandle>,
}

impl<S: EntityStore> ReferenceEncoder for CaptureRefs<'_, S> {
    fn encode_reference(
        &mut self,
        handle: EntityHandle,
        path: &FieldPath,
    ) -> Result<Option<EntityRef>> {
        let Some(target) = self.store.get(handle) else {
            let known = self
                .ids
                .id_of(handle)
                .and_then(|id| self.ids.type_of(id).map(|t| (id, t.clone())));
            return match known {
                Some((id, target_type)) => {
                    debug!(target: "starfire::capture", path = %path, stable_id = %id, "Reference to departed entity captured as external");
                    Ok(Some(EntityRef::external(target_type, id)))
                }
                None => {
                    warn!(target: "starfire::capture", path = %path, handle = %handle, "Reference to unknown entity captured as null");
                    Ok(None)
                }
            };
        };

        let target_type = target.entity_type();
        if !self.registry.contains(target_type) {
            warn!(target: "starfire::capture", path = %path, type_id = %target_type, "Reference to unregistered type captured as null");
            return Ok(None);
        }
        let id = stable_id_for(self.ids, target, handle);
        self.discovered.push(handle);
        Ok(Some(EntityRef::new(target_type.clone(), id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{DynamicEntity, EntityArena};
    use crate::registry::{SchemaRegistry, TypeSchema};
    use starfire_core::{Error, FieldType, FieldValue, Value};
    use std::sync::Arc;

    fn registry() -> Arc<SchemaRegistry> {
        let mut builder = SchemaRegistry::builder();
        builder
            .register(
                TypeSchema::new("node", 1)
                    .with_field("label", FieldType::String)
                    .with_field("next", FieldType::reference("node")),
            )
            .unwrap();
        builder
            .register(
                TypeSchema::new("door", 2)
                    .with_field("open", FieldType::Bool)
                    .with_field("key", FieldType::optional(FieldType::String)),
            )
            .unwrap();
        builder.freeze()
    }

    fn node(label: &str, next: Option<EntityHandle>) -> DynamicEntity {
        DynamicEntity::new("node")
            .with("label", label.to_string())
            .with_value("next", Value::Entity(next))
    }

    #[test]
    fn test_fields_in_layout_order() {
        let registry = registry();
        let mut ids = StableIdTable::new();
        let mut arena = EntityArena::new();
        arena.insert(
            DynamicEntity::new("door")
                .with_value("key", Value::Null)
                .with("open", true),
        );

        let records = capture_store(&registry, &mut ids, &arena, None, Limits::default()).unwrap();
        assert_eq!(records.len(), 1);
        let names: Vec<_> = records[0].fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["open", "key"]);
        assert_eq!(records[0].get("key"), Some(&FieldValue::Null));
        assert_eq!(records[0].version.get(), 2);
    }

    #[test]
    fn test_unexposed_fields_left_out() {
        let registry = registry();
        let mut ids = StableIdTable::new();
        let mut arena = EntityArena::new();
        arena.insert(DynamicEntity::new("door").with("open", true));

        let records = capture_store(&registry, &mut ids, &arena, None, Limits::default()).unwrap();
        assert!(records[0].contains("open"));
        assert!(!records[0].contains("key"));
    }

    #[test]
    fn test_cycle_captured_once_each() {
        let registry = registry();
        let mut ids = StableIdTable::new();
        let mut arena = EntityArena::new();
        let a = arena.insert(node("a", None));
        let b = arena.insert(node("b", Some(a)));
        arena.get_mut(a).unwrap().set_field("next", Value::Entity(Some(b))).unwrap();

        let records = capture_store(&registry, &mut ids, &arena, None, Limits::default()).unwrap();
        assert_eq!(records.len(), 2);
        let id_a = ids.id_of(a).unwrap();
        let id_b = ids.id_of(b).unwrap();
        let rec_a = records.iter().find(|r| r.id == id_a).unwrap();
        assert_eq!(rec_a.get("next").unwrap().as_reference().unwrap().id, id_b);
    }

    #[test]
    fn test_deep_chain_beyond_capture_depth() {
        let registry = registry();
        let mut ids = StableIdTable::new();
        let mut arena = EntityArena::new();
        let mut next = None;
        let mut handles = Vec::new();
        for i in 0..20 {
            let h = arena.insert(node(&format!("n{}", i), next));
            handles.push(h);
            next = Some(h);
        }

        // Capture only from the head so the chain is reached through references
        let mut capturer = Capturer::new(&registry, &mut ids, &arena)
            .with_limits(Limits::with_small_limits());
        capturer.capture(*handles.last().unwrap()).unwrap();
        let records = capturer.finish();
        assert_eq!(records.len(), 20);
    }

    #[test]
    fn test_filter_selects_roots_only() {
        let registry = registry();
        let mut ids = StableIdTable::new();
        let mut arena = EntityArena::new();
        arena.insert(DynamicEntity::new("door").with("open", false));
        arena.insert(node("lonely", None));

        let filter = [EntityTypeId::from("door")];
        let records =
            capture_store(&registry, &mut ids, &arena, Some(&filter), Limits::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].type_id.as_str(), "door");
    }

    #[test]
    fn test_unregistered_roots_skipped() {
        let registry = registry();
        let mut ids = StableIdTable::new();
        let mut arena = EntityArena::new();
        arena.insert(DynamicEntity::new("particle"));
        arena.insert(DynamicEntity::new("door").with("open", true));

        let mut capturer = Capturer::new(&registry, &mut ids, &arena);
        capturer.capture_roots(None).unwrap();
        assert_eq!(capturer.skipped(), 1);
        assert_eq!(capturer.finish().len(), 1);
    }

    #[test]
    fn test_departed_reference_becomes_external() {
        let registry = registry();
        let mut ids = StableIdTable::new();
        let mut arena = EntityArena::new();
        let gone = arena.insert(node("gone", None));
        let gone_id = ids.assign(gone, &"node".into());
        arena.remove(gone);
        arena.insert(node("head", Some(gone)));

        let records = capture_store(&registry, &mut ids, &arena, None, Limits::default()).unwrap();
        let reference = records[0].get("next").unwrap().as_reference().unwrap();
        assert!(reference.external);
        assert_eq!(reference.id, gone_id);
    }

    #[test]
    fn test_unknown_reference_becomes_null() {
        let registry = registry();
        let mut ids = StableIdTable::new();
        let mut arena = EntityArena::new();
        arena.insert(node("head", Some(EntityHandle::new(999))));

        let records = capture_store(&registry, &mut ids, &arena, None, Limits::default()).unwrap();
        assert_eq!(records[0].get("next"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_wrong_field_type_fails() {
        let registry = registry();
        let mut ids = StableIdTable::new();
        let mut arena = EntityArena::new();
        arena.insert(DynamicEntity::new("door").with("open", 1i64));

        let err = capture_store(&registry, &mut ids, &arena, None, Limits::default()).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_intrinsic_id_used() {
        let registry = registry();
        let mut ids = StableIdTable::new();
        let mut arena = EntityArena::new();
        let placed = StableId::new();
        arena.insert(
            DynamicEntity::new("door")
                .with("open", false)
                .with_intrinsic_id(placed),
        );

        let records = capture_store(&registry, &mut ids, &arena, None, Limits::default()).unwrap();
        assert_eq!(records[0].id, placed);
    }

    #[test]
    fn test_ids_stable_across_passes() {
        let registry = registry();
        let mut ids = StableIdTable::new();
        let mut arena = EntityArena::new();
        arena.insert(DynamicEntity::new("door").with("open", true));

        let first = capture_store(&registry, &mut ids, &arena, None, Limits::default()).unwrap();
        let second = capture_store(&registry, &mut ids, &arena, None, Limits::default()).unwrap();
        assert_eq!(first[0].id, second[0].id);
    }
}
