//! Snapshot Restorer
//!
//! Applies a container's records onto a live collection.
//!
//! ## Phases
//!
//! 1. **Prepare**: every record is migrated, checked against its layout,
//!    matched to a target entity and decoded. Nothing is touched yet, so a
//!    strict-mode failure here leaves the collection exactly as it was.
//! 2. **Apply**: targets are spawned or reused, ids bound, fields set in
//!    layout order.
//! 3. **Fix-up**: references whose target was not yet bound during decoding
//!    are patched now. Record order therefore does not matter. Whatever
//!    still does not resolve is reported as dangling; the rest of the
//!    record stays restored.
//! 4. **Notify**: each restored entity receives `post_restore`, then the
//!    container's destroyed entities are despawned.
//!
//! Fix-ups are local to one call and never outlive it. The id table is
//! attached to the target store first, so bindings made against another
//! collection never resolve a record or a reference.

use crate::config::{CreationPolicy, LoadMode, PersistenceConfig};
use crate::entity::{EntityStore, Persistent};
use crate::guard::CancellationToken;
use crate::id_table::StableIdTable;
use crate::migration::{migrate, MigrationTrace};
use crate::registry::SchemaRegistry;
use rustc_hash::{FxHashMap, FxHashSet};
use starfire_core::{
    codec, EntityHandle, EntityRecord, EntityRef, EntityTypeId, Error, FieldPath, PathSegment,
    ReferenceDecoder, Result, StableId, Value,
};
use tracing::{debug, info, warn};

// =============================================================================
// Options and report
// =============================================================================

/// Per-call restore settings
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Failure handling
    pub mode: LoadMode,
    /// Creation of missing entities
    pub policy: CreationPolicy,
    /// Cooperative cancellation, checked between records
    pub cancel: Option<CancellationToken>,
}

impl RestoreOptions {
    /// Strict mode, spawning missing entities
    pub fn strict() -> Self {
        Self::default()
    }

    /// Best-effort mode, spawning missing entities
    pub fn best_effort() -> Self {
        RestoreOptions {
            mode: LoadMode::BestEffort,
            ..Default::default()
        }
    }

    /// Options matching a persistence config
    pub fn from_config(config: &PersistenceConfig) -> Self {
        RestoreOptions {
            mode: config.load_mode,
            policy: config.creation_policy,
            cancel: None,
        }
    }

    /// Set creation policy
    pub fn with_policy(mut self, policy: CreationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Attach a cancellation token
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

/// How a restored entity came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Created by the collection's factory
    Spawned,
    /// Existing entity overwritten
    Updated,
}

/// One entity the restore applied a record to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredEntity {
    /// Stable id of the record
    pub id: StableId,
    /// Entity type
    pub type_id: EntityTypeId,
    /// Live handle the record landed on
    pub handle: EntityHandle,
    /// Spawned or updated
    pub outcome: RestoreOutcome,
}

/// A record skipped in best-effort mode
#[derive(Debug)]
pub struct RecordFailure {
    /// Stable id of the record
    pub id: StableId,
    /// Type of the record
    pub type_id: EntityTypeId,
    /// Why it failed
    pub error: Error,
}

/// A reference that never resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingRef {
    /// Entity holding the reference
    pub owner: StableId,
    /// Location of the reference inside the owner
    pub path: FieldPath,
    /// Id that was never bound
    pub target: StableId,
}

impl DanglingRef {
    /// As a `DanglingReference` error
    pub fn to_error(&self) -> Error {
        Error::DanglingReference {
            owner: self.owner,
            path: self.path.to_string(),
            target: self.target,
        }
    }
}

/// Outcome of restoring one container
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Entities restored, in apply order
    pub entities: Vec<RestoredEntity>,
    /// Records skipped in best-effort mode
    pub failures: Vec<RecordFailure>,
    /// References left unresolved (reported in both modes)
    pub dangling: Vec<DanglingRef>,
    /// Records that went through at least one migration step
    pub migrations: Vec<MigrationTrace>,
    /// Ids of entities despawned because the container lists them destroyed
    pub despawned: Vec<StableId>,
    /// Fields present in records but absent from the current layout
    pub unknown_fields: usize,
    /// The restore stopped early at a cancellation request
    pub cancelled: bool,
}

impl RestoreReport {
    /// No failures, no dangling references, not cancelled
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.dangling.is_empty() && !self.cancelled
    }

    /// Number of spawned entities
    pub fn spawned(&self) -> usize {
        self.count(RestoreOutcome::Spawned)
    }

    /// Number of updated entities
    pub fn updated(&self) -> usize {
        self.count(RestoreOutcome::Updated)
    }

    /// Handle a record was restored onto
    pub fn handle_of(&self, id: StableId) -> Option<EntityHandle> {
        self.entities.iter().find(|e| e.id == id).map(|e| e.handle)
    }

    fn count(&self, outcome: RestoreOutcome) -> usize {
        self.entities.iter().filter(|e| e.outcome == outcome).count()
    }
}

// =============================================================================
// Restore
// =============================================================================

enum Target {
    Existing(EntityHandle),
    Spawn,
}

struct Prepared {
    id: StableId,
    type_id: EntityTypeId,
    target: Target,
    fields: Vec<(String, Value)>,
    unresolved: Vec<(FieldPath, StableId)>,
}

struct Fixup {
    owner: StableId,
    owner_handle: EntityHandle,
    path: FieldPath,
    target: StableId,
}

/// Restore `records` onto `store`
///
/// `destroyed` lists ids the container records as destroyed; matching live
/// entities are despawned and their ids tombstoned.
///
/// Returns `Err` for operation-level failures and, in strict mode, for the
/// first failing record. A cancellation before any entity is touched
/// returns `Cancelled`; a later one returns the partial report marked
/// `cancelled`.
///
/// A strict failure while applying (a spawn or `set_field` error) aborts
/// with the records applied so far left in place. Those entities still
/// receive `post_restore`; their references are not patched and
/// destroyed entities are not despawned.
pub fn restore_records<S: EntityStore>(
    registry: &SchemaRegistry,
    ids: &mut StableIdTable,
    records: &[EntityRecord],
    destroyed: &[StableId],
    store: &mut S,
    options: &RestoreOptions,
) -> Result<RestoreReport> {
    info!(target: "starfire::restore", records = records.len(), mode = ?options.mode, "Restore started");
    let mut report = RestoreReport::default();
    ids.attach(store.store_id());

    // Phase 1: prepare
    let intrinsic = intrinsic_index(&*store);
    let mut seen = FxHashSet::default();
    let mut prepared = Vec::with_capacity(records.len());
    for record in records {
        if options.is_cancelled() {
            info!(target: "starfire::restore", "Restore cancelled before applying");
            return Err(Error::Cancelled);
        }
        if !seen.insert(record.id) {
            return Err(Error::CorruptContainer(format!(
                "duplicate record id {}",
                record.id
            )));
        }
        match prepare(registry, ids, &*store, &intrinsic, record, options.policy) {
            Ok((p, trace, unknown)) => {
                if trace.migrated() {
                    report.migrations.push(trace);
                }
                report.unknown_fields += unknown;
                prepared.push(p);
            }
            Err(e) if !e.is_record_level() => return Err(e),
            Err(e) => fail(&mut report, options.mode, record.id, &record.type_id, e)?,
        }
    }

    // Phase 2: apply
    let mut fixups = Vec::new();
    for p in prepared {
        if options.is_cancelled() {
            info!(target: "starfire::restore", applied = report.entities.len(), "Restore cancelled");
            report.cancelled = true;
            break;
        }
        let (handle, outcome) = match p.target {
            Target::Existing(handle) => (handle, RestoreOutcome::Updated),
            Target::Spawn => match store.spawn(&p.type_id) {
                Ok(handle) => (handle, RestoreOutcome::Spawned),
                Err(e) => {
                    if let Err(e) = fail(&mut report, options.mode, p.id, &p.type_id, e) {
                        notify(&mut *store, &report.entities);
                        return Err(e);
                    }
                    continue;
                }
            },
        };
        ids.bind(p.id, handle, &p.type_id);

        let applied = match store.get_mut(handle) {
            Some(entity) => p
                .fields
                .into_iter()
                .try_for_each(|(name, value)| entity.set_field(&name, value)),
            None => Err(Error::MissingEntity {
                type_id: p.type_id.clone(),
                id: p.id,
            }),
        };
        if let Err(e) = applied {
            if let Err(e) = fail(&mut report, options.mode, p.id, &p.type_id, e) {
                notify(&mut *store, &report.entities);
                return Err(e);
            }
            continue;
        }

        debug!(target: "starfire::restore", stable_id = %p.id, type_id = %p.type_id, handle = %handle, outcome = ?outcome, "Applied record");
        fixups.extend(p.unresolved.into_iter().map(|(path, target)| Fixup {
            owner: p.id,
            owner_handle: handle,
            path,
            target,
        }));
        report.entities.push(RestoredEntity {
            id: p.id,
            type_id: p.type_id,
            handle,
            outcome,
        });
    }

    // Phase 3: fix-ups
    for fixup in fixups {
        let resolved = ids
            .lookup(fixup.target)
            .ok()
            .filter(|h| store.contains(*h));
        let patched = match resolved {
            Some(target) => patch(&mut *store, &fixup, target),
            None => false,
        };
        if !patched {
            warn!(target: "starfire::restore", owner = %fixup.owner, path = %fixup.path, target_id = %fixup.target, "Dangling reference");
            report.dangling.push(DanglingRef {
                owner: fixup.owner,
                path: fixup.path,
                target: fixup.target,
            });
        }
    }

    // Phase 4: notify, then destroyed entities
    notify(&mut *store, &report.entities);
    if !report.cancelled {
        for id in destroyed {
            let live = ids
                .lookup(*id)
                .ok()
                .or_else(|| intrinsic.get(id).copied())
                .filter(|h| store.contains(*h));
            let type_id = ids.type_of(*id).cloned();
            if let Some(handle) = live {
                if store.despawn(handle) {
                    report.despawned.push(*id);
                }
            }
            ids.record_destroyed(*id, type_id.as_ref());
        }
    }

    info!(
        target: "starfire::restore",
        spawned = report.spawned(),
        updated = report.updated(),
        failures = report.failures.len(),
        dangling = report.dangling.len(),
        despawned = report.despawned.len(),
        "Restore complete"
    );
    Ok(report)
}

fn prepare<S: EntityStore>(
    registry: &SchemaRegistry,
    ids: &StableIdTable,
    store: &S,
    intrinsic: &FxHashMap<StableId, EntityHandle>,
    record: &EntityRecord,
    policy: CreationPolicy,
) -> Result<(Prepared, MigrationTrace, usize)> {
    let (record, trace) = migrate(registry, record.clone())?;
    let schema = registry.describe(&record.type_id)?;

    let mut unknown = 0;
    for (name, _) in &record.fields {
        if schema.field(name).is_none() {
            warn!(target: "starfire::restore", type_id = %record.type_id, field = %name, "Ignoring field missing from layout");
            unknown += 1;
        }
    }

    let existing = ids
        .lookup(record.id)
        .ok()
        .filter(|h| store.contains(*h))
        .or_else(|| intrinsic.get(&record.id).copied());
    let target = match (existing, policy) {
        (Some(handle), _) => {
            let found = store.get(handle).map(|e| e.entity_type());
            if found != Some(&record.type_id) {
                return Err(Error::type_mismatch(
                    format!("<{}>", record.id),
                    &record.type_id,
                    found.map_or_else(|| "<none>".to_string(), |t| t.to_string()),
                ));
            }
            Target::Existing(handle)
        }
        (None, CreationPolicy::CreateMissing) => Target::Spawn,
        (None, CreationPolicy::RestoreExistingOnly) => {
            return Err(Error::MissingEntity {
                type_id: record.type_id.clone(),
                id: record.id,
            })
        }
    };

    let mut refs = RestoreRefs {
        ids,
        store,
        intrinsic,
        unresolved: Vec::new(),
    };
    let mut fields = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let Some(value) = record.get(&field.name) else {
            continue;
        };
        let path = FieldPath::field(field.name.as_str());
        fields.push((field.name.clone(), codec::decode(value, &field.ty, &path, &mut refs)?));
    }

    let prepared = Prepared {
        id: record.id,
        type_id: record.type_id,
        target,
        fields,
        unresolved: refs.unresolved,
    };
    Ok((prepared, trace, unknown))
}

fn fail(
    report: &mut RestoreReport,
    mode: LoadMode,
    id: StableId,
    type_id: &EntityTypeId,
    error: Error,
) -> Result<()> {
    match mode {
        LoadMode::Strict => Err(error),
        LoadMode::BestEffort => {
            warn!(target: "starfire::restore", stable_id = %id, type_id = %type_id, error = %error, "Skipping record");
            report.failures.push(RecordFailure {
                id,
                type_id: type_id.clone(),
                error,
            });
            Ok(())
        }
    }
}

fn notify<S: EntityStore>(store: &mut S, restored: &[RestoredEntity]) {
    for entity in restored {
        if let Some(live) = store.get_mut(entity.handle) {
            live.post_restore();
        }
    }
}

fn intrinsic_index<S: EntityStore>(store: &S) -> FxHashMap<StableId, EntityHandle> {
    store
        .handles()
        .into_iter()
        .filter_map(|h| store.get(h).and_then(|e| e.intrinsic_id()).map(|id| (id, h)))
        .collect()
}

/// Write `target` into the placeholder at the fix-up's path
fn patch<S: EntityStore>(store: &mut S, fixup: &Fixup, target: EntityHandle) -> bool {
    let Some(entity) = store.get_mut(fixup.owner_handle) else {
        return false;
    };
    let name = fixup.path.field_name();
    let Some(mut value) = entity.get_field(name) else {
        return false;
    };
    if !set_at(&mut value, fixup.path.segments(), target) {
        return false;
    }
    entity.set_field(name, value).is_ok()
}

fn set_at(value: &mut Value, segments: &[PathSegment], target: EntityHandle) -> bool {
    match segments.split_first() {
        None => match value {
            Value::Entity(slot) => {
                *slot = Some(target);
                true
            }
            Value::Null => {
                *value = Value::Entity(Some(target));
                true
            }
            _ => false,
        },
        Some((PathSegment::Index(i), rest)) => match value {
            Value::List(items) => items.get_mut(*i).is_some_and(|v| set_at(v, rest, target)),
            _ => false,
        },
        Some((PathSegment::Key(k), rest)) => match value {
            Value::Map(entries) => entries.get_mut(k).is_some_and(|v| set_at(v, rest, target)),
            _ => false,
        },
    }
}

struct RestoreRefs<'a, S: EntityStore> {
    ids: &'a StableIdTable,
    store: &'a S,
    intrinsic: &'a FxHashMap<StableId, EntityHandle>,
    unresolved: Vec<(FieldPath, StableId)>,
}

impl<S: EntityStore> ReferenceDecoder for RestoreRefs<'_, S> {
    fn decode_reference(
        &mut self,
        reference: &EntityRef,
        path: &FieldPath,
    ) -> Result<Option<EntityHandle>> {
        let resolved = self
            .ids
            .lookup(reference.id)
            .ok()
            .filter(|h| self.store.contains(*h))
            .or_else(|| self.intrinsic.get(&reference.id).copied());
        if resolved.is_none() {
            self.unresolved.push((path.clone(), reference.id));
        }
        Ok(resolved)
    }
}
