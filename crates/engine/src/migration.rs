//! Migration pipeline
//!
//! Upgrades raw records written at old schema versions to the current
//! version of their type by walking the registered chain one step at a
//! time. Every failure concerns a single record only.

use crate::registry::SchemaRegistry;
use starfire_core::{EntityRecord, EntityTypeId, Error, Result, SchemaVersion};
use tracing::debug;

/// What the pipeline did to one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationTrace {
    /// Record type
    pub type_id: EntityTypeId,
    /// Version the record was stored with
    pub from: SchemaVersion,
    /// Version after migration
    pub to: SchemaVersion,
    /// Number of steps applied
    pub steps_applied: u32,
}

impl MigrationTrace {
    /// Whether any step ran
    pub fn migrated(&self) -> bool {
        self.steps_applied > 0
    }
}

/// Bring `record` up to the current version of its type
///
/// - `UnknownType` if the type is not registered
/// - `FutureVersion` if the record is newer than the registry
/// - `MigrationGap` if the record predates the oldest loadable version
/// - `MigrationFailed` if a step returns an error or changes the record identity
pub fn migrate(
    registry: &SchemaRegistry,
    record: EntityRecord,
) -> Result<(EntityRecord, MigrationTrace)> {
    let schema = registry.describe(&record.type_id)?;
    let stored = record.version;
    let current = schema.version;

    if stored > current {
        return Err(Error::FutureVersion {
            type_id: record.type_id,
            stored,
            current,
        });
    }

    let mut trace = MigrationTrace {
        type_id: record.type_id.clone(),
        from: stored,
        to: stored,
        steps_applied: 0,
    };
    let mut record = record;

    while record.version < current {
        let from = record.version;
        let step = schema.step_from(from).ok_or_else(|| Error::MigrationGap {
            type_id: record.type_id.clone(),
            from,
            current,
        })?;

        let id = record.id;
        let type_id = record.type_id.clone();
        let mut upgraded = step.apply(record).map_err(|reason| Error::MigrationFailed {
            type_id: type_id.clone(),
            from,
            reason,
        })?;

        if upgraded.id != id || upgraded.type_id != type_id {
            return Err(Error::MigrationFailed {
                type_id,
                from,
                reason: "step changed the record identity".to_string(),
            });
        }

        upgraded.version = SchemaVersion::new(from.get() + 1);
        trace.steps_applied += 1;
        record = upgraded;
    }

    trace.to = record.version;
    if trace.migrated() {
        debug!(
            target: "starfire::migrate",
            type_id = %trace.type_id,
            stable_id = %record.id,
            from = %trace.from,
            to = %trace.to,
            steps = trace.steps_applied,
            "Record migrated"
        );
    }
    Ok((record, trace))
}
