//! Migration Tests
//!
//! A record written at version N and migrated to M must equal the record
//! the same entity would produce when captured at M.

use starfire_core::{
    EntityRecord, Error, FieldType, FieldValue, SchemaVersion, StableId, Value,
};
use starfire_engine::{
    migrate, DynamicEntity, EntityArena, EntityStore, MigrationStep, Persistence,
    PersistenceConfig, RestoreOptions, SchemaRegistry, TypeSchema,
};
use std::sync::Arc;
use tempfile::TempDir;

fn v1() -> TypeSchema {
    TypeSchema::new("npc", 1)
        .with_field("name", FieldType::String)
        .with_field("hp", FieldType::Int)
}

/// v1 -> v2 renames hp to health, v2 -> v3 adds mana and splits name
fn v3() -> TypeSchema {
    TypeSchema::new("npc", 3)
        .with_field("first_name", FieldType::String)
        .with_field("title", FieldType::optional(FieldType::String))
        .with_field("health", FieldType::Int)
        .with_field("mana", FieldType::Int)
        .with_migration(MigrationStep::new(1, |mut record| {
            if !record.rename("hp", "health") {
                return Err("missing hp".to_string());
            }
            Ok(record)
        }))
        .with_migration(MigrationStep::new(2, |mut record| {
            let name = record
                .remove("name")
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or_else(|| "missing name".to_string())?;
            let (title, first) = match name.split_once(' ') {
                Some((title, first)) => (FieldValue::from(title), first.to_string()),
                None => (FieldValue::Null, name),
            };
            let mut out = EntityRecord::new(record.id, record.type_id.clone(), record.version)
                .with_field("first_name", FieldValue::from(first))
                .with_field("title", title);
            for (field, value) in record.fields {
                out.insert(field, value);
            }
            out.insert("mana", FieldValue::Int(10));
            Ok(out)
        }))
}

fn registry(schema: TypeSchema) -> Arc<SchemaRegistry> {
    let mut builder = SchemaRegistry::builder();
    builder.register(schema).unwrap();
    builder.freeze()
}

fn fields_of(record: &EntityRecord) -> Vec<(String, FieldValue)> {
    let mut fields = record.fields.clone();
    fields.sort_by(|a, b| a.0.cmp(&b.0));
    fields
}

#[test]
fn test_migrated_equals_captured_at_current() {
    // Written by an old build
    let old = Persistence::new(registry(v1()), PersistenceConfig::for_testing()).unwrap();
    let mut old_world = EntityArena::new();
    old_world.insert(
        DynamicEntity::new("npc")
            .with("name", "Sir Galahad".to_string())
            .with("hp", 75i64),
    );
    let container = old.capture_all(&old_world).unwrap();
    assert_eq!(container.records[0].version, SchemaVersion::new(1));

    // Loaded by the current build
    let current = Persistence::new(registry(v3()), PersistenceConfig::for_testing()).unwrap();
    let mut loaded = EntityArena::new();
    let report = current
        .restore_all(&container, &mut loaded, &RestoreOptions::strict())
        .unwrap();
    assert_eq!(report.migrations.len(), 1);
    assert_eq!(report.migrations[0].steps_applied, 2);
    assert_eq!(report.migrations[0].to, SchemaVersion::new(3));
    let migrated = current.capture_all(&loaded).unwrap();

    // The same entity authored directly at v3
    let mut fresh_world = EntityArena::new();
    fresh_world.insert(
        DynamicEntity::new("npc")
            .with("first_name", "Galahad".to_string())
            .with("title", Some("Sir".to_string()))
            .with("health", 75i64)
            .with("mana", 10i64),
    );
    let captured = Persistence::new(registry(v3()), PersistenceConfig::for_testing())
        .unwrap()
        .capture_all(&fresh_world)
        .unwrap();

    assert_eq!(migrated.records[0].version, captured.records[0].version);
    assert_eq!(fields_of(&migrated.records[0]), fields_of(&captured.records[0]));
}

#[test]
fn test_migration_survives_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("old.sfsav");

    let old = Persistence::new(registry(v1()), PersistenceConfig::for_testing()).unwrap();
    let mut old_world = EntityArena::new();
    old_world.insert(
        DynamicEntity::new("npc")
            .with("name", "Merlin".to_string())
            .with("hp", 30i64),
    );
    old.save(&old_world, &path).unwrap();

    let current = Persistence::new(registry(v3()), PersistenceConfig::for_testing()).unwrap();
    let mut loaded = EntityArena::new();
    current
        .load(&path, &mut loaded, &RestoreOptions::strict())
        .unwrap();

    let (_, npc) = loaded.iter().next().unwrap();
    assert_eq!(npc.get::<String>("first_name").unwrap(), "Merlin");
    assert_eq!(npc.get::<Option<String>>("title").unwrap(), None);
    assert_eq!(npc.get::<i64>("health").unwrap(), 30);
    assert_eq!(npc.get::<i64>("mana").unwrap(), 10);
    assert_eq!(npc.value("hp"), None);
}

#[test]
fn test_each_step_runs_once_in_order() {
    let registry = registry(v3());
    let record = EntityRecord::new(StableId::new(), "npc".into(), SchemaVersion::new(2))
        .with_field("name", FieldValue::from("Tim"))
        .with_field("health", FieldValue::Int(5));

    let (migrated, trace) = migrate(&registry, record).unwrap();
    assert_eq!(trace.from, SchemaVersion::new(2));
    assert_eq!(trace.steps_applied, 1);
    assert_eq!(migrated.version, SchemaVersion::new(3));
    assert_eq!(migrated.get("mana"), Some(&FieldValue::Int(10)));
}

#[test]
fn test_future_version_rejected() {
    let registry = registry(v1());
    let record = EntityRecord::new(StableId::new(), "npc".into(), SchemaVersion::new(3));
    let err = migrate(&registry, record).unwrap_err();
    assert!(matches!(err, Error::FutureVersion { .. }));
}

#[test]
fn test_version_older_than_chain_is_gap() {
    let registry = registry(v3());
    let record = EntityRecord::new(StableId::new(), "npc".into(), SchemaVersion::new(0));
    let err = migrate(&registry, record).unwrap_err();
    assert!(matches!(err, Error::MigrationGap { .. }));
}

#[test]
fn test_failing_step_skips_only_that_record() {
    let registry = registry(v3());
    let p = Persistence::new(registry, PersistenceConfig::best_effort().with_sync_directory(false))
        .unwrap();

    let broken = EntityRecord::new(StableId::new(), "npc".into(), SchemaVersion::new(1))
        .with_field("name", FieldValue::from("No Hp"));
    let good = EntityRecord::new(StableId::new(), "npc".into(), SchemaVersion::new(1))
        .with_field("name", FieldValue::from("Has Hp"))
        .with_field("hp", FieldValue::Int(1));
    let container = starfire_durability::Container::new(vec![broken.clone(), good]);

    let mut world = EntityArena::new();
    let report = p
        .restore_all(&container, &mut world, &RestoreOptions::best_effort())
        .unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].id, broken.id);
    assert!(matches!(
        report.failures[0].error,
        Error::MigrationFailed { .. }
    ));
    assert_eq!(world.len(), 1);
    let handle = world.handles()[0];
    assert_eq!(
        world.get(handle).unwrap().value("title"),
        Some(&Value::from("Has"))
    );
}

#[test]
fn test_broken_chain_rejected_at_registration() {
    let mut builder = SchemaRegistry::builder();
    let err = builder
        .register(
            TypeSchema::new("npc", 3)
                .with_migration(MigrationStep::new(0, Ok))
                .with_migration(MigrationStep::new(2, Ok)),
        )
        .unwrap_err();
    assert!(matches!(err, Error::MigrationGap { .. }));
}
