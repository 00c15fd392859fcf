//! Process-Wide Registry Tests
//!
//! Kept in their own test binary: the global registry freezes once per
//! process.

use starfire_core::{Error, FieldType};
use starfire_engine::{
    global_registry, register_schema, DynamicEntity, EntityArena, Persistence,
    PersistenceConfig, TypeSchema,
};

#[test]
fn test_global_registry_lifecycle() {
    register_schema(TypeSchema::new("lamp", 1).with_field("lit", FieldType::Bool)).unwrap();
    assert!(matches!(
        register_schema(TypeSchema::new("lamp", 2)),
        Err(Error::DuplicateSchema { .. })
    ));

    let registry = global_registry();
    assert!(registry.contains(&"lamp".into()));
    assert_eq!(registry.len(), 1);

    let err = register_schema(TypeSchema::new("torch", 1)).unwrap_err();
    assert!(matches!(err, Error::RegistryFrozen { .. }));
    assert!(!global_registry().contains(&"torch".into()));

    let p = Persistence::with_global_registry(PersistenceConfig::for_testing()).unwrap();
    let mut arena = EntityArena::new();
    arena.insert(DynamicEntity::new("lamp").with("lit", true));
    assert_eq!(p.capture_all(&arena).unwrap().len(), 1);
}
