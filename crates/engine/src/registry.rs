//! Schema Registry
//!
//! Maps each entity type to its current field layout, its schema version,
//! and the chain of migration steps that upgrades older records.
//!
//! ## Lifetime
//!
//! 1. During startup, types are registered on a `SchemaRegistryBuilder`
//!    (append-only, validated on every registration)
//! 2. `freeze()` produces an immutable `SchemaRegistry` shared via `Arc`;
//!    reads take no locks
//!
//! A process-wide registry is also available:
//!
//! ```ignore
//! use starfire_engine::{register_schema, global_registry, TypeSchema};
//!
//! // Called once at initialization
//! register_schema(TypeSchema::new("door", 1).with_field("open", FieldType::Bool))?;
//!
//! // First access freezes the registry; later registrations fail
//! let registry = global_registry();
//! ```
//!
//! ## Migration chains
//!
//! A type at version N with k steps must carry steps from N-k, N-k+1, ...,
//! N-1, each upgrading exactly one version. N-k is the oldest version the
//! type can still load.

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use starfire_core::{EntityRecord, EntityTypeId, Error, FieldType, Result, SchemaVersion};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// Schema types
// =============================================================================

/// One persisted field in a type's layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name, unique within the layout
    pub name: String,
    /// Declared type
    pub ty: FieldType,
}

impl FieldDescriptor {
    /// Create a descriptor
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        FieldDescriptor {
            name: name.into(),
            ty,
        }
    }
}

/// Transform applied by a migration step
pub type MigrationFn =
    dyn Fn(EntityRecord) -> std::result::Result<EntityRecord, String> + Send + Sync;

/// Upgrade of a raw record from `from` to `from + 1`
///
/// Steps are pure whole-record transforms. The pipeline stamps the output
/// with the new version; the step only reshapes fields.
#[derive(Clone)]
pub struct MigrationStep {
    from: SchemaVersion,
    transform: Arc<MigrationFn>,
}

impl MigrationStep {
    /// Create a step upgrading records written at `from`
    pub fn new<F>(from: u32, transform: F) -> Self
    where
        F: Fn(EntityRecord) -> std::result::Result<EntityRecord, String> + Send + Sync + 'static,
    {
        MigrationStep {
            from: SchemaVersion::new(from),
            transform: Arc::new(transform),
        }
    }

    /// Source version
    pub fn source_version(&self) -> SchemaVersion {
        self.from
    }

    /// Apply the transform
    pub fn apply(&self, record: EntityRecord) -> std::result::Result<EntityRecord, String> {
        (self.transform)(record)
    }
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("from", &self.from)
            .finish()
    }
}

/// Everything the registry knows about one entity type
#[derive(Debug, Clone)]
pub struct TypeSchema {
    /// Type identifier
    pub type_id: EntityTypeId,
    /// Current schema version
    pub version: SchemaVersion,
    /// Fields in declared order
    pub fields: Vec<FieldDescriptor>,
    /// Migration steps, ordered by source version
    pub migrations: Vec<MigrationStep>,
}

impl TypeSchema {
    /// Schema with no fields and no migrations
    pub fn new(type_id: impl Into<EntityTypeId>, version: u32) -> Self {
        TypeSchema {
            type_id: type_id.into(),
            version: SchemaVersion::new(version),
            fields: Vec::new(),
            migrations: Vec::new(),
        }
    }

    /// Append a field to the layout
    pub fn with_field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push(FieldDescriptor::new(name, ty));
        self
    }

    /// Append a migration step
    pub fn with_migration(mut self, step: MigrationStep) -> Self {
        self.migrations.push(step);
        self
    }

    /// Look up a field's declared type
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Oldest version this type can still load
    pub fn oldest_loadable(&self) -> SchemaVersion {
        let steps = u32::try_from(self.migrations.len()).unwrap_or(u32::MAX);
        SchemaVersion::new(self.version.get().saturating_sub(steps))
    }

    /// The step upgrading from `version`, if any
    pub fn step_from(&self, version: SchemaVersion) -> Option<&MigrationStep> {
        let oldest = self.oldest_loadable().get();
        let index = version.get().checked_sub(oldest)? as usize;
        self.migrations.get(index).filter(|s| s.from == version)
    }

    /// Check layout and migration chain
    fn validate(&mut self) -> Result<()> {
        if self.type_id.as_str().is_empty() {
            return Err(Error::InvalidSchema {
                type_id: self.type_id.clone(),
                reason: "type id is empty".to_string(),
            });
        }

        let mut seen = FxHashSet::default();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(Error::InvalidSchema {
                    type_id: self.type_id.clone(),
                    reason: "field name is empty".to_string(),
                });
            }
            if !seen.insert(field.name.as_str()) {
                return Err(Error::InvalidSchema {
                    type_id: self.type_id.clone(),
                    reason: format!("duplicate field '{}'", field.name),
                });
            }
        }

        if self.migrations.len() > self.version.get() as usize {
            return Err(Error::InvalidSchema {
                type_id: self.type_id.clone(),
                reason: format!(
                    "{} migration steps for a type at {}",
                    self.migrations.len(),
                    self.version
                ),
            });
        }

        self.migrations.sort_by_key(|s| s.from);
        let mut expected = self.oldest_loadable();
        for step in &self.migrations {
            if step.from != expected {
                return Err(Error::MigrationGap {
                    type_id: self.type_id.clone(),
                    from: expected,
                    current: self.version,
                });
            }
            expected = SchemaVersion::new(expected.get() + 1);
        }
        Ok(())
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Append-only registry used during startup
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    types: FxHashMap<EntityTypeId, TypeSchema>,
    order: Vec<EntityTypeId>,
}

impl SchemaRegistryBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type from its parts
    pub fn register_type(
        &mut self,
        type_id: impl Into<EntityTypeId>,
        version: u32,
        fields: Vec<FieldDescriptor>,
        migrations: Vec<MigrationStep>,
    ) -> Result<()> {
        self.register(TypeSchema {
            type_id: type_id.into(),
            version: SchemaVersion::new(version),
            fields,
            migrations,
        })
    }

    /// Register a complete schema
    ///
    /// Rejects duplicates (`DuplicateSchema`), invalid layouts
    /// (`InvalidSchema`) and broken migration chains (`MigrationGap`).
    pub fn register(&mut self, mut schema: TypeSchema) -> Result<()> {
        if self.types.contains_key(&schema.type_id) {
            return Err(Error::DuplicateSchema {
                type_id: schema.type_id,
            });
        }
        schema.validate()?;

        info!(
            target: "starfire::registry",
            type_id = %schema.type_id,
            version = %schema.version,
            fields = schema.fields.len(),
            migrations = schema.migrations.len(),
            "Registered entity type"
        );
        self.order.push(schema.type_id.clone());
        self.types.insert(schema.type_id.clone(), schema);
        Ok(())
    }

    /// Whether a type is registered
    pub fn contains(&self, type_id: &EntityTypeId) -> bool {
        self.types.contains_key(type_id)
    }

    /// Produce the immutable registry
    pub fn freeze(self) -> Arc<SchemaRegistry> {
        debug!(target: "starfire::registry", types = self.order.len(), "Schema registry frozen");
        Arc::new(SchemaRegistry {
            types: self.types,
            order: self.order,
        })
    }
}

// =============================================================================
// Frozen registry
// =============================================================================

/// Immutable schema registry
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    types: FxHashMap<EntityTypeId, TypeSchema>,
    order: Vec<EntityTypeId>,
}

impl SchemaRegistry {
    /// Start building a registry
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::new()
    }

    /// Schema of a type
    pub fn describe(&self, type_id: &EntityTypeId) -> Result<&TypeSchema> {
        self.types.get(type_id).ok_or_else(|| Error::UnknownType {
            type_id: type_id.clone(),
        })
    }

    /// Whether a type is registered
    pub fn contains(&self, type_id: &EntityTypeId) -> bool {
        self.types.contains_key(type_id)
    }

    /// Current version of a type
    pub fn current_version(&self, type_id: &EntityTypeId) -> Result<SchemaVersion> {
        Ok(self.describe(type_id)?.version)
    }

    /// Registered types in registration order
    pub fn type_ids(&self) -> impl Iterator<Item = &EntityTypeId> {
        self.order.iter()
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no type is registered
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

// =============================================================================
// Process-wide registry
// =============================================================================

enum GlobalState {
    Building(SchemaRegistryBuilder),
    Frozen(Arc<SchemaRegistry>),
}

/// Process-wide registry
///
/// Uses lazy initialization with a RwLock; after the first call to
/// `global_registry()` the lock only guards a cloned `Arc`.
static GLOBAL_REGISTRY: once_cell::sync::Lazy<RwLock<GlobalState>> =
    once_cell::sync::Lazy::new(|| RwLock::new(GlobalState::Building(SchemaRegistryBuilder::new())));

/// Register a type in the process-wide registry
///
/// Must happen before the first `global_registry()` call; afterwards it
/// fails with `RegistryFrozen`.
pub fn register_schema(schema: TypeSchema) -> Result<()> {
    let mut state = GLOBAL_REGISTRY.write();
    match &mut *state {
        GlobalState::Building(builder) => builder.register(schema),
        GlobalState::Frozen(_) => Err(Error::RegistryFrozen {
            type_id: schema.type_id,
        }),
    }
}

/// The process-wide registry, frozen on first access
pub fn global_registry() -> Arc<SchemaRegistry> {
    if let GlobalState::Frozen(registry) = &*GLOBAL_REGISTRY.read() {
        return Arc::clone(registry);
    }

    let mut state = GLOBAL_REGISTRY.write();
    let builder = match std::mem::replace(
        &mut *state,
        GlobalState::Frozen(Arc::new(SchemaRegistry::default())),
    ) {
        GlobalState::Building(builder) => builder,
        // Another thread froze it between our read and write
        GlobalState::Frozen(registry) => {
            *state = GlobalState::Frozen(Arc::clone(&registry));
            return registry;
        }
    };
    let registry = builder.freeze();
    *state = GlobalState::Frozen(Arc::clone(&registry));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_step(from: u32) -> MigrationStep {
        MigrationStep::new(from, Ok)
    }

    #[test]
    fn test_register_and_describe() {
        let mut builder = SchemaRegistry::builder();
        builder
            .register(
                TypeSchema::new("npc", 2)
                    .with_field("name", FieldType::String)
                    .with_field("hp", FieldType::Int)
                    .with_migration(identity_step(0))
                    .with_migration(identity_step(1)),
            )
            .unwrap();
        let registry = builder.freeze();

        let schema = registry.describe(&"npc".into()).unwrap();
        assert_eq!(schema.version, SchemaVersion::new(2));
        assert_eq!(schema.fields.len(), 2);
        assert_eq!(schema.oldest_loadable(), SchemaVersion::INITIAL);
        assert_eq!(registry.current_version(&"npc".into()).unwrap().get(), 2);
    }

    #[test]
    fn test_unknown_type() {
        let registry = SchemaRegistry::builder().freeze();
        assert!(matches!(
            registry.describe(&"ghost".into()),
            Err(Error::UnknownType { .. })
        ));
    }

    #[test]
    fn test_duplicate_type_rejected() {
        let mut builder = SchemaRegistry::builder();
        builder.register(TypeSchema::new("door", 0)).unwrap();
        let err = builder.register(TypeSchema::new("door", 1)).unwrap_err();
        assert!(matches!(err, Error::DuplicateSchema { .. }));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut builder = SchemaRegistry::builder();
        let err = builder
            .register(
                TypeSchema::new("door", 0)
                    .with_field("open", FieldType::Bool)
                    .with_field("open", FieldType::Int),
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { reason, .. } if reason.contains("open")));
    }

    #[test]
    fn test_gap_in_chain_rejected() {
        let mut builder = SchemaRegistry::builder();
        let err = builder
            .register_type(
                "chest",
                3,
                vec![],
                vec![identity_step(0), identity_step(2)],
            )
            .unwrap_err();
        // Two steps for v3 must start at v1
        assert!(matches!(
            err,
            Error::MigrationGap { from, .. } if from == SchemaVersion::new(1)
        ));
    }

    #[test]
    fn test_chain_not_reaching_current_rejected() {
        let mut builder = SchemaRegistry::builder();
        let err = builder
            .register_type("chest", 3, vec![], vec![identity_step(1), identity_step(1)])
            .unwrap_err();
        assert!(matches!(err, Error::MigrationGap { .. }));
    }

    #[test]
    fn test_steps_sorted_on_registration() {
        let mut builder = SchemaRegistry::builder();
        builder
            .register_type(
                "chest",
                3,
                vec![],
                vec![identity_step(2), identity_step(1)],
            )
            .unwrap();
        let registry = builder.freeze();
        let schema = registry.describe(&"chest".into()).unwrap();
        assert_eq!(schema.oldest_loadable(), SchemaVersion::new(1));
        assert_eq!(schema.step_from(SchemaVersion::new(1)).unwrap().source_version().get(), 1);
        assert_eq!(schema.step_from(SchemaVersion::new(2)).unwrap().source_version().get(), 2);
        assert!(schema.step_from(SchemaVersion::new(0)).is_none());
        assert!(schema.step_from(SchemaVersion::new(3)).is_none());
    }

    #[test]
    fn test_too_many_steps_rejected() {
        let mut builder = SchemaRegistry::builder();
        let err = builder
            .register_type("chest", 0, vec![], vec![identity_step(0)])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }

    #[test]
    fn test_registration_order_preserved() {
        let mut builder = SchemaRegistry::builder();
        for name in ["c", "a", "b"] {
            builder.register(TypeSchema::new(name, 0)).unwrap();
        }
        let registry = builder.freeze();
        let names: Vec<_> = registry.type_ids().map(|t| t.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert_eq!(registry.len(), 3);
    }
}
