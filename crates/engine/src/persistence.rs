//! Save/Load Orchestrator
//!
//! `Persistence` ties the pieces together:
//!
//! ```text
//! save: capture -> Container -> validate references -> write (tmp + fsync + rename)
//! load: read -> verify checksum -> migrate -> restore -> fix-ups -> post_restore
//! ```
//!
//! It owns the stable-id table for the lifetime of the session, so ids
//! assigned by one save are reused by the next and by every load. Handles
//! are cheap to clone; clones share the table and the operation guards.
//!
//! # Example
//!
//! ```ignore
//! let persistence = Persistence::new(registry, PersistenceConfig::default())?;
//! persistence.save(&world, Path::new("saves/slot1.sfsav"))?;
//!
//! let mut fresh = EntityArena::new();
//! let report = persistence.load(Path::new("saves/slot1.sfsav"), &mut fresh, &RestoreOptions::strict())?;
//! assert!(report.is_clean());
//! ```

use crate::background::BackgroundTask;
use crate::capture::capture_store;
use crate::config::PersistenceConfig;
use crate::entity::EntityStore;
use crate::guard::{OperationGuards, OperationKind};
use crate::id_table::StableIdTable;
use crate::registry::{global_registry, SchemaRegistry};
use crate::restore::{restore_records, RestoreOptions, RestoreReport};
use parking_lot::{Mutex, MutexGuard};
use starfire_core::{EntityHandle, Error, Limits, Result, StableId};
use starfire_durability::{
    get_codec, Container, ContainerError, ContainerReader, ContainerWriter, SaveInfo, SlotStore,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Entry point for saving and loading a collection
#[derive(Debug, Clone)]
pub struct Persistence {
    config: Arc<PersistenceConfig>,
    registry: Arc<SchemaRegistry>,
    ids: Arc<Mutex<StableIdTable>>,
    guards: Arc<OperationGuards>,
}

impl Persistence {
    /// Create an orchestrator over a frozen registry
    pub fn new(registry: Arc<SchemaRegistry>, config: PersistenceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Persistence {
            config: Arc::new(config),
            registry,
            ids: Arc::new(Mutex::new(StableIdTable::new())),
            guards: Arc::new(OperationGuards::new()),
        })
    }

    /// Create an orchestrator over the process-wide registry
    ///
    /// Freezes the global registry if it was still open.
    pub fn with_global_registry(config: PersistenceConfig) -> Result<Self> {
        Self::new(global_registry(), config)
    }

    /// Active configuration
    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Registry used for capture and restore
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Lock the stable-id table
    pub fn ids(&self) -> MutexGuard<'_, StableIdTable> {
        self.ids.lock()
    }

    /// Stable id of a live entity, if it has been captured or restored
    ///
    /// Handles refer to the store most recently captured, restored or
    /// destroyed from.
    pub fn stable_id_of(&self, handle: EntityHandle) -> Option<StableId> {
        self.ids.lock().id_of(handle)
    }

    // =========================================================================
    // Capture / restore
    // =========================================================================

    /// Capture the collection into a container
    ///
    /// Roots are restricted to `persist_types` when configured. The
    /// container carries the configured metadata and every tombstoned id,
    /// and its references are validated before it is returned.
    pub fn capture_all<S: EntityStore>(&self, store: &S) -> Result<Container> {
        let limits = Limits {
            max_capture_depth: self.config.max_capture_depth,
            ..Limits::default()
        };
        let (records, destroyed) = {
            let mut ids = self.ids.lock();
            let records = capture_store(
                &self.registry,
                &mut ids,
                store,
                self.config.persist_types.as_deref(),
                limits,
            )?;
            (records, ids.destroyed())
        };

        let container = Container::new(records)
            .with_metadata(self.config.metadata.clone())
            .with_destroyed(destroyed);
        container.validate_references()?;
        info!(target: "starfire::persistence", entities = container.len(), destroyed = container.destroyed.len(), "Captured collection");
        Ok(container)
    }

    /// Apply a container onto the collection
    pub fn restore_all<S: EntityStore>(
        &self,
        container: &Container,
        store: &mut S,
        options: &RestoreOptions,
    ) -> Result<RestoreReport> {
        let mut ids = self.ids.lock();
        restore_records(
            &self.registry,
            &mut ids,
            &container.records,
            &container.destroyed,
            store,
            options,
        )
    }

    /// Restore options built from the configured load mode and creation policy
    pub fn restore_options(&self) -> RestoreOptions {
        RestoreOptions::from_config(&self.config)
    }

    /// Apply a container using the configured load mode and creation policy
    pub fn restore_all_configured<S: EntityStore>(
        &self,
        container: &Container,
        store: &mut S,
    ) -> Result<RestoreReport> {
        self.restore_all(container, store, &self.restore_options())
    }

    // =========================================================================
    // Storage
    // =========================================================================

    /// Write a container atomically
    ///
    /// Fails with `OperationInProgress` if another save targets `dest`.
    pub fn save_to_storage(&self, container: &Container, dest: &Path) -> Result<SaveInfo> {
        let _guard = self.guards.acquire(dest, OperationKind::Save)?;
        self.write_container(container, dest)
    }

    /// Read and verify a container
    ///
    /// The checksum is verified before any record is parsed. Fails with
    /// `OperationInProgress` if another load reads `src`.
    pub fn load_from_storage(&self, src: &Path) -> Result<Container> {
        let _guard = self.guards.acquire(src, OperationKind::Load)?;
        Ok(ContainerReader::new().load(src)?)
    }

    /// Capture the collection and write it to `dest`
    pub fn save<S: EntityStore>(&self, store: &S, dest: &Path) -> Result<SaveInfo> {
        let _guard = self.guards.acquire(dest, OperationKind::Save)?;
        info!(target: "starfire::persistence", path = %dest.display(), "Save started");
        let container = self.capture_all(store)?;
        self.write_container(&container, dest)
    }

    /// Read `src` and restore it onto the collection
    ///
    /// A corrupt or unreadable file fails before the collection is touched.
    pub fn load<S: EntityStore>(
        &self,
        src: &Path,
        store: &mut S,
        options: &RestoreOptions,
    ) -> Result<RestoreReport> {
        let _guard = self.guards.acquire(src, OperationKind::Load)?;
        info!(target: "starfire::persistence", path = %src.display(), "Load started");
        let container = ContainerReader::new().load(src)?;
        self.restore_all(&container, store, options)
    }

    /// Read `src` and restore it with the configured load mode and policy
    pub fn load_configured<S: EntityStore>(
        &self,
        src: &Path,
        store: &mut S,
    ) -> Result<RestoreReport> {
        self.load(src, store, &self.restore_options())
    }

    /// Capture now and write on a worker thread
    ///
    /// The save guard is taken before returning, so a second save of the
    /// same target fails immediately while this one runs.
    pub fn save_in_background<S: EntityStore>(
        &self,
        store: &S,
        dest: impl Into<PathBuf>,
    ) -> Result<BackgroundTask<SaveInfo>> {
        let dest = dest.into();
        let guard = self.guards.acquire(&dest, OperationKind::Save)?;
        let container = self.capture_all(store)?;
        let this = self.clone();
        BackgroundTask::spawn("save", move || {
            let _guard = guard;
            this.write_container(&container, &dest)
        })
    }

    /// Read and verify a container on a worker thread
    ///
    /// The result is restored with `restore_all` on the thread that owns
    /// the collection.
    pub fn load_in_background(&self, src: impl Into<PathBuf>) -> Result<BackgroundTask<Container>> {
        let src = src.into();
        let guard = self.guards.acquire(&src, OperationKind::Load)?;
        BackgroundTask::spawn("load", move || {
            let _guard = guard;
            Ok(ContainerReader::new().load(&src)?)
        })
    }

    fn write_container(&self, container: &Container, dest: &Path) -> Result<SaveInfo> {
        let codec = get_codec(&self.config.codec).map_err(ContainerError::from)?;
        let writer = ContainerWriter::new(codec).with_sync_directory(self.config.sync_directory);
        Ok(writer.write(container, dest)?)
    }

    // =========================================================================
    // Destruction
    // =========================================================================

    /// Despawn an entity and tombstone its id
    ///
    /// The id is written to the destroyed-entities section of later saves,
    /// so loading those saves removes the entity even if it is level-placed.
    pub fn destroy<S: EntityStore>(&self, store: &mut S, handle: EntityHandle) -> Option<StableId> {
        let id = {
            let mut ids = self.ids.lock();
            ids.attach(store.store_id());
            ids.mark_destroyed(handle)
        };
        store.despawn(handle);
        id
    }

    /// Release tombstoned ids that no record of `container` references
    pub fn collect_garbage(&self, container: &Container) -> Vec<StableId> {
        let mut referenced = HashSet::new();
        for record in &container.records {
            for (_, reference) in record.references() {
                referenced.insert(reference.id);
            }
        }
        self.ids.lock().collect_garbage(&referenced)
    }

    // =========================================================================
    // Slots
    // =========================================================================

    /// Slot store over the configured save directory
    pub fn slots(&self) -> Result<SlotStore> {
        let dir = self
            .config
            .save_dir
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("save_dir is not configured".to_string()))?;
        Ok(SlotStore::open(dir)?)
    }

    /// Save into a named slot
    pub fn save_slot<S: EntityStore>(&self, store: &S, slot: &str) -> Result<SaveInfo> {
        let path = self.slots()?.slot_path(slot)?;
        self.save(store, &path)
    }

    /// Load a named slot
    pub fn load_slot<S: EntityStore>(
        &self,
        slot: &str,
        store: &mut S,
        options: &RestoreOptions,
    ) -> Result<RestoreReport> {
        let path = self.slots()?.slot_path(slot)?;
        self.load(&path, store, options)
    }

    /// Load a named slot with the configured load mode and policy
    pub fn load_slot_configured<S: EntityStore>(
        &self,
        slot: &str,
        store: &mut S,
    ) -> Result<RestoreReport> {
        self.load_slot(slot, store, &self.restore_options())
    }
}
