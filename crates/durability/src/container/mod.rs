//! In-memory container and its file I/O
//!
//! A `Container` is the unit a save produces and a load consumes: an
//! ordered list of records plus metadata and the ids of destroyed entities.
//! `ContainerWriter` writes one crash-safely; `ContainerReader` verifies
//! the checksum before parsing anything.

mod reader;
mod writer;

pub use reader::{ContainerReader, ContainerSummary};
pub use writer::{temp_path_for, ContainerWriter, SaveInfo};

use crate::error::{ContainerError, ContainerResult};
use crate::format::{ContainerMetadata, CONTAINER_FORMAT_VERSION};
use serde::{Deserialize, Serialize};
use starfire_core::{EntityRecord, Error, FieldPath, FieldValue, StableId, Timestamp};
use std::collections::HashSet;

/// A complete save: records, metadata and destroyed ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// Container format version
    pub format_version: u16,
    /// Creation time
    pub created_at: Timestamp,
    /// Captured records, in capture order
    pub records: Vec<EntityRecord>,
    /// Descriptive metadata
    pub metadata: ContainerMetadata,
    /// Ids of entities destroyed before the save
    pub destroyed: Vec<StableId>,
}

impl Container {
    /// Assemble a container created now
    pub fn new(records: Vec<EntityRecord>) -> Self {
        Container {
            format_version: CONTAINER_FORMAT_VERSION,
            created_at: Timestamp::now(),
            records,
            metadata: ContainerMetadata::default(),
            destroyed: Vec::new(),
        }
    }

    /// Attach metadata
    pub fn with_metadata(mut self, metadata: ContainerMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach the destroyed-entity list
    pub fn with_destroyed(mut self, destroyed: Vec<StableId>) -> Self {
        self.destroyed = destroyed;
        self
    }

    /// Override the creation time
    pub fn with_created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = created_at;
        self
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the container has no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Find a record by id
    pub fn find(&self, id: StableId) -> Option<&EntityRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Ids of every record
    pub fn ids(&self) -> HashSet<StableId> {
        self.records.iter().map(|r| r.id).collect()
    }

    /// Check that every internal reference targets a record in this container
    ///
    /// References marked external are exempt. Returns the first violation
    /// as `DanglingReference`.
    pub fn validate_references(&self) -> starfire_core::Result<()> {
        let ids = self.ids();
        for record in &self.records {
            for (name, value) in &record.fields {
                check_references(value, &FieldPath::field(name.as_str()), &ids, record.id)?;
            }
        }
        Ok(())
    }

    /// Pretty JSON dump for debugging
    pub fn to_json_pretty(&self) -> ContainerResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ContainerError::Payload(e.to_string()))
    }
}

fn check_references(
    value: &FieldValue,
    path: &FieldPath,
    ids: &HashSet<StableId>,
    owner: StableId,
) -> starfire_core::Result<()> {
    match value {
        FieldValue::Reference(r) if !r.external && !ids.contains(&r.id) => {
            Err(Error::DanglingReference {
                owner,
                path: path.to_string(),
                target: r.id,
            })
        }
        FieldValue::List(items) => {
            for (i, item) in items.iter().enumerate() {
                check_references(item, &path.index(i), ids, owner)?;
            }
            Ok(())
        }
        FieldValue::Map(entries) => {
            for (key, item) in entries {
                check_references(item, &path.key(key.as_str()), ids, owner)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
