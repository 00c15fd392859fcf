//! Save slots
//!
//! A `SlotStore` manages named containers in one directory, each stored as
//! `<root>/<slot>.sfsav`. Slot names are plain file stems: no separators,
//! no relative components.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::container::{ContainerReader, ContainerSummary};
use crate::error::{ContainerError, ContainerResult};
use crate::format::{CONTAINER_EXTENSION, TEMP_SUFFIX};
use starfire_core::Timestamp;

/// State of a slot as seen by a listing
#[derive(Debug, Clone, PartialEq)]
pub enum SlotStatus {
    /// Header, checksum and metadata read cleanly
    Valid(ContainerSummary),
    /// The slot could not be summarized
    Corrupt(String),
}

/// One entry of a slot listing
#[derive(Debug, Clone, PartialEq)]
pub struct SlotInfo {
    /// Slot name (file stem)
    pub name: String,
    /// Full path of the container
    pub path: PathBuf,
    /// File modification time, if the platform reports one
    pub modified: Option<SystemTime>,
    /// Parsed summary or the reason it failed
    pub status: SlotStatus,
}

impl SlotInfo {
    /// Summary if the slot is valid
    pub fn summary(&self) -> Option<&ContainerSummary> {
        match &self.status {
            SlotStatus::Valid(summary) => Some(summary),
            SlotStatus::Corrupt(_) => None,
        }
    }

    /// Whether the slot could be summarized
    pub fn is_valid(&self) -> bool {
        matches!(self.status, SlotStatus::Valid(_))
    }

    /// Time used to order slots: container creation time, else file mtime
    pub fn sort_time(&self) -> Timestamp {
        match &self.status {
            SlotStatus::Valid(summary) => summary.created_at,
            SlotStatus::Corrupt(_) => self
                .modified
                .and_then(|m| m.duration_since(SystemTime::UNIX_EPOCH).ok())
                .map(|d| Timestamp::from_micros(d.as_micros() as u64))
                .unwrap_or(Timestamp::EPOCH),
        }
    }
}

/// Directory of named save containers
#[derive(Debug, Clone)]
pub struct SlotStore {
    root: PathBuf,
    reader: ContainerReader,
}

impl SlotStore {
    /// Open a slot store, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>) -> ContainerResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(SlotStore {
            root,
            reader: ContainerReader::new(),
        })
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a slot's container
    pub fn slot_path(&self, name: &str) -> ContainerResult<PathBuf> {
        validate_slot_name(name)?;
        Ok(self.root.join(format!("{}.{}", name, CONTAINER_EXTENSION)))
    }

    /// Whether a slot exists
    pub fn exists(&self, name: &str) -> ContainerResult<bool> {
        Ok(self.slot_path(name)?.is_file())
    }

    /// Delete a slot
    ///
    /// Returns false if it did not exist.
    pub fn delete_slot(&self, name: &str) -> ContainerResult<bool> {
        let path = self.slot_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(target: "starfire::slots", slot = name, "Slot deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// List every slot, newest first
    ///
    /// Slots that fail to summarize are listed as `Corrupt` with the error.
    pub fn list_slots(&self) -> ContainerResult<Vec<SlotInfo>> {
        let mut slots = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(CONTAINER_EXTENSION)
            {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
            else {
                continue;
            };

            let modified = entry.metadata().and_then(|m| m.modified()).ok();
            let status = match self.reader.read_summary(&path) {
                Ok(summary) => SlotStatus::Valid(summary),
                Err(e) => {
                    warn!(target: "starfire::slots", slot = %name, error = %e, "Unreadable save slot");
                    SlotStatus::Corrupt(e.to_string())
                }
            };
            slots.push(SlotInfo {
                name,
                path,
                modified,
                status,
            });
        }

        slots.sort_by(|a, b| {
            b.sort_time()
                .cmp(&a.sort_time())
                .then_with(|| a.name.cmp(&b.name))
        });
        debug!(target: "starfire::slots", count = slots.len(), "Listed save slots");
        Ok(slots)
    }

    /// List the slots accepted by `filter`, newest first
    ///
    /// The filter sees every slot, corrupt ones included, so callers can
    /// select on status as well as on name or metadata.
    pub fn list_slots_filtered<F>(&self, mut filter: F) -> ContainerResult<Vec<SlotInfo>>
    where
        F: FnMut(&SlotInfo) -> bool,
    {
        let mut slots = self.list_slots()?;
        slots.retain(|slot| filter(slot));
        Ok(slots)
    }

    /// Whether any slot is accepted by `filter`
    pub fn any_slot<F>(&self, filter: F) -> ContainerResult<bool>
    where
        F: FnMut(&SlotInfo) -> bool,
    {
        Ok(!self.list_slots_filtered(filter)?.is_empty())
    }

    /// Most recently created valid slot
    pub fn most_recent(&self) -> ContainerResult<Option<SlotInfo>> {
        self.most_recent_matching(|_| true)
    }

    /// Least recently created valid slot
    pub fn least_recent(&self) -> ContainerResult<Option<SlotInfo>> {
        self.least_recent_matching(|_| true)
    }

    /// Most recently created valid slot accepted by `filter`
    pub fn most_recent_matching<F>(&self, mut filter: F) -> ContainerResult<Option<SlotInfo>>
    where
        F: FnMut(&SlotInfo) -> bool,
    {
        Ok(self
            .list_slots_filtered(|slot| slot.is_valid() && filter(slot))?
            .into_iter()
            .next())
    }

    /// Least recently created valid slot accepted by `filter`
    pub fn least_recent_matching<F>(&self, mut filter: F) -> ContainerResult<Option<SlotInfo>>
    where
        F: FnMut(&SlotInfo) -> bool,
    {
        Ok(self
            .list_slots_filtered(|slot| slot.is_valid() && filter(slot))?
            .into_iter()
            .last())
    }

    /// First free name of the form `<prefix>_<n>` for n in 1..=max_tries
    pub fn unused_slot_name(&self, prefix: &str, max_tries: u32) -> ContainerResult<Option<String>> {
        for n in 1..=max_tries {
            let candidate = format!("{}_{}", prefix, n);
            if !self.exists(&candidate)? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Remove temporary files left behind by interrupted saves
    pub fn cleanup_temp_files(&self) -> ContainerResult<usize> {
        let suffix = format!(".{}{}", CONTAINER_EXTENSION, TEMP_SUFFIX);
        let mut count = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(&suffix) {
                fs::remove_file(entry.path())?;
                count += 1;
            }
        }
        if count > 0 {
            info!(target: "starfire::slots", count, "Removed stale temp files");
        }
        Ok(count)
    }
}

/// Reject empty names, separators and relative components
pub fn validate_slot_name(name: &str) -> ContainerResult<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.trim() != name;
    if invalid {
        return Err(ContainerError::InvalidSlotName(name.to_string()));
    }
    Ok(())
}
