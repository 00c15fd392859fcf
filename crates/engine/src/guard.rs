//! Operation guards and cancellation
//!
//! At most one save and one load may be in flight per target path. A
//! second request of the same kind fails with `OperationInProgress` and
//! leaves the first operation alone. Guards release on drop, so error paths
//! and panics unwind cleanly.

use parking_lot::Mutex;
use starfire_core::{Error, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Kind of storage operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Writing a container
    Save,
    /// Reading and restoring a container
    Load,
}

impl OperationKind {
    /// Name used in errors and logs
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Save => "save",
            OperationKind::Load => "load",
        }
    }
}

/// Registry of in-flight operations
#[derive(Debug, Default)]
pub struct OperationGuards {
    active: Mutex<HashSet<(PathBuf, OperationKind)>>,
}

impl OperationGuards {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `target` for an operation of `kind`
    pub fn acquire(self: &Arc<Self>, target: &Path, kind: OperationKind) -> Result<OperationGuard> {
        let key = (target.to_path_buf(), kind);
        if !self.active.lock().insert(key.clone()) {
            return Err(Error::OperationInProgress {
                operation: kind.as_str(),
                target: key.0,
            });
        }
        debug!(target: "starfire::persistence", operation = kind.as_str(), path = %target.display(), "Operation started");
        Ok(OperationGuard {
            guards: Arc::clone(self),
            key,
        })
    }

    /// Whether an operation of `kind` is running on `target`
    pub fn is_active(&self, target: &Path, kind: OperationKind) -> bool {
        self.active.lock().contains(&(target.to_path_buf(), kind))
    }

    /// Number of in-flight operations
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

/// Claim on a target, released on drop
#[derive(Debug)]
pub struct OperationGuard {
    guards: Arc<OperationGuards>,
    key: (PathBuf, OperationKind),
}

impl OperationGuard {
    /// Guarded path
    pub fn target(&self) -> &Path {
        &self.key.0
    }

    /// Guarded operation kind
    pub fn kind(&self) -> OperationKind {
        self.key.1
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.guards.active.lock().remove(&self.key);
        debug!(target: "starfire::persistence", operation = self.key.1.as_str(), path = %self.key.0.display(), "Operation finished");
    }
}

/// Cooperative cancellation flag shared between a caller and an operation
///
/// The restorer checks it between records. Work already applied is kept.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
