//! Background save and load tasks
//!
//! Storage I/O can run on a dedicated worker thread while the caller keeps
//! going. Capture happens on the caller's thread before the task starts, so
//! the worker never sees the live collection.

use starfire_core::{Error, Result};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use tracing::error;

static TASK_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Handle to an operation running on a worker thread
#[derive(Debug)]
pub struct BackgroundTask<T> {
    name: String,
    handle: JoinHandle<Result<T>>,
}

impl<T: Send + 'static> BackgroundTask<T> {
    /// Run `work` on a new thread named `starfire-<kind>-<n>`
    pub fn spawn<F>(kind: &str, work: F) -> Result<Self>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let name = format!(
            "starfire-{}-{}",
            kind,
            TASK_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        );
        let handle = std::thread::Builder::new().name(name.clone()).spawn(work)?;
        Ok(BackgroundTask { name, handle })
    }
}

impl<T> BackgroundTask<T> {
    /// Worker thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the worker has finished
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the result
    ///
    /// A panic on the worker surfaces as an I/O error.
    pub fn join(self) -> Result<T> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => {
                error!(target: "starfire::persistence", task = %self.name, "Background task panicked");
                Err(Error::Io(io::Error::new(
                    io::ErrorKind::Other,
                    format!("background task {} panicked", self.name),
                )))
            }
        }
    }
}
