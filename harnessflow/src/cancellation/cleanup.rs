//! LIFO registry of async cleanup callbacks.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Type alias for async cleanup callbacks.
pub type CleanupCallback = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Outcome of [`CleanupRegistry::run_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    /// Callbacks that finished, in execution order.
    pub completed: Vec<String>,
    /// Callbacks that timed out, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Cleanup callbacks that run when a pipeline run ends.
///
/// Callbacks run in LIFO order, so resources are released in the reverse of
/// acquisition. Deploy stages whose containers outlive the stage register
/// their teardown here.
#[derive(Default)]
pub struct CleanupRegistry {
    callbacks: Mutex<Vec<(String, CleanupCallback)>>,
}

impl CleanupRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cleanup callback.
    pub fn register<F, Fut>(&self, name: impl Into<String>, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!(cleanup = %name, "registered cleanup");
        let boxed: CleanupCallback = Box::new(move || Box::pin(callback()));
        self.callbacks.lock().push((name, boxed));
    }

    /// Returns the number of pending callbacks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Runs and drains all callbacks in LIFO order.
    ///
    /// Each callback is bounded by `per_callback`; one that times out is
    /// recorded as failed and the rest still run.
    pub async fn run_all(&self, per_callback: Duration) -> CleanupSummary {
        let callbacks: Vec<_> = std::mem::take(&mut *self.callbacks.lock());
        let mut summary = CleanupSummary::default();

        for (name, callback) in callbacks.into_iter().rev() {
            match timeout(per_callback, callback()).await {
                Ok(()) => summary.completed.push(name),
                Err(_) => {
                    warn!(cleanup = %name, timeout_secs = per_callback.as_secs_f64(), "cleanup timed out");
                    summary.failed.push((name, "Timeout".to_string()));
                }
            }
        }
        summary
    }
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("pending_count", &self.pending_count())
            .finish()
    }
}
