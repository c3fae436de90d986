//! Container lifecycle manager.
//!
//! Owns every container the orchestrator starts. All mutating operations on a
//! given container name (`ensure_removed`, `start`, `stop`) are serialized
//! through a per-name async mutex, so concurrent stages that share a logical
//! service never race on removal and creation. Readiness polling takes no lock.

use super::{ContainerHandle, ContainerRuntime, ContainerSpec, ContainerState, ReadinessProbe};
use crate::errors::ContainerError;
use crate::events::{types, EventSink, NoOpEventSink};
use dashmap::DashMap;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default grace period before a stopped container is killed.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// Default interval between readiness probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Result of [`ContainerLifecycleManager::ensure_removed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// A container with the name existed and was removed.
    Removed,
    /// Nothing to remove.
    NotPresent,
}

/// Starts, probes and tears down service containers.
pub struct ContainerLifecycleManager {
    runtime: Arc<dyn ContainerRuntime>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    active: DashMap<String, ContainerHandle>,
    events: Arc<dyn EventSink>,
    stop_grace: Duration,
    poll_interval: Duration,
}

impl fmt::Debug for ContainerLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerLifecycleManager")
            .field("runtime", &self.runtime)
            .field("active", &self.active.len())
            .field("stop_grace", &self.stop_grace)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl ContainerLifecycleManager {
    /// Creates a manager over `runtime`.
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            locks: DashMap::new(),
            active: DashMap::new(),
            events: Arc::new(NoOpEventSink),
            stop_grace: DEFAULT_STOP_GRACE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the stop grace period.
    #[must_use]
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Sets the readiness poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Returns the underlying runtime.
    #[must_use]
    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks.entry(name.to_string()).or_default().clone()
    }

    /// Removes any container with this name, running or not.
    ///
    /// Absence is not an error: the call is idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Runtime`] if the engine refuses the removal.
    pub async fn ensure_removed(&self, name: &str) -> Result<RemovalOutcome, ContainerError> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;
        self.remove_locked(name).await
    }

    async fn remove_locked(&self, name: &str) -> Result<RemovalOutcome, ContainerError> {
        let existed = self.runtime.remove(name, true).await?;
        self.active.remove(name);
        if existed {
            info!(container = %name, "removed existing container");
            self.events
                .try_emit(types::CONTAINER_REMOVED, Some(json!({ "container": name })));
            Ok(RemovalOutcome::Removed)
        } else {
            debug!(container = %name, "no existing container to remove");
            Ok(RemovalOutcome::NotPresent)
        }
    }

    /// Starts a container, first removing any stale container with the same name.
    ///
    /// Removal and creation happen under the same per-name lock.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Start`] if the engine cannot create or start
    /// the container (missing image, port already bound, bad mount).
    pub async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, ContainerError> {
        let lock = self.lock_for(&spec.name);
        let _guard = lock.lock().await;

        self.remove_locked(&spec.name).await?;
        let id = self.runtime.create_and_start(spec).await?;
        let handle = ContainerHandle::running(id, spec);

        info!(
            container = %spec.name,
            image = %spec.image,
            ports = ?spec.ports.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "container started"
        );
        self.events.try_emit(
            types::CONTAINER_STARTED,
            Some(json!({
                "container": spec.name,
                "id": handle.id(),
                "image": spec.image,
            })),
        );
        self.active.insert(spec.name.clone(), handle.clone());
        Ok(handle)
    }

    /// Polls `probe` until the container is ready or `timeout` expires.
    ///
    /// # Errors
    ///
    /// - [`ContainerError::Timeout`] when the deadline passes first.
    /// - [`ContainerError::ExitedEarly`] when the container stops running.
    /// - Any error the probe reports as permanent.
    pub async fn wait_healthy(
        &self,
        handle: &ContainerHandle,
        probe: &ReadinessProbe,
        timeout: Duration,
    ) -> Result<(), ContainerError> {
        let name = handle.name();
        let poll = async {
            loop {
                if !probe.is_trivial() && !self.runtime.is_running(name).await? {
                    return Err(ContainerError::ExitedEarly {
                        name: name.to_string(),
                    });
                }
                if probe.check(self.runtime.as_ref(), handle).await? {
                    return Ok(());
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(Ok(())) => {
                info!(container = %name, "container ready");
                self.events
                    .try_emit(types::CONTAINER_HEALTHY, Some(json!({ "container": name })));
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(container = %name, timeout_secs = timeout.as_secs_f64(), "container not ready in time");
                Err(ContainerError::Timeout {
                    name: name.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Waits for the container to exit and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError`] if the engine cannot report an exit status.
    pub async fn wait_exit(&self, handle: &ContainerHandle) -> Result<i64, ContainerError> {
        self.runtime.wait(handle.name()).await
    }

    /// Stops and removes a container.
    ///
    /// Never fails: engine errors are logged and teardown continues. Returns
    /// the last known handle with its final state, if the manager owned one.
    pub async fn stop(&self, name: &str) -> Option<ContainerHandle> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        match self.runtime.stop(name, self.stop_grace).await {
            Ok(()) | Err(ContainerError::NotFound(_)) => {}
            Err(e) => warn!(container = %name, error = %e, "failed to stop container"),
        }
        let state = match self.runtime.remove(name, true).await {
            Ok(_) => ContainerState::Removed,
            Err(e) => {
                warn!(container = %name, error = %e, "failed to remove container");
                ContainerState::Stopped
            }
        };

        info!(container = %name, %state, "container torn down");
        self.events.try_emit(
            types::CONTAINER_STOPPED,
            Some(json!({ "container": name, "state": state.to_string() })),
        );
        self.active
            .remove(name)
            .map(|(_, handle)| handle.with_state(state))
    }

    /// Stops every container still owned by the manager.
    pub async fn teardown_all(&self) {
        let names: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        if names.is_empty() {
            return;
        }
        info!(count = names.len(), "tearing down remaining containers");
        futures::future::join_all(names.iter().map(|name| self.stop(name))).await;
    }

    /// Returns the containers currently owned by the manager, by name.
    #[must_use]
    pub fn active_containers(&self) -> Vec<ContainerHandle> {
        let mut handles: Vec<_> = self.active.iter().map(|e| e.value().clone()).collect();
        handles.sort_by(|a, b| a.name().cmp(b.name()));
        handles
    }
}
