//! In-memory container runtime for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::container::{ContainerRuntime, ContainerSpec};
use crate::errors::ContainerError;

/// Exit code reported for containers that were stopped rather than exiting.
pub const KILLED_EXIT_CODE: i64 = 137;

#[derive(Debug, Clone)]
struct MockContainer {
    image: String,
    running: bool,
    host_ports: Vec<u16>,
    exit_code: Option<i64>,
}

#[derive(Debug, Default)]
struct MockState {
    containers: HashMap<String, MockContainer>,
    operations: Vec<String>,
    in_flight: HashMap<String, usize>,
    max_overlap: HashMap<String, usize>,
}

/// A container runtime that keeps containers in memory.
///
/// Behaves like an engine with a single name namespace: creating a name that
/// exists fails, host ports can only be bound once, and removal of a missing
/// container reports `false`. Failure modes are configured up front.
#[derive(Debug, Default)]
pub struct MockContainerRuntime {
    state: Mutex<MockState>,
    missing_images: HashSet<String>,
    exit_codes: HashMap<String, i64>,
    failing_stop: HashSet<String>,
    unreachable: bool,
    op_delay: Duration,
    next_id: AtomicU64,
}

impl MockContainerRuntime {
    /// Creates an empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populates a running container, as if left over from an earlier run.
    #[must_use]
    pub fn with_existing(self, name: impl Into<String>, image: impl Into<String>) -> Self {
        self.state.lock().containers.insert(
            name.into(),
            MockContainer {
                image: image.into(),
                running: true,
                host_ports: Vec::new(),
                exit_code: None,
            },
        );
        self
    }

    /// Makes creation fail for `image`.
    #[must_use]
    pub fn with_missing_image(mut self, image: impl Into<String>) -> Self {
        self.missing_images.insert(image.into());
        self
    }

    /// Makes the named container exit immediately with `code` once started.
    #[must_use]
    pub fn with_exit_code(mut self, name: impl Into<String>, code: i64) -> Self {
        self.exit_codes.insert(name.into(), code);
        self
    }

    /// Makes `stop` fail for the named container.
    #[must_use]
    pub fn with_failing_stop(mut self, name: impl Into<String>) -> Self {
        self.failing_stop.insert(name.into());
        self
    }

    /// Delays every mutating operation, widening race windows.
    #[must_use]
    pub fn with_op_delay(mut self, delay: Duration) -> Self {
        self.op_delay = delay;
        self
    }

    /// Makes the engine unreachable: `ping` fails.
    #[must_use]
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Returns true if a container with this name exists.
    #[must_use]
    pub fn is_present(&self, name: &str) -> bool {
        self.state.lock().containers.contains_key(name)
    }

    /// Returns true if the named container exists and is running.
    #[must_use]
    pub fn is_running_now(&self, name: &str) -> bool {
        self.state.lock().containers.get(name).is_some_and(|c| c.running)
    }

    /// Returns the image of the named container.
    #[must_use]
    pub fn image_of(&self, name: &str) -> Option<String> {
        self.state.lock().containers.get(name).map(|c| c.image.clone())
    }

    /// Returns the names of running containers, sorted.
    #[must_use]
    pub fn running_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .state
            .lock()
            .containers
            .iter()
            .filter(|(_, c)| c.running)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// Returns the mutating operations performed, as `op:name`.
    #[must_use]
    pub fn operations(&self) -> Vec<String> {
        self.state.lock().operations.clone()
    }

    /// Returns the largest number of mutating operations that overlapped on `name`.
    #[must_use]
    pub fn max_overlap(&self, name: &str) -> usize {
        self.state.lock().max_overlap.get(name).copied().unwrap_or(0)
    }

    async fn mutate<T>(&self, op: &str, name: &str, f: impl FnOnce(&mut MockState) -> T) -> T {
        {
            let mut state = self.state.lock();
            state.operations.push(format!("{op}:{name}"));
            let in_flight = state.in_flight.entry(name.to_string()).or_insert(0);
            *in_flight += 1;
            let current = *in_flight;
            let max = state.max_overlap.entry(name.to_string()).or_insert(0);
            *max = (*max).max(current);
        }
        if !self.op_delay.is_zero() {
            tokio::time::sleep(self.op_delay).await;
        }
        let mut state = self.state.lock();
        let out = f(&mut state);
        if let Some(in_flight) = state.in_flight.get_mut(name) {
            *in_flight -= 1;
        }
        out
    }
}

#[async_trait]
impl ContainerRuntime for MockContainerRuntime {
    async fn remove(&self, name: &str, force: bool) -> Result<bool, ContainerError> {
        self.mutate("remove", name, |state| match state.containers.get(name) {
            None => Ok(false),
            Some(c) if c.running && !force => Err(ContainerError::Runtime(format!(
                "cannot remove running container '{name}'"
            ))),
            Some(_) => {
                state.containers.remove(name);
                Ok(true)
            }
        })
        .await
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        let id = format!("{:012x}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let missing_image = self.missing_images.contains(&spec.image);
        let exit_code = self.exit_codes.get(&spec.name).copied();

        self.mutate("start", &spec.name, |state| {
            if missing_image {
                return Err(ContainerError::start(
                    &spec.name,
                    format!("No such image: {}", spec.image),
                ));
            }
            if state.containers.contains_key(&spec.name) {
                return Err(ContainerError::start(
                    &spec.name,
                    "Conflict. The container name is already in use",
                ));
            }
            let host_ports: Vec<u16> = spec.ports.iter().map(|p| p.host).collect();
            let bound = state
                .containers
                .values()
                .filter(|c| c.running)
                .flat_map(|c| c.host_ports.iter())
                .find(|p| host_ports.contains(p));
            if let Some(port) = bound {
                return Err(ContainerError::start(
                    &spec.name,
                    format!("Bind for 0.0.0.0:{port} failed: port is already allocated"),
                ));
            }
            state.containers.insert(
                spec.name.clone(),
                MockContainer {
                    image: spec.image.clone(),
                    running: exit_code.is_none(),
                    host_ports,
                    exit_code,
                },
            );
            Ok(id)
        })
        .await
    }

    async fn is_running(&self, name: &str) -> Result<bool, ContainerError> {
        Ok(self.is_running_now(name))
    }

    async fn stop(&self, name: &str, _grace: Duration) -> Result<(), ContainerError> {
        let refuse = self.failing_stop.contains(name);
        self.mutate("stop", name, |state| {
            if refuse {
                return Err(ContainerError::Runtime(format!("stop '{name}' refused")));
            }
            let container = state
                .containers
                .get_mut(name)
                .ok_or_else(|| ContainerError::NotFound(name.to_string()))?;
            if container.running {
                container.running = false;
                container.exit_code.get_or_insert(KILLED_EXIT_CODE);
            }
            Ok(())
        })
        .await
    }

    async fn wait(&self, name: &str) -> Result<i64, ContainerError> {
        loop {
            {
                let state = self.state.lock();
                let container = state
                    .containers
                    .get(name)
                    .ok_or_else(|| ContainerError::NotFound(name.to_string()))?;
                if !container.running {
                    return Ok(container.exit_code.unwrap_or(0));
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn ping(&self) -> Result<(), ContainerError> {
        if self.unreachable {
            return Err(ContainerError::Runtime(
                "ping failed: Cannot connect to the Docker daemon".to_string(),
            ));
        }
        Ok(())
    }
}
