//! Service containers: declaration, runtime seam, readiness and lifecycle.

mod handle;
mod manager;
mod probe;
mod runtime;

pub use handle::{
    ContainerHandle, ContainerSpec, ContainerState, Mount, PortMapping, PortTemplate, ServiceSpec,
    StartOptions,
};
pub use manager::{ContainerLifecycleManager, RemovalOutcome, DEFAULT_POLL_INTERVAL, DEFAULT_STOP_GRACE};
pub use probe::ReadinessProbe;
pub use runtime::{BollardRuntime, ContainerRuntime};
