//! Container runtime abstraction.
//!
//! The [`ContainerRuntime`] trait covers the handful of engine calls the
//! lifecycle manager needs. Production code talks to the Docker daemon through
//! [`BollardRuntime`]; tests use [`MockContainerRuntime`](crate::testing::MockContainerRuntime).

use super::ContainerSpec;
use crate::errors::ContainerError;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::models::{HostConfig, PortBinding};
use futures::StreamExt;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Engine operations used by the lifecycle manager.
///
/// Containers are addressed by name. Implementations must treat "no such
/// container" as a normal answer where the signature allows it (`remove`
/// returns `false`, `is_running` returns `false`).
#[async_trait]
pub trait ContainerRuntime: Send + Sync + fmt::Debug {
    /// Removes a container, stopping it first when `force` is set.
    ///
    /// Returns `true` if a container existed and was removed.
    async fn remove(&self, name: &str, force: bool) -> Result<bool, ContainerError>;

    /// Creates and starts a container, returning its id.
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, ContainerError>;

    /// Returns true if a container with this name is running.
    async fn is_running(&self, name: &str) -> Result<bool, ContainerError>;

    /// Stops a container, killing it after `grace`.
    async fn stop(&self, name: &str, grace: Duration) -> Result<(), ContainerError>;

    /// Waits for a container to exit and returns its exit code.
    async fn wait(&self, name: &str) -> Result<i64, ContainerError>;

    /// Checks that the engine is reachable.
    async fn ping(&self) -> Result<(), ContainerError>;
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }
    )
}

fn is_not_modified(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { status_code: 304, .. }
    )
}

/// Docker engine runtime backed by `bollard`.
pub struct BollardRuntime {
    docker: Arc<bollard::Docker>,
}

impl fmt::Debug for BollardRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BollardRuntime").finish_non_exhaustive()
    }
}

impl BollardRuntime {
    /// Connects to the local Docker daemon using platform defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Runtime`] if the client cannot be built.
    pub fn connect_local() -> Result<Self, ContainerError> {
        let docker = bollard::Docker::connect_with_local_defaults()
            .map_err(|e| ContainerError::Runtime(format!("failed to connect to docker: {e}")))?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    fn create_config(spec: &ContainerSpec) -> Config<String> {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for port in &spec.ports {
            let key = format!("{}/tcp", port.container);
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(port.host.to_string()),
                }]),
            );
        }

        let binds: Vec<String> = spec.mounts.iter().map(super::Mount::to_bind).collect();
        let labels: HashMap<String, String> = spec
            .options
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env_list()),
            cmd: (!spec.command.is_empty()).then(|| spec.command.clone()),
            tty: Some(spec.options.tty),
            labels: Some(labels),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                binds: Some(binds),
                network_mode: spec.options.network.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerRuntime for BollardRuntime {
    async fn remove(&self, name: &str, force: bool) -> Result<bool, ContainerError> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(ContainerError::Runtime(format!("remove '{name}' failed: {e}"))),
        }
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let created = self
            .docker
            .create_container(Some(options), Self::create_config(spec))
            .await
            .map_err(|e| ContainerError::start(&spec.name, e.to_string()))?;

        if let Err(e) = self
            .docker
            .start_container(&spec.name, None::<StartContainerOptions<String>>)
            .await
        {
            // Created but not started (port already bound, bad mount): drop the husk.
            if let Err(cleanup) = self.remove(&spec.name, true).await {
                warn!(container = %spec.name, error = %cleanup, "failed to remove unstarted container");
            }
            return Err(ContainerError::start(&spec.name, e.to_string()));
        }

        debug!(container = %spec.name, id = %created.id, "container started");
        Ok(created.id)
    }

    async fn is_running(&self, name: &str) -> Result<bool, ContainerError> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(details) => Ok(details.state.and_then(|s| s.running).unwrap_or(false)),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(ContainerError::Runtime(format!("inspect '{name}' failed: {e}"))),
        }
    }

    async fn stop(&self, name: &str, grace: Duration) -> Result<(), ContainerError> {
        let t = i64::try_from(grace.as_secs()).unwrap_or(i64::MAX);
        match self
            .docker
            .stop_container(name, Some(StopContainerOptions { t }))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) if is_not_found(&e) => Err(ContainerError::NotFound(name.to_string())),
            Err(e) => Err(ContainerError::Runtime(format!("stop '{name}' failed: {e}"))),
        }
    }

    async fn wait(&self, name: &str) -> Result<i64, ContainerError> {
        let mut stream = std::pin::pin!(self
            .docker
            .wait_container(name, None::<WaitContainerOptions<String>>));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) if is_not_found(&e) => Err(ContainerError::NotFound(name.to_string())),
            Some(Err(e)) => Err(ContainerError::Runtime(format!("wait '{name}' failed: {e}"))),
            None => Err(ContainerError::Runtime(format!("wait '{name}' ended without a status"))),
        }
    }

    async fn ping(&self) -> Result<(), ContainerError> {
        self.docker
            .ping()
            .await
            .map_err(|e| ContainerError::Runtime(format!("ping failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Mount;

    #[test]
    fn test_create_config_maps_ports_and_mounts() {
        let mut spec = ContainerSpec::new("mock_uss_scdsc", "interuss/monitoring")
            .with_port(8074, 5000)
            .with_mount(Mount::read_only("/certs", "/var/test-certs"));
        spec.command = vec!["mock_uss/start.sh".to_string()];
        spec.options.network = Some("interop".to_string());

        let config = BollardRuntime::create_config(&spec);

        assert_eq!(config.image.as_deref(), Some("interuss/monitoring"));
        assert_eq!(config.cmd, Some(vec!["mock_uss/start.sh".to_string()]));
        let host = config.host_config.unwrap();
        assert_eq!(host.binds, Some(vec!["/certs:/var/test-certs:ro".to_string()]));
        assert_eq!(host.network_mode.as_deref(), Some("interop"));
        let bindings = host.port_bindings.unwrap();
        let binding = bindings["5000/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("8074"));
    }

    #[test]
    fn test_relative_mount_reaches_runtime_as_absolute_bind() {
        let service = crate::container::ServiceSpec::new("mock_uss", "interuss/monitoring")
            .with_mount(Mount::read_only("./build/test-certs", "/var/test-certs"));
        let spec = service
            .resolve("deploy", &crate::config::Environment::new(), false)
            .unwrap();

        let binds = BollardRuntime::create_config(&spec).host_config.unwrap().binds.unwrap();

        assert!(binds[0].starts_with('/'), "relative bind: {}", binds[0]);
        assert!(binds[0].ends_with("/build/test-certs:/var/test-certs:ro"));
    }

    #[test]
    fn test_create_config_keeps_image_command() {
        let spec = ContainerSpec::new("svc", "img");
        let config = BollardRuntime::create_config(&spec);
        assert!(config.cmd.is_none());
    }
}
