//! Container descriptions: declared services, resolved specs and live handles.

use super::ReadinessProbe;
use crate::config::{template, Environment};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A host-to-container port publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port on the host.
    pub host: u16,
    /// Port inside the container.
    pub container: u16,
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

/// A bind mount into the container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mount {
    /// Host path.
    pub source: String,
    /// Path inside the container.
    pub target: String,
    /// Mount read-only.
    #[serde(default)]
    pub read_only: bool,
}

impl Mount {
    /// Creates a read-only mount.
    #[must_use]
    pub fn read_only(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: true,
        }
    }

    /// Returns the runtime bind string (`source:target[:ro]`).
    #[must_use]
    pub fn to_bind(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }

    /// Anchors a literal relative source to `base`.
    ///
    /// Templated sources are left alone; they are made absolute against the
    /// working directory once expanded.
    #[must_use]
    pub fn anchored(mut self, base: &Path) -> Self {
        if !self.source.contains("${") && Path::new(&self.source).is_relative() {
            self.source = normalized(&base.join(&self.source)).display().to_string();
        }
        self
    }
}

fn normalized(path: &Path) -> PathBuf {
    path.components().filter(|c| !matches!(c, Component::CurDir)).collect()
}

/// Returns `source` as an absolute host path; the runtime rejects relative binds.
fn host_path(stage: &str, source: &str) -> Result<String, ConfigError> {
    if Path::new(source).is_absolute() {
        return Ok(source.to_string());
    }
    std::path::absolute(source)
        .map(|path| normalized(&path).display().to_string())
        .map_err(|e| ConfigError::invalid(format!("{stage}.mounts.source"), source, e.to_string()))
}

/// Runtime options beyond image, env, ports and mounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOptions {
    /// Allocate a TTY (interactive runs only).
    #[serde(default)]
    pub tty: bool,
    /// Network to attach to.
    #[serde(default)]
    pub network: Option<String>,
    /// Labels attached to the container.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// A fully-resolved request to start one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name; unique in the runtime namespace.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Environment passed into the container.
    pub env: Environment,
    /// Published ports.
    pub ports: Vec<PortMapping>,
    /// Mounts; read-only mounts stay read-only.
    pub mounts: Vec<Mount>,
    /// Command override; empty keeps the image default.
    pub command: Vec<String>,
    /// Extra runtime options.
    pub options: StartOptions,
}

impl ContainerSpec {
    /// Creates a spec with only a name and image.
    #[must_use]
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            env: Environment::new(),
            ports: Vec::new(),
            mounts: Vec::new(),
            command: Vec::new(),
            options: StartOptions::default(),
        }
    }

    /// Adds a published port.
    #[must_use]
    pub fn with_port(mut self, host: u16, container: u16) -> Self {
        self.ports.push(PortMapping { host, container });
        self
    }

    /// Adds a mount.
    #[must_use]
    pub fn with_mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Sets the environment.
    #[must_use]
    pub fn with_env(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    /// Returns the env as `KEY=VALUE` strings.
    #[must_use]
    pub fn env_list(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

/// Lifecycle state of a managed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    /// Started and not yet stopped.
    Running,
    /// Stopped but still present.
    Stopped,
    /// Removed from the runtime.
    Removed,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// A snapshot of a container owned by the lifecycle manager.
///
/// Callers get copies; only the manager changes the state it tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    name: String,
    id: String,
    image: String,
    ports: Vec<PortMapping>,
    mounts: Vec<Mount>,
    state: ContainerState,
}

impl ContainerHandle {
    pub(crate) fn running(id: impl Into<String>, spec: &ContainerSpec) -> Self {
        Self {
            name: spec.name.clone(),
            id: id.into(),
            image: spec.image.clone(),
            ports: spec.ports.clone(),
            mounts: spec.mounts.clone(),
            state: ContainerState::Running,
        }
    }

    pub(crate) fn with_state(mut self, state: ContainerState) -> Self {
        self.state = state;
        self
    }

    /// Returns the container name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the runtime-assigned id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the image reference.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Returns the published ports.
    #[must_use]
    pub fn ports(&self) -> &[PortMapping] {
        &self.ports
    }

    /// Returns the mounts.
    #[must_use]
    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    /// Returns the state at the time the snapshot was taken.
    #[must_use]
    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Returns the first published host port.
    #[must_use]
    pub fn primary_host_port(&self) -> Option<u16> {
        self.ports.first().map(|p| p.host)
    }
}

/// A port publication whose host side may be a `${PLACEHOLDER}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortTemplate {
    /// Host port, possibly templated (e.g. `${PORT}`).
    pub host: String,
    /// Port inside the container.
    pub container: u16,
}

/// A declared service container, before environment resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Container name template.
    pub container_name: String,
    /// Image reference template.
    pub image: String,
    /// Command template; empty keeps the image default.
    #[serde(default)]
    pub command: Vec<String>,
    /// Variables copied verbatim from the stage environment.
    #[serde(default)]
    pub pass_env: Vec<String>,
    /// Extra variables, values templated.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Port publications.
    #[serde(default)]
    pub ports: Vec<PortTemplate>,
    /// Mounts; `source` is templated.
    #[serde(default)]
    pub mounts: Vec<Mount>,
    /// Readiness probe.
    #[serde(default)]
    pub probe: ReadinessProbe,
    /// Network to attach to.
    #[serde(default)]
    pub network: Option<String>,
}

impl ServiceSpec {
    /// Creates a service with a container name and image.
    #[must_use]
    pub fn new(container_name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            container_name: container_name.into(),
            image: image.into(),
            command: Vec::new(),
            pass_env: Vec::new(),
            env: BTreeMap::new(),
            ports: Vec::new(),
            mounts: Vec::new(),
            probe: ReadinessProbe::default(),
            network: None,
        }
    }

    /// Sets the readiness probe.
    #[must_use]
    pub fn with_probe(mut self, probe: ReadinessProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Adds a port publication.
    #[must_use]
    pub fn with_port(mut self, host: impl Into<String>, container: u16) -> Self {
        self.ports.push(PortTemplate {
            host: host.into(),
            container,
        });
        self
    }

    /// Adds a mount.
    #[must_use]
    pub fn with_mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Adds variables passed through from the stage environment.
    #[must_use]
    pub fn with_pass_env(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.pass_env.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Sets the command.
    #[must_use]
    pub fn with_command(mut self, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Returns every template string in the service, for placeholder checks.
    pub fn templates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.container_name.as_str())
            .chain(std::iter::once(self.image.as_str()))
            .chain(self.command.iter().map(String::as_str))
            .chain(self.env.values().map(String::as_str))
            .chain(self.ports.iter().map(|p| p.host.as_str()))
            .chain(self.mounts.iter().map(|m| m.source.as_str()))
            .chain(self.probe.templates())
    }

    /// Returns the variables the service copies from the environment.
    pub fn required_vars(&self) -> impl Iterator<Item = &str> {
        self.pass_env.iter().map(String::as_str)
    }

    /// Resolves the service against `env` into a startable spec.
    ///
    /// `tty` comes from the run mode: interactive runs get a terminal.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for unresolved placeholders, missing
    /// pass-through variables, or host ports that are not valid port numbers.
    pub fn resolve(&self, stage: &str, env: &Environment, tty: bool) -> Result<ContainerSpec, ConfigError> {
        let expand = |t: &str| {
            template::expand(t, env).map_err(|name| ConfigError::UnresolvedPlaceholder {
                stage: stage.to_string(),
                name,
            })
        };

        let mut container_env = Environment::new();
        for key in &self.pass_env {
            let value = env.get(key).ok_or_else(|| ConfigError::UnresolvedPlaceholder {
                stage: stage.to_string(),
                name: key.clone(),
            })?;
            container_env.set(key, value);
        }
        for (key, value) in &self.env {
            container_env.set(key, expand(value)?);
        }

        let mut ports = Vec::with_capacity(self.ports.len());
        for port in &self.ports {
            let raw = expand(&port.host)?;
            let host = raw
                .trim()
                .parse::<u16>()
                .map_err(|e| ConfigError::invalid(format!("{stage}.ports.host"), raw.clone(), e.to_string()))?;
            ports.push(PortMapping {
                host,
                container: port.container,
            });
        }

        let mut mounts = Vec::with_capacity(self.mounts.len());
        for mount in &self.mounts {
            mounts.push(Mount {
                source: host_path(stage, &expand(&mount.source)?)?,
                target: mount.target.clone(),
                read_only: mount.read_only,
            });
        }

        let command = self
            .command
            .iter()
            .map(|c| expand(c))
            .collect::<Result<Vec<_>, _>>()?;

        let mut labels = BTreeMap::new();
        labels.insert("harnessflow.stage".to_string(), stage.to_string());

        Ok(ContainerSpec {
            name: expand(&self.container_name)?,
            image: expand(&self.image)?,
            env: container_env,
            ports,
            mounts,
            command,
            options: StartOptions {
                tty,
                network: self.network.clone(),
                labels,
            },
        })
    }
}
