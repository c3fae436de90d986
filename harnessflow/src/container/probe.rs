//! Readiness probes, configurable per service.

use super::{ContainerHandle, ContainerRuntime};
use crate::config::{template, Environment};
use crate::errors::{ConfigError, ContainerError};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_status() -> u16 {
    200
}

/// How to decide that a service container is ready.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadinessProbe {
    /// Starting the container is sufficient.
    #[default]
    Started,
    /// The runtime reports the container as running.
    Running,
    /// A TCP connection to the published port is accepted.
    Tcp {
        /// Host to connect to.
        #[serde(default = "default_host")]
        host: String,
        /// Port; defaults to the container's first published host port.
        #[serde(default)]
        port: Option<u16>,
    },
    /// An HTTP GET returns the expected status.
    Http {
        /// URL, templated.
        url: String,
        /// Expected status code.
        #[serde(default = "default_status")]
        expect_status: u16,
    },
    /// A host command exits zero.
    Command {
        /// Program and arguments, templated.
        argv: Vec<String>,
    },
}

impl ReadinessProbe {
    /// Creates a TCP probe against the first published port.
    #[must_use]
    pub fn tcp() -> Self {
        Self::Tcp {
            host: default_host(),
            port: None,
        }
    }

    /// Returns true if the probe never needs polling.
    #[must_use]
    pub fn is_trivial(&self) -> bool {
        matches!(self, Self::Started)
    }

    /// Returns the templated strings inside the probe.
    #[must_use]
    pub fn templates(&self) -> Vec<&str> {
        match self {
            Self::Http { url, .. } => vec![url.as_str()],
            Self::Command { argv } => argv.iter().map(String::as_str).collect(),
            Self::Started | Self::Running | Self::Tcp { .. } => Vec::new(),
        }
    }

    /// Expands placeholders against `env`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnresolvedPlaceholder`] for unknown variables.
    pub fn resolved(&self, stage: &str, env: &Environment) -> Result<Self, ConfigError> {
        let expand = |t: &str| {
            template::expand(t, env).map_err(|name| ConfigError::UnresolvedPlaceholder {
                stage: stage.to_string(),
                name,
            })
        };
        Ok(match self {
            Self::Http { url, expect_status } => Self::Http {
                url: expand(url)?,
                expect_status: *expect_status,
            },
            Self::Command { argv } => Self::Command {
                argv: argv.iter().map(|a| expand(a)).collect::<Result<_, _>>()?,
            },
            other => other.clone(),
        })
    }

    /// Runs the probe once.
    ///
    /// `Ok(false)` means "not ready yet"; errors are reserved for probes that
    /// can never succeed as configured.
    pub async fn check(
        &self,
        runtime: &dyn ContainerRuntime,
        handle: &ContainerHandle,
    ) -> Result<bool, ContainerError> {
        match self {
            Self::Started => Ok(true),
            Self::Running => runtime.is_running(handle.name()).await,
            Self::Tcp { host, port } => {
                let port = port.or_else(|| handle.primary_host_port()).ok_or_else(|| {
                    ContainerError::Runtime(format!(
                        "tcp probe for '{}' has no port and the container publishes none",
                        handle.name()
                    ))
                })?;
                let attempt =
                    tokio::time::timeout(CONNECT_TIMEOUT, tokio::net::TcpStream::connect((host.as_str(), port)))
                        .await;
                let ready = matches!(attempt, Ok(Ok(_)));
                debug!(container = %handle.name(), %host, port, ready, "tcp probe");
                Ok(ready)
            }
            Self::Http { url, expect_status } => http_check(url, *expect_status).await,
            Self::Command { argv } => {
                let Some((program, args)) = argv.split_first() else {
                    return Err(ContainerError::Runtime("command probe has an empty argv".to_string()));
                };
                let status = tokio::process::Command::new(program)
                    .args(args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .status()
                    .await
                    .map_err(|e| ContainerError::Runtime(format!("probe command '{program}' failed to spawn: {e}")))?;
                debug!(container = %handle.name(), %program, ready = status.success(), "command probe");
                Ok(status.success())
            }
        }
    }
}

#[cfg(feature = "http-probe")]
async fn http_check(url: &str, expect_status: u16) -> Result<bool, ContainerError> {
    let client = reqwest::Client::builder()
        .timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| ContainerError::Runtime(format!("http probe client: {e}")))?;
    match client.get(url).send().await {
        Ok(response) => Ok(response.status().as_u16() == expect_status),
        Err(e) => {
            debug!(%url, error = %e, "http probe not ready");
            Ok(false)
        }
    }
}

#[cfg(not(feature = "http-probe"))]
async fn http_check(_url: &str, _expect_status: u16) -> Result<bool, ContainerError> {
    Err(ContainerError::Runtime(
        "http readiness probes require the 'http-probe' feature".to_string(),
    ))
}
