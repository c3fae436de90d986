//! What a stage runs: a host process or a service container.

use crate::config::{template, Environment};
use crate::container::ServiceSpec;
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// A host command, possibly templated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandSpec {
    /// Creates a command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    /// Creates a command that runs `script` through `sh -c`.
    #[must_use]
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    /// Creates a command from an argv list.
    ///
    /// Returns `None` for an empty list.
    #[must_use]
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone()).args(args.iter().cloned()))
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends arguments.
    #[must_use]
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Returns the program.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the arguments.
    #[must_use]
    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    /// Returns the working directory.
    #[must_use]
    pub fn working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// Returns the templated strings.
    pub fn templates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str))
    }

    /// Expands placeholders in program and arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnresolvedPlaceholder`] for unknown variables.
    pub fn render(&self, stage: &str, env: &Environment) -> Result<Self, ConfigError> {
        let expand = |t: &str| {
            template::expand(t, env).map_err(|name| ConfigError::UnresolvedPlaceholder {
                stage: stage.to_string(),
                name,
            })
        };
        Ok(Self {
            program: expand(&self.program)?,
            args: self.args.iter().map(|a| expand(a)).collect::<Result<_, _>>()?,
            working_dir: self.working_dir.clone(),
        })
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// When a stage's container is torn down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeardownScope {
    /// Before the stage returns.
    #[default]
    Stage,
    /// When the pipeline run ends; dependents may use the container.
    Run,
}

/// A container-backed stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStage {
    /// Name of the declared service.
    pub service_name: String,
    /// The service definition.
    pub service: ServiceSpec,
    /// Readiness timeout; `None` treats "started" as ready.
    pub wait_healthy: Option<Duration>,
    /// Command run against the started container.
    pub command: Option<CommandSpec>,
    /// Teardown scope.
    pub teardown: TeardownScope,
}

impl ContainerStage {
    /// Creates a container stage for a service.
    #[must_use]
    pub fn new(service_name: impl Into<String>, service: ServiceSpec) -> Self {
        Self {
            service_name: service_name.into(),
            service,
            wait_healthy: None,
            command: None,
            teardown: TeardownScope::Stage,
        }
    }

    /// Waits for readiness up to `timeout` after starting.
    #[must_use]
    pub fn wait_healthy(mut self, timeout: Duration) -> Self {
        self.wait_healthy = Some(timeout);
        self
    }

    /// Runs `command` once the container is ready.
    #[must_use]
    pub fn with_command(mut self, command: CommandSpec) -> Self {
        self.command = Some(command);
        self
    }

    /// Sets the teardown scope.
    #[must_use]
    pub fn with_teardown(mut self, teardown: TeardownScope) -> Self {
        self.teardown = teardown;
        self
    }
}

/// The executable part of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutableUnit {
    /// Run a host command.
    Process(CommandSpec),
    /// Start a service container and optionally run a command against it.
    Container(ContainerStage),
}

impl ExecutableUnit {
    /// Returns a short label for reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Process(_) => "process",
            Self::Container(_) => "container",
        }
    }

    /// Returns every templated string in the unit.
    #[must_use]
    pub fn templates(&self) -> Vec<&str> {
        match self {
            Self::Process(cmd) => cmd.templates().collect(),
            Self::Container(c) => c
                .service
                .templates()
                .chain(c.command.iter().flat_map(CommandSpec::templates))
                .collect(),
        }
    }

    /// Returns variables that must exist verbatim in the stage environment.
    #[must_use]
    pub fn required_vars(&self) -> Vec<&str> {
        match self {
            Self::Process(_) => Vec::new(),
            Self::Container(c) => c.service.required_vars().collect(),
        }
    }
}
