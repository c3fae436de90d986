//! Stage declarations.
//!
//! A [`StageSpec`] is one node of the pipeline graph: an identifier, its
//! dependencies and the unit of work to execute. Specs are immutable once the
//! graph is built.

pub mod suite;
mod unit;

pub use unit::{CommandSpec, ContainerStage, ExecutableUnit, TeardownScope};

use regex::Regex;
use std::collections::BTreeMap;
use std::time::Duration;

/// A declared pipeline stage.
#[derive(Debug, Clone)]
pub struct StageSpec {
    id: String,
    dependencies: Vec<String>,
    unit: ExecutableUnit,
    timeout: Option<Duration>,
    env: BTreeMap<String, String>,
    exports: Vec<String>,
    suite_summary: Option<Regex>,
    description: Option<String>,
}

impl StageSpec {
    /// Creates a stage with no dependencies.
    #[must_use]
    pub fn new(id: impl Into<String>, unit: ExecutableUnit) -> Self {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            unit,
            timeout: None,
            env: BTreeMap::new(),
            exports: Vec::new(),
            suite_summary: None,
            description: None,
        }
    }

    /// Creates a process-backed stage.
    #[must_use]
    pub fn process(id: impl Into<String>, command: CommandSpec) -> Self {
        Self::new(id, ExecutableUnit::Process(command))
    }

    /// Creates a stage that runs `script` with `sh -c`.
    #[must_use]
    pub fn shell(id: impl Into<String>, script: impl Into<String>) -> Self {
        Self::process(id, CommandSpec::shell(script))
    }

    /// Creates a container-backed stage.
    #[must_use]
    pub fn container(id: impl Into<String>, stage: ContainerStage) -> Self {
        Self::new(id, ExecutableUnit::Container(stage))
    }

    /// Adds dependencies, keeping first-seen order and dropping repeats.
    #[must_use]
    pub fn depends_on(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        for dep in deps {
            let dep = dep.into();
            if !self.dependencies.contains(&dep) {
                self.dependencies.push(dep);
            }
        }
        self
    }

    /// Sets the stage timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds a stage-local variable; the value may use `${NAME}` placeholders.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Declares a variable the stage exports to its dependents.
    ///
    /// The stage publishes it by printing `::export KEY=VALUE` on stdout.
    #[must_use]
    pub fn with_export(mut self, key: impl Into<String>) -> Self {
        self.exports.push(key.into());
        self
    }

    /// Sets the suite summary pattern (see [`suite::compile_summary`]).
    #[must_use]
    pub fn with_suite_summary(mut self, summary: Regex) -> Self {
        self.suite_summary = Some(summary);
        self
    }

    /// Sets a human-readable description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns the stage identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the dependency identifiers in declaration order.
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Returns the executable unit.
    #[must_use]
    pub fn unit(&self) -> &ExecutableUnit {
        &self.unit
    }

    /// Returns the declared timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the stage-local variables.
    #[must_use]
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Returns the exported variable names.
    #[must_use]
    pub fn exports(&self) -> &[String] {
        &self.exports
    }

    /// Returns the suite summary pattern.
    #[must_use]
    pub fn suite_summary(&self) -> Option<&Regex> {
        self.suite_summary.as_ref()
    }

    /// Returns the description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns every templated string in the stage.
    #[must_use]
    pub fn templates(&self) -> Vec<&str> {
        let mut templates = self.unit.templates();
        templates.extend(self.env.values().map(String::as_str));
        templates
    }
}
