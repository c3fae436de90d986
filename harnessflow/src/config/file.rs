//! The pipeline definition file (`harness.toml`).
//!
//! # Loading order
//! 1. CLI flags (highest priority, applied by the binary)
//! 2. `HARNESS_*` environment variables ([`HarnessConfig::apply_env_overrides`])
//! 3. The definition file
//! 4. Built-in defaults
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), harnessflow::errors::HarnessError> {
//! use harnessflow::config::HarnessConfig;
//!
//! let config = HarnessConfig::load("harness.toml").await?;
//! let graph = config.graph_for_target("lint")?;
//! # Ok(())
//! # }
//! ```

use super::resolver::{ConfigResolver, DefaultTable};
use crate::container::ServiceSpec;
use crate::errors::{ConfigError, GraphError, HarnessError};
use crate::pipeline::{PipelineBuilder, StageGraph};
use crate::stages::suite::compile_summary;
use crate::stages::{CommandSpec, ContainerStage, StageSpec, TeardownScope};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the pipeline definition.
pub const DEFAULT_CONFIG_PATH: &str = "harness.toml";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// A parsed pipeline definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Orchestrator settings.
    #[serde(default)]
    pub settings: Settings,
    /// Global environment defaults.
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
    /// Mode-specific environment defaults.
    #[serde(default)]
    pub modes: ModeDefaults,
    /// Service containers, by name.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,
    /// Stages in declaration order.
    #[serde(default)]
    pub stages: Vec<StageDecl>,
    /// Target name to root stage ids.
    #[serde(default)]
    pub targets: BTreeMap<String, Vec<String>>,
}

/// `[settings]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum number of stages running at once.
    pub concurrency: usize,
    /// Timeout for stages that declare none.
    pub default_timeout_secs: Option<u64>,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log format (pretty, compact, json).
    pub log_format: String,
    /// Grace period before a stopped container is killed.
    pub stop_grace_secs: u64,
    /// Bound on each run-scoped teardown.
    pub cleanup_timeout_secs: u64,
    /// Variables that must resolve to a non-empty value; the built-in list when absent.
    pub required: Option<Vec<String>>,
    /// Bytes of stage output kept for diagnostics.
    pub output_limit_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            default_timeout_secs: None,
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
            stop_grace_secs: 10,
            cleanup_timeout_secs: 30,
            required: None,
            output_limit_bytes: crate::executor::DEFAULT_OUTPUT_LIMIT,
        }
    }
}

impl Settings {
    /// Returns the default stage timeout.
    #[must_use]
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }

    /// Returns the container stop grace period.
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Returns the cleanup bound.
    #[must_use]
    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_secs)
    }
}

/// `[modes.*]` tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeDefaults {
    /// Applied when `CI` is truthy.
    #[serde(default)]
    pub ci: BTreeMap<String, String>,
    /// Applied when `CI` is not truthy.
    #[serde(default)]
    pub interactive: BTreeMap<String, String>,
    /// Applied when `TEST` is truthy.
    #[serde(default)]
    pub test: BTreeMap<String, String>,
    /// Applied when `TEST` is not truthy.
    #[serde(default)]
    pub run: BTreeMap<String, String>,
}

/// One `[[stages]]` entry.
///
/// A stage names a `container` service, or runs a host `command` (argv) or
/// `script` (`sh -c`). A container stage may also carry a `command` or
/// `script`, which then runs against the started container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageDecl {
    /// Stage identifier.
    pub id: String,
    /// Stages that must succeed first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Host command as an argv list.
    #[serde(default)]
    pub command: Option<Vec<String>>,
    /// Host shell script.
    #[serde(default)]
    pub script: Option<String>,
    /// Service to start.
    #[serde(default)]
    pub container: Option<String>,
    /// Working directory of the command.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Stage timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Readiness wait for the service container.
    #[serde(default)]
    pub wait_healthy_secs: Option<u64>,
    /// When the service container is torn down.
    #[serde(default)]
    pub teardown: TeardownScope,
    /// Stage variables, values templated.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Keys this stage may publish to its dependents.
    #[serde(default)]
    pub exports: Vec<String>,
    /// Sub-suite summary pattern.
    #[serde(default)]
    pub suite_summary: Option<String>,
}

impl StageDecl {
    fn command(&self) -> Result<Option<CommandSpec>, ConfigError> {
        let key = || format!("{}.command", self.id);
        let command = match (&self.command, &self.script) {
            (Some(_), Some(script)) => {
                return Err(ConfigError::invalid(key(), script, "set either command or script, not both"));
            }
            (Some(argv), None) => {
                Some(CommandSpec::from_argv(argv).ok_or_else(|| ConfigError::invalid(key(), "[]", "command is empty"))?)
            }
            (None, Some(script)) => Some(CommandSpec::shell(script.clone())),
            (None, None) => None,
        };
        Ok(match (command, &self.working_dir) {
            (Some(command), Some(dir)) => Some(command.with_working_dir(dir.clone())),
            (command, _) => command,
        })
    }

    /// Converts the declaration into a [`StageSpec`].
    ///
    /// # Errors
    ///
    /// - [`ConfigError::UnknownService`] for an undeclared `container`.
    /// - [`ConfigError::InvalidValue`] for a stage with nothing to run,
    ///   conflicting command fields or a bad suite pattern.
    pub fn to_spec(&self, services: &BTreeMap<String, ServiceSpec>) -> Result<StageSpec, ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::invalid("stages.id", &self.id, "stage id must not be empty"));
        }
        let command = self.command()?;

        let mut spec = match &self.container {
            Some(service_name) => {
                let service = services.get(service_name).ok_or_else(|| ConfigError::UnknownService {
                    stage: self.id.clone(),
                    service: service_name.clone(),
                })?;
                let mut stage = ContainerStage::new(service_name.clone(), service.clone()).with_teardown(self.teardown);
                if let Some(secs) = self.wait_healthy_secs {
                    stage = stage.wait_healthy(Duration::from_secs(secs));
                }
                if let Some(command) = command {
                    stage = stage.with_command(command);
                }
                StageSpec::container(&self.id, stage)
            }
            None => {
                let command = command.ok_or_else(|| {
                    ConfigError::invalid(format!("{}.command", self.id), "", "stage needs a command, script or container")
                })?;
                StageSpec::process(&self.id, command)
            }
        }
        .depends_on(self.depends_on.iter().cloned());

        if let Some(secs) = self.timeout_secs {
            spec = spec.with_timeout(Duration::from_secs(secs));
        }
        for (key, value) in &self.env {
            spec = spec.with_env(key.clone(), value.clone());
        }
        for key in &self.exports {
            spec = spec.with_export(key.clone());
        }
        if let Some(pattern) = &self.suite_summary {
            spec = spec.with_suite_summary(compile_summary(&self.id, pattern)?);
        }
        if let Some(description) = &self.description {
            spec = spec.with_description(description.clone());
        }
        Ok(spec)
    }
}

impl HarnessConfig {
    /// Loads a definition file, applies `HARNESS_*` overrides and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] if the file cannot be read, parsed or
    /// validated, or [`HarnessError::Graph`] if its stages do not form a graph.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, HarnessError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut config = Self::parse(&content)?;
        let base = std::path::absolute(path)
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        config.anchor_mounts(&base);
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Anchors literal relative mount sources to `base`, the directory of the
    /// definition file.
    pub fn anchor_mounts(&mut self, base: &Path) {
        for service in self.services.values_mut() {
            service.mounts = std::mem::take(&mut service.mounts)
                .into_iter()
                .map(|mount| mount.anchored(base))
                .collect();
        }
    }

    /// Parses a definition from a TOML string without validating it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown fields.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Applies `HARNESS_CONCURRENCY`, `HARNESS_LOG_LEVEL`, `HARNESS_LOG_FORMAT`
    /// and `HARNESS_DEFAULT_TIMEOUT_SECS` from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies settings overrides from an arbitrary lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        override_parsed(&mut self.settings.concurrency, "HARNESS_CONCURRENCY", &lookup);
        override_string(&mut self.settings.log_level, "HARNESS_LOG_LEVEL", &lookup);
        override_string(&mut self.settings.log_format, "HARNESS_LOG_FORMAT", &lookup);
        if let Some(value) = lookup("HARNESS_DEFAULT_TIMEOUT_SECS") {
            match value.trim().parse() {
                Ok(secs) => self.settings.default_timeout_secs = Some(secs),
                Err(_) => tracing::warn!(key = "HARNESS_DEFAULT_TIMEOUT_SECS", %value, "ignoring unparseable override"),
            }
        }
    }

    /// Validates settings, every stage, the full graph and every target.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] or [`GraphError`] found.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if !LOG_LEVELS.contains(&self.settings.log_level.as_str()) {
            return Err(ConfigError::invalid(
                "settings.log_level",
                &self.settings.log_level,
                format!("must be one of: {}", LOG_LEVELS.join(", ")),
            )
            .into());
        }
        if !LOG_FORMATS.contains(&self.settings.log_format.as_str()) {
            return Err(ConfigError::invalid(
                "settings.log_format",
                &self.settings.log_format,
                format!("must be one of: {}", LOG_FORMATS.join(", ")),
            )
            .into());
        }
        if self.settings.concurrency == 0 {
            return Err(ConfigError::invalid("settings.concurrency", "0", "must be at least 1").into());
        }
        if self.settings.output_limit_bytes == 0 {
            return Err(ConfigError::invalid("settings.output_limit_bytes", "0", "must be at least 1").into());
        }

        let graph = self.build_graph("all")?;
        for (target, roots) in &self.targets {
            graph.select(target, roots)?;
        }
        Ok(())
    }

    /// Returns the default tables: built-ins with the file's tables on top.
    #[must_use]
    pub fn default_table(&self) -> DefaultTable {
        DefaultTable::builtin().merged(&DefaultTable {
            global: self.defaults.clone(),
            ci: self.modes.ci.clone(),
            interactive: self.modes.interactive.clone(),
            test: self.modes.test.clone(),
            run: self.modes.run.clone(),
        })
    }

    /// Returns a resolver over [`default_table`](Self::default_table).
    #[must_use]
    pub fn resolver(&self) -> ConfigResolver {
        let resolver = ConfigResolver::new(self.default_table());
        match &self.settings.required {
            Some(required) => resolver.with_required(required.iter().cloned()),
            None => resolver,
        }
    }

    /// Builds the graph of every declared stage.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] for an invalid stage declaration or
    /// [`HarnessError::Graph`] for duplicates, unknown dependencies and cycles.
    pub fn build_graph(&self, name: &str) -> Result<StageGraph, HarnessError> {
        let mut builder = PipelineBuilder::new(name);
        for decl in &self.stages {
            builder.add_stage(decl.to_spec(&self.services)?)?;
        }
        Ok(builder.build()?)
    }

    /// Builds the subgraph a target selects.
    ///
    /// A name that is not a declared target but is a stage id selects that
    /// stage and its dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownTarget`] for an unknown name, plus any
    /// error of [`build_graph`](Self::build_graph).
    pub fn graph_for_target(&self, target: &str) -> Result<StageGraph, HarnessError> {
        let graph = self.build_graph(target)?;
        if let Some(roots) = self.targets.get(target) {
            return Ok(graph.select(target, roots)?);
        }
        if graph.get(target).is_some() {
            return Ok(graph.select(target, &[target])?);
        }
        Err(GraphError::UnknownTarget {
            target: target.to_string(),
            known: self.targets.keys().cloned().collect(),
        }
        .into())
    }
}

fn override_string(field: &mut String, key: &str, lookup: &impl Fn(&str) -> Option<String>) {
    if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
        *field = value.trim().to_owned();
    }
}

fn override_parsed<T: std::str::FromStr>(field: &mut T, key: &str, lookup: &impl Fn(&str) -> Option<String>) {
    if let Some(value) = lookup(key) {
        match value.trim().parse() {
            Ok(parsed) => *field = parsed,
            Err(_) => tracing::warn!(key, %value, "ignoring unparseable override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::resolver::KEY_ENTRY_COMMAND;
    use crate::config::Overrides;
    use crate::stages::ExecutableUnit;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SAMPLE: &str = r#"
[settings]
concurrency = 2
default_timeout_secs = 600

[defaults]
MOCK_USS_PUBLIC_KEY = "/var/test-certs/auth2.pem"

[modes.test]
HARNESS_ENTRY_COMMAND = "mock_uss/run_locally_test.sh"

[services.mock_uss]
container_name = "mock_uss_${MOCK_USS_SERVICES}"
image = "interuss/monitoring"
pass_env = ["MOCK_USS_PUBLIC_KEY", "MOCK_USS_TOKEN_AUDIENCE", "MOCK_USS_SERVICES"]
ports = [{ host = "${PORT}", container = 5000 }]
mounts = [{ source = "./build/test-certs", target = "/var/test-certs", read_only = true }]
probe = { kind = "tcp", port = 8074 }

[[stages]]
id = "python-lint"
script = "black --check monitoring"

[[stages]]
id = "shell-lint"
command = ["shellcheck", "monitoring/mock_uss/start.sh"]

[[stages]]
id = "mock-uss"
container = "mock_uss"
teardown = "run"
wait_healthy_secs = 30
depends_on = ["python-lint"]

[[stages]]
id = "uss-qualifier"
script = "uss_qualifier/run_locally.sh"
depends_on = ["mock-uss"]
suite_summary = '(?P<passed>\d+) passed, (?P<failed>\d+) failed'

[targets]
lint = ["python-lint", "shell-lint"]
monitoring-tests = ["uss-qualifier"]
"#;

    #[test]
    fn test_parse_sample() {
        let config = HarnessConfig::parse(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.settings.concurrency, 2);
        assert_eq!(config.settings.default_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.settings.log_level, "info");
        assert_eq!(config.stages.len(), 4);
        assert_eq!(config.services["mock_uss"].ports[0].host, "${PORT}");
    }

    #[test]
    fn test_target_selection() {
        let config = HarnessConfig::parse(SAMPLE).unwrap();

        let lint = config.graph_for_target("lint").unwrap();
        let ids: Vec<_> = lint.stages().iter().map(StageSpec::id).collect();
        assert_eq!(ids, vec!["python-lint", "shell-lint"]);

        let tests = config.graph_for_target("monitoring-tests").unwrap();
        assert_eq!(tests.topological_order(), vec!["python-lint", "mock-uss", "uss-qualifier"]);
        assert!(matches!(
            tests.get("mock-uss").unwrap().unit(),
            ExecutableUnit::Container(stage) if stage.teardown == TeardownScope::Run
        ));

        let single = config.graph_for_target("shell-lint").unwrap();
        assert_eq!(single.len(), 1);

        let err = config.graph_for_target("dss-tests").unwrap_err();
        assert!(matches!(err, HarnessError::Graph(GraphError::UnknownTarget { .. })));
        assert_eq!(err.exit_code(), crate::errors::exit_codes::USAGE);
    }

    #[test]
    fn test_file_defaults_layer_over_builtins() {
        let config = HarnessConfig::parse(SAMPLE).unwrap();
        let resolved = config
            .resolver()
            .resolve(&Overrides::new().with("TEST", "true"))
            .unwrap();
        assert_eq!(
            resolved.environment.get(KEY_ENTRY_COMMAND),
            Some("mock_uss/run_locally_test.sh")
        );
        assert_eq!(resolved.environment.get("PORT"), Some("8074"));
    }

    #[test]
    fn test_invalid_stage_declarations() {
        let both = r#"
[[stages]]
id = "lint"
command = ["true"]
script = "true"
"#;
        let err = HarnessConfig::parse(both).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("not both"));

        let nothing = "[[stages]]\nid = \"lint\"\n";
        let err = HarnessConfig::parse(nothing).unwrap().validate().unwrap_err();
        assert_eq!(err.exit_code(), crate::errors::exit_codes::CONFIG);

        let unknown_service = "[[stages]]\nid = \"deploy\"\ncontainer = \"dss\"\n";
        let err = HarnessConfig::parse(unknown_service).unwrap().validate().unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Config(ConfigError::UnknownService { ref service, .. }) if service == "dss"
        ));

        let typo = "[[stages]]\nid = \"lint\"\nscript = \"true\"\ndepend_on = [\"x\"]\n";
        assert!(matches!(HarnessConfig::parse(typo), Err(ConfigError::Parse(_))));

        let no_output = "[settings]\noutput_limit_bytes = 0\n";
        let err = HarnessConfig::parse(no_output).unwrap().validate().unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Config(ConfigError::InvalidValue { ref key, .. }) if key == "settings.output_limit_bytes"
        ));
    }

    #[test]
    fn test_graph_errors_surface() {
        let cyclic = r#"
[[stages]]
id = "a"
script = "true"
depends_on = ["b"]

[[stages]]
id = "b"
script = "true"
depends_on = ["a"]
"#;
        let err = HarnessConfig::parse(cyclic).unwrap().validate().unwrap_err();
        assert!(matches!(err, HarnessError::Graph(GraphError::Cycle(_))));
        assert_eq!(err.exit_code(), crate::errors::exit_codes::GRAPH);

        let bad_target = "[[stages]]\nid = \"a\"\nscript = \"true\"\n\n[targets]\nci = [\"b\"]\n";
        let err = HarnessConfig::parse(bad_target).unwrap().validate().unwrap_err();
        assert!(matches!(err, HarnessError::Graph(GraphError::UnknownTargetStage { .. })));
    }

    #[test]
    fn test_settings_validation_and_overrides() {
        let mut config = HarnessConfig::parse("[[stages]]\nid = \"a\"\nscript = \"true\"\n").unwrap();
        config.apply_overrides_from(|key| match key {
            "HARNESS_CONCURRENCY" => Some("8".to_string()),
            "HARNESS_LOG_LEVEL" => Some("debug".to_string()),
            "HARNESS_LOG_FORMAT" => Some("json".to_string()),
            "HARNESS_DEFAULT_TIMEOUT_SECS" => Some("oops".to_string()),
            _ => None,
        });
        assert_eq!(config.settings.concurrency, 8);
        assert_eq!(config.settings.log_level, "debug");
        assert_eq!(config.settings.log_format, "json");
        assert_eq!(config.settings.default_timeout_secs, None);
        config.validate().unwrap();

        config.settings.log_level = "verbose".into();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = HarnessConfig::load(file.path()).await.unwrap();
        assert_eq!(config.targets.len(), 2);

        let missing = HarnessConfig::load("/nonexistent/harness.toml").await.unwrap_err();
        assert!(matches!(missing, HarnessError::Config(ConfigError::Read { .. })));
    }

    #[tokio::test]
    async fn test_load_anchors_relative_mounts_to_definition_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = HarnessConfig::load(&path).await.unwrap();

        let source = &config.services["mock_uss"].mounts[0].source;
        let expected = std::path::absolute(dir.path()).unwrap().join("build/test-certs");
        assert_eq!(Path::new(source), expected.as_path());
    }
}
