//! Stage execution.
//!
//! [`StageExecutor::execute`] runs one [`StageSpec`] against its resolved
//! environment and always returns a [`StageResult`]: every stage-local error
//! (spawn failure, non-zero exit, timeout, container start or readiness
//! failure, cancellation) is folded into a failed result.

mod container;
mod output;
mod process;

use crate::cancellation::{CancellationToken, CleanupRegistry};
use crate::config::{template, Environment, RunMode};
use crate::container::ContainerLifecycleManager;
use crate::core::{FailureKind, StageResult};
use crate::errors::ConfigError;
use crate::stages::{ExecutableUnit, StageSpec};
use chrono::Utc;
use output::{CapturedOutput, OutputCollector};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default cap on captured output kept in a stage diagnostic.
pub const DEFAULT_OUTPUT_LIMIT: usize = 16 * 1024;

/// Prefix of stdout lines that publish a declared export.
pub const EXPORT_PREFIX: &str = "::export ";

/// Per-stage execution context.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Run environment plus the exports of completed dependencies.
    pub env: Arc<Environment>,
    /// Run-wide cancellation.
    pub cancel: Arc<CancellationToken>,
    /// Run-wide cleanup registry.
    pub cleanup: Arc<CleanupRegistry>,
    /// Run mode.
    pub mode: RunMode,
}

impl StageContext {
    /// Creates a context with a fresh token and registry.
    #[must_use]
    pub fn new(env: Environment, mode: RunMode) -> Self {
        Self {
            env: Arc::new(env),
            cancel: Arc::new(CancellationToken::new()),
            cleanup: Arc::new(CleanupRegistry::new()),
            mode,
        }
    }
}

/// How a unit of work ended, before it becomes a [`StageResult`].
#[derive(Debug, Clone, Default)]
pub(crate) struct Completion {
    pub(crate) failure: Option<FailureKind>,
    pub(crate) exit_code: Option<i32>,
    pub(crate) diagnostic: String,
    pub(crate) output: CapturedOutput,
}

impl Completion {
    pub(crate) fn exited(code: i32, output: CapturedOutput) -> Self {
        Self {
            failure: (code != 0).then_some(FailureKind::ProcessExit),
            exit_code: Some(code),
            diagnostic: if code == 0 {
                String::new()
            } else {
                format!("exited with code {code}")
            },
            output,
        }
    }

    pub(crate) fn ok(diagnostic: impl Into<String>) -> Self {
        Self {
            diagnostic: diagnostic.into(),
            ..Self::default()
        }
    }

    pub(crate) fn failed(kind: FailureKind, diagnostic: impl Into<String>) -> Self {
        Self {
            failure: Some(kind),
            diagnostic: diagnostic.into(),
            ..Self::default()
        }
    }

    pub(crate) fn with_output(mut self, output: CapturedOutput) -> Self {
        self.output = output;
        self
    }
}

/// Builds the environment a stage runs with: `base` plus its expanded stage variables.
///
/// # Errors
///
/// Returns [`ConfigError::UnresolvedPlaceholder`] if a stage variable references
/// an unknown name.
pub fn stage_environment(spec: &StageSpec, base: &Environment) -> Result<Environment, ConfigError> {
    let mut expanded = BTreeMap::new();
    for (key, value) in spec.env() {
        let value = template::expand(value, base).map_err(|name| ConfigError::UnresolvedPlaceholder {
            stage: spec.id().to_string(),
            name,
        })?;
        expanded.insert(key.clone(), value);
    }
    Ok(base.layered(&expanded))
}

/// Runs individual stages.
#[derive(Debug, Clone)]
pub struct StageExecutor {
    containers: Arc<ContainerLifecycleManager>,
    default_timeout: Option<Duration>,
    output_limit: usize,
}

impl StageExecutor {
    /// Creates an executor that delegates container work to `containers`.
    #[must_use]
    pub fn new(containers: Arc<ContainerLifecycleManager>) -> Self {
        Self {
            containers,
            default_timeout: None,
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }

    /// Sets the timeout for stages that declare none.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sets the captured-output cap.
    #[must_use]
    pub fn with_output_limit(mut self, limit: usize) -> Self {
        self.output_limit = limit;
        self
    }

    /// Returns the container lifecycle manager.
    #[must_use]
    pub fn containers(&self) -> &Arc<ContainerLifecycleManager> {
        &self.containers
    }

    /// Executes one stage. Never fails: errors become a failed result.
    pub async fn execute(&self, spec: &StageSpec, ctx: &StageContext) -> StageResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let timeout = spec.timeout().or(self.default_timeout);

        let collector = OutputCollector::new(self.output_limit)
            .with_summary(spec.suite_summary())
            .with_exports(spec.exports());
        let completion = match stage_environment(spec, &ctx.env) {
            Err(e) => Completion::failed(FailureKind::Spawn, e.to_string()),
            Ok(env) => {
                debug!(stage = %spec.id(), kind = spec.unit().kind(), timeout_secs = ?timeout.map(|t| t.as_secs_f64()), "executing stage");
                match spec.unit() {
                    ExecutableUnit::Process(command) => match command.render(spec.id(), &env) {
                        Ok(command) => process::run_command(&command, &env, timeout, &ctx.cancel, collector).await,
                        Err(e) => Completion::failed(FailureKind::Spawn, e.to_string()),
                    },
                    ExecutableUnit::Container(stage) => {
                        container::run(&self.containers, spec.id(), stage, &env, ctx, timeout, collector).await
                    }
                }
            }
        };

        Self::finish(spec, completion, started_at, clock.elapsed())
    }

    fn finish(
        spec: &StageSpec,
        completion: Completion,
        started_at: chrono::DateTime<Utc>,
        duration: Duration,
    ) -> StageResult {
        let CapturedOutput { tail, suite, exports } = completion.output;
        let captured = tail.trim_end();
        let diagnostic = match (completion.diagnostic.is_empty(), captured.is_empty()) {
            (true, _) => captured.to_string(),
            (false, true) => completion.diagnostic.clone(),
            (false, false) => format!("{}\n{captured}", completion.diagnostic),
        };

        let result = match completion.failure {
            None => StageResult::succeeded(spec.id(), started_at, duration).with_exports(exports),
            Some(kind) => {
                let failed = StageResult::failed(spec.id(), kind, started_at, duration);
                match completion.exit_code {
                    Some(code) => failed.with_exit_code(code),
                    None => failed,
                }
            }
        }
        .with_diagnostic(diagnostic)
        .with_suite(suite);

        match result.failure() {
            None => info!(stage = %spec.id(), duration_ms = result.duration_ms(), "stage succeeded"),
            Some(kind) => warn!(
                stage = %spec.id(),
                %kind,
                exit_code = ?result.exit_code(),
                duration_ms = result.duration_ms(),
                "stage failed: {}",
                completion.diagnostic
            ),
        }
        result
    }
}
