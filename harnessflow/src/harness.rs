//! Composes a loaded definition, a container runtime and an event sink into a
//! runnable harness.

use std::sync::Arc;

use tracing::debug;

use crate::cancellation::CancellationToken;
use crate::config::{HarnessConfig, Overrides};
use crate::container::{ContainerLifecycleManager, ContainerRuntime};
use crate::errors::HarnessError;
use crate::events::{EventSink, LoggingEventSink};
use crate::executor::StageExecutor;
use crate::pipeline::{PipelineRun, Scheduler};
use crate::stages::ExecutableUnit;

/// One invocation: a target plus caller-supplied overrides.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Target name or stage id.
    pub target: String,
    /// Explicit configuration overrides.
    pub overrides: Overrides,
    /// Replaces `settings.concurrency` when set.
    pub concurrency: Option<usize>,
}

impl RunRequest {
    /// Creates a request for `target` with no overrides.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    /// Adds an override.
    #[must_use]
    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides = self.overrides.with(key, value);
        self
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }
}

/// Entry point tying configuration resolution, graph selection and scheduling
/// together.
pub struct Harness {
    config: HarnessConfig,
    runtime: Arc<dyn ContainerRuntime>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("stages", &self.config.stages.len())
            .field("targets", &self.config.targets.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Harness {
    /// Creates a harness that logs events through `tracing`.
    #[must_use]
    pub fn new(config: HarnessConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            config,
            runtime,
            events: Arc::new(LoggingEventSink::default()),
        }
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the definition this harness runs.
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Resolves configuration, selects the target and runs it.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] for unresolvable configuration,
    /// [`HarnessError::Graph`] for an unknown target and
    /// [`HarnessError::Container`] when the target needs containers and the
    /// engine does not answer. Nothing runs in any of these cases.
    pub async fn run(&self, request: &RunRequest, cancel: Arc<CancellationToken>) -> Result<PipelineRun, HarnessError> {
        let resolved = self.config.resolver().resolve(&request.overrides)?;
        let graph = self.config.graph_for_target(&request.target)?;
        let settings = &self.config.settings;
        debug!(
            target_name = %request.target,
            mode = %resolved.mode,
            stages = graph.len(),
            "resolved target"
        );
        if graph
            .stages()
            .iter()
            .any(|stage| matches!(stage.unit(), ExecutableUnit::Container(_)))
        {
            self.runtime.ping().await?;
        }

        let manager = ContainerLifecycleManager::new(self.runtime.clone())
            .with_events(self.events.clone())
            .with_stop_grace(settings.stop_grace());
        let executor = StageExecutor::new(Arc::new(manager))
            .with_default_timeout(settings.default_timeout())
            .with_output_limit(settings.output_limit_bytes);
        let scheduler = Scheduler::new(Arc::new(executor))
            .with_concurrency(request.concurrency.unwrap_or(settings.concurrency))
            .with_events(self.events.clone())
            .with_cleanup_timeout(settings.cleanup_timeout());

        scheduler.run(graph, &resolved.environment, resolved.mode, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{exit_codes, ConfigError, GraphError};
    use crate::events::{types, CollectingEventSink};
    use crate::testing::{assert_stage_succeeded, MockContainerRuntime};
    use pretty_assertions::assert_eq;

    const CONFIG: &str = r#"
[settings]
required = ["API_TOKEN"]

[defaults]
GREETING = "hello"

[[stages]]
id = "format"
script = "test \"${GREETING}\" = hello"

[[stages]]
id = "token"
script = "test -n \"$API_TOKEN\""
depends_on = ["format"]

[targets]
lint = ["format"]
"#;

    fn harness() -> (Harness, Arc<CollectingEventSink>) {
        let config = HarnessConfig::parse(CONFIG).unwrap();
        config.validate().unwrap();
        let events = Arc::new(CollectingEventSink::new());
        let harness = Harness::new(config, Arc::new(MockContainerRuntime::new())).with_events(events.clone());
        (harness, events)
    }

    #[tokio::test]
    async fn test_runs_declared_target() {
        let (harness, events) = harness();
        let request = RunRequest::new("lint").with_override("API_TOKEN", "secret");

        let run = harness.run(&request, Arc::new(CancellationToken::new())).await.unwrap();

        assert_stage_succeeded(&run, "format");
        assert!(run.result("token").is_none());
        assert_eq!(run.exit_code(), exit_codes::SUCCESS);
        assert_eq!(events.stages_for(types::STAGE_SUCCEEDED), vec!["format"]);
    }

    #[tokio::test]
    async fn test_stage_id_is_an_implicit_target() {
        let (harness, _) = harness();
        let request = RunRequest::new("token").with_override("API_TOKEN", "secret").with_concurrency(1);

        let run = harness.run(&request, Arc::new(CancellationToken::new())).await.unwrap();

        assert_stage_succeeded(&run, "format");
        assert_stage_succeeded(&run, "token");
    }

    #[tokio::test]
    async fn test_unknown_target_is_usage_error() {
        let (harness, events) = harness();
        let request = RunRequest::new("deploy").with_override("API_TOKEN", "secret");

        let err = harness.run(&request, Arc::new(CancellationToken::new())).await.unwrap_err();

        assert!(matches!(err, HarnessError::Graph(GraphError::UnknownTarget { .. })));
        assert_eq!(err.exit_code(), exit_codes::USAGE);
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_missing_required_value_is_config_error() {
        let (harness, events) = harness();

        let err = harness
            .run(&RunRequest::new("lint"), Arc::new(CancellationToken::new()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            HarnessError::Config(ConfigError::MissingRequired { ref key }) if key == "API_TOKEN"
        ));
        assert_eq!(err.exit_code(), exit_codes::CONFIG);
        assert!(events.is_empty());
    }

    const CONTAINER_CONFIG: &str = r#"
[services.mock_uss]
container_name = "mock_uss_scdsc"
image = "interuss/monitoring:latest"

[[stages]]
id = "lint"
script = "true"

[[stages]]
id = "deploy"
container = "mock_uss"

[targets]
lint = ["lint"]
deploy = ["deploy"]
"#;

    fn container_harness(runtime: MockContainerRuntime) -> (Harness, Arc<CollectingEventSink>) {
        let config = HarnessConfig::parse(CONTAINER_CONFIG).unwrap();
        config.validate().unwrap();
        let events = Arc::new(CollectingEventSink::new());
        (Harness::new(config, Arc::new(runtime)).with_events(events.clone()), events)
    }

    #[tokio::test]
    async fn test_unreachable_engine_fails_container_target_before_start() {
        let (harness, events) = container_harness(MockContainerRuntime::new().unreachable());

        let err = harness
            .run(&RunRequest::new("deploy"), Arc::new(CancellationToken::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::Container(_)));
        assert_eq!(err.exit_code(), exit_codes::INTERNAL);
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_process_target_runs_without_engine() {
        let (harness, _) = container_harness(MockContainerRuntime::new().unreachable());

        let run = harness
            .run(&RunRequest::new("lint"), Arc::new(CancellationToken::new()))
            .await
            .unwrap();

        assert_stage_succeeded(&run, "lint");
    }
}
