//! Ready-made schedulers and graphs for tests and benchmarks.

use std::sync::Arc;
use std::time::Duration;

use super::MockContainerRuntime;
use crate::cancellation::CancellationToken;
use crate::config::{Environment, RunMode};
use crate::container::ContainerLifecycleManager;
use crate::errors::{GraphError, HarnessError};
use crate::events::CollectingEventSink;
use crate::executor::StageExecutor;
use crate::pipeline::{PipelineRun, Scheduler, StageGraph, DEFAULT_CONCURRENCY};
use crate::stages::StageSpec;

/// A scheduler wired to an in-memory runtime and a collecting sink.
pub struct TestFixture {
    /// The container runtime every stage talks to.
    pub runtime: Arc<MockContainerRuntime>,
    /// Every event emitted by the scheduler and the container manager.
    pub events: Arc<CollectingEventSink>,
    executor: Arc<StageExecutor>,
    concurrency: usize,
    env: Environment,
    mode: RunMode,
}

impl TestFixture {
    /// Creates a fixture over an empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::with_runtime(MockContainerRuntime::new())
    }

    /// Creates a fixture over `runtime`, polling readiness every 10ms.
    #[must_use]
    pub fn with_runtime(runtime: MockContainerRuntime) -> Self {
        let runtime = Arc::new(runtime);
        let events = Arc::new(CollectingEventSink::new());
        let manager = ContainerLifecycleManager::new(runtime.clone())
            .with_events(events.clone())
            .with_poll_interval(Duration::from_millis(10));
        Self {
            runtime,
            events,
            executor: Arc::new(StageExecutor::new(Arc::new(manager))),
            concurrency: DEFAULT_CONCURRENCY,
            env: Environment::new(),
            mode: RunMode { ci: true, test: true },
        }
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Adds a variable to the base environment.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.set(key, value);
        self
    }

    /// Sets the run mode.
    #[must_use]
    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns a scheduler configured like this fixture.
    #[must_use]
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.executor.clone())
            .with_concurrency(self.concurrency)
            .with_events(self.events.clone())
    }

    /// Runs `graph` to completion.
    pub async fn run(&self, graph: StageGraph) -> Result<PipelineRun, HarnessError> {
        self.run_with(graph, Arc::new(CancellationToken::new())).await
    }

    /// Runs `graph` with an externally controlled cancellation token.
    pub async fn run_with(&self, graph: StageGraph, cancel: Arc<CancellationToken>) -> Result<PipelineRun, HarnessError> {
        self.scheduler().run(graph, &self.env, self.mode, cancel).await
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds shell-stage graphs of common shapes.
#[derive(Debug, Clone)]
pub struct TestPipeline {
    name: String,
    stages: Vec<StageSpec>,
}

impl TestPipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Adds a shell stage.
    #[must_use]
    pub fn shell(mut self, id: &str, script: &str, deps: &[&str]) -> Self {
        self.stages.push(StageSpec::shell(id, script).depends_on(deps.iter().copied()));
        self
    }

    /// Adds an arbitrary stage.
    #[must_use]
    pub fn stage(mut self, spec: StageSpec) -> Self {
        self.stages.push(spec);
        self
    }

    /// `count` stages running `script`, each depending on the previous one.
    #[must_use]
    pub fn linear(name: impl Into<String>, count: usize, script: &str) -> Self {
        let mut pipeline = Self::new(name);
        for i in 0..count {
            let deps = i.checked_sub(1).map(|prev| format!("stage_{prev}"));
            pipeline.stages.push(StageSpec::shell(format!("stage_{i}"), script).depends_on(deps));
        }
        pipeline
    }

    /// `count` independent stages running `script`.
    #[must_use]
    pub fn wide(name: impl Into<String>, count: usize, script: &str) -> Self {
        let mut pipeline = Self::new(name);
        for i in 0..count {
            pipeline.stages.push(StageSpec::shell(format!("stage_{i}"), script));
        }
        pipeline
    }

    /// Returns the stage ids in declaration order.
    #[must_use]
    pub fn stage_ids(&self) -> Vec<&str> {
        self.stages.iter().map(StageSpec::id).collect()
    }

    /// Builds the graph.
    ///
    /// # Errors
    ///
    /// Returns any [`GraphError`] the stages produce.
    pub fn build(self) -> Result<StageGraph, GraphError> {
        StageGraph::new(self.name, self.stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::assert_stage_succeeded;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_linear_chains_stages() {
        let graph = TestPipeline::linear("chain", 3, "true").build().unwrap();
        assert_eq!(graph.topological_order(), vec!["stage_0", "stage_1", "stage_2"]);
        assert_eq!(graph.get("stage_2").unwrap().dependencies().to_vec(), vec!["stage_1"]);
    }

    #[test]
    fn test_wide_has_no_edges() {
        let pipeline = TestPipeline::wide("fan", 3, "true");
        assert_eq!(pipeline.stage_ids(), vec!["stage_0", "stage_1", "stage_2"]);
        let graph = pipeline.build().unwrap();
        assert!(graph.stages().iter().all(|s| s.dependencies().is_empty()));
    }

    #[tokio::test]
    async fn test_fixture_runs_with_base_env() {
        let fixture = TestFixture::new().with_env("GREETING", "hello").with_concurrency(1);
        let graph = TestPipeline::new("env")
            .shell("check", "test \"$GREETING\" = hello", &[])
            .build()
            .unwrap();

        let run = fixture.run(graph).await.unwrap();

        assert_stage_succeeded(&run, "check");
        assert_eq!(fixture.scheduler().concurrency(), 1);
    }
}
