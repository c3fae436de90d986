//! Dependency-ordered, bounded-concurrency execution of a stage graph.

use super::{PipelineRun, StageGraph};
use crate::cancellation::{CancellationToken, CleanupRegistry};
use crate::config::{Environment, RunMode};
use crate::core::{FailureKind, SkipReason, StageOutcome, StageResult, StageState};
use crate::errors::HarnessError;
use crate::events::{types, EventSink, NoOpEventSink};
use crate::executor::{StageContext, StageExecutor};
use crate::observability::{run_span, stage_span};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tracing::{debug, info, warn, Instrument};

/// Default number of stages that may run at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default bound on each run-scoped cleanup callback.
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs a [`StageGraph`] to completion.
///
/// Each stage moves through `Pending -> Ready -> Running -> Done`. A stage is
/// `Ready` once every dependency succeeded; ready stages are dispatched in
/// declaration order while fewer than `concurrency` stages are running. When
/// a stage fails or is skipped, every stage that transitively depends on it
/// goes straight to `Done` with a skipped result. Independent subgraphs keep
/// running.
///
/// Cancellation marks every stage that has not started as skipped, lets
/// running stages observe the token and stop, then tears down containers.
pub struct Scheduler {
    executor: Arc<StageExecutor>,
    concurrency: usize,
    events: Arc<dyn EventSink>,
    cleanup_timeout: Duration,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("executor", &self.executor)
            .field("concurrency", &self.concurrency)
            .field("cleanup_timeout", &self.cleanup_timeout)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler over `executor`.
    #[must_use]
    pub fn new(executor: Arc<StageExecutor>) -> Self {
        Self {
            executor,
            concurrency: DEFAULT_CONCURRENCY,
            events: Arc::new(NoOpEventSink),
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
        }
    }

    /// Sets the concurrency limit (at least 1).
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the bound on each run-scoped cleanup callback.
    #[must_use]
    pub fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }

    /// Returns the concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Executes `graph` with `base_env` and returns the finalized run.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] if a stage references a placeholder
    /// that cannot be resolved. Nothing runs in that case. Stage failures are
    /// never errors; they are recorded in the returned run.
    pub async fn run(
        &self,
        graph: StageGraph,
        base_env: &Environment,
        mode: RunMode,
        cancel: Arc<CancellationToken>,
    ) -> Result<PipelineRun, HarnessError> {
        graph.validate_placeholders(base_env)?;

        let run = PipelineRun::new(graph, mode);
        let span = run_span(run.target(), run.run_id(), mode);
        Ok(self.execute(run, base_env, cancel).instrument(span).await)
    }

    async fn execute(&self, mut run: PipelineRun, base_env: &Environment, cancel: Arc<CancellationToken>) -> PipelineRun {
        let clock = Instant::now();
        let cleanup = Arc::new(CleanupRegistry::new());
        let mode = run.mode();
        let total = run.graph().len();

        info!(
            target_name = %run.target(),
            run_id = %run.run_id(),
            stages = total,
            concurrency = self.concurrency,
            %mode,
            "pipeline started"
        );
        self.events.try_emit(
            types::PIPELINE_STARTED,
            Some(json!({
                "target": run.target(),
                "run_id": run.run_id().to_string(),
                "stages": run.graph().stages().iter().map(|s| s.id()).collect::<Vec<_>>(),
                "mode": mode.to_string(),
            })),
        );

        let mut states = vec![StageState::Pending; total];
        let mut unmet: Vec<usize> = run.graph().stages().iter().map(|s| s.dependencies().len()).collect();
        let mut ready: BTreeSet<usize> = (0..total).filter(|&i| unmet[i] == 0).collect();
        for &i in &ready {
            states[i] = StageState::Ready;
        }
        let mut running = FuturesUnordered::new();
        let mut cancel_observed = false;

        loop {
            if cancel.is_cancelled() && !cancel_observed {
                cancel_observed = true;
                self.skip_cancelled(&mut run, &mut states, &cancel);
                ready.clear();
            }

            while running.len() < self.concurrency {
                let Some(pos) = ready.pop_first() else { break };
                states[pos] = StageState::Running;
                let ctx = StageContext {
                    env: Arc::new(Self::stage_env(&run, pos, base_env)),
                    cancel: Arc::clone(&cancel),
                    cleanup: Arc::clone(&cleanup),
                    mode,
                };
                running.push(self.dispatch(&run, pos, ctx));
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                Some((pos, joined)) = running.next() => {
                    states[pos] = StageState::Done;
                    let result = Self::joined_result(&run, pos, joined);
                    self.complete(&mut run, &mut states, &mut unmet, &mut ready, pos, result);
                }
                () = cancel.cancelled(), if !cancel_observed => {}
            }
        }

        let summary = cleanup.run_all(self.cleanup_timeout).await;
        if !summary.failed.is_empty() {
            warn!(failed = ?summary.failed, "run-scoped cleanup incomplete");
        }
        self.executor.containers().teardown_all().await;

        let verdict = run.finalize(clock.elapsed());
        let exit_code = run.exit_code();
        info!(
            target_name = %run.target(),
            run_id = %run.run_id(),
            %verdict,
            exit_code,
            duration_ms = run.duration().as_secs_f64() * 1000.0,
            "pipeline completed"
        );
        self.events.try_emit(
            types::PIPELINE_COMPLETED,
            Some(json!({
                "target": run.target(),
                "run_id": run.run_id().to_string(),
                "verdict": verdict.to_string(),
                "exit_code": exit_code,
                "cancelled": run.was_cancelled(),
            })),
        );
        run
    }

    /// The base environment plus the exports of every transitive dependency,
    /// applied in declaration order.
    fn stage_env(run: &PipelineRun, pos: usize, base: &Environment) -> Environment {
        let graph = run.graph();
        let id = graph.stages()[pos].id();
        graph
            .transitive_dependencies(id)
            .into_iter()
            .filter_map(|dep| run.result(dep))
            .fold(base.clone(), |env, result| env.layered(result.exports()))
    }

    fn dispatch(
        &self,
        run: &PipelineRun,
        pos: usize,
        ctx: StageContext,
    ) -> impl Future<Output = (usize, Result<StageResult, JoinError>)> {
        let spec = run.graph().stages()[pos].clone();
        debug!(stage = %spec.id(), "dispatching stage");
        self.events.try_emit(types::STAGE_STARTED, Some(json!({ "stage": spec.id() })));

        let executor = Arc::clone(&self.executor);
        let span = stage_span(spec.id(), spec.unit().kind());
        let handle = tokio::spawn(async move { executor.execute(&spec, &ctx).await }.instrument(span));
        async move { (pos, handle.await) }
    }

    fn joined_result(run: &PipelineRun, pos: usize, joined: Result<StageResult, JoinError>) -> StageResult {
        let id = run.graph().stages()[pos].id();
        match joined {
            Ok(result) => result,
            Err(e) => {
                warn!(stage = %id, error = %e, "stage task did not complete");
                StageResult::failed(id, FailureKind::Internal, Utc::now(), Duration::ZERO)
                    .with_diagnostic(format!("stage task did not complete: {e}"))
            }
        }
    }

    fn complete(
        &self,
        run: &mut PipelineRun,
        states: &mut [StageState],
        unmet: &mut [usize],
        ready: &mut BTreeSet<usize>,
        pos: usize,
        result: StageResult,
    ) {
        let id = result.stage().to_string();
        match result.outcome() {
            StageOutcome::Succeeded => self.events.try_emit(
                types::STAGE_SUCCEEDED,
                Some(json!({ "stage": id, "duration_ms": result.duration_ms() })),
            ),
            _ => self.events.try_emit(
                types::STAGE_FAILED,
                Some(json!({
                    "stage": id,
                    "kind": result.failure().map(|k| k.to_string()),
                    "exit_code": result.exit_code(),
                    "duration_ms": result.duration_ms(),
                })),
            ),
        }

        let succeeded = result.is_success();
        run.record(result);

        if succeeded {
            for &child in run.graph().dependents_at(pos) {
                unmet[child] -= 1;
                if unmet[child] == 0 && states[child] == StageState::Pending {
                    states[child] = StageState::Ready;
                    ready.insert(child);
                }
            }
            return;
        }

        let dependents: Vec<String> = run
            .graph()
            .transitive_dependents(&id)
            .into_iter()
            .map(str::to_string)
            .collect();
        for dependent in dependents {
            let Some(child) = run.graph().position(&dependent) else {
                continue;
            };
            if states[child] == StageState::Done {
                continue;
            }
            states[child] = StageState::Done;
            ready.remove(&child);
            self.skip(run, StageResult::skipped(&dependent, SkipReason::DependencyFailed(id.clone())));
        }
    }

    fn skip_cancelled(&self, run: &mut PipelineRun, states: &mut [StageState], cancel: &CancellationToken) {
        let reason = cancel.reason().unwrap_or_else(|| "cancelled".to_string());
        warn!(target_name = %run.target(), %reason, "pipeline cancelled");
        self.events.try_emit(
            types::PIPELINE_CANCELLED,
            Some(json!({ "target": run.target(), "reason": reason })),
        );
        run.mark_cancelled();

        for pos in 0..states.len() {
            if matches!(states[pos], StageState::Pending | StageState::Ready) {
                states[pos] = StageState::Done;
                let id = run.graph().stages()[pos].id().to_string();
                self.skip(run, StageResult::skipped(id, SkipReason::Cancelled));
            }
        }
    }

    fn skip(&self, run: &mut PipelineRun, result: StageResult) {
        if let Some(reason) = result.skip_reason() {
            debug!(stage = %result.stage(), %reason, "stage skipped");
            self.events.try_emit(
                types::STAGE_SKIPPED,
                Some(json!({ "stage": result.stage(), "reason": reason.to_string() })),
            );
        }
        run.record(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerLifecycleManager;
    use crate::events::CollectingEventSink;
    use crate::stages::StageSpec;
    use crate::testing::MockContainerRuntime;
    use pretty_assertions::assert_eq;

    fn scheduler(events: Arc<CollectingEventSink>) -> Scheduler {
        let manager = ContainerLifecycleManager::new(Arc::new(MockContainerRuntime::new()));
        Scheduler::new(Arc::new(StageExecutor::new(Arc::new(manager))))
            .with_concurrency(2)
            .with_events(events)
    }

    async fn execute(graph: StageGraph, events: Arc<CollectingEventSink>) -> PipelineRun {
        scheduler(events)
            .run(graph, &Environment::new(), RunMode::default(), Arc::new(CancellationToken::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_dependent_observes_exports() {
        let graph = StageGraph::new(
            "deploy",
            vec![
                StageSpec::shell("build", "echo '::export IMAGE=monitoring:dev'").with_export("IMAGE"),
                StageSpec::shell("verify", "test \"$IMAGE\" = monitoring:dev").depends_on(["build"]),
            ],
        )
        .unwrap();

        let run = execute(graph, Arc::new(CollectingEventSink::new())).await;
        assert_eq!(run.exit_code(), 0);
        assert!(run.result("verify").unwrap().is_success());
    }

    #[tokio::test]
    async fn test_transitive_dependents_skipped_with_root_cause() {
        let graph = StageGraph::new(
            "test",
            vec![
                StageSpec::shell("lint", "exit 3"),
                StageSpec::shell("build", "true").depends_on(["lint"]),
                StageSpec::shell("unit", "true").depends_on(["build"]),
                StageSpec::shell("docs", "true"),
            ],
        )
        .unwrap();
        let events = Arc::new(CollectingEventSink::new());

        let run = execute(graph, events.clone()).await;

        for id in ["build", "unit"] {
            assert_eq!(
                run.result(id).unwrap().skip_reason(),
                Some(&SkipReason::DependencyFailed("lint".into()))
            );
        }
        assert!(run.result("docs").unwrap().is_success());
        assert_eq!(run.exit_code(), 3);
        assert_eq!(events.stages_for(types::STAGE_SKIPPED), vec!["build", "unit"]);
        assert_eq!(events.events_of_type(types::PIPELINE_COMPLETED).len(), 1);
    }

    #[tokio::test]
    async fn test_concurrency_limit_respected() {
        let dir = tempfile::tempdir().unwrap();
        let running = dir.path().join("running");
        let log = dir.path().join("peers.log");
        std::fs::create_dir(&running).unwrap();
        // Each stage records how many peers are running when it starts.
        let script = format!(
            "touch {r}/$$; ls {r} | wc -l >> {l}; sleep 0.2; rm {r}/$$",
            r = running.display(),
            l = log.display()
        );
        let stages = (0..5).map(|i| StageSpec::shell(format!("s{i}"), script.clone())).collect();
        let graph = StageGraph::new("wide", stages).unwrap();

        let run = execute(graph, Arc::new(CollectingEventSink::new())).await;
        assert_eq!(run.exit_code(), 0);

        let log = std::fs::read_to_string(log).unwrap();
        let counts: Vec<usize> = log.lines().filter_map(|l| l.trim().parse().ok()).collect();
        assert_eq!(counts.len(), 5);
        assert!(counts.iter().all(|&c| c <= 2), "peer counts {counts:?}");
    }

    #[tokio::test]
    async fn test_unresolved_placeholder_aborts_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let graph = StageGraph::new(
            "broken",
            vec![
                StageSpec::shell("first", format!("touch {}", marker.display())),
                StageSpec::shell("second", "true").with_env("URL", "${NOT_DEFINED}"),
            ],
        )
        .unwrap();
        let events = Arc::new(CollectingEventSink::new());

        let err = scheduler(events.clone())
            .run(graph, &Environment::new(), RunMode::default(), Arc::new(CancellationToken::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::Config(_)));
        assert!(!marker.exists());
        assert!(events.is_empty());
    }
}
