//! One execution of a selected stage graph.

use super::StageGraph;
use crate::config::RunMode;
use crate::core::StageResult;
use crate::report::{PipelineReport, ResultAggregator, Verdict};
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// The stage graph of a run plus the results recorded so far.
///
/// Created when the run starts, populated as stages reach `Done`, and
/// finalized once nothing is runnable. Nothing is persisted across runs.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    run_id: Uuid,
    graph: StageGraph,
    mode: RunMode,
    results: Vec<Option<StageResult>>,
    completion_order: Vec<usize>,
    started_at: DateTime<Utc>,
    duration: Duration,
    cancelled: bool,
    verdict: Option<Verdict>,
}

impl PipelineRun {
    /// Creates an empty run over `graph`.
    #[must_use]
    pub fn new(graph: StageGraph, mode: RunMode) -> Self {
        let results = vec![None; graph.len()];
        Self {
            run_id: Uuid::new_v4(),
            graph,
            mode,
            results,
            completion_order: Vec::new(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
            cancelled: false,
            verdict: None,
        }
    }

    /// Returns the run identifier.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the target the graph was selected for.
    #[must_use]
    pub fn target(&self) -> &str {
        self.graph.name()
    }

    /// Returns the stage graph.
    #[must_use]
    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Returns the run mode.
    #[must_use]
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Returns when the run started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns the wall-clock duration, set on finalization.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Returns true if the run was cancelled.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Returns the result of a stage, if it has reached `Done`.
    #[must_use]
    pub fn result(&self, id: &str) -> Option<&StageResult> {
        self.graph.position(id).and_then(|i| self.results[i].as_ref())
    }

    /// Returns the recorded results in declaration order.
    pub fn results(&self) -> impl Iterator<Item = &StageResult> {
        self.results.iter().flatten()
    }

    /// Returns the recorded results in the order they completed.
    pub fn results_by_completion(&self) -> impl Iterator<Item = &StageResult> {
        self.completion_order.iter().filter_map(|&i| self.results[i].as_ref())
    }

    /// Returns true once every stage has a result.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.results.iter().all(Option::is_some)
    }

    /// Returns the verdict, once finalized.
    #[must_use]
    pub fn verdict(&self) -> Option<Verdict> {
        self.verdict
    }

    /// Records a stage result. Results are immutable: a second result for the
    /// same stage is ignored and `false` is returned.
    pub(crate) fn record(&mut self, result: StageResult) -> bool {
        let Some(i) = self.graph.position(result.stage()) else {
            return false;
        };
        if self.results[i].is_some() {
            return false;
        }
        self.results[i] = Some(result);
        self.completion_order.push(i);
        true
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Computes the verdict and freezes the duration.
    pub(crate) fn finalize(&mut self, duration: Duration) -> Verdict {
        self.duration = duration;
        let verdict = ResultAggregator::verdict(self);
        self.verdict = Some(verdict);
        verdict
    }

    /// Builds the aggregated report.
    #[must_use]
    pub fn report(&self) -> PipelineReport {
        ResultAggregator::aggregate(self)
    }

    /// Returns the process exit code for this run.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        ResultAggregator::exit_code(self)
    }
}
