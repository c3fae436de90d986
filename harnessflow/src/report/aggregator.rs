//! Folding stage results into one verdict, exit code and report.

use crate::core::{FailureKind, SkipReason, StageOutcome, StageResult, SuiteCounts};
use crate::errors::exit_codes;
use crate::pipeline::PipelineRun;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The aggregate result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Every selected stage succeeded.
    Succeeded,
    /// At least one stage failed or was skipped.
    Failed,
}

impl Verdict {
    /// Returns the qualifier-style label (`SUCCESS` / `FAILURE`).
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "SUCCESS",
            Self::Failed => "FAILURE",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One row of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Stage identifier.
    pub stage: String,
    /// `process` or `container`.
    pub kind: String,
    /// Outcome; stages that never reached `Done` are reported as skipped.
    pub outcome: StageOutcome,
    /// Duration in milliseconds.
    pub duration_ms: f64,
    /// Exit code, if the stage produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Failure classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Skip reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    /// Captured diagnostic.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub diagnostic: String,
    /// Sub-suite counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite: Option<SuiteCounts>,
}

/// Number of stages per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeTotals {
    /// Succeeded stages.
    pub succeeded: usize,
    /// Failed stages.
    pub failed: usize,
    /// Skipped stages.
    pub skipped: usize,
}

/// The deterministic, declaration-ordered report of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Selected target.
    pub target: String,
    /// Run mode (`ci/test`, `interactive/run`, ...).
    pub mode: String,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
    /// Aggregate verdict.
    pub verdict: Verdict,
    /// Process exit code.
    pub exit_code: i32,
    /// Whether the run was cancelled.
    pub cancelled: bool,
    /// Stage counts per outcome.
    pub totals: OutcomeTotals,
    /// Summed sub-suite counts, if any stage reported them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite: Option<SuiteCounts>,
    /// Per-stage rows in declaration order.
    pub stages: Vec<ReportEntry>,
}

/// Folds stage results into verdicts, exit codes and reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator;

impl ResultAggregator {
    /// Succeeded only if every stage of the graph succeeded.
    #[must_use]
    pub fn verdict(run: &PipelineRun) -> Verdict {
        let all_succeeded = run
            .graph()
            .stages()
            .iter()
            .all(|s| run.result(s.id()).is_some_and(StageResult::is_success));
        if all_succeeded {
            Verdict::Succeeded
        } else {
            Verdict::Failed
        }
    }

    /// Computes the process exit code.
    ///
    /// - `0` iff every stage succeeded.
    /// - Otherwise the first non-zero stage exit code, in completion order,
    ///   mapped through [`exit_codes::from_stage`] so it never collides with
    ///   a reserved orchestration code.
    /// - A failure without an exit code (timeout, spawn error) gives `1`.
    /// - A cancelled run with no failure of its own gives `130`.
    #[must_use]
    pub fn exit_code(run: &PipelineRun) -> i32 {
        if Self::verdict(run) == Verdict::Succeeded {
            return exit_codes::SUCCESS;
        }

        let mut observed_failure = false;
        for result in run.results_by_completion() {
            if result.outcome() != StageOutcome::Failed || result.failure() == Some(FailureKind::Cancelled) {
                continue;
            }
            observed_failure = true;
            if let Some(code) = result.exit_code().filter(|&c| c != 0) {
                return exit_codes::from_stage(code);
            }
        }

        if !observed_failure && run.was_cancelled() {
            exit_codes::CANCELLED
        } else {
            exit_codes::STAGE_FAILURE
        }
    }

    /// Builds the full report.
    #[must_use]
    pub fn aggregate(run: &PipelineRun) -> PipelineReport {
        let mut totals = OutcomeTotals::default();
        let mut suite: Option<SuiteCounts> = None;
        let mut stages = Vec::with_capacity(run.graph().len());

        for spec in run.graph().stages() {
            let entry = match run.result(spec.id()) {
                Some(result) => {
                    if let Some(counts) = result.suite() {
                        *suite.get_or_insert_with(SuiteCounts::default) += counts;
                    }
                    ReportEntry {
                        stage: result.stage().to_string(),
                        kind: spec.unit().kind().to_string(),
                        outcome: result.outcome(),
                        duration_ms: result.duration_ms(),
                        exit_code: result.exit_code(),
                        failure: result.failure(),
                        skip_reason: result.skip_reason().cloned(),
                        diagnostic: result.diagnostic().to_string(),
                        suite: result.suite(),
                    }
                }
                None => ReportEntry {
                    stage: spec.id().to_string(),
                    kind: spec.unit().kind().to_string(),
                    outcome: StageOutcome::Skipped,
                    duration_ms: 0.0,
                    exit_code: None,
                    failure: None,
                    skip_reason: None,
                    diagnostic: String::new(),
                    suite: None,
                },
            };
            match entry.outcome {
                StageOutcome::Succeeded => totals.succeeded += 1,
                StageOutcome::Failed => totals.failed += 1,
                StageOutcome::Skipped => totals.skipped += 1,
            }
            stages.push(entry);
        }

        PipelineReport {
            run_id: run.run_id(),
            target: run.target().to_string(),
            mode: run.mode().to_string(),
            started_at: run.started_at(),
            duration_ms: run.duration().as_secs_f64() * 1000.0,
            verdict: run.verdict().unwrap_or_else(|| Self::verdict(run)),
            exit_code: Self::exit_code(run),
            cancelled: run.was_cancelled(),
            totals,
            suite,
            stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunMode;
    use crate::pipeline::StageGraph;
    use crate::stages::StageSpec;
    use std::time::Duration;

    fn run(ids: &[&str]) -> PipelineRun {
        let stages = ids.iter().map(|id| StageSpec::shell(*id, "true")).collect();
        PipelineRun::new(StageGraph::new("t", stages).unwrap(), RunMode::default())
    }

    fn ok(id: &str) -> StageResult {
        StageResult::succeeded(id, Utc::now(), Duration::from_millis(5))
    }

    fn failed(id: &str, code: Option<i32>) -> StageResult {
        let result = StageResult::failed(id, FailureKind::ProcessExit, Utc::now(), Duration::from_millis(5));
        match code {
            Some(code) => result.with_exit_code(code),
            None => result,
        }
    }

    #[test]
    fn test_all_succeeded_is_zero() {
        let mut run = run(&["a", "b"]);
        run.record(ok("b"));
        run.record(ok("a"));
        run.finalize(Duration::from_millis(10));

        assert_eq!(run.verdict(), Some(Verdict::Succeeded));
        assert_eq!(run.exit_code(), 0);
    }

    #[test]
    fn test_first_failure_in_completion_order_wins() {
        let mut run = run(&["a", "b", "c"]);
        run.record(failed("c", Some(2)));
        run.record(failed("a", Some(1)));
        run.record(ok("b"));

        assert_eq!(ResultAggregator::verdict(&run), Verdict::Failed);
        assert_eq!(run.exit_code(), 2);
    }

    #[test]
    fn test_failure_without_code_is_one() {
        let mut run = run(&["a", "b"]);
        run.record(failed("a", None));
        run.record(StageResult::skipped("b", SkipReason::DependencyFailed("a".into())));
        assert_eq!(run.exit_code(), exit_codes::STAGE_FAILURE);
    }

    #[test]
    fn test_reserved_stage_code_reported_as_stage_failure() {
        let mut run = run(&["lint", "qualifier"]);
        run.record(failed("lint", Some(exit_codes::CONFIG)));
        run.record(failed("qualifier", Some(exit_codes::CANCELLED)));
        run.finalize(Duration::from_millis(3));

        assert_eq!(run.exit_code(), exit_codes::STAGE_FAILURE);
        let report = run.report();
        assert_eq!(report.exit_code, exit_codes::STAGE_FAILURE);
        assert_eq!(report.stages[0].exit_code, Some(exit_codes::CONFIG));
    }

    #[test]
    fn test_cancelled_without_failure() {
        let mut run = run(&["a", "b"]);
        run.record(ok("a"));
        run.record(StageResult::skipped("b", SkipReason::Cancelled));
        run.mark_cancelled();
        assert_eq!(run.exit_code(), exit_codes::CANCELLED);

        let mut run2 = self::run(&["a"]);
        run2.record(StageResult::failed("a", FailureKind::Cancelled, Utc::now(), Duration::ZERO));
        run2.mark_cancelled();
        assert_eq!(run2.exit_code(), exit_codes::CANCELLED);
    }

    #[test]
    fn test_report_in_declaration_order_with_suite_totals() {
        let mut run = run(&["unit", "integration", "qualifier"]);
        run.record(ok("qualifier").with_suite(Some(SuiteCounts::new(3, 0))));
        run.record(failed("unit", Some(1)).with_suite(Some(SuiteCounts::new(10, 2))));
        run.record(StageResult::skipped("integration", SkipReason::DependencyFailed("unit".into())));
        run.finalize(Duration::from_millis(42));

        let report = run.report();

        let order: Vec<_> = report.stages.iter().map(|e| e.stage.as_str()).collect();
        assert_eq!(order, vec!["unit", "integration", "qualifier"]);
        assert_eq!(report.verdict, Verdict::Failed);
        assert_eq!(report.exit_code, 1);
        assert_eq!(report.suite, Some(SuiteCounts::new(13, 2)));
        assert_eq!(
            report.totals,
            OutcomeTotals {
                succeeded: 1,
                failed: 1,
                skipped: 1
            }
        );
        assert!((report.duration_ms - 42.0).abs() < f64::EPSILON);
    }
}
