//! Assertions over finished runs.

use crate::core::{FailureKind, SkipReason, StageOutcome};
use crate::pipeline::PipelineRun;

fn outcome_of(run: &PipelineRun, stage: &str) -> StageOutcome {
    match run.result(stage) {
        Some(result) => result.outcome(),
        None => panic!("stage '{stage}' has no result in run of '{}'", run.target()),
    }
}

/// Asserts that `stage` succeeded.
pub fn assert_stage_succeeded(run: &PipelineRun, stage: &str) {
    let outcome = outcome_of(run, stage);
    assert_eq!(outcome, StageOutcome::Succeeded, "expected '{stage}' to succeed, got {outcome}");
}

/// Asserts that `stage` failed with `kind`.
pub fn assert_stage_failed(run: &PipelineRun, stage: &str, kind: FailureKind) {
    let outcome = outcome_of(run, stage);
    assert_eq!(outcome, StageOutcome::Failed, "expected '{stage}' to fail, got {outcome}");
    let failure = run.result(stage).and_then(|r| r.failure());
    assert_eq!(failure, Some(kind), "unexpected failure kind for '{stage}'");
}

/// Asserts that `stage` was skipped for `reason`.
pub fn assert_stage_skipped(run: &PipelineRun, stage: &str, reason: &SkipReason) {
    let outcome = outcome_of(run, stage);
    assert_eq!(outcome, StageOutcome::Skipped, "expected '{stage}' to be skipped, got {outcome}");
    let actual = run.result(stage).and_then(|r| r.skip_reason());
    assert_eq!(actual, Some(reason), "unexpected skip reason for '{stage}'");
}

/// Asserts that no stage of `run` was started.
pub fn assert_nothing_started(run: &PipelineRun) {
    let started: Vec<_> = run
        .results()
        .filter(|r| r.outcome() != StageOutcome::Skipped)
        .map(|r| r.stage().to_string())
        .collect();
    assert!(started.is_empty(), "expected no stage to start, got {started:?}");
}
