//! Spans wrapping a pipeline run and each stage task.
//!
//! Field names follow the `pipeline.*` / `stage.*` attribute convention so
//! log lines emitted inside a stage carry the stage and run they belong to.

use crate::config::RunMode;
use tracing::{info_span, Span};
use uuid::Uuid;

/// Span covering one pipeline run.
#[must_use]
pub fn run_span(target: &str, run_id: Uuid, mode: RunMode) -> Span {
    info_span!(
        "pipeline",
        pipeline.name = %target,
        pipeline.run_id = %run_id,
        pipeline.mode = %mode,
    )
}

/// Span covering one stage task.
#[must_use]
pub fn stage_span(stage: &str, kind: &str) -> Span {
    info_span!("stage", stage.name = %stage, stage.kind = %kind)
}
