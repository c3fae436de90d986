//! Text, JSON and GraphViz rendering of run reports.

use super::aggregator::{PipelineReport, ReportEntry};
use crate::core::{FailureKind, StageOutcome};
use crate::pipeline::StageGraph;
use serde::Serialize;
use std::fmt::Write as _;
use std::io::{self, Write};

/// Report output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable table.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Human-readable rendering.
pub trait Render {
    /// Writes the text form of `self`.
    fn render_text(&self, w: &mut dyn Write) -> io::Result<()>;
}

/// Writes `payload` in the requested format.
///
/// # Errors
///
/// Returns any write or serialization error.
pub fn write_report<T: Render + Serialize>(payload: &T, format: OutputFormat, w: &mut dyn Write) -> io::Result<()> {
    match format {
        OutputFormat::Text => payload.render_text(w),
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *w, payload)?;
            writeln!(w)
        }
    }
}

fn detail(entry: &ReportEntry) -> String {
    match (entry.outcome, entry.failure, &entry.skip_reason) {
        (StageOutcome::Failed, Some(FailureKind::ProcessExit), _) => match entry.exit_code {
            Some(code) => format!("exit code {code}"),
            None => FailureKind::ProcessExit.to_string(),
        },
        (StageOutcome::Failed, Some(kind), _) => kind.to_string(),
        (StageOutcome::Skipped, _, Some(reason)) => reason.to_string(),
        (StageOutcome::Skipped, _, None) => "not run".to_string(),
        _ => match entry.suite {
            Some(counts) => format!("{} passed, {} failed", counts.passed, counts.failed),
            None => String::new(),
        },
    }
}

impl Render for PipelineReport {
    fn render_text(&self, w: &mut dyn Write) -> io::Result<()> {
        let width = self.stages.iter().map(|e| e.stage.len()).max().unwrap_or(5).max(5);

        writeln!(w, "Target: {} ({}) run {}", self.target, self.mode, self.run_id)?;
        writeln!(w)?;
        writeln!(w, "{:<width$}  {:<9}  {:>10}  DETAIL", "STAGE", "OUTCOME", "DURATION")?;
        for entry in &self.stages {
            let duration = format!("{:.2}s", entry.duration_ms / 1000.0);
            writeln!(
                w,
                "{:<width$}  {:<9}  {:>10}  {}",
                entry.stage,
                entry.outcome.to_string(),
                duration,
                detail(entry)
            )?;
        }

        for entry in self.stages.iter().filter(|e| e.outcome == StageOutcome::Failed) {
            if entry.diagnostic.is_empty() {
                continue;
            }
            writeln!(w)?;
            writeln!(w, "--- {} ---", entry.stage)?;
            for line in entry.diagnostic.lines() {
                writeln!(w, "  {line}")?;
            }
        }

        writeln!(w)?;
        write!(
            w,
            "{} succeeded, {} failed, {} skipped in {:.2}s",
            self.totals.succeeded,
            self.totals.failed,
            self.totals.skipped,
            self.duration_ms / 1000.0
        )?;
        if let Some(suite) = self.suite {
            write!(w, "; tests: {} passed, {} failed", suite.passed, suite.failed)?;
        }
        if self.cancelled {
            write!(w, " (cancelled)")?;
        }
        writeln!(w)?;
        writeln!(w, "Final result: {}", self.verdict.label())
    }
}

fn color(outcome: Option<StageOutcome>) -> &'static str {
    match outcome {
        Some(StageOutcome::Succeeded) => "palegreen",
        Some(StageOutcome::Failed) => "salmon",
        Some(StageOutcome::Skipped) => "lightgrey",
        None => "white",
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Renders `graph` as GraphViz, colouring nodes by their outcome in `report`.
#[must_use]
pub fn to_dot(graph: &StageGraph, report: Option<&PipelineReport>) -> String {
    let outcome = |id: &str| report.and_then(|r| r.stages.iter().find(|e| e.stage == id)).map(|e| e.outcome);

    let mut out = String::new();
    let _ = writeln!(out, "digraph {} {{", quote(graph.name()));
    let _ = writeln!(out, "  rankdir=LR;");
    let _ = writeln!(out, "  node [shape=box, style=filled];");
    for stage in graph.stages() {
        let _ = writeln!(
            out,
            "  {} [label={}, fillcolor={}];",
            quote(stage.id()),
            quote(&format!("{}\\n{}", stage.id(), stage.unit().kind())),
            color(outcome(stage.id()))
        );
    }
    for stage in graph.stages() {
        for dep in stage.dependencies() {
            let _ = writeln!(out, "  {} -> {};", quote(dep), quote(stage.id()));
        }
    }
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunMode;
    use crate::core::{SkipReason, StageResult};
    use crate::pipeline::PipelineRun;
    use crate::stages::StageSpec;
    use chrono::Utc;
    use std::time::Duration;

    fn graph() -> StageGraph {
        StageGraph::new(
            "test",
            vec![
                StageSpec::shell("lint", "true"),
                StageSpec::shell("unit", "true").depends_on(["lint"]),
            ],
        )
        .unwrap()
    }

    fn failed_report() -> PipelineReport {
        let mut run = PipelineRun::new(graph(), RunMode { ci: true, test: true });
        run.record(
            StageResult::failed("lint", FailureKind::ProcessExit, Utc::now(), Duration::from_millis(1500))
                .with_exit_code(1)
                .with_diagnostic("would reformat main.py"),
        );
        run.record(StageResult::skipped("unit", SkipReason::DependencyFailed("lint".into())));
        run.finalize(Duration::from_secs(2));
        run.report()
    }

    #[test]
    fn test_text_report() {
        let mut buffer = Vec::new();
        write_report(&failed_report(), OutputFormat::Text, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.contains("lint   failed"));
        assert!(text.contains("exit code 1"));
        assert!(text.contains("dependency 'lint' did not succeed"));
        assert!(text.contains("  would reformat main.py"));
        assert!(text.contains("0 succeeded, 1 failed, 1 skipped"));
        assert!(text.trim_end().ends_with("Final result: FAILURE"));
    }

    #[test]
    fn test_json_report_round_trips() {
        let report = failed_report();
        let mut buffer = Vec::new();
        write_report(&report, OutputFormat::Json, &mut buffer).unwrap();

        let parsed: PipelineReport = serde_json::from_slice(&buffer).unwrap();
        pretty_assertions::assert_eq!(parsed, report);

        let value: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(value["verdict"], "failed");
        assert_eq!(value["stages"][1]["outcome"], "skipped");
    }

    #[test]
    fn test_dot_colours_by_outcome() {
        let dot = to_dot(&graph(), Some(&failed_report()));
        assert!(dot.starts_with("digraph \"test\" {"));
        assert!(dot.contains("\"lint\" -> \"unit\";"));
        assert!(dot.contains("fillcolor=salmon"));
        assert!(dot.contains("fillcolor=lightgrey"));

        let plain = to_dot(&graph(), None);
        assert!(plain.contains("fillcolor=white"));
    }
}
