//! Aggregating and rendering run results.

mod aggregator;
mod render;

pub use aggregator::{OutcomeTotals, PipelineReport, ReportEntry, ResultAggregator, Verdict};
pub use render::{to_dot, write_report, OutputFormat, Render};
