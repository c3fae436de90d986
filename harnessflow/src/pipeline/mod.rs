//! Pipeline definition and execution.
//!
//! This module provides:
//! - [`StageGraph`]: the validated, acyclic stage graph and target selection
//! - [`PipelineBuilder`]: incremental graph construction
//! - [`Scheduler`]: bounded-concurrency execution with skip propagation
//! - [`PipelineRun`]: the results of one execution

mod builder;
mod graph;
mod run;
mod scheduler;


pub use builder::PipelineBuilder;
pub use graph::StageGraph;
pub use run::PipelineRun;
pub use scheduler::{Scheduler, DEFAULT_CLEANUP_TIMEOUT, DEFAULT_CONCURRENCY};
