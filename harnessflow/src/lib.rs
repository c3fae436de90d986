//! # Harnessflow
//!
//! Runs build, lint and test stages in dependency order, with ephemeral
//! service containers started, probed and torn down around them.
//!
//! Harnessflow provides:
//!
//! - **Stage graphs**: stages declare dependencies; cycles and unknown
//!   references are rejected before anything runs
//! - **Bounded parallelism**: independent stages run concurrently up to a limit
//! - **Container lifecycle**: remove-before-start, readiness probing and
//!   guaranteed teardown through a container runtime seam
//! - **Layered configuration**: built-in defaults, mode tables, process
//!   environment and explicit overrides
//! - **Aggregated reporting**: one verdict, one exit code, text/JSON/GraphViz
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use harnessflow::prelude::*;
//!
//! let config = HarnessConfig::load("harness.toml").await?;
//! let runtime = Arc::new(BollardRuntime::connect_local()?);
//! let harness = Harness::new(config, runtime);
//!
//! let run = harness
//!     .run(&RunRequest::new("lint"), Arc::new(CancellationToken::new()))
//!     .await?;
//! std::process::exit(run.exit_code());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod container;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod harness;
pub mod observability;
pub mod pipeline;
pub mod report;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancellationToken, CleanupRegistry};
    pub use crate::config::{ConfigResolver, Environment, HarnessConfig, Overrides, RunMode};
    pub use crate::container::{BollardRuntime, ContainerLifecycleManager, ContainerRuntime, ReadinessProbe, ServiceSpec};
    pub use crate::core::{FailureKind, SkipReason, StageOutcome, StageResult, SuiteCounts};
    pub use crate::errors::{exit_codes, ConfigError, ContainerError, GraphError, HarnessError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{StageContext, StageExecutor};
    pub use crate::harness::{Harness, RunRequest};
    pub use crate::pipeline::{PipelineBuilder, PipelineRun, Scheduler, StageGraph};
    pub use crate::report::{OutputFormat, PipelineReport, ResultAggregator, Verdict};
    pub use crate::stages::{CommandSpec, ContainerStage, StageSpec, TeardownScope};
    pub use std::sync::Arc;
}
