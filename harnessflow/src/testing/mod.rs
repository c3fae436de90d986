//! Test support: an in-memory container runtime, scheduler fixtures and
//! assertions over finished runs.

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_nothing_started, assert_stage_failed, assert_stage_skipped, assert_stage_succeeded};
pub use fixtures::{TestFixture, TestPipeline};
pub use mocks::{MockContainerRuntime, KILLED_EXIT_CODE};
