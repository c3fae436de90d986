//! Core domain model types for harnessflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Stage outcome, lifecycle state and failure kinds
//! - The immutable stage result record

mod result;
mod status;

pub use result::{StageResult, SuiteCounts};
pub use status::{FailureKind, SkipReason, StageOutcome, StageState};
