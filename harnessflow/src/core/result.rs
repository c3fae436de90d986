//! The immutable record of one stage execution.

use super::{FailureKind, SkipReason, StageOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::time::Duration;

/// Pass/fail counts reported by a sub-suite (pytest, go test, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteCounts {
    /// Passed test cases.
    pub passed: u64,
    /// Failed test cases.
    pub failed: u64,
}

impl SuiteCounts {
    /// Creates a new count pair.
    #[must_use]
    pub fn new(passed: u64, failed: u64) -> Self {
        Self { passed, failed }
    }

    /// Returns the total number of cases.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.passed + self.failed
    }
}

impl AddAssign for SuiteCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.passed += rhs.passed;
        self.failed += rhs.failed;
    }
}

/// Result of executing (or skipping) one stage.
///
/// Created by the stage executor or the scheduler, consumed by the result
/// aggregator. There are no mutating accessors; the `with_*` methods consume
/// the value and are only used while the result is being assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    stage: String,
    outcome: StageOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    skip_reason: Option<SkipReason>,
    duration_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    diagnostic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    suite: Option<SuiteCounts>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    exports: BTreeMap<String, String>,
}

impl StageResult {
    fn base(stage: impl Into<String>, outcome: StageOutcome) -> Self {
        Self {
            stage: stage.into(),
            outcome,
            exit_code: None,
            failure: None,
            skip_reason: None,
            duration_ms: 0.0,
            started_at: None,
            diagnostic: String::new(),
            suite: None,
            exports: BTreeMap::new(),
        }
    }

    /// Creates a succeeded result.
    #[must_use]
    pub fn succeeded(stage: impl Into<String>, started_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            exit_code: Some(0),
            started_at: Some(started_at),
            duration_ms: duration.as_secs_f64() * 1000.0,
            ..Self::base(stage, StageOutcome::Succeeded)
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failed(
        stage: impl Into<String>,
        kind: FailureKind,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            failure: Some(kind),
            started_at: Some(started_at),
            duration_ms: duration.as_secs_f64() * 1000.0,
            ..Self::base(stage, StageOutcome::Failed)
        }
    }

    /// Creates a skipped result; skipped stages never ran.
    #[must_use]
    pub fn skipped(stage: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            diagnostic: reason.to_string(),
            skip_reason: Some(reason),
            ..Self::base(stage, StageOutcome::Skipped)
        }
    }

    /// Sets the exit code.
    #[must_use]
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Sets the diagnostic text.
    #[must_use]
    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = diagnostic.into();
        self
    }

    /// Sets the sub-suite counts.
    #[must_use]
    pub fn with_suite(mut self, suite: Option<SuiteCounts>) -> Self {
        self.suite = suite;
        self
    }

    /// Sets the exported variables visible to dependents.
    #[must_use]
    pub fn with_exports(mut self, exports: BTreeMap<String, String>) -> Self {
        self.exports = exports;
        self
    }

    /// Returns the stage identifier.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Returns the outcome.
    #[must_use]
    pub fn outcome(&self) -> StageOutcome {
        self.outcome
    }

    /// Returns the exit code, if the stage produced one.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Returns the failure kind for failed stages.
    #[must_use]
    pub fn failure(&self) -> Option<FailureKind> {
        self.failure
    }

    /// Returns the skip reason for skipped stages.
    #[must_use]
    pub fn skip_reason(&self) -> Option<&SkipReason> {
        self.skip_reason.as_ref()
    }

    /// Returns the duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    /// Returns the duration.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_ms / 1000.0)
    }

    /// Returns when the stage started, if it ran.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns the captured diagnostic text.
    #[must_use]
    pub fn diagnostic(&self) -> &str {
        &self.diagnostic
    }

    /// Returns the sub-suite counts, if any were parsed.
    #[must_use]
    pub fn suite(&self) -> Option<SuiteCounts> {
        self.suite
    }

    /// Returns the variables this stage exported.
    #[must_use]
    pub fn exports(&self) -> &BTreeMap<String, String> {
        &self.exports
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}
