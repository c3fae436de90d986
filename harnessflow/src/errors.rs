//! Error types for the harnessflow orchestrator.
//!
//! Two families live here. Fatal errors (`ConfigError`, `GraphError`) abort a
//! run before any stage executes and map onto the reserved exit-code range.
//! Container errors are stage-local: the executor folds them into a failed
//! [`StageResult`](crate::core::StageResult) and they only propagate along
//! dependency edges.

use std::time::Duration;
use thiserror::Error;

/// Process exit codes used by the orchestrator.
///
/// Stage failures propagate the first non-zero stage exit code; the values in
/// [`RESERVED`] belong to orchestration-internal conditions and are never
/// passed through from a stage (see [`from_stage`]).
pub mod exit_codes {
    /// Every selected stage succeeded.
    pub const SUCCESS: i32 = 0;
    /// A stage failed without reporting an exit code of its own (timeout, spawn error).
    pub const STAGE_FAILURE: i32 = 1;
    /// Unknown target or malformed command line.
    pub const USAGE: i32 = 64;
    /// Configuration could not be resolved.
    pub const CONFIG: i32 = 65;
    /// The stage graph is invalid (cycle, unknown dependency, duplicate id).
    pub const GRAPH: i32 = 66;
    /// Unexpected internal failure.
    pub const INTERNAL: i32 = 70;
    /// The run was cancelled before any stage failed.
    pub const CANCELLED: i32 = 130;

    /// Codes only the orchestrator may exit with.
    pub const RESERVED: [i32; 5] = [USAGE, CONFIG, GRAPH, INTERNAL, CANCELLED];

    /// Maps a stage's own exit code to the run exit code it propagates as.
    ///
    /// Codes in [`RESERVED`] and codes outside `1..=255` become
    /// [`STAGE_FAILURE`].
    #[must_use]
    pub fn from_stage(code: i32) -> i32 {
        if (1..=255).contains(&code) && !RESERVED.contains(&code) {
            code
        } else {
            STAGE_FAILURE
        }
    }
}

/// The top-level error type for harnessflow operations.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Configuration could not be resolved.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The stage graph is invalid.
    #[error("{0}")]
    Graph(#[from] GraphError),

    /// A container operation failed outside of a stage.
    #[error("{0}")]
    Container(#[from] ContainerError),

    /// Malformed command-line input.
    #[error("{0}")]
    Usage(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Returns the process exit code this error maps to.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => exit_codes::CONFIG,
            Self::Graph(GraphError::UnknownTarget { .. }) | Self::Usage(_) => exit_codes::USAGE,
            Self::Graph(_) => exit_codes::GRAPH,
            Self::Container(_) | Self::Internal(_) | Self::Io(_) => exit_codes::INTERNAL,
        }
    }
}

/// Errors raised while resolving configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required value resolved to an empty string.
    #[error("required value '{key}' resolved to an empty string")]
    MissingRequired {
        /// The variable name.
        key: String,
    },

    /// A value failed validation.
    #[error("invalid value '{value}' for '{key}': {reason}")]
    InvalidValue {
        /// The variable or field name.
        key: String,
        /// The offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A `${NAME}` placeholder has no value in the stage environment.
    #[error("stage '{stage}' references undefined variable '{name}'")]
    UnresolvedPlaceholder {
        /// The stage containing the placeholder.
        stage: String,
        /// The placeholder name.
        name: String,
    },

    /// A container stage names a service that is not defined.
    #[error("stage '{stage}' references unknown service '{service}'")]
    UnknownService {
        /// The stage id.
        stage: String,
        /// The missing service name.
        service: String,
    },

    /// The pipeline definition could not be read.
    #[error("failed to read pipeline definition '{path}': {reason}")]
    Read {
        /// Path of the definition file.
        path: String,
        /// Underlying error.
        reason: String,
    },

    /// The pipeline definition could not be parsed.
    #[error("failed to parse pipeline definition: {0}")]
    Parse(String),
}

impl ConfigError {
    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid(key: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Error raised when the declared dependencies contain a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct GraphCycleError {
    /// The stages forming the cycle, first stage repeated at the end.
    pub cycle_path: Vec<String>,
}

impl GraphCycleError {
    /// Creates a new cycle error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

/// Errors raised while building or selecting from a stage graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The dependency graph contains a cycle.
    #[error("{0}")]
    Cycle(#[from] GraphCycleError),

    /// A stage depends on a stage that does not exist.
    #[error("Stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency {
        /// The depending stage.
        stage: String,
        /// The missing dependency.
        dependency: String,
    },

    /// Two stages share an identifier.
    #[error("Stage '{0}' is declared more than once")]
    DuplicateStage(String),

    /// A target names a stage that does not exist.
    #[error("Target '{target}' references unknown stage '{stage}'")]
    UnknownTargetStage {
        /// The target name.
        target: String,
        /// The missing stage.
        stage: String,
    },

    /// The requested pipeline target is not defined.
    #[error("Unknown pipeline target '{target}' (known targets: {})", known.join(", "))]
    UnknownTarget {
        /// The requested target.
        target: String,
        /// All defined targets.
        known: Vec<String>,
    },

    /// The graph has no stages.
    #[error("Pipeline has no stages")]
    Empty,
}

/// Errors raised by container lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContainerError {
    /// The container could not be created or started.
    #[error("failed to start container '{name}': {reason}")]
    Start {
        /// The container name.
        name: String,
        /// Runtime-supplied reason (missing image, port bound, bad mount).
        reason: String,
    },

    /// The container did not become ready in time.
    #[error("container '{name}' not ready after {}s", timeout.as_secs_f64())]
    Timeout {
        /// The container name.
        name: String,
        /// The readiness timeout that expired.
        timeout: Duration,
    },

    /// The container does not exist.
    #[error("container '{0}' not found")]
    NotFound(String),

    /// The container exited before it became ready.
    #[error("container '{name}' exited before becoming ready")]
    ExitedEarly {
        /// The container name.
        name: String,
    },

    /// Any other runtime failure.
    #[error("container runtime error: {0}")]
    Runtime(String),
}

impl ContainerError {
    /// Creates a start error.
    #[must_use]
    pub fn start(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Start {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_message() {
        let err = GraphCycleError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
            "a".to_string(),
        ]);

        assert!(err.to_string().contains("a -> b -> c -> a"));
    }

    #[test]
    fn test_exit_codes_are_distinct_from_stage_failures() {
        let config: HarnessError = ConfigError::MissingRequired {
            key: "MOCK_USS_PUBLIC_KEY".to_string(),
        }
        .into();
        let cycle: HarnessError = GraphError::from(GraphCycleError::new(vec!["a".into(), "a".into()])).into();
        let target: HarnessError = GraphError::UnknownTarget {
            target: "nope".to_string(),
            known: vec!["lint".to_string()],
        }
        .into();

        assert_eq!(config.exit_code(), exit_codes::CONFIG);
        assert_eq!(cycle.exit_code(), exit_codes::GRAPH);
        assert_eq!(target.exit_code(), exit_codes::USAGE);
    }

    #[test]
    fn test_stage_codes_never_reach_reserved_range() {
        for reserved in exit_codes::RESERVED {
            assert_eq!(exit_codes::from_stage(reserved), exit_codes::STAGE_FAILURE);
        }
        assert_eq!(exit_codes::from_stage(2), 2);
        assert_eq!(exit_codes::from_stage(137), 137);
        assert_eq!(exit_codes::from_stage(256), exit_codes::STAGE_FAILURE);
        assert_eq!(exit_codes::from_stage(-1), exit_codes::STAGE_FAILURE);
        assert_eq!(HarnessError::Usage("bad flag".into()).exit_code(), exit_codes::USAGE);
    }

    #[test]
    fn test_unknown_target_lists_known() {
        let err = GraphError::UnknownTarget {
            target: "deploy".to_string(),
            known: vec!["lint".to_string(), "test".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Unknown pipeline target 'deploy' (known targets: lint, test)"
        );
    }

    #[test]
    fn test_container_timeout_message() {
        let err = ContainerError::Timeout {
            name: "mock_uss".to_string(),
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "container 'mock_uss' not ready after 1.5s");
    }
}
