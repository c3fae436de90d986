//! Pipeline builder with validation.

use super::StageGraph;
use crate::errors::GraphError;
use crate::stages::StageSpec;
use std::collections::HashSet;

/// Collects stage declarations and builds a validated [`StageGraph`].
///
/// Duplicate ids are rejected as soon as they are added; dependencies may
/// name stages declared later, so they are only checked by [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<StageSpec>,
    ids: HashSet<String>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            ids: HashSet::new(),
        }
    }

    /// Adds a stage.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateStage`] if the id is already declared.
    pub fn stage(mut self, spec: StageSpec) -> Result<Self, GraphError> {
        self.add_stage(spec)?;
        Ok(self)
    }

    /// Adds a stage in place.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateStage`] if the id is already declared.
    pub fn add_stage(&mut self, spec: StageSpec) -> Result<(), GraphError> {
        if !self.ids.insert(spec.id().to_string()) {
            return Err(GraphError::DuplicateStage(spec.id().to_string()));
        }
        self.stages.push(spec);
        Ok(())
    }

    /// Builds the validated graph.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] for an empty pipeline, an unknown dependency or
    /// a cycle.
    pub fn build(self) -> Result<StageGraph, GraphError> {
        StageGraph::new(self.name, self.stages)
    }
}
