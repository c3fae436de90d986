//! The validated stage dependency graph.

use crate::config::{template, Environment};
use crate::errors::{ConfigError, GraphCycleError, GraphError};
use crate::stages::StageSpec;
use std::collections::{BTreeSet, HashMap, HashSet};

/// An acyclic graph of stages, kept in declaration order.
///
/// Construction validates identifiers, dependencies and acyclicity, so a
/// `StageGraph` value is always executable.
#[derive(Debug, Clone)]
pub struct StageGraph {
    name: String,
    stages: Vec<StageSpec>,
    index: HashMap<String, usize>,
    dependents: Vec<Vec<usize>>,
}

impl StageGraph {
    /// Builds a graph from stages in declaration order.
    ///
    /// # Errors
    ///
    /// - [`GraphError::Empty`] when there are no stages.
    /// - [`GraphError::DuplicateStage`] when two stages share an id.
    /// - [`GraphError::UnknownDependency`] when a dependency is not declared.
    /// - [`GraphError::Cycle`] when dependencies form a cycle.
    pub fn new(name: impl Into<String>, stages: Vec<StageSpec>) -> Result<Self, GraphError> {
        if stages.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut index = HashMap::with_capacity(stages.len());
        for (i, stage) in stages.iter().enumerate() {
            if index.insert(stage.id().to_string(), i).is_some() {
                return Err(GraphError::DuplicateStage(stage.id().to_string()));
            }
        }

        let mut dependents = vec![Vec::new(); stages.len()];
        for (i, stage) in stages.iter().enumerate() {
            for dep in stage.dependencies() {
                let Some(&d) = index.get(dep) else {
                    return Err(GraphError::UnknownDependency {
                        stage: stage.id().to_string(),
                        dependency: dep.clone(),
                    });
                };
                dependents[d].push(i);
            }
        }

        let graph = Self {
            name: name.into(),
            stages,
            index,
            dependents,
        };
        graph.detect_cycles()?;
        Ok(graph)
    }

    fn detect_cycles(&self) -> Result<(), GraphCycleError> {
        let mut visited = HashSet::new();
        let mut on_path = HashSet::new();
        let mut path = Vec::new();

        for i in 0..self.stages.len() {
            if !visited.contains(&i) {
                if let Some(cycle) = self.dfs_cycle(i, &mut visited, &mut on_path, &mut path) {
                    return Err(GraphCycleError::new(cycle));
                }
            }
        }
        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: usize,
        visited: &mut HashSet<usize>,
        on_path: &mut HashSet<usize>,
        path: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        on_path.insert(node);
        path.push(node);

        for dep in self.stages[node].dependencies() {
            let d = self.index[dep];
            if on_path.contains(&d) {
                let start = path.iter().position(|&n| n == d).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..]
                    .iter()
                    .map(|&n| self.stages[n].id().to_string())
                    .collect();
                cycle.push(dep.clone());
                return Some(cycle);
            }
            if !visited.contains(&d) {
                if let Some(cycle) = self.dfs_cycle(d, visited, on_path, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        on_path.remove(&node);
        None
    }

    /// Returns the graph name (the target it was selected for).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the graph has no stages. Never true for a built graph.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns the stages in declaration order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Returns a stage by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&StageSpec> {
        self.index.get(id).map(|&i| &self.stages[i])
    }

    /// Returns the declaration position of a stage.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Returns the positions of the stages that directly depend on `position`.
    #[must_use]
    pub(crate) fn dependents_at(&self, position: usize) -> &[usize] {
        &self.dependents[position]
    }

    /// Returns the subgraph of `roots` and everything they transitively depend on.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownTargetStage`] if a root is not declared.
    pub fn select(&self, target: &str, roots: &[impl AsRef<str>]) -> Result<Self, GraphError> {
        let mut keep = BTreeSet::new();
        let mut stack = Vec::new();
        for root in roots {
            let root = root.as_ref();
            let &i = self.index.get(root).ok_or_else(|| GraphError::UnknownTargetStage {
                target: target.to_string(),
                stage: root.to_string(),
            })?;
            stack.push(i);
        }
        while let Some(i) = stack.pop() {
            if keep.insert(i) {
                stack.extend(self.stages[i].dependencies().iter().map(|d| self.index[d]));
            }
        }

        let stages = keep.into_iter().map(|i| self.stages[i].clone()).collect();
        Self::new(target, stages)
    }

    /// Returns a topological order, preferring declaration order among ready stages.
    #[must_use]
    pub fn topological_order(&self) -> Vec<&str> {
        let mut in_degree: Vec<usize> = self.stages.iter().map(|s| s.dependencies().len()).collect();
        let mut ready: BTreeSet<usize> = (0..self.stages.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.stages.len());

        while let Some(i) = ready.pop_first() {
            order.push(self.stages[i].id());
            for &child in &self.dependents[i] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.insert(child);
                }
            }
        }
        order
    }

    fn closure(&self, start: usize, edges: impl Fn(usize) -> Vec<usize>) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        let mut stack = edges(start);
        while let Some(i) = stack.pop() {
            if seen.insert(i) {
                stack.extend(edges(i));
            }
        }
        seen.into_iter().map(|i| self.stages[i].id()).collect()
    }

    /// Returns every stage that transitively depends on `id`, in declaration order.
    #[must_use]
    pub fn transitive_dependents(&self, id: &str) -> Vec<&str> {
        match self.position(id) {
            Some(start) => self.closure(start, |i| self.dependents[i].clone()),
            None => Vec::new(),
        }
    }

    /// Returns every stage `id` transitively depends on, in declaration order.
    #[must_use]
    pub fn transitive_dependencies(&self, id: &str) -> Vec<&str> {
        match self.position(id) {
            Some(start) => self.closure(start, |i| {
                self.stages[i].dependencies().iter().map(|d| self.index[d]).collect()
            }),
            None => Vec::new(),
        }
    }

    /// Checks that every `${NAME}` a stage uses can be resolved when it runs.
    ///
    /// A name resolves if it is in `env`, is exported by a transitive
    /// dependency, or (for commands and services) is a stage variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnresolvedPlaceholder`] for the first unknown name.
    pub fn validate_placeholders(&self, env: &Environment) -> Result<(), ConfigError> {
        for stage in &self.stages {
            let mut inherited: HashSet<&str> = env.keys().collect();
            for dep in self.transitive_dependencies(stage.id()) {
                if let Some(spec) = self.get(dep) {
                    inherited.extend(spec.exports().iter().map(String::as_str));
                }
            }
            let unresolved = |name: &str| ConfigError::UnresolvedPlaceholder {
                stage: stage.id().to_string(),
                name: name.to_string(),
            };

            for value in stage.env().values() {
                if let Some(name) = template::placeholders(value)
                    .into_iter()
                    .find(|n| !inherited.contains(n.as_str()))
                {
                    return Err(unresolved(name.as_str()));
                }
            }

            let visible = |name: &str| inherited.contains(name) || stage.env().contains_key(name);
            for text in stage.unit().templates() {
                if let Some(name) = template::placeholders(text).into_iter().find(|n| !visible(n.as_str())) {
                    return Err(unresolved(name.as_str()));
                }
            }
            if let Some(name) = stage.unit().required_vars().into_iter().find(|n| !visible(*n)) {
                return Err(unresolved(name));
            }
        }
        Ok(())
    }
}
