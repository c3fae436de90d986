//! Resolved variable environment handed to stages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A mapping from variable name to resolved value.
///
/// Ordered so that container env lists and reports are deterministic. Stages
/// receive their environment behind an `Arc` and never mutate it; layering
/// produces a new value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Creates an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an environment from name/value pairs.
    #[must_use]
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Returns the value of a variable.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Returns true if the variable is set.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Returns the number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns true if no variables are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterates over variables in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the variable names in name order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Returns a new environment with `layer` applied on top of this one.
    #[must_use]
    pub fn layered<'a>(&self, layer: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        let mut vars = self.vars.clone();
        for (k, v) in layer {
            vars.insert(k.clone(), v.clone());
        }
        Self { vars }
    }

    pub(crate) fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layered_does_not_touch_base() {
        let base = Environment::from_pairs([("A", "1"), ("B", "2")]);
        let layer: BTreeMap<String, String> = [("B".to_string(), "3".to_string())].into();

        let layered = base.layered(&layer);

        assert_eq!(base.get("B"), Some("2"));
        assert_eq!(layered.get("B"), Some("3"));
        assert_eq!(layered.get("A"), Some("1"));
    }

    #[test]
    fn test_iteration_is_sorted() {
        let env = Environment::from_pairs([("Z", "z"), ("A", "a")]);
        let keys: Vec<_> = env.keys().collect();
        assert_eq!(keys, vec!["A", "Z"]);
    }
}
