//! Sub-suite pass/fail counts extracted from captured output.

use crate::core::SuiteCounts;
use crate::errors::ConfigError;
use regex::Regex;

/// Compiles a suite summary pattern.
///
/// The pattern must define a `passed` or a `failed` named group (or both).
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] for a malformed pattern or one with
/// neither group.
pub fn compile_summary(stage: &str, pattern: &str) -> Result<Regex, ConfigError> {
    let key = format!("{stage}.suite_summary");
    let regex = Regex::new(pattern).map_err(|e| ConfigError::invalid(&key, pattern, e.to_string()))?;
    let has_group = regex
        .capture_names()
        .flatten()
        .any(|name| name == "passed" || name == "failed");
    if !has_group {
        return Err(ConfigError::invalid(
            key,
            pattern,
            "pattern needs a (?P<passed>..) or (?P<failed>..) group",
        ));
    }
    Ok(regex)
}

/// Sums the counts of every match of `summary` in `output`.
///
/// Returns `None` when nothing matched.
#[must_use]
pub fn count(summary: &Regex, output: &str) -> Option<SuiteCounts> {
    let group = |caps: &regex::Captures<'_>, name: &str| -> u64 {
        caps.name(name)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };

    let mut total = None;
    for caps in summary.captures_iter(output) {
        *total.get_or_insert_with(SuiteCounts::default) +=
            SuiteCounts::new(group(&caps, "passed"), group(&caps, "failed"));
    }
    total
}
