//! Config resolver: overrides + default tables -> stage environment.
//!
//! Priority, highest first: explicit override, mode-specific default, global
//! default. Test mode then forces the token audience to a single fixed value
//! regardless of any override. Resolution is a pure function of its inputs.

use super::Environment;
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Public key used by the mock USS to validate access tokens.
pub const KEY_PUBLIC_KEY: &str = "MOCK_USS_PUBLIC_KEY";
/// Comma-separated list of accepted token audiences.
pub const KEY_TOKEN_AUDIENCE: &str = "MOCK_USS_TOKEN_AUDIENCE";
/// Comma-separated list of mock USS services to enable.
pub const KEY_SERVICES: &str = "MOCK_USS_SERVICES";
/// Locality the mock USS behaves as.
pub const KEY_BEHAVIOR_LOCALITY: &str = "MOCK_USS_BEHAVIOR_LOCALITY";
/// Version string reported by the monitoring tools.
pub const KEY_CODE_VERSION: &str = "MONITORING_VERSION";
/// Host port the mock USS is published on.
pub const KEY_PORT: &str = "PORT";
/// CI-mode flag.
pub const KEY_CI: &str = "CI";
/// Test-mode flag.
pub const KEY_TEST: &str = "TEST";
/// Entry command of the service container, chosen by mode.
pub const KEY_ENTRY_COMMAND: &str = "HARNESS_ENTRY_COMMAND";
/// Whether containers get an interactive TTY.
pub const KEY_INTERACTIVE: &str = "HARNESS_INTERACTIVE";

/// Audience forced in test mode.
pub const TEST_AUDIENCE: &str = "localhost";

/// Returns true for `true`, `1`, `yes`, `on` (case-insensitive).
#[must_use]
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Caller-supplied overrides. A value of `None` means "absent".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    values: BTreeMap<String, Option<String>>,
}

impl Overrides {
    /// Creates an empty override set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an override.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, Some(value.into()));
        self
    }

    /// Sets or clears an override.
    pub fn set(&mut self, key: impl Into<String>, value: Option<String>) {
        self.values.insert(key.into(), value);
    }

    /// Captures overrides for `keys` from the process environment.
    #[must_use]
    pub fn from_process_env<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        let mut overrides = Self::new();
        for key in keys {
            overrides.set(key, std::env::var(key).ok());
        }
        overrides
    }

    /// Applies `other` on top of this set; present values in `other` win.
    #[must_use]
    pub fn merged(mut self, other: &Self) -> Self {
        for (key, value) in &other.values {
            if value.is_some() || !self.values.contains_key(key) {
                self.values.insert(key.clone(), value.clone());
            }
        }
        self
    }

    /// Returns the override for `key`, treating empty strings as absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(Option::as_deref)
            .filter(|v| !v.trim().is_empty())
    }

    fn present(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.keys().filter_map(|k| self.get(k).map(|v| (k.as_str(), v)))
    }
}

/// The run mode derived from the CI and test flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunMode {
    /// Non-interactive CI run.
    pub ci: bool,
    /// Test entry point instead of the run entry point.
    pub test: bool,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let interaction = if self.ci { "ci" } else { "interactive" };
        let entry = if self.test { "test" } else { "run" };
        write!(f, "{interaction}/{entry}")
    }
}

/// Default tables consulted by the resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultTable {
    /// Global defaults.
    #[serde(default)]
    pub global: BTreeMap<String, String>,
    /// Defaults applied in CI mode.
    #[serde(default)]
    pub ci: BTreeMap<String, String>,
    /// Defaults applied outside CI mode.
    #[serde(default)]
    pub interactive: BTreeMap<String, String>,
    /// Defaults applied in test mode.
    #[serde(default)]
    pub test: BTreeMap<String, String>,
    /// Defaults applied outside test mode.
    #[serde(default)]
    pub run: BTreeMap<String, String>,
}

impl DefaultTable {
    /// The built-in defaults for the mock USS test environment.
    #[must_use]
    pub fn builtin() -> Self {
        fn table(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect()
        }

        Self {
            global: table(&[
                (KEY_PUBLIC_KEY, "/var/test-certs/auth2.pem"),
                (KEY_TOKEN_AUDIENCE, "localhost,host.docker.internal"),
                (KEY_SERVICES, "scdsc"),
                (KEY_BEHAVIOR_LOCALITY, "CHE"),
                (KEY_CODE_VERSION, "Unknown"),
                (KEY_PORT, "8074"),
                (KEY_CI, "false"),
                (KEY_TEST, "false"),
            ]),
            ci: table(&[(KEY_INTERACTIVE, "false")]),
            interactive: table(&[(KEY_INTERACTIVE, "true")]),
            test: table(&[(KEY_ENTRY_COMMAND, "mock_uss/test.sh")]),
            run: table(&[(KEY_ENTRY_COMMAND, "mock_uss/start.sh")]),
        }
    }

    /// Returns a new table with `other` layered on top, table by table.
    #[must_use]
    pub fn merged(mut self, other: &Self) -> Self {
        self.global.extend(other.global.clone());
        self.ci.extend(other.ci.clone());
        self.interactive.extend(other.interactive.clone());
        self.test.extend(other.test.clone());
        self.run.extend(other.run.clone());
        self
    }

    /// Returns every variable name any table mentions.
    #[must_use]
    pub fn known_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .global
            .keys()
            .chain(self.ci.keys())
            .chain(self.interactive.keys())
            .chain(self.test.keys())
            .chain(self.run.keys())
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// Output of the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    /// The fully-populated environment.
    pub environment: Environment,
    /// The derived run mode.
    pub mode: RunMode,
}

/// Resolves overrides against default tables.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    defaults: DefaultTable,
    required: Vec<String>,
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new(DefaultTable::builtin())
    }
}

impl ConfigResolver {
    /// Creates a resolver over `defaults`; the public key is required.
    #[must_use]
    pub fn new(defaults: DefaultTable) -> Self {
        Self {
            defaults,
            required: vec![KEY_PUBLIC_KEY.to_string()],
        }
    }

    /// Replaces the list of variables that must resolve to a non-empty value.
    #[must_use]
    pub fn with_required(mut self, required: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.required = required.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the default tables.
    #[must_use]
    pub fn defaults(&self) -> &DefaultTable {
        &self.defaults
    }

    /// Resolves `overrides` into an environment and run mode.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRequired`] if a required value resolves to
    /// empty, or [`ConfigError::InvalidValue`] for a malformed port.
    pub fn resolve(&self, overrides: &Overrides) -> Result<ResolvedConfig, ConfigError> {
        let flag = |key: &str| {
            overrides
                .get(key)
                .or_else(|| self.defaults.global.get(key).map(String::as_str))
                .is_some_and(is_truthy)
        };
        let mode = RunMode {
            ci: flag(KEY_CI),
            test: flag(KEY_TEST),
        };

        let mut env = Environment::new();
        for (k, v) in &self.defaults.global {
            env.set(k, v);
        }
        let interaction = if mode.ci { &self.defaults.ci } else { &self.defaults.interactive };
        let entry = if mode.test { &self.defaults.test } else { &self.defaults.run };
        for (k, v) in interaction.iter().chain(entry) {
            env.set(k, v);
        }
        for (k, v) in overrides.present() {
            env.set(k, v);
        }

        env.set(KEY_CI, mode.ci.to_string());
        env.set(KEY_TEST, mode.test.to_string());
        if mode.test {
            env.set(KEY_TOKEN_AUDIENCE, TEST_AUDIENCE);
        }

        if let Some(services) = env.get(KEY_SERVICES) {
            let normalized = normalize_services(services);
            env.set(KEY_SERVICES, normalized);
        }
        if let Some(port) = env.get(KEY_PORT) {
            validate_port(port)?;
        }

        for key in &self.required {
            if env.get(key).map_or(true, |v| v.trim().is_empty()) {
                return Err(ConfigError::MissingRequired { key: key.clone() });
            }
        }

        Ok(ResolvedConfig {
            environment: env,
            mode,
        })
    }
}

/// Splits a service list on commas, trims, lower-cases, drops empties and
/// duplicates (first occurrence wins), and re-joins it.
#[must_use]
pub fn normalize_services(raw: &str) -> String {
    let mut seen: Vec<String> = Vec::new();
    for svc in raw.split(',') {
        let svc = svc.trim().to_lowercase();
        if !svc.is_empty() && !seen.contains(&svc) {
            seen.push(svc);
        }
    }
    seen.join(",")
}

fn validate_port(raw: &str) -> Result<u16, ConfigError> {
    match raw.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(ConfigError::invalid(KEY_PORT, raw, "expected a port in 1..=65535")),
        Ok(port) => Ok(port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builtin_defaults_resolve() {
        let resolved = ConfigResolver::default().resolve(&Overrides::new()).unwrap();

        assert_eq!(resolved.mode, RunMode::default());
        assert_eq!(
            resolved.environment.get(KEY_TOKEN_AUDIENCE),
            Some("localhost,host.docker.internal")
        );
        assert_eq!(resolved.environment.get(KEY_ENTRY_COMMAND), Some("mock_uss/start.sh"));
        assert_eq!(resolved.environment.get(KEY_INTERACTIVE), Some("true"));
        assert_eq!(resolved.environment.get(KEY_BEHAVIOR_LOCALITY), Some("CHE"));
    }

    #[test]
    fn test_override_beats_defaults() {
        let overrides = Overrides::new()
            .with(KEY_TOKEN_AUDIENCE, "example.com")
            .with(KEY_PORT, "9000");
        let resolved = ConfigResolver::default().resolve(&overrides).unwrap();

        assert_eq!(resolved.environment.get(KEY_TOKEN_AUDIENCE), Some("example.com"));
        assert_eq!(resolved.environment.get(KEY_PORT), Some("9000"));
    }

    #[test]
    fn test_mode_default_beats_global_default() {
        let mut defaults = DefaultTable::builtin();
        defaults.global.insert(KEY_ENTRY_COMMAND.into(), "global.sh".into());
        let resolved = ConfigResolver::new(defaults).resolve(&Overrides::new()).unwrap();

        assert_eq!(resolved.environment.get(KEY_ENTRY_COMMAND), Some("mock_uss/start.sh"));
    }

    #[test]
    fn test_test_mode_forces_audience() {
        let overrides = Overrides::new()
            .with(KEY_TEST, "true")
            .with(KEY_TOKEN_AUDIENCE, "should-be-ignored");
        let resolved = ConfigResolver::default().resolve(&overrides).unwrap();

        assert!(resolved.mode.test);
        assert_eq!(resolved.environment.get(KEY_TOKEN_AUDIENCE), Some(TEST_AUDIENCE));
        assert_eq!(resolved.environment.get(KEY_ENTRY_COMMAND), Some("mock_uss/test.sh"));
    }

    #[test]
    fn test_ci_mode_disables_tty() {
        let resolved = ConfigResolver::default()
            .resolve(&Overrides::new().with(KEY_CI, "TRUE"))
            .unwrap();

        assert!(resolved.mode.ci);
        assert_eq!(resolved.environment.get(KEY_INTERACTIVE), Some("false"));
        assert_eq!(resolved.environment.get(KEY_CI), Some("true"));
        assert_eq!(resolved.mode.to_string(), "ci/run");
    }

    #[test]
    fn test_empty_required_value_fails() {
        let mut defaults = DefaultTable::builtin();
        defaults.global.insert(KEY_PUBLIC_KEY.into(), String::new());
        let err = ConfigResolver::new(defaults).resolve(&Overrides::new()).unwrap_err();

        assert_eq!(
            err,
            ConfigError::MissingRequired {
                key: KEY_PUBLIC_KEY.to_string()
            }
        );
    }

    #[test]
    fn test_empty_override_is_absent() {
        let overrides = Overrides::new().with(KEY_PUBLIC_KEY, "  ");
        let resolved = ConfigResolver::default().resolve(&overrides).unwrap();

        assert_eq!(
            resolved.environment.get(KEY_PUBLIC_KEY),
            Some("/var/test-certs/auth2.pem")
        );
    }

    #[test]
    fn test_invalid_port_rejected() {
        let err = ConfigResolver::default()
            .resolve(&Overrides::new().with(KEY_PORT, "http"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == KEY_PORT));

        let err = ConfigResolver::default()
            .resolve(&Overrides::new().with(KEY_PORT, "0"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_services_normalized() {
        assert_eq!(normalize_services(" SCDSC, riddp ,,scdsc "), "scdsc,riddp");

        let resolved = ConfigResolver::default()
            .resolve(&Overrides::new().with(KEY_SERVICES, "MsgSigning, SCDSC"))
            .unwrap();
        assert_eq!(resolved.environment.get(KEY_SERVICES), Some("msgsigning,scdsc"));
    }

    #[test]
    fn test_overrides_merge_present_values_win() {
        let base = Overrides::new().with(KEY_PORT, "1000").with(KEY_CI, "true");
        let mut cli = Overrides::new().with(KEY_PORT, "2000");
        cli.set(KEY_CI, None);

        let merged = base.merged(&cli);
        assert_eq!(merged.get(KEY_PORT), Some("2000"));
        assert_eq!(merged.get(KEY_CI), Some("true"));
    }

    #[test]
    fn test_truthy_values() {
        for v in ["true", "TRUE", "1", "yes", "On"] {
            assert!(is_truthy(v), "{v}");
        }
        for v in ["false", "0", "", "nope"] {
            assert!(!is_truthy(v), "{v}");
        }
    }
}
