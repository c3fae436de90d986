//! Configuration: variable resolution, templating and the pipeline file.

mod environment;
pub mod file;
pub mod resolver;
pub mod template;

pub use environment::Environment;
pub use file::{HarnessConfig, ModeDefaults, Settings, StageDecl, DEFAULT_CONFIG_PATH};
pub use resolver::{ConfigResolver, DefaultTable, Overrides, ResolvedConfig, RunMode};
