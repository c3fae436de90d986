//! Command-line interface.
//!
//! Purely declarative: parsing only, no I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use harnessflow::config::DEFAULT_CONFIG_PATH;
use harnessflow::report::OutputFormat;

/// Dependency-ordered build, lint and test orchestration.
#[derive(Parser, Debug)]
#[command(name = "harnessflow", version, about, long_about = None)]
pub struct Cli {
    /// Path to the pipeline definition.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Override the log format (pretty, compact, json).
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a target and its dependencies.
    Run(RunArgs),

    /// Show targets and their stages.
    List,

    /// Parse the definition and build every target's graph.
    Validate,
}

/// Report format on stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputArg {
    /// Human-readable table.
    #[default]
    Text,
    /// Machine-readable JSON.
    Json,
}

impl From<OutputArg> for OutputFormat {
    fn from(arg: OutputArg) -> Self {
        match arg {
            OutputArg::Text => Self::Text,
            OutputArg::Json => Self::Json,
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Target name, or a stage id to run with its dependencies.
    pub target: String,

    /// Maximum number of stages running at once.
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Run non-interactively (sets CI=true).
    #[arg(long)]
    pub ci: bool,

    /// Use the test entry command (sets TEST=true).
    #[arg(long)]
    pub test: bool,

    /// Override a configuration value; may be repeated.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub set: Vec<(String, String)>,

    /// Report format on stdout.
    #[arg(long, value_enum, default_value_t = OutputArg::Text)]
    pub output: OutputArg,

    /// Also write the JSON report to this path.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Also write a GraphViz rendering of the run to this path.
    #[arg(long)]
    pub graph: Option<PathBuf>,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}
