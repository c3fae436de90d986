use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use harnessflow::cancellation::CancellationToken;
use harnessflow::config::resolver::{KEY_CI, KEY_TEST};
use harnessflow::config::{HarnessConfig, Overrides};
use harnessflow::container::BollardRuntime;
use harnessflow::errors::{exit_codes, HarnessError};
use harnessflow::harness::{Harness, RunRequest};
use harnessflow::observability::{init_tracing, LogFormat};
use harnessflow::report::{to_dot, write_report, OutputFormat, Render};

mod cli;

use cli::{Cli, Commands, RunArgs};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match execute(cli).await {
        Ok(code) => to_exit_code(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err
                .downcast_ref::<HarnessError>()
                .map_or(exit_codes::INTERNAL, HarnessError::exit_code);
            to_exit_code(code)
        }
    }
}

fn to_exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn execute(cli: Cli) -> Result<i32> {
    let config = HarnessConfig::load(&cli.config).await?;

    let level = cli.log_level.as_deref().unwrap_or(&config.settings.log_level);
    let format: LogFormat = cli.log_format.as_deref().unwrap_or(&config.settings.log_format).parse()?;
    init_tracing(level, format)?;
    tracing::debug!(config = %cli.config.display(), "loaded pipeline definition");

    match cli.command {
        Commands::Run(args) => run(config, args).await,
        Commands::List => {
            let listing = TargetListing::from_config(&config);
            write_report(&listing, OutputFormat::Text, &mut io::stdout().lock())?;
            Ok(exit_codes::SUCCESS)
        }
        Commands::Validate => {
            for target in config.targets.keys() {
                config.graph_for_target(target)?;
            }
            println!(
                "{}: {} stages, {} targets OK",
                cli.config.display(),
                config.stages.len(),
                config.targets.len()
            );
            Ok(exit_codes::SUCCESS)
        }
    }
}

fn overrides(config: &HarnessConfig, args: &RunArgs) -> Overrides {
    let known = config.default_table().known_keys();
    let env = Overrides::from_process_env(known.iter().map(String::as_str).chain([KEY_CI, KEY_TEST]));

    let mut cli = Overrides::new();
    for (key, value) in &args.set {
        cli = cli.with(key, value);
    }
    if args.ci {
        cli = cli.with(KEY_CI, "true");
    }
    if args.test {
        cli = cli.with(KEY_TEST, "true");
    }
    env.merged(&cli)
}

async fn run(config: HarnessConfig, args: RunArgs) -> Result<i32> {
    let request = RunRequest {
        target: args.target.clone(),
        overrides: overrides(&config, &args),
        concurrency: args.concurrency,
    };
    let runtime = BollardRuntime::connect_local().map_err(HarnessError::from)?;
    let harness = Harness::new(config, Arc::new(runtime));

    let cancel = Arc::new(CancellationToken::new());
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            trigger.cancel("interrupted");
        }
    });

    let run = harness.run(&request, cancel).await?;
    let report = run.report();

    write_report(&report, args.output.into(), &mut io::stdout().lock())?;
    if let Some(path) = &args.report {
        write_artifact(path, &serde_json::to_vec_pretty(&report)?)?;
    }
    if let Some(path) = &args.graph {
        write_artifact(path, to_dot(run.graph(), Some(&report)).as_bytes())?;
    }
    Ok(report.exit_code)
}

fn write_artifact(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

#[derive(Debug, Serialize)]
struct TargetListing {
    targets: Vec<TargetEntry>,
}

#[derive(Debug, Serialize)]
struct TargetEntry {
    name: String,
    stages: Vec<String>,
}

impl TargetListing {
    fn from_config(config: &HarnessConfig) -> Self {
        let targets = config
            .targets
            .keys()
            .map(|name| TargetEntry {
                name: name.clone(),
                stages: config
                    .graph_for_target(name)
                    .map(|g| g.stages().iter().map(|s| s.id().to_string()).collect())
                    .unwrap_or_default(),
            })
            .collect();
        Self { targets }
    }
}

impl Render for TargetListing {
    fn render_text(&self, w: &mut dyn Write) -> io::Result<()> {
        for target in &self.targets {
            writeln!(w, "{}", target.name)?;
            for stage in &target.stages {
                writeln!(w, "  {stage}")?;
            }
        }
        Ok(())
    }
}
