use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sandpipe_core::config::EngineConfig;
use sandpipe_core::dependency::DependencyProvider;
use sandpipe_core::models::{ScopeErrors, SummaryRecord};
use sandpipe_core::pipeline::Pipeline;
use sandpipe_core::scope::{DataInjector, DataStore, KILL_EVENT, Scope, ScopeOptions};
use sandpipe_core::script::{COMMANDS, Interpreter, render_errors, render_summary};
use sandpipe_core::services;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Run sandboxed task pipelines from a script.
#[derive(Parser, Debug)]
#[command(name = "sandpipe", version, about)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a pipeline script (stdin when no path is given)
    Run {
        script: Option<PathBuf>,

        /// JSON engine configuration
        #[arg(long)]
        config: Option<PathBuf>,

        /// Default sandbox for tasks without --sandbox
        #[arg(long)]
        sandbox: Option<String>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// List script commands
    Commands,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("sandpipe: {error:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default.into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Commands => {
            let mut stdout = std::io::stdout().lock();
            for (name, help) in COMMANDS {
                writeln!(stdout, "{name:<12} {help}")?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            script,
            config,
            sandbox,
            json,
        } => {
            let config = load_config(config.as_ref())?;
            let script = read_script(script.as_ref())?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            runtime.block_on(run_pipeline(config, &script, sandbox, json))
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    Ok(EngineConfig::from_json_str(&raw)?)
}

fn read_script(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read script {}", path.display())),
        None => {
            let mut script = String::new();
            std::io::stdin()
                .read_to_string(&mut script)
                .context("failed to read script from stdin")?;
            Ok(script)
        }
    }
}

async fn run_pipeline(
    config: EngineConfig,
    script: &str,
    sandbox: Option<String>,
    json: bool,
) -> Result<ExitCode> {
    let provider = Arc::new(DependencyProvider::new());
    services::register_defaults(&provider, &config)?;

    let defaults = DataStore::new();
    if let Some(sandbox) = sandbox {
        defaults.set("sandbox", sandbox);
    }
    let root = Scope::root_with(
        config,
        provider,
        ScopeOptions::new()
            .data(defaults.clone())
            .injector(Arc::new(DataInjector::new(defaults))),
    );
    root.on(KILL_EVENT, |scope| {
        tracing::warn!(root = scope.is_root(), "pipeline cancelled");
        Ok(())
    });

    let interpreter = Interpreter::new(Pipeline::new(root.clone())?);
    let mut stdout = std::io::stdout();
    let _ = interpreter.run_script(script, &mut stdout).await;
    let _ = interpreter.finish().await;
    let outcome = root.close().await;

    let summary = interpreter.pipeline().summary();
    if json {
        print_json(&summary, &outcome)?;
    } else {
        print!("{}", render_summary(&summary));
        if let Err(errors) = &outcome {
            eprint!("{}", render_errors(errors));
        }
    }

    Ok(if outcome.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[derive(Serialize)]
struct JsonReport {
    tasks: Vec<JsonTask>,
    errors: Vec<String>,
}

#[derive(Serialize)]
struct JsonTask {
    task: String,
    sandbox: String,
    outcome: &'static str,
    exit_code: Option<i32>,
    error: Option<String>,
    started_at: Option<String>,
    finished_at: Option<String>,
}

fn print_json(summary: &[SummaryRecord], outcome: &Result<(), ScopeErrors>) -> Result<()> {
    let report = JsonReport {
        tasks: summary
            .iter()
            .map(|record| JsonTask {
                task: record.task.clone(),
                sandbox: record.sandbox.clone(),
                outcome: record.outcome.as_str(),
                exit_code: record.exit_code,
                error: record.error.clone(),
                started_at: record.started_at.and_then(format_time),
                finished_at: record.finished_at.and_then(format_time),
            })
            .collect(),
        errors: match outcome {
            Ok(()) => Vec::new(),
            Err(errors) => errors.sorted().iter().map(ToString::to_string).collect(),
        },
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn format_time(at: SystemTime) -> Option<String> {
    OffsetDateTime::from(at).format(&Rfc3339).ok()
}
