mod modules;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use modhost::bootstrap::{HostConfig, init_logging};
use modhost::runtime::{RunOptions, ShutdownOptions, run};
use modhost::{DependencyGraph, ModuleDiscovery};

/// Modhost Server - runs the linked and manifest-declared modules
#[derive(Parser)]
#[command(name = "modhost-server")]
#[command(about = "Modhost Server - pluggable module host")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (JSON) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Start the host and block until a shutdown signal
    Run,
    /// Discover and resolve modules, print the start order and exit
    Check,
    /// List discovered modules
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1) defaults -> 2) YAML (if provided) -> 3) env (MODHOST__*) -> 4) CLI overrides
    let mut config = HostConfig::load(cli.config.as_deref())?;
    if let Some(level) = verbosity_level(cli.verbose) {
        config.logging.level = level.to_owned();
    }

    if cli.print_config {
        println!("{}", config.to_json_pretty()?);
        return Ok(());
    }

    init_logging(&config.logging);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(&config).await,
        Commands::Check => check_modules(&config),
        Commands::List => list_modules(&config),
    }
}

/// Level forced by `-v` flags. The configured level (default `info`) wins without them.
fn verbosity_level(count: u8) -> Option<&'static str> {
    match count {
        0 => None,
        1 => Some("debug"),
        _ => Some("trace"),
    }
}

fn check_modules(config: &HostConfig) -> Result<()> {
    tracing::info!("Checking modules...");
    let discovered = ModuleDiscovery::new(config.discovery.clone()).discover()?;
    for warning in &discovered.warnings {
        println!("warning: {warning}");
    }

    let graph = DependencyGraph::build(&discovered.descriptors())?;
    for warning in graph.warnings() {
        println!("warning: {warning}");
    }
    let order = graph.resolve()?;

    for name in config.list_module_names() {
        if !graph.contains(&name) {
            println!("warning: configuration for unknown module '{name}'");
        }
    }
    println!("Start order: {order}");
    Ok(())
}

fn list_modules(config: &HostConfig) -> Result<()> {
    let discovered = ModuleDiscovery::new(config.discovery.clone()).discover()?;
    for module in &discovered.modules {
        let descriptor = module.descriptor();
        let deps: Vec<String> = descriptor
            .dependencies()
            .iter()
            .map(|dep| {
                let mut text = dep.name().to_owned();
                if let Some(req) = dep.requirement() {
                    text = format!("{text} {req}");
                }
                if dep.is_optional() {
                    text.push_str(" (optional)");
                }
                text
            })
            .collect();
        println!(
            "{}\t{}\t{}\t[{}]",
            descriptor.name(),
            descriptor.version(),
            descriptor.source(),
            deps.join(", ")
        );
    }
    Ok(())
}

async fn run_server(config: &HostConfig) -> Result<()> {
    tracing::info!("Modhost Server starting");

    let run_options = RunOptions {
        discovery: config.discovery.clone(),
        modules: Vec::new(),
        runtime: config.runtime_options(),
        shutdown: ShutdownOptions::Signals,
    };

    let summary = run(run_options).await?;

    for failure in summary.bootstrap.failures() {
        if let Some(err) = failure.error() {
            tracing::error!(module = %failure.module, phase = %failure.phase, error = %err, "Bootstrap step failed");
        }
    }
    for failure in summary.teardown.failures() {
        if let Some(err) = failure.error() {
            tracing::warn!(module = %failure.module, error = %err, "Teardown step failed");
        }
    }
    let outcome = summary.bootstrap.outcome;
    let trigger = summary.trigger;
    summary.bootstrap.into_result()?;
    tracing::info!(%outcome, %trigger, "Modhost Server stopped");
    Ok(())
}
