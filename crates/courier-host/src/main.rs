//! courier - plugin host for message-sender providers
//!
//! # Subcommands
//!
//! - `run`   : load, run and unload a plugin directory `--times` times
//! - `repl`  : load, wait for Enter, run, unload, repeat
//! - `worker`: (hidden) serve an isolation boundary over stdin/stdout

use anyhow::Context;
use clap::Parser;
use courier_host::cli::{Cli, Commands, RunArgs};
use courier_host::config::{HostConfig, resolve_config};
use courier_host::lifecycle::{LifecycleManager, LoadReport, RunReport};
use courier_host::{logging, worker};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Worker => worker::run_stdio().await.context("boundary worker failed"),
        Commands::Run(ref args) => {
            let config = load_config(&cli)?;
            run(&config, args).await
        }
        Commands::Repl(_) => {
            let config = load_config(&cli)?;
            repl(&config).await
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<HostConfig> {
    let current_dir = std::env::current_dir().context("cannot determine current directory")?;
    let home_dir = dirs::home_dir().context("cannot determine home directory")?;
    resolve_config(&cli.overrides(), &current_dir, &home_dir).context("failed to resolve configuration")
}

fn plugin_dir(config: &HostConfig) -> anyhow::Result<PathBuf> {
    config
        .plugin_dir
        .clone()
        .context("no plugin directory: pass --dir or set plugin_dir in .courier.toml")
}

async fn new_manager(config: &HostConfig) -> anyhow::Result<LifecycleManager> {
    let factory = config
        .boundary_factory()
        .context("failed to set up isolation boundaries")?;
    LifecycleManager::new(factory, config.lifecycle_settings())
        .await
        .context("failed to create isolation boundary")
}

async fn run(config: &HostConfig, args: &RunArgs) -> anyhow::Result<()> {
    let dir = plugin_dir(config)?;
    let mut manager = new_manager(config).await?;

    for cycle in 1..=args.times {
        println!("cycle {cycle}/{}", args.times);
        let report = manager
            .load(&dir)
            .await
            .with_context(|| format!("failed to load plugins from {}", dir.display()))?;
        print_load(&report);

        let outcome = manager.run().await;
        manager.unload().await;
        print_run(&outcome.context("run aborted")?);
    }
    Ok(())
}

async fn repl(config: &HostConfig) -> anyhow::Result<()> {
    let dir = plugin_dir(config)?;
    let mut manager = new_manager(config).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match manager.load(&dir).await {
            Ok(report) => print_load(&report),
            Err(e) => eprintln!("load failed: {e}"),
        }

        println!("Press Enter to run (q to quit)");
        let Some(line) = lines.next_line().await.context("failed to read stdin")? else {
            break;
        };
        if line.trim().eq_ignore_ascii_case("q") {
            break;
        }

        match manager.run().await {
            Ok(report) => print_run(&report),
            Err(e) => eprintln!("run failed: {e}"),
        }
        manager.unload().await;
    }
    Ok(())
}

fn print_load(report: &LoadReport) {
    println!(
        "  loaded {} provider(s) from {} module(s) in {}",
        report.providers.len(),
        report.scan.modules_loaded,
        report.dir.display()
    );
    for err in &report.scan.errors {
        println!("  excluded {err}");
    }
}

fn print_run(report: &RunReport) {
    for provider in &report.invoked {
        println!("  sent via {provider}");
    }
    for failure in &report.failures {
        println!("  failed: {failure}");
    }
}
