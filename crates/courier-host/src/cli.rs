//! CLI argument types for the `courier` binary.

use crate::config::{BoundaryKind, ConfigOverrides};
use crate::lifecycle::FailurePolicy;
use clap::{Args, Parser, Subcommand};
use courier_core::ContractId;
use std::path::PathBuf;

/// Load message-sender plugins from a directory and send through all of them
#[derive(Parser, Debug)]
#[command(name = "courier", version, about)]
pub struct Cli {
    /// Path to a config file (default: .courier.toml, auto-detected)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug-level logging (overrides COURIER_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Where plugins run: process or in-process
    #[arg(long, global = true)]
    pub boundary: Option<BoundaryKind>,

    /// Contract to import
    #[arg(long, global = true)]
    pub contract: Option<String>,

    /// What run does when a provider fails: fail-fast or isolate
    #[arg(long, global = true)]
    pub failure_policy: Option<FailurePolicy>,

    /// Message sent to every provider
    #[arg(long, global = true)]
    pub payload: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load, run and unload, a fixed number of times
    Run(RunArgs),
    /// Interactive loop: load, wait for Enter, run
    Repl(ReplArgs),
    /// Serve an isolation boundary over stdin/stdout
    #[command(hide = true)]
    Worker,
}

/// Arguments for the `run` subcommand
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Plugin directory (default: plugin_dir from config)
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Number of load/run/unload cycles
    #[arg(long, default_value_t = 1)]
    pub times: u32,
}

/// Arguments for the `repl` subcommand
#[derive(Args, Debug)]
pub struct ReplArgs {
    /// Plugin directory (default: plugin_dir from config)
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

impl Cli {
    /// Config overrides carried by global flags and the subcommand
    pub fn overrides(&self) -> ConfigOverrides {
        let plugin_dir = match &self.command {
            Commands::Run(args) => args.dir.clone(),
            Commands::Repl(args) => args.dir.clone(),
            Commands::Worker => None,
        };
        ConfigOverrides {
            plugin_dir,
            contract: self.contract.clone().map(ContractId::new),
            payload: self.payload.clone(),
            boundary: self.boundary,
            failure_policy: self.failure_policy,
            config_path: self.config.clone(),
        }
    }
}
