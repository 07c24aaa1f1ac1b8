//! Configuration resolution
//!
//! Resolves host configuration from multiple sources with priority:
//! 1. Command-line flags (passed as overrides)
//! 2. Environment variables (`COURIER_*`)
//! 3. An explicit config file, or the repo-local `.courier.toml`
//! 4. Global config (`~/.config/courier/config.toml`)
//! 5. Defaults

use crate::boundary::{BoundaryFactory, InProcessBoundaryFactory, ProcessBoundaryFactory};
use crate::catalog::DylibLoader;
use crate::error::LoadError;
use crate::lifecycle::{DEFAULT_PAYLOAD, FailurePolicy, LifecycleSettings};
use courier_core::ContractId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Repo-local config file name
pub const LOCAL_CONFIG_FILE: &str = ".courier.toml";

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// A value that does not parse
    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Where isolation contexts live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoundaryKind {
    /// A child `courier worker` process per boundary
    #[default]
    Process,
    /// Inside the host process
    InProcess,
}

impl FromStr for BoundaryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "process" => Ok(Self::Process),
            "in-process" | "inprocess" => Ok(Self::InProcess),
            other => Err(format!("unknown boundary '{other}' (expected process or in-process)")),
        }
    }
}

/// Complete host configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Directory scanned by `load` when no directory is given
    pub plugin_dir: Option<PathBuf>,
    /// Contract the host imports
    pub contract: ContractId,
    /// Message handed to every provider by `run`
    pub payload: String,
    /// Limit for one provider invocation through a process boundary (0 = none)
    pub invoke_timeout_secs: u64,
    pub boundary: BoundaryKind,
    pub failure_policy: FailurePolicy,
    /// Worker executable (default: the running executable)
    pub worker_program: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            plugin_dir: None,
            contract: ContractId::message_sender(),
            payload: DEFAULT_PAYLOAD.to_string(),
            invoke_timeout_secs: 30,
            boundary: BoundaryKind::Process,
            failure_policy: FailurePolicy::FailFast,
            worker_program: None,
        }
    }
}

impl HostConfig {
    pub fn invoke_timeout(&self) -> Option<Duration> {
        (self.invoke_timeout_secs > 0).then(|| Duration::from_secs(self.invoke_timeout_secs))
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            contract: self.contract.clone(),
            payload: self.payload.clone(),
            failure_policy: self.failure_policy,
        }
    }

    /// Build the boundary factory this configuration selects
    pub fn boundary_factory(&self) -> Result<Arc<dyn BoundaryFactory>, LoadError> {
        match self.boundary {
            BoundaryKind::Process => {
                let factory = match &self.worker_program {
                    Some(program) => ProcessBoundaryFactory::new(program),
                    None => ProcessBoundaryFactory::current_exe()?,
                };
                Ok(Arc::new(factory.with_invoke_timeout(self.invoke_timeout())))
            }
            BoundaryKind::InProcess => {
                if self.invoke_timeout().is_some() {
                    tracing::debug!("invoke_timeout_secs has no effect on in-process boundaries");
                }
                Ok(Arc::new(InProcessBoundaryFactory::new(Arc::new(DylibLoader))))
            }
        }
    }
}

/// Config as read from a file: every key optional
#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    plugin_dir: Option<PathBuf>,
    contract: Option<ContractId>,
    payload: Option<String>,
    invoke_timeout_secs: Option<u64>,
    boundary: Option<BoundaryKind>,
    failure_policy: Option<FailurePolicy>,
    worker_program: Option<PathBuf>,
}

/// Command-line overrides for configuration
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub plugin_dir: Option<PathBuf>,
    pub contract: Option<ContractId>,
    pub payload: Option<String>,
    pub boundary: Option<BoundaryKind>,
    pub failure_policy: Option<FailurePolicy>,
    /// Path to config file override
    pub config_path: Option<PathBuf>,
}

/// Resolve configuration from all sources, reading the process environment
pub fn resolve_config(
    overrides: &ConfigOverrides,
    current_dir: &Path,
    home_dir: &Path,
) -> Result<HostConfig, ConfigError> {
    resolve_config_with_env(overrides, current_dir, home_dir, |key| std::env::var(key).ok())
}

/// Resolve configuration with an explicit environment lookup
pub fn resolve_config_with_env<E>(
    overrides: &ConfigOverrides,
    current_dir: &Path,
    home_dir: &Path,
    env: E,
) -> Result<HostConfig, ConfigError>
where
    E: Fn(&str) -> Option<String>,
{
    let mut config = HostConfig::default();

    // 4. Global config
    let global_config_path = home_dir.join(".config/courier/config.toml");
    if global_config_path.exists() {
        match load_config_file(&global_config_path) {
            Ok(file_config) => merge_config(&mut config, file_config),
            Err(e) => warn!("Failed to parse global config at {global_config_path:?}: {e}"),
        }
    }

    // 3. Explicit file (must load) or repo-local config
    if let Some(path) = &overrides.config_path {
        merge_config(&mut config, load_config_file(path)?);
    } else if let Some(repo_config) = find_repo_local_config(current_dir) {
        match load_config_file(&repo_config) {
            Ok(file_config) => merge_config(&mut config, file_config),
            Err(e) => warn!("Failed to parse repo config at {repo_config:?}: {e}"),
        }
    }

    // 2. Environment variables
    apply_env_overrides(&mut config, env)?;

    // 1. Command-line overrides
    apply_cli_overrides(&mut config, overrides);

    Ok(config)
}

/// Find the repo-local config file
///
/// Searches the current directory and its parents, stopping at the git root
fn find_repo_local_config(current_dir: &Path) -> Option<PathBuf> {
    let mut dir = current_dir;

    loop {
        let config_path = dir.join(LOCAL_CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if dir.join(".git").exists() {
            break;
        }

        dir = dir.parent()?;
    }

    None
}

fn load_config_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: FileConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Merge file config into base config; only keys present in the file win
fn merge_config(base: &mut HostConfig, file: FileConfig) {
    if file.plugin_dir.is_some() {
        base.plugin_dir = file.plugin_dir;
    }
    if let Some(contract) = file.contract {
        base.contract = contract;
    }
    if let Some(payload) = file.payload {
        base.payload = payload;
    }
    if let Some(secs) = file.invoke_timeout_secs {
        base.invoke_timeout_secs = secs;
    }
    if let Some(boundary) = file.boundary {
        base.boundary = boundary;
    }
    if let Some(policy) = file.failure_policy {
        base.failure_policy = policy;
    }
    if file.worker_program.is_some() {
        base.worker_program = file.worker_program;
    }
}

fn parse_env<T, E>(env: &E, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    E: Fn(&str) -> Option<String>,
{
    match env(key) {
        Some(value) => value.parse().map(Some).map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(None),
    }
}

fn apply_env_overrides<E>(config: &mut HostConfig, env: E) -> Result<(), ConfigError>
where
    E: Fn(&str) -> Option<String>,
{
    if let Some(dir) = env("COURIER_PLUGIN_DIR") {
        config.plugin_dir = Some(PathBuf::from(dir));
    }
    if let Some(contract) = env("COURIER_CONTRACT") {
        config.contract = ContractId::new(contract);
    }
    if let Some(payload) = env("COURIER_PAYLOAD") {
        config.payload = payload;
    }
    if let Some(secs) = parse_env::<u64, _>(&env, "COURIER_INVOKE_TIMEOUT_SECS")? {
        config.invoke_timeout_secs = secs;
    }
    if let Some(boundary) = parse_env::<BoundaryKind, _>(&env, "COURIER_BOUNDARY")? {
        config.boundary = boundary;
    }
    if let Some(policy) = parse_env::<FailurePolicy, _>(&env, "COURIER_FAILURE_POLICY")? {
        config.failure_policy = policy;
    }
    if let Some(program) = env("COURIER_WORKER") {
        config.worker_program = Some(PathBuf::from(program));
    }
    Ok(())
}

fn apply_cli_overrides(config: &mut HostConfig, overrides: &ConfigOverrides) {
    if let Some(ref dir) = overrides.plugin_dir {
        config.plugin_dir = Some(dir.clone());
    }
    if let Some(ref contract) = overrides.contract {
        config.contract = contract.clone();
    }
    if let Some(ref payload) = overrides.payload {
        config.payload = payload.clone();
    }
    if let Some(boundary) = overrides.boundary {
        config.boundary = boundary;
    }
    if let Some(policy) = overrides.failure_policy {
        config.failure_policy = policy;
    }
}
