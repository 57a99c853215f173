//! Engine configuration.
//!
//! Built-in defaults, overridable through `F2P_*` environment variables and
//! then by CLI flags.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use f2p_env::{DockerBackend, EnvironmentBackend, EnvironmentBuilder, LocalBackend, SecretPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_OUTPUT_DIR: &str = ".f2p/runs";
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_APPLY_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_KILL_GRACE_MS: u64 = 5000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown backend {0:?} (expected docker or local)")]
    UnknownBackend(String),

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: String, value: String },
}

/// Where environments are provisioned.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Docker,
    Local,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Docker => "docker",
            BackendKind::Local => "local",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(BackendKind::Docker),
            "local" => Ok(BackendKind::Local),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of instances holding an environment at once
    pub concurrency: usize,
    /// Parent directory of per-run artifact directories
    pub output_dir: PathBuf,
    pub backend: BackendKind,
    pub build_timeout_secs: u64,
    pub apply_timeout_secs: u64,
    /// How long output readers may drain after a timed-out command is killed
    pub kill_grace_ms: u64,
    /// Extra variable names treated as secrets, on top of the built-in list
    pub secret_names: Vec<String>,
    /// Give containers network access (off by default)
    pub docker_network: bool,
    /// Container memory limit, e.g. `4g`
    pub docker_memory: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            concurrency: DEFAULT_CONCURRENCY,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            backend: BackendKind::Docker,
            build_timeout_secs: DEFAULT_BUILD_TIMEOUT_SECS,
            apply_timeout_secs: DEFAULT_APPLY_TIMEOUT_SECS,
            kill_grace_ms: DEFAULT_KILL_GRACE_MS,
            secret_names: Vec::new(),
            docker_network: false,
            docker_memory: None,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var: name.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Split a comma separated name list, dropping blanks.
pub fn split_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}

impl EngineConfig {
    /// Defaults overlaid with `F2P_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = env_var("F2P_CONCURRENCY") {
            config.concurrency = parse_env("F2P_CONCURRENCY", &v)?;
        }
        if let Some(v) = env_var("F2P_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("F2P_BACKEND") {
            config.backend = v.parse()?;
        }
        if let Some(v) = env_var("F2P_BUILD_TIMEOUT") {
            config.build_timeout_secs = parse_env("F2P_BUILD_TIMEOUT", &v)?;
        }
        if let Some(v) = env_var("F2P_APPLY_TIMEOUT") {
            config.apply_timeout_secs = parse_env("F2P_APPLY_TIMEOUT", &v)?;
        }
        if let Some(v) = env_var("F2P_SECRET_NAMES") {
            config.secret_names = split_names(&v);
        }
        if let Some(v) = env_var("F2P_DOCKER_NETWORK") {
            config.docker_network = parse_flag("F2P_DOCKER_NETWORK", &v)?;
        }
        config.docker_memory = env_var("F2P_DOCKER_MEMORY").or(config.docker_memory);
        Ok(config)
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Concurrency bound actually enforced; never below one.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn secret_policy(&self) -> SecretPolicy {
        SecretPolicy::with_extra(&self.secret_names)
    }

    pub fn environment_backend(&self) -> Arc<dyn EnvironmentBackend> {
        match self.backend {
            BackendKind::Docker => Arc::new(DockerBackend::new(
                self.docker_network,
                self.docker_memory.clone(),
            )),
            BackendKind::Local => Arc::new(LocalBackend),
        }
    }

    pub fn environment_builder(&self) -> EnvironmentBuilder {
        EnvironmentBuilder::new(
            self.environment_backend(),
            self.secret_policy(),
            self.build_timeout(),
        )
    }
}
