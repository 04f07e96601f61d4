//! Process-wide configuration.
//!
//! Policy constants (resource caps, deadline, scratch directory, container
//! runtime) are fixed at startup and never read from a request. Defaults
//! match the limits the service has always shipped with; a JSON document can
//! override them, either from `--config <path>` or from the
//! `SANDBOX_RUNNER_CONFIG` environment variable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::language::ProfileSpec;

/// Environment variable holding an inline JSON configuration.
pub const CONFIG_ENV_VAR: &str = "SANDBOX_RUNNER_CONFIG";

/// Top-level configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Resource caps applied to every isolated run.
    #[serde(default)]
    pub limits: Limits,

    /// Container runtime invocation settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Directory in which per-request workspaces are created.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Extra or overriding language profiles, keyed by language id.
    #[serde(default)]
    pub languages: HashMap<String, ProfileSpec>,

    /// HTTP boundary settings.
    #[serde(default)]
    pub server: ServerConfig,
}

/// Resource caps. Not client-configurable.
#[derive(Debug, Clone, Deserialize)]
pub struct Limits {
    /// Fractional CPU quota passed to `--cpus`.
    #[serde(default = "default_cpus")]
    pub cpus: f64,

    /// Memory ceiling in megabytes (swap is capped to the same value).
    #[serde(default = "default_memory")]
    pub memory_mb: u64,

    /// Hard wall-clock deadline for one run, compile step included.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Maximum number of processes inside the container.
    #[serde(default = "default_pids")]
    pub pids_limit: u32,

    /// Bytes kept per captured stream; the rest is drained and dropped.
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,
}

/// How the container CLI is invoked.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Container CLI program (`docker`, `podman`, or an absolute path).
    #[serde(default = "default_runtime_program")]
    pub program: String,

    /// Whether containers get network access.
    #[serde(default)]
    pub network: bool,

    /// Deadline for the forced container removal issued after a timeout.
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout_seconds: u64,
}

/// HTTP boundary configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Origins allowed by the CORS layer.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Maximum in-flight runs; further requests are rejected. 0 disables.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            runtime: RuntimeConfig::default(),
            scratch_dir: default_scratch_dir(),
            languages: HashMap::new(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            cpus: default_cpus(),
            memory_mb: default_memory(),
            timeout_seconds: default_timeout(),
            pids_limit: default_pids(),
            max_output_bytes: default_max_output(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            program: default_runtime_program(),
            network: false,
            kill_timeout_seconds: default_kill_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            max_concurrent_runs: default_max_concurrent_runs(),
        }
    }
}

impl Limits {
    /// The run deadline as a `Duration`.
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl RuntimeConfig {
    /// The forced-removal deadline as a `Duration`.
    pub const fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_seconds)
    }
}

impl Config {
    /// Load configuration from `SANDBOX_RUNNER_CONFIG`, or defaults if unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(json) => {
                Self::from_json(&json).with_context(|| format!("Failed to parse {CONFIG_ENV_VAR}"))
            }
            Err(_) => Ok(Self::default()),
        }
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        anyhow::ensure!(
            config.limits.cpus > 0.0,
            "limits.cpus must be positive, got {}",
            config.limits.cpus
        );
        anyhow::ensure!(config.limits.memory_mb > 0, "limits.memory_mb must be positive");
        anyhow::ensure!(
            config.limits.timeout_seconds > 0,
            "limits.timeout_seconds must be positive"
        );
        anyhow::ensure!(
            config.limits.max_output_bytes > 0,
            "limits.max_output_bytes must be positive"
        );
        anyhow::ensure!(!config.runtime.program.is_empty(), "runtime.program must not be empty");
        Ok(config)
    }
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("sandbox-runner")
}

const fn default_cpus() -> f64 {
    0.5
}

const fn default_memory() -> u64 {
    128
}

const fn default_timeout() -> u64 {
    5
}

const fn default_pids() -> u32 {
    64
}

const fn default_max_output() -> usize {
    1024 * 1024
}

fn default_runtime_program() -> String {
    "docker".into()
}

const fn default_kill_timeout() -> u64 {
    5
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".into(),
        "http://127.0.0.1:3000".into(),
    ]
}

const fn default_max_concurrent_runs() -> usize {
    8
}
