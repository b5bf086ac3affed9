//! Configuration file handling

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::{config_path, default_artifacts_dir};
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// How to reach the cluster
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// External verification tool settings
    #[serde(default)]
    pub certsuite: CertsuiteConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Readiness polling behaviour
    #[serde(default)]
    pub polling: PollingConfig,

    /// Defaults for generated fixtures
    #[serde(default)]
    pub fixtures: FixtureDefaults,
}

/// Cluster access configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ClusterConfig {
    /// kubectl (or oc) executable, resolved through PATH when relative
    #[serde(default = "default_kubectl")]
    pub kubectl: PathBuf,

    /// Explicit kubeconfig; falls back to the KUBECONFIG environment variable
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// Context name within the kubeconfig
    #[serde(default)]
    pub context: Option<String>,

    /// Timeout for a single kubectl invocation
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kubectl: default_kubectl(),
            kubeconfig: None,
            context: None,
            command_timeout_secs: default_command_timeout(),
        }
    }
}

fn default_kubectl() -> PathBuf {
    PathBuf::from("kubectl")
}
fn default_command_timeout() -> u64 {
    60
}

/// External verification tool configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CertsuiteConfig {
    /// Path to the verification executable
    #[serde(default = "default_executable")]
    pub executable: PathBuf,

    /// Argument template; `{test_plan}` and `{output_dir}` are substituted
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Extra environment passed to the run
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Root directory under which each run gets its own output directory
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    /// File name of the JUnit-style ledger inside a run's output directory
    #[serde(default = "default_junit_file")]
    pub junit_file: String,

    /// File name of the claim ledger inside a run's output directory
    #[serde(default = "default_claim_file")]
    pub claim_file: String,
}

impl Default for CertsuiteConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            args: default_args(),
            env: HashMap::new(),
            artifacts_dir: default_artifacts_dir(),
            junit_file: default_junit_file(),
            claim_file: default_claim_file(),
        }
    }
}

fn default_executable() -> PathBuf {
    PathBuf::from("certsuite")
}
fn default_args() -> Vec<String> {
    vec![
        "run".to_string(),
        "--label-filter={test_plan}".to_string(),
        "--output-dir={output_dir}".to_string(),
    ]
}
fn default_junit_file() -> String {
    "cnf-certification-tests_junit.xml".to_string()
}
fn default_claim_file() -> String {
    "claim.json".to_string()
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Budget for a fixture to become ready
    #[serde(default = "default_ready")]
    pub ready_secs: u64,

    /// Interval between readiness polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Budget for a single verification run
    #[serde(default = "default_run")]
    pub run_secs: u64,

    /// Budget for each deleted resource to disappear
    #[serde(default = "default_teardown")]
    pub teardown_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            ready_secs: default_ready(),
            poll_interval_secs: default_poll_interval(),
            run_secs: default_run(),
            teardown_secs: default_teardown(),
        }
    }
}

impl Timeouts {
    pub fn ready(&self) -> Duration {
        Duration::from_secs(self.ready_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn run(&self) -> Duration {
        Duration::from_secs(self.run_secs)
    }

    pub fn teardown(&self) -> Duration {
        Duration::from_secs(self.teardown_secs)
    }
}

fn default_ready() -> u64 {
    300
}
fn default_poll_interval() -> u64 {
    5
}
fn default_run() -> u64 {
    1800
}
fn default_teardown() -> u64 {
    300
}

/// What the readiness poller does with a failed fetch
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorPolicy {
    /// Log the error and keep polling until the timeout
    #[default]
    Absorb,
    /// Stop at the first fetch error
    FailFast,
}

/// Readiness polling configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct PollingConfig {
    #[serde(default)]
    pub fetch_errors: FetchErrorPolicy,
}

/// Defaults applied to fixtures that do not override them
#[derive(Debug, Deserialize, Clone)]
pub struct FixtureDefaults {
    /// Container image used by generated workloads
    #[serde(default = "default_test_image")]
    pub test_image: String,

    /// Base namespace name, suffixed per scenario
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for FixtureDefaults {
    fn default() -> Self {
        Self {
            test_image: default_test_image(),
            namespace: default_namespace(),
        }
    }
}

fn default_test_image() -> String {
    "quay.io/testnetworkfunction/cnf-test-partner:latest".to_string()
}
fn default_namespace() -> String {
    "certverify".to_string()
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Resolve the verification executable
    ///
    /// Relative names are searched in PATH; explicit paths are used as-is.
    pub fn resolve_executable(&self) -> Result<PathBuf> {
        resolve(&self.certsuite.executable)
    }

    /// Resolve the kubectl executable
    pub fn resolve_kubectl(&self) -> Result<PathBuf> {
        resolve(&self.cluster.kubectl)
    }
}

fn resolve(program: &Path) -> Result<PathBuf> {
    if program.components().count() > 1 {
        return Ok(program.to_path_buf());
    }
    which::which(program).map_err(|_| {
        Error::Config(format!(
            "Executable '{}' not found in PATH",
            program.display()
        ))
    })
}
