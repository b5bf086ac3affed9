//! External verification runs
//!
//! Launches the certification tool for one test plan, blocks until it exits
//! or its timeout fires, and reports where the ledgers ended up. The exit
//! status is kept separate from the verdict: a failing check exits non-zero
//! but still writes ledgers, while a crash leaves no evidence at all.

mod run_name;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::common::config::Config;
use crate::common::{paths, tail_lines, Error, Result};
use crate::report::RunArtifacts;

pub use run_name::{run_name_for, title_digest};

/// Lines of tool output kept on the handle for diagnostics
const OUTPUT_TAIL_LINES: usize = 40;

/// One verification run to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub test_plan: String,
    pub run_name: String,
    pub timeout: Duration,
}

impl RunRequest {
    /// Request whose run name is derived from the scenario title
    pub fn for_scenario(test_plan: &str, title: &str, timeout: Duration) -> Self {
        Self {
            test_plan: test_plan.to_string(),
            run_name: run_name_for(title),
            timeout,
        }
    }
}

/// A finished run and the evidence it left behind
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub request: RunRequest,
    pub output_dir: PathBuf,
    /// Exit code, `None` if the tool was killed by a signal
    pub exit_code: Option<i32>,
    pub artifacts: RunArtifacts,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

impl RunHandle {
    /// Tool exited zero; a non-zero exit usually means a check failed
    pub fn completed_cleanly(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs the configured verification executable
pub struct RunLauncher<'a> {
    config: &'a Config,
}

impl<'a> RunLauncher<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Directory a run's ledgers are written to
    pub fn output_dir(&self, run_name: &str) -> PathBuf {
        self.config.certsuite.artifacts_dir.join(run_name)
    }

    /// Expand `{test_plan}` and `{output_dir}` in the argument template
    fn build_args(&self, request: &RunRequest, output_dir: &Path) -> Vec<String> {
        let output_dir = output_dir.display().to_string();
        self.config
            .certsuite
            .args
            .iter()
            .map(|arg| {
                arg.replace("{test_plan}", &request.test_plan)
                    .replace("{output_dir}", &output_dir)
            })
            .collect()
    }

    /// Remove ledgers from a previous run of the same scenario
    fn clear_stale_ledgers(&self, output_dir: &Path) -> Result<()> {
        for file in [&self.config.certsuite.junit_file, &self.config.certsuite.claim_file] {
            let path = output_dir.join(file);
            if path.exists() {
                tracing::debug!(path = %path.display(), "removing stale ledger");
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Run the tool for `request` and collect its artifacts
    pub async fn launch(&self, request: &RunRequest) -> Result<RunHandle> {
        let executable = self
            .config
            .resolve_executable()
            .map_err(|e| Error::LaunchFailure(e.to_string()))?;
        let output_dir = paths::ensure_dir(&self.output_dir(&request.run_name))?;
        self.clear_stale_ledgers(&output_dir)?;

        let args = self.build_args(request, &output_dir);
        tracing::info!(
            test_plan = %request.test_plan,
            output_dir = %output_dir.display(),
            "launching verification run"
        );
        tracing::debug!(executable = %executable.display(), args = ?args, "run command");

        let mut command = Command::new(&executable);
        command
            .args(&args)
            .envs(&self.config.certsuite.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(kubeconfig) = &self.config.cluster.kubeconfig {
            command.env("KUBECONFIG", kubeconfig);
        }

        let child = command.spawn().map_err(|e| {
            Error::LaunchFailure(format!(
                "failed to start '{}': {}",
                executable.display(),
                e
            ))
        })?;

        // Dropping the wait future on timeout kills the child (kill_on_drop)
        let output = tokio::time::timeout(request.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::LaunchTimeout {
                test_plan: request.test_plan.clone(),
                secs: request.timeout.as_secs(),
            })?
            .map_err(|e| Error::LaunchFailure(format!("failed waiting for run: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let log_path = output_dir.join("run.log");
        if let Err(e) = std::fs::write(&log_path, format!("{stdout}\n--- stderr ---\n{stderr}")) {
            tracing::warn!(path = %log_path.display(), error = %e, "could not save run output");
        }

        let artifacts = RunArtifacts::locate(
            &output_dir,
            &self.config.certsuite.junit_file,
            &self.config.certsuite.claim_file,
        );
        let exit_code = output.status.code();

        if !output.status.success() && artifacts.is_empty() {
            return Err(Error::LaunchFailure(format!(
                "'{}' exited with {} and wrote no ledgers to {}\n{}",
                request.test_plan,
                exit_code.map_or_else(|| "a signal".to_string(), |c| format!("code {}", c)),
                output_dir.display(),
                tail_lines(&stderr, OUTPUT_TAIL_LINES)
            )));
        }

        tracing::info!(
            test_plan = %request.test_plan,
            exit_code = ?exit_code,
            junit = artifacts.junit_ledger.is_some(),
            claim = artifacts.claim_ledger.is_some(),
            "verification run finished"
        );

        Ok(RunHandle {
            request: request.clone(),
            output_dir,
            exit_code,
            artifacts,
            stdout_tail: tail_lines(&stdout, OUTPUT_TAIL_LINES),
            stderr_tail: tail_lines(&stderr, OUTPUT_TAIL_LINES),
        })
    }
}
