//! Error types for certverify
//!
//! Every failure surfaces as a hard failure of the scenario that raised it.
//! Messages name the resource, ledger or verdict involved so a failed run
//! can be diagnosed from the log alone.

use std::io;
use thiserror::Error;

use crate::report::Verdict;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for certverify
#[derive(Error, Debug)]
pub enum Error {
    // === Readiness Errors ===
    #[error("Timed out waiting for {resource}; last observed status: {last_status}")]
    PollTimeout { resource: String, last_status: String },

    #[error("Failed to poll {resource}: {cause}")]
    PollFailed { resource: String, cause: String },

    // === Launch Errors ===
    #[error("Verification run failed to produce evidence: {0}")]
    LaunchFailure(String),

    #[error("Verification run for '{test_plan}' timed out after {secs} seconds")]
    LaunchTimeout { test_plan: String, secs: u64 },

    // === Report Errors ===
    #[error("Malformed {ledger} ledger: {message}\n--- excerpt ---\n{excerpt}")]
    ReportParse {
        ledger: String,
        message: String,
        excerpt: String,
    },

    #[error("Expected verdict {expected}, got {actual}\n--- ledger excerpt ---\n{excerpt}")]
    AssertionMismatch {
        expected: Verdict,
        actual: Verdict,
        excerpt: String,
    },

    #[error("Scenario interrupted after reaching state {0}")]
    Interrupted(String),

    // === Teardown Errors ===
    #[error("Cleanup failed for: {}", format_failures(.failures))]
    CleanupFailure { failures: Vec<(String, String)> },

    // === Value Errors ===
    #[error("Invalid value '{value}' for {field}")]
    InvalidValue { field: String, value: String },

    // === Cluster Errors ===
    #[error("Cluster command '{command}' failed: {stderr}")]
    ClusterCommand { command: String, stderr: String },

    #[error("Cluster API error: {0}")]
    ClusterApi(String),

    #[error("Cluster command '{command}' timed out after {secs} seconds")]
    ClusterTimeout { command: String, secs: u64 },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid scenario file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(what, why)| format!("{what} ({why})"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a poll timeout error for a resource
    pub fn poll_timeout(resource: impl Into<String>, last_status: impl Into<String>) -> Self {
        Self::PollTimeout {
            resource: resource.into(),
            last_status: last_status.into(),
        }
    }

    /// Create a report parse error with the offending excerpt
    pub fn report_parse(ledger: &str, message: impl Into<String>, excerpt: impl Into<String>) -> Self {
        Self::ReportParse {
            ledger: ledger.to_string(),
            message: message.into(),
            excerpt: excerpt.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(field: &str, value: &str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    /// Create a cluster command failure
    pub fn cluster_command(command: &str, stderr: &str) -> Self {
        Self::ClusterCommand {
            command: command.to_string(),
            stderr: stderr.trim().to_string(),
        }
    }

    /// Short machine-readable category, used in scenario summaries
    pub fn code(&self) -> &'static str {
        match self {
            Error::PollTimeout { .. } => "POLL_TIMEOUT",
            Error::PollFailed { .. } => "POLL_FAILED",
            Error::LaunchFailure(_) => "LAUNCH_FAILURE",
            Error::LaunchTimeout { .. } => "LAUNCH_TIMEOUT",
            Error::ReportParse { .. } => "REPORT_PARSE",
            Error::AssertionMismatch { .. } => "ASSERTION_MISMATCH",
            Error::Interrupted(_) => "INTERRUPTED",
            Error::CleanupFailure { .. } => "CLEANUP_FAILURE",
            Error::InvalidValue { .. } => "INVALID_VALUE",
            Error::ClusterCommand { .. } | Error::ClusterApi(_) | Error::ClusterTimeout { .. } => {
                "CLUSTER_ERROR"
            }
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_failure_lists_every_failure() {
        let err = Error::CleanupFailure {
            failures: vec![
                ("namespace/a".to_string(), "still present".to_string()),
                ("namespace/b".to_string(), "forbidden".to_string()),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("namespace/a (still present)"));
        assert!(msg.contains("namespace/b (forbidden)"));
    }

    #[test]
    fn assertion_mismatch_carries_both_verdicts() {
        let err = Error::AssertionMismatch {
            expected: Verdict::Passed,
            actual: Verdict::Failed,
            excerpt: "<testcase name=\"x\"><failure/></testcase>".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Expected verdict passed, got failed"));
        assert!(msg.contains("<failure/>"));
        assert_eq!(err.code(), "ASSERTION_MISMATCH");
    }
}
