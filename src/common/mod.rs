//! Common utilities shared by the CLI and the scenario engine

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};

/// Keep the last `max` lines of process output for diagnostics
pub fn tail_lines(output: &str, max: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(max);
    lines[start..].join("\n")
}
