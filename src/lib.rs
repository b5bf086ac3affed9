//! certverify - certification scenario runner for Kubernetes
//!
//! Provisions fixtures, waits for them to become ready, runs an external
//! certification tool for one test plan and checks the verdict recorded in
//! its JUnit and claim ledgers against an expectation.

pub mod cli;
pub mod cluster;
pub mod commands;
pub mod common;
pub mod launcher;
pub mod report;
pub mod scenario;
pub mod wait;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use report::Verdict;
