//! Scenario definitions and the engine that runs them
//!
//! A scenario provisions fixtures in its own namespace, waits for them,
//! runs the verification tool for one test plan and checks the verdict
//! its ledgers report against the expected one.

pub mod config;
pub mod fixtures;
mod sequencer;
pub mod teardown;

pub use config::{Action, AutomountSetting, FixtureSpec, Scenario};
pub use sequencer::{CleanupLedger, ScenarioPlan, ScenarioReport, ScenarioState, Sequencer};
