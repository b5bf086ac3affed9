//! Scenario file types
//!
//! Defines the data structures for deserializing YAML scenarios.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::cluster::ResourceKind;
use crate::common::config::Timeouts;
use crate::common::{Error, Result};
use crate::report::Verdict;

/// A complete scenario loaded from a YAML file
#[derive(Deserialize, Debug, Clone)]
pub struct Scenario {
    /// Display title; also the source of the run name
    pub name: String,
    /// Optional description of what the scenario verifies
    pub description: Option<String>,
    /// Test identifier passed to the verification tool and looked up in its ledgers
    pub test_plan: String,
    /// Verdict the ledgers must report
    pub expect: Verdict,
    /// Base name for the scenario namespace (defaults to `[fixtures].namespace`)
    pub namespace: Option<String>,
    /// Objects created before the run, in order
    #[serde(default)]
    pub fixtures: Vec<FixtureSpec>,
    /// Steps run once every fixture is ready
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Per-scenario overrides of the configured timeouts
    #[serde(default)]
    pub timeouts: Option<ScenarioTimeouts>,
}

impl Scenario {
    /// Load a scenario from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let scenario: Scenario = serde_yaml::from_str(content)?;
        scenario.check()?;
        Ok(scenario)
    }

    /// Reject scenarios without a test plan or with a fixture declared twice
    fn check(&self) -> Result<()> {
        if self.test_plan.trim().is_empty() {
            return Err(Error::invalid_value("test_plan", &self.test_plan));
        }
        let mut seen = Vec::new();
        for fixture in &self.fixtures {
            let key = (fixture.resource_kind(), fixture.name());
            if seen.contains(&key) {
                return Err(Error::invalid_value("fixtures.name", fixture.name()));
            }
            seen.push(key);
        }
        Ok(())
    }

    /// Configured timeouts with this scenario's overrides applied
    pub fn effective_timeouts(&self, base: &Timeouts) -> Timeouts {
        let mut timeouts = base.clone();
        if let Some(overrides) = &self.timeouts {
            if let Some(secs) = overrides.ready_secs {
                timeouts.ready_secs = secs;
            }
            if let Some(secs) = overrides.run_secs {
                timeouts.run_secs = secs;
            }
            if let Some(secs) = overrides.teardown_secs {
                timeouts.teardown_secs = secs;
            }
            if let Some(secs) = overrides.poll_interval_secs {
                timeouts.poll_interval_secs = secs;
            }
        }
        timeouts
    }
}

/// Timeout overrides, in seconds
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ScenarioTimeouts {
    pub ready_secs: Option<u64>,
    pub run_secs: Option<u64>,
    pub teardown_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_replicas() -> u32 {
    1
}

fn default_containers() -> usize {
    1
}

fn default_protocol() -> String {
    "TCP".to_string()
}

/// A cluster object the scenario needs before the run
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FixtureSpec {
    Pod {
        name: String,
        /// Image override (default: `[fixtures].test_image`)
        image: Option<String>,
        /// Guaranteed-QoS pod pinned to the isolated CPU pool
        #[serde(default)]
        isolated_cpu: bool,
        /// Name of a `runtime_class` fixture in this scenario
        runtime_class: Option<String>,
        #[serde(default)]
        labels: BTreeMap<String, String>,
        /// Wait for readiness before continuing
        #[serde(default = "default_true")]
        wait: bool,
    },
    Deployment {
        name: String,
        image: Option<String>,
        #[serde(default = "default_replicas")]
        replicas: u32,
        #[serde(default = "default_containers")]
        containers: usize,
        service_account: Option<String>,
        /// One container per port when set
        #[serde(default)]
        ports: Vec<ContainerPort>,
        #[serde(default)]
        labels: BTreeMap<String, String>,
        #[serde(default = "default_true")]
        wait: bool,
    },
    #[serde(rename = "daemonset")]
    DaemonSet {
        name: String,
        image: Option<String>,
        #[serde(default)]
        labels: BTreeMap<String, String>,
        #[serde(default = "default_true")]
        wait: bool,
    },
    Service {
        name: String,
        port: u16,
        target_port: u16,
        #[serde(default)]
        node_port: bool,
        #[serde(default)]
        ip_families: Vec<String>,
        ip_family_policy: Option<String>,
    },
    ServiceAccount {
        name: String,
        /// Applied with an update after the account exists
        automount: Option<AutomountSetting>,
    },
    ClusterRoleBinding {
        name: String,
        service_account: String,
        cluster_role: String,
    },
    ResourceQuota {
        name: String,
        cpu_request: String,
        memory_request: String,
        cpu_limit: String,
        memory_limit: String,
    },
    RuntimeClass {
        name: String,
        handler: String,
    },
    Subscription {
        name: String,
        package: Option<String>,
        channel: String,
        source: String,
        source_namespace: String,
    },
    InstallPlan {
        name: String,
        #[serde(default)]
        cluster_service_versions: Vec<String>,
        #[serde(default)]
        approved: bool,
    },
}

impl FixtureSpec {
    pub fn name(&self) -> &str {
        match self {
            Self::Pod { name, .. }
            | Self::Deployment { name, .. }
            | Self::DaemonSet { name, .. }
            | Self::Service { name, .. }
            | Self::ServiceAccount { name, .. }
            | Self::ClusterRoleBinding { name, .. }
            | Self::ResourceQuota { name, .. }
            | Self::RuntimeClass { name, .. }
            | Self::Subscription { name, .. }
            | Self::InstallPlan { name, .. } => name,
        }
    }

    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            Self::Pod { .. } => ResourceKind::Pod,
            Self::Deployment { .. } => ResourceKind::Deployment,
            Self::DaemonSet { .. } => ResourceKind::DaemonSet,
            Self::Service { .. } => ResourceKind::Service,
            Self::ServiceAccount { .. } => ResourceKind::ServiceAccount,
            Self::ClusterRoleBinding { .. } => ResourceKind::ClusterRoleBinding,
            Self::ResourceQuota { .. } => ResourceKind::ResourceQuota,
            Self::RuntimeClass { .. } => ResourceKind::RuntimeClass,
            Self::Subscription { .. } => ResourceKind::Subscription,
            Self::InstallPlan { .. } => ResourceKind::InstallPlan,
        }
    }

    /// Whether the sequencer waits on this fixture before continuing
    pub fn should_wait(&self) -> bool {
        match self {
            Self::Pod { wait, .. } | Self::Deployment { wait, .. } | Self::DaemonSet { wait, .. } => {
                *wait
            }
            _ => false,
        }
    }
}

/// A container port exposed by a deployment fixture
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ContainerPort {
    pub port: u16,
    pub name: Option<String>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

/// A step run after the fixtures are ready
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Run a command inside a pod; a non-zero exit fails the scenario
    Exec {
        pod: String,
        container: Option<String>,
        command: Vec<String>,
    },
    /// Change a service account's token automount setting
    SetAutomount {
        service_account: String,
        value: AutomountSetting,
    },
}

/// Three-way `automountServiceAccountToken` setting
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "RawSetting")]
pub enum AutomountSetting {
    True,
    False,
    /// Field removed, so the cluster default applies
    Null,
}

impl AutomountSetting {
    pub fn as_json(self) -> serde_json::Value {
        match self {
            Self::True => serde_json::Value::Bool(true),
            Self::False => serde_json::Value::Bool(false),
            Self::Null => serde_json::Value::Null,
        }
    }
}

impl FromStr for AutomountSetting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "true" => Ok(Self::True),
            "false" => Ok(Self::False),
            "nil" | "null" => Ok(Self::Null),
            other => Err(Error::invalid_value("automount", other)),
        }
    }
}

/// YAML writes the setting as a bool or a string
#[derive(Deserialize)]
#[serde(untagged)]
enum RawSetting {
    Bool(bool),
    Text(String),
}

impl TryFrom<RawSetting> for AutomountSetting {
    type Error = Error;

    fn try_from(raw: RawSetting) -> Result<Self> {
        match raw {
            RawSetting::Bool(true) => Ok(Self::True),
            RawSetting::Bool(false) => Ok(Self::False),
            RawSetting::Text(text) => text.parse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RT_SCENARIO: &str = r#"
name: One pod running in isolated cpu pool and rt cpu scheduling policy
description: chrt moves the container's init process to SCHED_FIFO
test_plan: performance-isolated-cpu-pool-rt-scheduling-policy
expect: passed
namespace: performance-tests
fixtures:
  - kind: runtime_class
    name: performance-rtc
    handler: high-performance
  - kind: pod
    name: rt-pod
    isolated_cpu: true
    runtime_class: performance-rtc
actions:
  - action: exec
    pod: rt-pod
    command: [chrt, -f, -p, "20", "1"]
timeouts:
  ready_secs: 120
"#;

    #[test]
    fn test_parse_rt_scenario() {
        let scenario = Scenario::parse(RT_SCENARIO).unwrap();
        assert_eq!(scenario.expect, Verdict::Passed);
        assert_eq!(scenario.fixtures.len(), 2);
        assert!(matches!(
            &scenario.fixtures[1],
            FixtureSpec::Pod { isolated_cpu: true, runtime_class: Some(rtc), wait: true, .. }
                if rtc == "performance-rtc"
        ));
        assert!(matches!(
            &scenario.actions[0],
            Action::Exec { command, container: None, .. } if command.len() == 5
        ));
        assert_eq!(scenario.timeouts.as_ref().and_then(|t| t.ready_secs), Some(120));
    }

    #[test]
    fn test_effective_timeouts_override_only_given_fields() {
        let scenario = Scenario::parse(RT_SCENARIO).unwrap();
        let base = Timeouts::default();
        let effective = scenario.effective_timeouts(&base);
        assert_eq!(effective.ready_secs, 120);
        assert_eq!(effective.run_secs, base.run_secs);
    }

    #[test]
    fn test_unknown_verdict_rejected() {
        let yaml = "name: x\ntest_plan: t\nexpect: flaky\n";
        assert!(Scenario::parse(yaml).is_err());
    }

    #[test]
    fn test_duplicate_fixture_rejected() {
        let yaml = r#"
name: x
test_plan: t
expect: failed
fixtures:
  - {kind: pod, name: a}
  - {kind: pod, name: a}
"#;
        assert!(matches!(Scenario::parse(yaml), Err(Error::InvalidValue { .. })));
    }

    #[test]
    fn test_automount_accepts_bools_and_strings() {
        let yaml = r#"
name: x
test_plan: access-control-pod-automount-service-account-token
expect: failed
fixtures:
  - {kind: service_account, name: a, automount: true}
  - {kind: service_account, name: b, automount: "false"}
actions:
  - {action: set_automount, service_account: default, value: nil}
"#;
        let scenario = Scenario::parse(yaml).unwrap();
        assert!(matches!(
            scenario.fixtures[0],
            FixtureSpec::ServiceAccount { automount: Some(AutomountSetting::True), .. }
        ));
        assert!(matches!(
            scenario.fixtures[1],
            FixtureSpec::ServiceAccount { automount: Some(AutomountSetting::False), .. }
        ));
        assert!(matches!(
            scenario.actions[0],
            Action::SetAutomount { value: AutomountSetting::Null, .. }
        ));
    }

    #[test]
    fn test_automount_rejects_other_text() {
        assert!(matches!(
            "yes".parse::<AutomountSetting>(),
            Err(Error::InvalidValue { .. })
        ));
        assert_eq!("null".parse::<AutomountSetting>().unwrap(), AutomountSetting::Null);
    }

    #[test]
    fn test_bundled_scenarios_parse() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios");
        let mut count = 0;
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.extension().is_some_and(|ext| ext == "yaml") {
                Scenario::load(&path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e));
                count += 1;
            }
        }
        assert!(count >= 4);
    }
}
