//! Scenario state machine
//!
//! A scenario moves through `Setup`, `Provisioned`, `Waiting`, `Launched`,
//! `Evaluated` and `Asserted` in order, stopping at the first failure.
//! Teardown always runs afterwards and its result is reported next to the
//! primary one.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use tokio::sync::watch;
use tracing::Instrument;

use crate::cluster::{dns_label, ClusterContext, ClusterObject, ObjectRef, ResourceKind};
use crate::common::config::Timeouts;
use crate::common::{Error, Result};
use crate::launcher::{run_name_for, title_digest, RunRequest};
use crate::report::{self, ReportEvaluator, Verdict};
use crate::wait::{ReadinessTarget, ResourceWaiter};

use super::config::{Action, FixtureSpec, Scenario};
use super::fixtures::{self, RenderContext};
use super::teardown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScenarioState {
    Setup,
    Provisioned,
    Waiting,
    Launched,
    Evaluated,
    Asserted,
    Torndown,
}

impl ScenarioState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Provisioned => "provisioned",
            Self::Waiting => "waiting",
            Self::Launched => "launched",
            Self::Evaluated => "evaluated",
            Self::Asserted => "asserted",
            Self::Torndown => "torndown",
        }
    }
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Objects to delete when the scenario ends
///
/// Namespaced objects go away with their namespace, so only namespaces and
/// cluster-scoped objects are tracked.
#[derive(Debug, Default)]
pub struct CleanupLedger {
    namespaces: Vec<ObjectRef>,
    cluster_scoped: Vec<ObjectRef>,
}

impl CleanupLedger {
    pub fn register(&mut self, target: ObjectRef) {
        if target.kind == ResourceKind::Namespace {
            self.namespaces.push(target);
        } else if target.namespace.is_none() {
            self.cluster_scoped.push(target);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty() && self.cluster_scoped.is_empty()
    }

    /// Everything registered, in deletion order
    ///
    /// Cluster-scoped objects come first, newest first, then namespaces.
    pub fn drain(&mut self) -> Vec<ObjectRef> {
        let mut order: Vec<ObjectRef> = self.cluster_scoped.drain(..).rev().collect();
        order.extend(self.namespaces.drain(..));
        order
    }
}

/// Names and budgets derived for one scenario before anything is created
#[derive(Debug, Clone)]
pub struct ScenarioPlan {
    pub run_name: String,
    pub namespace: String,
    pub timeouts: Timeouts,
    scoped: HashMap<(ResourceKind, String), String>,
}

impl ScenarioPlan {
    pub fn new(ctx: &ClusterContext, scenario: &Scenario) -> Self {
        let run_name = run_name_for(&scenario.name);
        let base = scenario
            .namespace
            .as_deref()
            .unwrap_or(&ctx.config.fixtures.namespace);
        let namespace = dns_label(&format!("{}-{}", base, title_digest(&scenario.name)));

        let scoped = scenario
            .fixtures
            .iter()
            .filter(|f| !f.resource_kind().is_namespaced())
            .map(|f| {
                (
                    (f.resource_kind(), f.name().to_string()),
                    ctx.scoped_name(f.name()),
                )
            })
            .collect();

        Self {
            run_name,
            namespace,
            timeouts: scenario.effective_timeouts(&ctx.config.timeouts),
            scoped,
        }
    }

    fn render_context<'a>(&'a self, ctx: &'a ClusterContext) -> RenderContext<'a> {
        RenderContext {
            namespace: &self.namespace,
            defaults: &ctx.config.fixtures,
            scoped: &self.scoped,
        }
    }
}

/// Everything known about a scenario once it has finished
#[derive(Debug)]
pub struct ScenarioReport {
    pub name: String,
    pub run_name: String,
    pub namespace: String,
    /// States entered, in order; always ends with `Torndown`
    pub trail: Vec<ScenarioState>,
    pub verdict: Option<Verdict>,
    pub output_dir: Option<PathBuf>,
    /// Result of the forward transitions
    pub outcome: Result<()>,
    /// Result of teardown, kept apart so it never hides `outcome`
    pub cleanup: Result<()>,
}

impl ScenarioReport {
    /// Furthest forward state the scenario entered
    pub fn reached(&self) -> ScenarioState {
        self.trail
            .iter()
            .rev()
            .copied()
            .find(|s| *s != ScenarioState::Torndown)
            .unwrap_or(ScenarioState::Setup)
    }

    pub fn passed(&self) -> bool {
        self.outcome.is_ok() && self.cleanup.is_ok()
    }
}

/// Mutable bookkeeping for one scenario run
#[derive(Default)]
struct Progress {
    trail: Vec<ScenarioState>,
    verdict: Option<Verdict>,
    output_dir: Option<PathBuf>,
    ledger: CleanupLedger,
}

impl Progress {
    fn current(&self) -> ScenarioState {
        self.trail.last().copied().unwrap_or(ScenarioState::Setup)
    }

    fn enter(&mut self, state: ScenarioState) {
        tracing::info!(state = %state, "scenario state");
        self.trail.push(state);
    }
}

/// Drives scenarios against a cluster
pub struct Sequencer<'a> {
    ctx: &'a ClusterContext,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<'a> Sequencer<'a> {
    pub fn new(ctx: &'a ClusterContext) -> Self {
        Self { ctx, shutdown: None }
    }

    /// Abandon the running scenario once `shutdown` turns true
    ///
    /// The interrupted scenario is still torn down before `run` returns.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Run one scenario to completion, including teardown
    pub async fn run(&self, scenario: &Scenario) -> ScenarioReport {
        let plan = ScenarioPlan::new(self.ctx, scenario);
        let span = tracing::info_span!(
            "scenario",
            name = %scenario.name,
            namespace = %plan.namespace
        );
        self.run_planned(scenario, plan).instrument(span).await
    }

    async fn run_planned(&self, scenario: &Scenario, plan: ScenarioPlan) -> ScenarioReport {
        let mut progress = Progress::default();
        let outcome = match self.shutdown.clone() {
            Some(shutdown) => {
                let raced = tokio::select! {
                    biased;
                    _ = interrupted(shutdown) => None,
                    outcome = self.advance(scenario, &plan, &mut progress) => Some(outcome),
                };
                raced.unwrap_or_else(|| Err(Error::Interrupted(progress.current().to_string())))
            }
            None => self.advance(scenario, &plan, &mut progress).await,
        };
        if let Err(e) = &outcome {
            tracing::error!(
                state = %progress.current(),
                error = %e,
                "scenario aborted"
            );
        }

        let targets = progress.ledger.drain();
        let cleanup = teardown::delete_all(self.ctx, &targets, &plan.timeouts).await;
        progress.enter(ScenarioState::Torndown);

        ScenarioReport {
            name: scenario.name.clone(),
            run_name: plan.run_name,
            namespace: plan.namespace,
            trail: progress.trail,
            verdict: progress.verdict,
            output_dir: progress.output_dir,
            outcome,
            cleanup,
        }
    }

    async fn advance(&self, scenario: &Scenario, plan: &ScenarioPlan, progress: &mut Progress) -> Result<()> {
        progress.enter(ScenarioState::Setup);
        self.remove_stale_namespace(plan).await?;

        let to_wait = self.provision(scenario, plan, &mut progress.ledger).await?;
        progress.enter(ScenarioState::Provisioned);

        self.await_fixtures(&to_wait, plan).await?;
        self.run_actions(&scenario.actions, plan).await?;
        progress.enter(ScenarioState::Waiting);

        let request = RunRequest {
            test_plan: scenario.test_plan.clone(),
            run_name: plan.run_name.clone(),
            timeout: plan.timeouts.run(),
        };
        let handle = self.ctx.launcher().launch(&request).await?;
        if !handle.completed_cleanly() {
            tracing::debug!(exit_code = ?handle.exit_code, "verification tool exited non-zero");
        }
        progress.output_dir = Some(handle.output_dir.clone());
        progress.enter(ScenarioState::Launched);

        let evaluation = ReportEvaluator::evaluate(&handle.artifacts, &scenario.test_plan)?;
        progress.verdict = Some(evaluation.verdict);
        progress.enter(ScenarioState::Evaluated);

        report::validate(scenario.expect, evaluation.verdict, &evaluation.excerpt)?;
        progress.enter(ScenarioState::Asserted);
        Ok(())
    }

    /// Delete a namespace left behind by an earlier run of the same scenario
    async fn remove_stale_namespace(&self, plan: &ScenarioPlan) -> Result<()> {
        let target = ObjectRef::namespace(&plan.namespace);
        if self.ctx.api().get(&target).await?.is_some() {
            tracing::info!(namespace = %plan.namespace, "removing stale namespace");
            teardown::delete_and_wait(self.ctx, &target, &plan.timeouts).await?;
        }
        Ok(())
    }

    /// Create the namespace and every fixture; returns the objects to wait on
    async fn provision(
        &self,
        scenario: &Scenario,
        plan: &ScenarioPlan,
        ledger: &mut CleanupLedger,
    ) -> Result<Vec<ObjectRef>> {
        let api = self.ctx.api();
        let namespace = ClusterObject::from_manifest(fixtures::namespace(&plan.namespace))?;
        // Registered first; teardown treats an absent object as done
        ledger.register(namespace.object_ref());
        api.create(&namespace).await?;

        let render_cx = plan.render_context(self.ctx);
        let mut to_wait = Vec::new();
        for spec in &scenario.fixtures {
            let object = ClusterObject::from_manifest(fixtures::render(spec, &render_cx)?)?;
            let target = object.object_ref();
            ledger.register(target.clone());
            api.create(&object).await?;
            tracing::info!(resource = %target, "fixture created");

            if let FixtureSpec::ServiceAccount {
                name,
                automount: Some(setting),
            } = spec
            {
                fixtures::set_automount_token(api, &plan.namespace, name, *setting).await?;
            }
            if spec.should_wait() {
                to_wait.push(target);
            }
        }
        Ok(to_wait)
    }

    async fn await_fixtures(&self, targets: &[ObjectRef], plan: &ScenarioPlan) -> Result<()> {
        let waiter = ResourceWaiter::from_context(self.ctx);
        for object in targets {
            let Some(target) = ReadinessTarget::with_default(object.clone()) else {
                continue;
            };
            waiter
                .require_ready(&target, plan.timeouts.ready(), plan.timeouts.poll_interval())
                .await?;
            tracing::info!(resource = %object, "fixture ready");
        }
        Ok(())
    }

    async fn run_actions(&self, actions: &[Action], plan: &ScenarioPlan) -> Result<()> {
        let api = self.ctx.api();
        for action in actions {
            match action {
                Action::Exec {
                    pod,
                    container,
                    command,
                } => {
                    let target = ObjectRef::namespaced(ResourceKind::Pod, &plan.namespace, pod);
                    tracing::info!(pod = %target, command = ?command, "running command in pod");
                    let output = api.exec(&target, container.as_deref(), command).await?;
                    if !output.success() {
                        return Err(Error::cluster_command(
                            &format!("exec {} -- {}", target, command.join(" ")),
                            &format!("exit code {}: {}", output.exit_code, output.stderr),
                        ));
                    }
                }
                Action::SetAutomount {
                    service_account,
                    value,
                } => {
                    fixtures::set_automount_token(api, &plan.namespace, service_account, *value).await?;
                }
            }
        }
        Ok(())
    }
}

/// Resolves once the flag turns true; never resolves if the sender is gone
async fn interrupted(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::cluster::{ClusterApi, ExecOutput, MemoryCluster};
    use crate::common::config::Config;
    use crate::wait::ManualClock;
    use serde_json::json;

    fn scenario(yaml: &str) -> Scenario {
        Scenario::parse(yaml).unwrap()
    }

    fn context(cluster: Arc<MemoryCluster>, dir: &std::path::Path) -> ClusterContext {
        let mut config = Config::default();
        config.certsuite.executable = dir.join("missing-certsuite");
        config.certsuite.artifacts_dir = dir.join("runs");
        config.timeouts.ready_secs = 30;
        config.timeouts.teardown_secs = 30;
        ClusterContext::new(cluster, config)
            .with_clock(Arc::new(ManualClock::new()))
            .with_run_token("t0k3n0")
    }

    const DAEMONSET_SCENARIO: &str = r#"
name: probe daemonset never ready
test_plan: lifecycle-pod-scheduling
expect: passed
namespace: perf
fixtures:
  - {kind: runtime_class, name: rtc, handler: high-performance}
  - {kind: daemonset, name: probe}
"#;

    #[test]
    fn test_plan_names() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(Arc::new(MemoryCluster::new()), dir.path());
        let scenario = scenario(DAEMONSET_SCENARIO);
        let plan = ScenarioPlan::new(&ctx, &scenario);

        assert!(plan.namespace.starts_with("perf-"));
        assert_eq!(plan.namespace.len(), "perf-".len() + 8);
        assert!(plan.run_name.starts_with("probe_daemonset_never_ready_"));
        assert_eq!(
            plan.scoped.get(&(ResourceKind::RuntimeClass, "rtc".to_string())),
            Some(&"rtc-t0k3n0".to_string())
        );
        assert_eq!(plan.timeouts.ready_secs, 30);
    }

    #[test]
    fn test_ledger_order() {
        let mut ledger = CleanupLedger::default();
        ledger.register(ObjectRef::namespace("ns"));
        ledger.register(ObjectRef::namespaced(ResourceKind::Pod, "ns", "p"));
        ledger.register(ObjectRef::cluster_scoped(ResourceKind::RuntimeClass, "a"));
        ledger.register(ObjectRef::cluster_scoped(ResourceKind::ClusterRoleBinding, "b"));

        let order = ledger.drain();
        assert_eq!(order.len(), 3);
        assert_eq!(order[0].name, "b");
        assert_eq!(order[1].name, "a");
        assert_eq!(order[2].kind, ResourceKind::Namespace);
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_readiness_timeout_still_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(MemoryCluster::new().with_ready_after(None));
        let ctx = context(cluster.clone(), dir.path());
        let scenario = scenario(DAEMONSET_SCENARIO);

        let report = Sequencer::new(&ctx).run(&scenario).await;

        assert!(matches!(report.outcome, Err(Error::PollTimeout { .. })));
        assert_eq!(report.reached(), ScenarioState::Provisioned);
        assert_eq!(report.trail.last(), Some(&ScenarioState::Torndown));
        assert!(report.cleanup.is_ok());
        assert!(!cluster.exists(&ObjectRef::namespace(&report.namespace)));
        assert!(!cluster.exists(&ObjectRef::cluster_scoped(ResourceKind::RuntimeClass, "rtc-t0k3n0")));
        assert_eq!(report.verdict, None);
    }

    #[tokio::test]
    async fn test_launch_failure_reported_with_cleanup_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(MemoryCluster::new());
        let ctx = context(cluster.clone(), dir.path());
        let scenario = scenario(DAEMONSET_SCENARIO);
        let plan = ScenarioPlan::new(&ctx, &scenario);
        cluster.fail_deletes(&ObjectRef::namespace(&plan.namespace), "forbidden");

        let report = Sequencer::new(&ctx).run(&scenario).await;

        assert!(matches!(report.outcome, Err(Error::LaunchFailure(_))));
        assert_eq!(report.reached(), ScenarioState::Waiting);
        match &report.cleanup {
            Err(Error::CleanupFailure { failures }) => assert_eq!(failures.len(), 1),
            other => panic!("expected cleanup failure, got {:?}", other),
        }
        assert!(!report.passed());
    }

    #[tokio::test]
    async fn test_stale_namespace_removed_first() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(MemoryCluster::new());
        let ctx = context(cluster.clone(), dir.path());
        let scenario = scenario(DAEMONSET_SCENARIO);
        let plan = ScenarioPlan::new(&ctx, &scenario);
        cluster.insert(
            ClusterObject::from_manifest(json!({
                "apiVersion": "v1", "kind": "Namespace", "metadata": {"name": plan.namespace}
            }))
            .unwrap(),
        );

        let report = Sequencer::new(&ctx).run(&scenario).await;

        // Stale copy deleted during setup, fresh copy during teardown
        let deleted_ns = cluster
            .deleted()
            .into_iter()
            .filter(|r| r.kind == ResourceKind::Namespace)
            .count();
        assert_eq!(deleted_ns, 2);
        assert!(report.reached() >= ScenarioState::Provisioned);
    }

    #[tokio::test]
    async fn test_failed_exec_aborts_before_launch() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(MemoryCluster::new());
        cluster.set_exec_result(
            "chrt",
            ExecOutput {
                stdout: String::new(),
                stderr: "chrt: failed to set pid 1's policy: Operation not permitted".into(),
                exit_code: 1,
            },
        );
        let ctx = context(cluster.clone(), dir.path());
        let scenario = scenario(
            r#"
name: rt policy denied
test_plan: performance-isolated-cpu-pool-rt-scheduling-policy
expect: passed
fixtures:
  - {kind: pod, name: rt-pod}
actions:
  - {action: exec, pod: rt-pod, command: [chrt, -f, -p, "20", "1"]}
"#,
        );

        let report = Sequencer::new(&ctx).run(&scenario).await;

        let err = report.outcome.as_ref().unwrap_err();
        assert!(err.to_string().contains("Operation not permitted"));
        assert_eq!(report.reached(), ScenarioState::Provisioned);
        assert_eq!(cluster.exec_log().len(), 1);
        assert!(report.cleanup.is_ok());
    }

    #[tokio::test]
    async fn test_service_account_automount_applied() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(MemoryCluster::new().with_gone_after(0));
        let ctx = context(cluster.clone(), dir.path());
        let scenario = scenario(
            r#"
name: automount disabled
test_plan: access-control-pod-automount-service-account-token
expect: passed
fixtures:
  - {kind: service_account, name: my-sa, automount: false}
  - {kind: cluster_role_binding, name: my-crb, service_account: my-sa, cluster_role: view}
"#,
        );
        let plan = ScenarioPlan::new(&ctx, &scenario);

        // Run stops at launch (no executable); inspect state before teardown removes it
        let mut progress = Progress::default();
        let sequencer = Sequencer::new(&ctx);
        let to_wait = sequencer
            .provision(&scenario, &plan, &mut progress.ledger)
            .await
            .unwrap();
        assert!(to_wait.is_empty());

        let sa = cluster
            .get(&ObjectRef::namespaced(ResourceKind::ServiceAccount, &plan.namespace, "my-sa"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sa.manifest["automountServiceAccountToken"], false);
        assert!(cluster.exists(&ObjectRef::cluster_scoped(
            ResourceKind::ClusterRoleBinding,
            "my-crb-t0k3n0"
        )));

        let targets = progress.ledger.drain();
        assert_eq!(targets.len(), 2);
        teardown::delete_all(&ctx, &targets, &plan.timeouts)
            .await
            .unwrap();
    }
}
