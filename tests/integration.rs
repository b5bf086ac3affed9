//! End-to-end scenario runs
//!
//! These tests drive the full state machine against the in-memory cluster
//! and a fake `certsuite` shell script that writes both ledgers with the
//! state named in `FAKE_STATE`.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;

use certverify::cluster::{ClusterContext, MemoryCluster, ObjectRef, ResourceKind};
use certverify::common::config::Config;
use certverify::scenario::{Scenario, ScenarioPlan, ScenarioState, Sequencer};
use certverify::wait::ManualClock;
use certverify::{Error, Verdict};

const FAKE_CERTSUITE: &str = r#"#!/bin/sh
plan="$1"
out="$2"
case "$FAKE_STATE" in
  hang) exec sleep 30 ;;
  failed) body='<failure message="non-compliant">policy is SCHED_OTHER</failure>' ;;
  skipped) body='<skipped message="no eligible pods"/>' ;;
  *) body='' ;;
esac
cat > "$out/cnf-certification-tests_junit.xml" <<EOF
<testsuites><testsuite name="CNF Certification Test Suite"><testcase name="$plan" classname="performance">$body</testcase></testsuite></testsuites>
EOF
printf '{"claim":{"results":{"%s":{"state":"%s"}}}}' "$plan" "$FAKE_STATE" > "$out/claim.json"
if [ "$FAKE_STATE" = "failed" ]; then
  exit 1
fi
exit 0
"#;

const RT_APPLIED: &str = r#"
name: One pod running in isolated cpu pool and rt cpu scheduling policy
test_plan: rt-isolated-cpu
expect: passed
namespace: performance
fixtures:
  - {kind: runtime_class, name: performance-rtc, handler: high-performance}
  - {kind: pod, name: rt-pod, isolated_cpu: true, runtime_class: performance-rtc}
actions:
  - {action: exec, pod: rt-pod, command: [chrt, -f, -p, "20", "1"]}
"#;

const RT_NOT_APPLIED: &str = r#"
name: One pod running in isolated cpu pool and non-rt scheduling policy
test_plan: rt-isolated-cpu
expect: failed
namespace: performance
fixtures:
  - {kind: runtime_class, name: performance-rtc, handler: high-performance}
  - {kind: pod, name: rt-pod, isolated_cpu: true, runtime_class: performance-rtc}
"#;

const SHARED_POOL: &str = r#"
name: One pod running in shared cpu pool
test_plan: rt-isolated-cpu
expect: skipped
namespace: performance
fixtures:
  - {kind: pod, name: shared-pod}
"#;

const DAEMONSET_NEVER_READY: &str = r#"
name: Probe daemonset never schedules
test_plan: lifecycle-pod-scheduling
expect: passed
fixtures:
  - {kind: daemonset, name: probe}
timeouts:
  ready_secs: 30
  poll_interval_secs: 5
"#;

fn context(dir: &Path, cluster: Arc<MemoryCluster>, state: &str) -> ClusterContext {
    let exe = dir.join("certsuite");
    std::fs::write(&exe, FAKE_CERTSUITE).unwrap();
    std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut config = Config::default();
    config.certsuite.executable = exe;
    config.certsuite.artifacts_dir = dir.join("runs");
    config.certsuite.args = vec!["{test_plan}".to_string(), "{output_dir}".to_string()];
    config
        .certsuite
        .env
        .insert("FAKE_STATE".to_string(), state.to_string());
    config.timeouts.ready_secs = 60;
    config.timeouts.teardown_secs = 60;

    ClusterContext::new(cluster, config)
        .with_clock(Arc::new(ManualClock::new()))
        .with_run_token("it0001")
}

#[tokio::test]
async fn test_rt_policy_applied_passes() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(MemoryCluster::new().with_ready_after(Some(2)));
    let ctx = context(dir.path(), cluster.clone(), "passed");
    let scenario = Scenario::parse(RT_APPLIED).unwrap();

    let report = Sequencer::new(&ctx).run(&scenario).await;

    assert!(report.outcome.is_ok(), "{:?}", report.outcome);
    assert!(report.cleanup.is_ok(), "{:?}", report.cleanup);
    assert!(report.passed());
    assert_eq!(report.verdict, Some(Verdict::Passed));
    assert_eq!(
        report.trail,
        vec![
            ScenarioState::Setup,
            ScenarioState::Provisioned,
            ScenarioState::Waiting,
            ScenarioState::Launched,
            ScenarioState::Evaluated,
            ScenarioState::Asserted,
            ScenarioState::Torndown,
        ]
    );

    let execs = cluster.exec_log();
    assert_eq!(execs.len(), 1);
    assert_eq!(execs[0].0.name, "rt-pod");
    assert_eq!(execs[0].1, vec!["chrt", "-f", "-p", "20", "1"]);

    let rtc = ObjectRef::cluster_scoped(ResourceKind::RuntimeClass, "performance-rtc-it0001");
    assert!(cluster.created().contains(&rtc));
    assert!(cluster.deleted().contains(&rtc));
    assert!(!cluster.exists(&rtc));
    assert!(!cluster.exists(&ObjectRef::namespace(&report.namespace)));

    let output_dir = report.output_dir.unwrap();
    assert!(output_dir.ends_with(&report.run_name));
    assert!(output_dir.join("claim.json").exists());
}

#[tokio::test]
async fn test_rt_policy_not_applied_fails() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(MemoryCluster::new());
    let ctx = context(dir.path(), cluster.clone(), "failed");
    let scenario = Scenario::parse(RT_NOT_APPLIED).unwrap();

    let report = Sequencer::new(&ctx).run(&scenario).await;

    // Tool exits non-zero but leaves ledgers, so the run still evaluates
    assert!(report.passed(), "{:?}", report.outcome);
    assert_eq!(report.verdict, Some(Verdict::Failed));
    assert!(cluster.exec_log().is_empty());
}

#[tokio::test]
async fn test_shared_pool_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(MemoryCluster::new());
    let ctx = context(dir.path(), cluster, "skipped");
    let scenario = Scenario::parse(SHARED_POOL).unwrap();

    let report = Sequencer::new(&ctx).run(&scenario).await;

    assert!(report.passed(), "{:?}", report.outcome);
    assert_eq!(report.verdict, Some(Verdict::Skipped));
}

#[tokio::test]
async fn test_unexpected_verdict_is_assertion_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(MemoryCluster::new());
    let ctx = context(dir.path(), cluster, "passed");
    let scenario = Scenario::parse(RT_NOT_APPLIED).unwrap();

    let report = Sequencer::new(&ctx).run(&scenario).await;

    match &report.outcome {
        Err(Error::AssertionMismatch {
            expected,
            actual,
            excerpt,
        }) => {
            assert_eq!(*expected, Verdict::Failed);
            assert_eq!(*actual, Verdict::Passed);
            assert!(excerpt.contains("rt-isolated-cpu"));
        }
        other => panic!("expected assertion mismatch, got {:?}", other),
    }
    assert_eq!(report.reached(), ScenarioState::Evaluated);
    assert_eq!(report.verdict, Some(Verdict::Passed));
    assert!(report.cleanup.is_ok());
}

#[tokio::test]
async fn test_daemonset_never_ready_times_out_and_tears_down() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(MemoryCluster::new());
    let ctx = context(dir.path(), cluster.clone(), "passed");
    let scenario = Scenario::parse(DAEMONSET_NEVER_READY).unwrap();
    let plan = ScenarioPlan::new(&ctx, &scenario);

    let probe = ObjectRef::namespaced(ResourceKind::DaemonSet, &plan.namespace, "probe");
    cluster.script_status(
        &probe,
        vec![json!({"desiredNumberScheduled": 1, "numberReady": 0, "numberUnavailable": 1})],
    );

    let report = Sequencer::new(&ctx).run(&scenario).await;

    match &report.outcome {
        Err(Error::PollTimeout { last_status, .. }) => {
            assert!(last_status.contains("numberReady"));
        }
        other => panic!("expected poll timeout, got {:?}", other),
    }
    assert_eq!(report.reached(), ScenarioState::Provisioned);
    assert_eq!(report.trail.last(), Some(&ScenarioState::Torndown));
    assert!(report.output_dir.is_none());
    assert!(report.cleanup.is_ok());
    assert!(!cluster.exists(&probe));
    assert!(!cluster.exists(&ObjectRef::namespace(&plan.namespace)));
}

#[tokio::test]
async fn test_cleanup_failure_does_not_mask_primary_error() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(MemoryCluster::new());
    let ctx = context(dir.path(), cluster.clone(), "passed");
    let scenario = Scenario::parse(RT_NOT_APPLIED).unwrap();
    let plan = ScenarioPlan::new(&ctx, &scenario);

    let namespace = ObjectRef::namespace(&plan.namespace);
    let rtc = ObjectRef::cluster_scoped(ResourceKind::RuntimeClass, "performance-rtc-it0001");
    cluster.fail_deletes(&rtc, "runtimeclasses.node.k8s.io is forbidden");
    cluster.stick(&namespace);

    let report = Sequencer::new(&ctx).run(&scenario).await;

    assert!(matches!(report.outcome, Err(Error::AssertionMismatch { .. })));
    match &report.cleanup {
        Err(Error::CleanupFailure { failures }) => {
            assert_eq!(failures.len(), 2);
            assert!(failures[0].1.contains("forbidden"));
            assert!(failures[1].0.contains(&plan.namespace));
        }
        other => panic!("expected cleanup failure, got {:?}", other),
    }
    assert!(!report.passed());
}

#[tokio::test]
async fn test_suite_continues_past_failures() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(MemoryCluster::new());
    let ctx = context(dir.path(), cluster, "skipped");

    let broken = dir.path().join("broken.yaml");
    std::fs::write(&broken, "name: [unterminated").unwrap();
    let shared = dir.path().join("shared.yaml");
    std::fs::write(&shared, SHARED_POOL).unwrap();

    let all_passed = certverify::cli::run_scenarios(&ctx, &[broken, shared.clone()], false, None)
        .await
        .unwrap();
    assert!(!all_passed);

    let only_good = certverify::cli::run_scenarios(&ctx, &[shared], false, None)
        .await
        .unwrap();
    assert!(only_good);
}

#[tokio::test]
async fn test_interrupted_run_still_tears_down() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(MemoryCluster::new());
    let ctx = context(dir.path(), cluster.clone(), "hang");
    let scenario = Scenario::parse(RT_NOT_APPLIED).unwrap();
    let plan = ScenarioPlan::new(&ctx, &scenario);

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        let _ = stop.send(true);
    });

    let started = std::time::Instant::now();
    let report = Sequencer::new(&ctx)
        .with_shutdown(shutdown)
        .run(&scenario)
        .await;

    assert!(started.elapsed() < std::time::Duration::from_secs(20));
    match &report.outcome {
        Err(Error::Interrupted(state)) => assert_eq!(state, "waiting"),
        other => panic!("expected interruption, got {:?}", other),
    }
    assert_eq!(report.trail.last(), Some(&ScenarioState::Torndown));
    assert!(report.cleanup.is_ok(), "{:?}", report.cleanup);

    let rtc = ObjectRef::cluster_scoped(ResourceKind::RuntimeClass, "performance-rtc-it0001");
    assert!(cluster.deleted().contains(&rtc));
    assert!(!cluster.exists(&rtc));
    assert!(!cluster.exists(&ObjectRef::namespace(&plan.namespace)));
}

#[tokio::test]
async fn test_suite_stops_after_interruption() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(MemoryCluster::new());
    let ctx = context(dir.path(), cluster, "skipped");

    let shared = dir.path().join("shared.yaml");
    std::fs::write(&shared, SHARED_POOL).unwrap();

    let (stop, shutdown) = watch::channel(false);
    stop.send(true).unwrap();
    let all_passed = certverify::cli::run_scenarios(&ctx, &[shared], false, Some(shutdown))
        .await
        .unwrap();
    assert!(!all_passed);
}
