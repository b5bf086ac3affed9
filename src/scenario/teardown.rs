//! Deletion that confirms objects are gone
//!
//! Every target is attempted even after an earlier one fails; failures are
//! collected into a single `CleanupFailure`.

use crate::cluster::{ClusterContext, DeleteOutcome, ObjectRef};
use crate::common::config::Timeouts;
use crate::common::{Error, Result};
use crate::wait::{ReadinessTarget, ResourceWaiter};

/// Delete `target` and wait until the cluster no longer reports it
///
/// Uses the teardown budget and poll interval from `timeouts`.
pub async fn delete_and_wait(ctx: &ClusterContext, target: &ObjectRef, timeouts: &Timeouts) -> Result<()> {
    match ctx.api().delete(target).await? {
        DeleteOutcome::NotFound => {
            tracing::debug!(resource = %target, "already gone");
            return Ok(());
        }
        DeleteOutcome::Deleted => tracing::debug!(resource = %target, "delete requested"),
    }
    ResourceWaiter::from_context(ctx)
        .require_ready(
            &ReadinessTarget::gone(target.clone()),
            timeouts.teardown(),
            timeouts.poll_interval(),
        )
        .await
}

/// Delete every target, collecting failures instead of stopping at the first
pub async fn delete_all(ctx: &ClusterContext, targets: &[ObjectRef], timeouts: &Timeouts) -> Result<()> {
    let mut failures = Vec::new();
    for target in targets {
        if let Err(e) = delete_and_wait(ctx, target, timeouts).await {
            tracing::warn!(resource = %target, error = %e, "cleanup failed");
            failures.push((target.to_string(), e.to_string()));
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::CleanupFailure { failures })
    }
}

/// Delete namespaces and wait for each to disappear
pub async fn delete_namespaces(ctx: &ClusterContext, namespaces: &[String], timeouts: &Timeouts) -> Result<()> {
    let targets: Vec<ObjectRef> = namespaces.iter().map(|ns| ObjectRef::namespace(ns)).collect();
    delete_all(ctx, &targets, timeouts).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::cluster::{ClusterObject, MemoryCluster, ResourceKind};
    use crate::common::config::Config;
    use crate::wait::ManualClock;
    use serde_json::json;
    use std::time::Duration;

    fn budget(teardown_secs: u64) -> Timeouts {
        Timeouts {
            teardown_secs,
            ..Config::default().timeouts
        }
    }

    fn context(cluster: Arc<MemoryCluster>) -> ClusterContext {
        ClusterContext::new(cluster, Config::default()).with_clock(Arc::new(ManualClock::new()))
    }

    fn add_namespace(cluster: &MemoryCluster, name: &str) {
        cluster.insert(
            ClusterObject::from_manifest(json!({
                "apiVersion": "v1", "kind": "Namespace", "metadata": {"name": name}
            }))
            .unwrap(),
        );
    }

    #[tokio::test]
    async fn test_deletes_and_confirms_absence() {
        let cluster = Arc::new(MemoryCluster::new().with_gone_after(3));
        add_namespace(&cluster, "a");
        let ctx = context(cluster.clone());

        delete_namespaces(&ctx, &["a".to_string()], &budget(60))
            .await
            .unwrap();
        assert!(!cluster.exists(&ObjectRef::namespace("a")));
    }

    #[tokio::test]
    async fn test_missing_object_is_not_a_failure() {
        let cluster = Arc::new(MemoryCluster::new());
        let ctx = context(cluster.clone());
        let target = ObjectRef::cluster_scoped(ResourceKind::RuntimeClass, "rtc");
        delete_and_wait(&ctx, &target, &budget(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_all_failures_collected() {
        let cluster = Arc::new(MemoryCluster::new());
        for ns in ["a", "b", "c"] {
            add_namespace(&cluster, ns);
        }
        cluster.fail_deletes(&ObjectRef::namespace("a"), "forbidden");
        cluster.stick(&ObjectRef::namespace("c"));
        let ctx = context(cluster.clone());

        let namespaces: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let err = delete_namespaces(&ctx, &namespaces, &budget(10))
            .await
            .unwrap_err();

        match err {
            Error::CleanupFailure { failures } => {
                assert_eq!(failures.len(), 2);
                assert!(failures[0].0.contains("\"a\""));
                assert!(failures[0].1.contains("forbidden"));
                assert!(failures[1].0.contains("\"c\""));
                assert!(failures[1].1.contains("Timed out"));
            }
            other => panic!("expected cleanup failure, got {:?}", other),
        }
        assert!(!cluster.exists(&ObjectRef::namespace("b")));
    }

    #[tokio::test]
    async fn test_polls_at_the_given_interval() {
        let cluster = Arc::new(MemoryCluster::new().with_gone_after(3));
        add_namespace(&cluster, "a");
        let clock = Arc::new(ManualClock::new());
        let ctx = ClusterContext::new(cluster.clone(), Config::default()).with_clock(clock.clone());

        let timeouts = Timeouts {
            poll_interval_secs: 2,
            ..budget(60)
        };
        delete_namespaces(&ctx, &["a".to_string()], &timeouts)
            .await
            .unwrap();

        let sleeps = clock.sleeps();
        assert!(!sleeps.is_empty());
        assert!(sleeps.iter().all(|d| *d == Duration::from_secs(2)));
    }
}
