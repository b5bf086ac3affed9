//! Readiness predicates
//!
//! Each predicate looks at the last observation of a resource (or its
//! absence) and decides whether the wait is over. The waiter itself never
//! interprets status; everything resource-specific lives here.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::cluster::{ClusterObject, ResourceKind};

/// Decides whether an observed resource has reached the target state
pub trait Readiness: Send + Sync {
    /// Short description used in logs and timeout messages
    fn describe(&self) -> String;

    /// `observed` is `None` when the resource does not exist
    fn is_satisfied(&self, observed: Option<&ClusterObject>) -> bool;
}

/// DaemonSet has ready pods and none unavailable
#[derive(Debug, Clone, Copy, Default)]
pub struct DaemonSetReady;

impl Readiness for DaemonSetReady {
    fn describe(&self) -> String {
        "numberReady > 0 and numberUnavailable == 0".to_string()
    }

    fn is_satisfied(&self, observed: Option<&ClusterObject>) -> bool {
        observed.is_some_and(|ds| {
            ds.status_i64("numberReady") > 0 && ds.status_i64("numberUnavailable") == 0
        })
    }
}

/// Deployment has every desired replica ready and none unavailable
#[derive(Debug, Clone, Copy, Default)]
pub struct DeploymentReady;

impl Readiness for DeploymentReady {
    fn describe(&self) -> String {
        "readyReplicas == spec.replicas and unavailableReplicas == 0".to_string()
    }

    fn is_satisfied(&self, observed: Option<&ClusterObject>) -> bool {
        observed.is_some_and(|deploy| {
            let desired = deploy
                .manifest
                .pointer("/spec/replicas")
                .and_then(Value::as_i64)
                .unwrap_or(1);
            deploy.status_i64("readyReplicas") >= desired
                && deploy.status_i64("unavailableReplicas") == 0
        })
    }
}

/// Pod is running and every container reports ready
#[derive(Debug, Clone, Copy, Default)]
pub struct PodReady;

impl Readiness for PodReady {
    fn describe(&self) -> String {
        "phase == Running and all containers ready".to_string()
    }

    fn is_satisfied(&self, observed: Option<&ClusterObject>) -> bool {
        let Some(status) = observed.and_then(ClusterObject::status) else {
            return false;
        };
        if status.get("phase").and_then(Value::as_str) != Some("Running") {
            return false;
        }
        match status.get("containerStatuses").and_then(Value::as_array) {
            Some(containers) if !containers.is_empty() => containers
                .iter()
                .all(|c| c.get("ready").and_then(Value::as_bool) == Some(true)),
            _ => false,
        }
    }
}

/// Resource no longer exists
#[derive(Debug, Clone, Copy, Default)]
pub struct Gone;

impl Readiness for Gone {
    fn describe(&self) -> String {
        "resource deleted".to_string()
    }

    fn is_satisfied(&self, observed: Option<&ClusterObject>) -> bool {
        observed.is_none()
    }
}

/// Resource exists, whatever its status
#[derive(Debug, Clone, Copy, Default)]
pub struct Exists;

impl Readiness for Exists {
    fn describe(&self) -> String {
        "resource exists".to_string()
    }

    fn is_satisfied(&self, observed: Option<&ClusterObject>) -> bool {
        observed.is_some()
    }
}

/// Caller-supplied predicate over the observed object
#[derive(Clone)]
pub struct Predicate {
    description: String,
    check: Arc<dyn Fn(&ClusterObject) -> bool + Send + Sync>,
}

impl Predicate {
    pub fn new(
        description: impl Into<String>,
        check: impl Fn(&ClusterObject) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            check: Arc::new(check),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl Readiness for Predicate {
    fn describe(&self) -> String {
        self.description.clone()
    }

    fn is_satisfied(&self, observed: Option<&ClusterObject>) -> bool {
        observed.is_some_and(|obj| (self.check)(obj))
    }
}

/// Default readiness policy for a kind, if it has one
pub fn default_for(kind: ResourceKind) -> Option<Arc<dyn Readiness>> {
    match kind {
        ResourceKind::Pod => Some(Arc::new(PodReady)),
        ResourceKind::Deployment => Some(Arc::new(DeploymentReady)),
        ResourceKind::DaemonSet => Some(Arc::new(DaemonSetReady)),
        _ => None,
    }
}
