//! Cluster API collaborator
//!
//! The scenario engine only needs a handful of operations from the cluster:
//! read an object's status, create, update and delete objects, and exec a
//! command in a running container. `ClusterApi` captures exactly that, with
//! a kubectl-backed implementation for real clusters and an in-memory one
//! for tests.

mod context;
mod kubectl;
pub mod memory;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;

use crate::common::{Error, Result};

pub use context::{dns_label, ClusterContext};
pub use kubectl::KubectlClient;
pub use memory::MemoryCluster;

/// Resource kinds the scenarios provision or watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Namespace,
    Pod,
    Deployment,
    DaemonSet,
    Service,
    ServiceAccount,
    ClusterRoleBinding,
    ResourceQuota,
    RuntimeClass,
    Subscription,
    InstallPlan,
}

impl ResourceKind {
    /// The `kind` field used in manifests
    pub fn kind_name(self) -> &'static str {
        match self {
            ResourceKind::Namespace => "Namespace",
            ResourceKind::Pod => "Pod",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::DaemonSet => "DaemonSet",
            ResourceKind::Service => "Service",
            ResourceKind::ServiceAccount => "ServiceAccount",
            ResourceKind::ClusterRoleBinding => "ClusterRoleBinding",
            ResourceKind::ResourceQuota => "ResourceQuota",
            ResourceKind::RuntimeClass => "RuntimeClass",
            ResourceKind::Subscription => "Subscription",
            ResourceKind::InstallPlan => "InstallPlan",
        }
    }

    /// The `apiVersion` used when building manifests of this kind
    pub fn api_version(self) -> &'static str {
        match self {
            ResourceKind::Namespace
            | ResourceKind::Pod
            | ResourceKind::Service
            | ResourceKind::ServiceAccount
            | ResourceKind::ResourceQuota => "v1",
            ResourceKind::Deployment | ResourceKind::DaemonSet => "apps/v1",
            ResourceKind::ClusterRoleBinding => "rbac.authorization.k8s.io/v1",
            ResourceKind::RuntimeClass => "node.k8s.io/v1",
            ResourceKind::Subscription | ResourceKind::InstallPlan => "operators.coreos.com/v1alpha1",
        }
    }

    /// Fully-qualified resource name for kubectl, unambiguous across API groups
    pub fn resource_name(self) -> &'static str {
        match self {
            ResourceKind::Namespace => "namespaces",
            ResourceKind::Pod => "pods",
            ResourceKind::Deployment => "deployments.apps",
            ResourceKind::DaemonSet => "daemonsets.apps",
            ResourceKind::Service => "services",
            ResourceKind::ServiceAccount => "serviceaccounts",
            ResourceKind::ClusterRoleBinding => "clusterrolebindings.rbac.authorization.k8s.io",
            ResourceKind::ResourceQuota => "resourcequotas",
            ResourceKind::RuntimeClass => "runtimeclasses.node.k8s.io",
            ResourceKind::Subscription => "subscriptions.operators.coreos.com",
            ResourceKind::InstallPlan => "installplans.operators.coreos.com",
        }
    }

    /// Whether objects of this kind live inside a namespace
    pub fn is_namespaced(self) -> bool {
        !matches!(
            self,
            ResourceKind::Namespace | ResourceKind::ClusterRoleBinding | ResourceKind::RuntimeClass
        )
    }

    /// Look up a kind from a manifest's `kind` field
    pub fn from_kind_name(kind: &str) -> Option<Self> {
        ALL_KINDS.iter().copied().find(|k| k.kind_name() == kind)
    }
}

const ALL_KINDS: [ResourceKind; 11] = [
    ResourceKind::Namespace,
    ResourceKind::Pod,
    ResourceKind::Deployment,
    ResourceKind::DaemonSet,
    ResourceKind::Service,
    ResourceKind::ServiceAccount,
    ResourceKind::ClusterRoleBinding,
    ResourceKind::ResourceQuota,
    ResourceKind::RuntimeClass,
    ResourceKind::Subscription,
    ResourceKind::InstallPlan,
];

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind_name().to_ascii_lowercase())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    /// Accepts the singular, plural and kubectl short names
    fn from_str(s: &str) -> Result<Self> {
        let kind = match s.to_ascii_lowercase().as_str() {
            "namespace" | "namespaces" | "ns" => ResourceKind::Namespace,
            "pod" | "pods" | "po" => ResourceKind::Pod,
            "deployment" | "deployments" | "deploy" => ResourceKind::Deployment,
            "daemonset" | "daemonsets" | "ds" => ResourceKind::DaemonSet,
            "service" | "services" | "svc" => ResourceKind::Service,
            "serviceaccount" | "serviceaccounts" | "sa" => ResourceKind::ServiceAccount,
            "clusterrolebinding" | "clusterrolebindings" => ResourceKind::ClusterRoleBinding,
            "resourcequota" | "resourcequotas" | "quota" => ResourceKind::ResourceQuota,
            "runtimeclass" | "runtimeclasses" => ResourceKind::RuntimeClass,
            "subscription" | "subscriptions" | "sub" => ResourceKind::Subscription,
            "installplan" | "installplans" | "ip" => ResourceKind::InstallPlan,
            _ => return Err(Error::invalid_value("resource kind", s)),
        };
        Ok(kind)
    }
}

/// Identifies a single object in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    /// Reference a namespaced object
    pub fn namespaced(kind: ResourceKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    /// Reference a cluster-scoped object
    pub fn cluster_scoped(kind: ResourceKind, name: &str) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.to_string(),
        }
    }

    /// Reference a namespace
    pub fn namespace(name: &str) -> Self {
        Self::cluster_scoped(ResourceKind::Namespace, name)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {:?} (ns {})", self.kind, self.name, ns),
            None => write!(f, "{} {:?}", self.kind, self.name),
        }
    }
}

/// A cluster object as a raw manifest
///
/// Fixtures are built and read as JSON values; the engine only ever
/// inspects `metadata` and `status`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterObject {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
    pub manifest: Value,
}

impl ClusterObject {
    /// Wrap a manifest, reading kind, name and namespace from it
    pub fn from_manifest(manifest: Value) -> Result<Self> {
        let kind_name = manifest
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::ClusterApi("manifest has no kind".to_string()))?;
        let kind = ResourceKind::from_kind_name(kind_name)
            .ok_or_else(|| Error::invalid_value("manifest kind", kind_name))?;
        let metadata = manifest.get("metadata");
        let name = metadata
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::ClusterApi(format!("{kind_name} manifest has no name")))?
            .to_string();
        let namespace = if kind.is_namespaced() {
            metadata
                .and_then(|m| m.get("namespace"))
                .and_then(Value::as_str)
                .map(str::to_string)
        } else {
            None
        };

        Ok(Self {
            kind,
            namespace,
            name,
            manifest,
        })
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            kind: self.kind,
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// The object's `status` stanza, if the platform has populated one
    pub fn status(&self) -> Option<&Value> {
        self.manifest.get("status")
    }

    /// Integer status field, treating an absent field as zero
    ///
    /// The platform omits zero-valued counters from status, so absence and
    /// zero mean the same thing here.
    pub fn status_i64(&self, field: &str) -> i64 {
        self.status()
            .and_then(|s| s.get(field))
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    /// Compact rendering of the status for diagnostics
    pub fn status_summary(&self) -> String {
        match self.status() {
            Some(status) => status.to_string(),
            None => "<no status>".to_string(),
        }
    }
}

/// Result of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Output of a command executed inside a container
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Operations the scenario engine needs from a cluster
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch an object; `None` when it does not exist
    async fn get(&self, target: &ObjectRef) -> Result<Option<ClusterObject>>;

    /// Create an object from its manifest
    async fn create(&self, object: &ClusterObject) -> Result<ClusterObject>;

    /// Replace an existing object with the given manifest
    async fn update(&self, object: &ClusterObject) -> Result<ClusterObject>;

    /// Request deletion; does not wait for the object to disappear
    async fn delete(&self, target: &ObjectRef) -> Result<DeleteOutcome>;

    /// Run a command in a pod's container
    async fn exec(
        &self,
        pod: &ObjectRef,
        container: Option<&str>,
        command: &[String],
    ) -> Result<ExecOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_aliases() {
        assert_eq!("ds".parse::<ResourceKind>().unwrap(), ResourceKind::DaemonSet);
        assert_eq!("Pods".parse::<ResourceKind>().unwrap(), ResourceKind::Pod);
        assert_eq!("deploy".parse::<ResourceKind>().unwrap(), ResourceKind::Deployment);
        assert!(matches!(
            "widget".parse::<ResourceKind>(),
            Err(Error::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_kind_name_round_trips_through_lookup() {
        for kind in ALL_KINDS {
            assert_eq!(ResourceKind::from_kind_name(kind.kind_name()), Some(kind));
        }
    }

    #[test]
    fn test_from_manifest_drops_namespace_for_cluster_scoped() {
        let obj = ClusterObject::from_manifest(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "ClusterRoleBinding",
            "metadata": {"name": "crb", "namespace": "ignored"}
        }))
        .unwrap();
        assert_eq!(obj.kind, ResourceKind::ClusterRoleBinding);
        assert_eq!(obj.namespace, None);
        assert_eq!(obj.object_ref(), ObjectRef::cluster_scoped(ResourceKind::ClusterRoleBinding, "crb"));
    }

    #[test]
    fn test_status_counters_default_to_zero() {
        let obj = ClusterObject::from_manifest(json!({
            "kind": "DaemonSet",
            "metadata": {"name": "ds", "namespace": "ns"},
            "status": {"numberReady": 2}
        }))
        .unwrap();
        assert_eq!(obj.status_i64("numberReady"), 2);
        assert_eq!(obj.status_i64("numberUnavailable"), 0);
    }

    #[test]
    fn test_manifest_without_name_rejected() {
        let err = ClusterObject::from_manifest(json!({"kind": "Pod", "metadata": {}})).unwrap_err();
        assert!(matches!(err, Error::ClusterApi(_)));
    }
}
