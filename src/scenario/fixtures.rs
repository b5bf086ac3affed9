//! Manifest builders for scenario fixtures
//!
//! Each builder is a pure function returning the JSON manifest the cluster
//! API accepts. Workloads carry the label the verification tool uses to
//! discover its targets.

use std::collections::{BTreeMap, HashMap};

use serde_json::{json, Map, Value};

use crate::cluster::{ClusterApi, ClusterObject, ObjectRef, ResourceKind};
use crate::common::config::FixtureDefaults;
use crate::common::{Error, Result};

use super::config::{AutomountSetting, ContainerPort, FixtureSpec};

/// Label the verification tool selects target pods by
pub const TARGET_LABEL_KEY: &str = "redhat-best-practices-for-k8s.com/generic";
pub const TARGET_LABEL_VALUE: &str = "target";

/// CPUs and memory given to the isolated-pool pod; requests equal limits
const ISOLATED_CPUS: &str = "1";
const ISOLATED_MEMORY: &str = "512Mi";

/// CRI-O annotations that take a guaranteed pod's CPUs out of load balancing
const ISOLATION_ANNOTATIONS: [&str; 3] = [
    "cpu-load-balancing.crio.io",
    "cpu-quota.crio.io",
    "irq-load-balancing.crio.io",
];

fn workload_labels(name: &str, extra: &BTreeMap<String, String>) -> Map<String, Value> {
    let mut labels = Map::new();
    labels.insert("app".to_string(), json!(name));
    labels.insert(TARGET_LABEL_KEY.to_string(), json!(TARGET_LABEL_VALUE));
    for (key, value) in extra {
        labels.insert(key.clone(), json!(value));
    }
    labels
}

fn container(name: &str, image: &str) -> Value {
    json!({
        "name": name,
        "image": image,
        "command": ["/bin/bash", "-c", "sleep INF"],
    })
}

pub fn namespace(name: &str) -> Value {
    json!({
        "apiVersion": ResourceKind::Namespace.api_version(),
        "kind": ResourceKind::Namespace.kind_name(),
        "metadata": {"name": name, "labels": {"app.kubernetes.io/managed-by": "certverify"}},
    })
}

pub fn pod(name: &str, namespace: &str, image: &str, labels: &BTreeMap<String, String>) -> Value {
    json!({
        "apiVersion": ResourceKind::Pod.api_version(),
        "kind": ResourceKind::Pod.kind_name(),
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": workload_labels(name, labels),
        },
        "spec": {
            "terminationGracePeriodSeconds": 0,
            "containers": [container("test", image)],
        },
    })
}

/// Pod with guaranteed QoS in the isolated CPU pool
///
/// Integer CPU requests equal to limits put the container on exclusive
/// CPUs; the runtime class selects the performance profile's handler.
pub fn isolated_cpu_pod(
    name: &str,
    namespace: &str,
    image: &str,
    labels: &BTreeMap<String, String>,
    runtime_class: &str,
) -> Value {
    let mut manifest = pod(name, namespace, image, labels);
    let resources = json!({"cpu": ISOLATED_CPUS, "memory": ISOLATED_MEMORY});
    manifest["spec"]["containers"][0]["resources"] =
        json!({"requests": resources.clone(), "limits": resources});
    manifest["spec"]["containers"][0]["securityContext"] =
        json!({"capabilities": {"add": ["SYS_NICE"]}});
    let annotations: Map<String, Value> = ISOLATION_ANNOTATIONS
        .iter()
        .map(|key| (key.to_string(), json!("disable")))
        .collect();
    manifest["metadata"]["annotations"] = Value::Object(annotations);
    with_runtime_class(&mut manifest, runtime_class);
    manifest
}

pub fn with_runtime_class(manifest: &mut Value, runtime_class: &str) {
    manifest["spec"]["runtimeClassName"] = json!(runtime_class);
}

/// Deployment running `containers` copies of the test container
pub fn deployment(
    name: &str,
    namespace: &str,
    image: &str,
    labels: &BTreeMap<String, String>,
    replicas: u32,
    containers: usize,
) -> Result<Value> {
    if containers < 1 {
        return Err(Error::invalid_value("containers", &containers.to_string()));
    }
    let labels = workload_labels(name, labels);
    let containers: Vec<Value> = (0..containers)
        .map(|i| container(&format!("test{}", i), image))
        .collect();
    Ok(json!({
        "apiVersion": ResourceKind::Deployment.api_version(),
        "kind": ResourceKind::Deployment.kind_name(),
        "metadata": {"name": name, "namespace": namespace, "labels": labels.clone()},
        "spec": {
            "replicas": replicas,
            "selector": {"matchLabels": labels.clone()},
            "template": {
                "metadata": {"labels": labels},
                "spec": {
                    "terminationGracePeriodSeconds": 0,
                    "containers": containers,
                },
            },
        },
    }))
}

pub fn with_service_account(manifest: &mut Value, service_account: &str) {
    manifest["spec"]["template"]["spec"]["serviceAccountName"] = json!(service_account);
}

/// Replace a deployment's containers with one container per port
pub fn with_container_ports(manifest: &mut Value, image: &str, ports: &[ContainerPort]) -> Result<()> {
    if ports.is_empty() {
        return Err(Error::invalid_value("ports", "[]"));
    }
    let containers: Vec<Value> = ports
        .iter()
        .enumerate()
        .map(|(i, port)| {
            let mut spec = container(&format!("test{}", i), image);
            let mut entry = json!({"containerPort": port.port, "protocol": port.protocol});
            if let Some(name) = &port.name {
                entry["name"] = json!(name);
            }
            spec["ports"] = json!([entry]);
            spec
        })
        .collect();
    manifest["spec"]["template"]["spec"]["containers"] = Value::Array(containers);
    Ok(())
}

pub fn daemonset(name: &str, namespace: &str, image: &str, labels: &BTreeMap<String, String>) -> Value {
    let labels = workload_labels(name, labels);
    json!({
        "apiVersion": ResourceKind::DaemonSet.api_version(),
        "kind": ResourceKind::DaemonSet.kind_name(),
        "metadata": {"name": name, "namespace": namespace, "labels": labels.clone()},
        "spec": {
            "selector": {"matchLabels": labels.clone()},
            "template": {
                "metadata": {"labels": labels},
                "spec": {
                    "terminationGracePeriodSeconds": 0,
                    "containers": [container("test", image)],
                },
            },
        },
    })
}

/// TCP service in front of the target workloads
pub fn service(name: &str, namespace: &str, port: u16, target_port: u16) -> Value {
    json!({
        "apiVersion": ResourceKind::Service.api_version(),
        "kind": ResourceKind::Service.kind_name(),
        "metadata": {"name": name, "namespace": namespace},
        "spec": {
            "selector": {TARGET_LABEL_KEY: TARGET_LABEL_VALUE},
            "ports": [{"protocol": "TCP", "port": port, "targetPort": target_port}],
        },
    })
}

pub fn with_node_port(manifest: &mut Value) {
    manifest["spec"]["type"] = json!("NodePort");
}

pub fn with_ip_families(manifest: &mut Value, families: &[String], policy: Option<&str>) {
    if !families.is_empty() {
        manifest["spec"]["ipFamilies"] = json!(families);
    }
    if let Some(policy) = policy {
        manifest["spec"]["ipFamilyPolicy"] = json!(policy);
    }
}

pub fn service_account(name: &str, namespace: &str) -> Value {
    json!({
        "apiVersion": ResourceKind::ServiceAccount.api_version(),
        "kind": ResourceKind::ServiceAccount.kind_name(),
        "metadata": {"name": name, "namespace": namespace},
    })
}

/// Bind a cluster role to a service account
pub fn cluster_role_binding(
    name: &str,
    sa_namespace: &str,
    sa_name: &str,
    cluster_role: &str,
) -> Value {
    json!({
        "apiVersion": ResourceKind::ClusterRoleBinding.api_version(),
        "kind": ResourceKind::ClusterRoleBinding.kind_name(),
        "metadata": {"name": name},
        "subjects": [{"kind": "ServiceAccount", "name": sa_name, "namespace": sa_namespace}],
        "roleRef": {
            "apiGroup": "rbac.authorization.k8s.io",
            "kind": "ClusterRole",
            "name": cluster_role,
        },
    })
}

pub fn resource_quota(
    name: &str,
    namespace: &str,
    cpu_request: &str,
    memory_request: &str,
    cpu_limit: &str,
    memory_limit: &str,
) -> Value {
    json!({
        "apiVersion": ResourceKind::ResourceQuota.api_version(),
        "kind": ResourceKind::ResourceQuota.kind_name(),
        "metadata": {"name": name, "namespace": namespace},
        "spec": {
            "hard": {
                "requests.cpu": cpu_request,
                "requests.memory": memory_request,
                "limits.cpu": cpu_limit,
                "limits.memory": memory_limit,
            },
        },
    })
}

pub fn runtime_class(name: &str, handler: &str) -> Value {
    json!({
        "apiVersion": ResourceKind::RuntimeClass.api_version(),
        "kind": ResourceKind::RuntimeClass.kind_name(),
        "metadata": {"name": name},
        "handler": handler,
    })
}

pub fn subscription(
    name: &str,
    namespace: &str,
    package: &str,
    channel: &str,
    source: &str,
    source_namespace: &str,
) -> Value {
    json!({
        "apiVersion": ResourceKind::Subscription.api_version(),
        "kind": ResourceKind::Subscription.kind_name(),
        "metadata": {"name": name, "namespace": namespace},
        "spec": {
            "name": package,
            "channel": channel,
            "source": source,
            "sourceNamespace": source_namespace,
        },
    })
}

pub fn install_plan(name: &str, namespace: &str, csv_names: &[String], approved: bool) -> Value {
    json!({
        "apiVersion": ResourceKind::InstallPlan.api_version(),
        "kind": ResourceKind::InstallPlan.kind_name(),
        "metadata": {"name": name, "namespace": namespace},
        "spec": {
            "approval": if approved { "Automatic" } else { "Manual" },
            "approved": approved,
            "clusterServiceVersionNames": csv_names,
        },
    })
}

/// Set `automountServiceAccountToken` on a service account manifest
pub fn set_automount(manifest: &mut Value, setting: AutomountSetting) {
    let Some(fields) = manifest.as_object_mut() else {
        return;
    };
    match setting {
        AutomountSetting::Null => {
            fields.remove("automountServiceAccountToken");
        }
        other => {
            fields.insert("automountServiceAccountToken".to_string(), other.as_json());
        }
    }
}

/// Read a service account, change its automount setting and write it back
///
/// The update targets the same namespace the account was read from.
pub async fn set_automount_token(
    api: &dyn ClusterApi,
    namespace: &str,
    service_account: &str,
    setting: AutomountSetting,
) -> Result<ClusterObject> {
    let target = ObjectRef::namespaced(ResourceKind::ServiceAccount, namespace, service_account);
    let mut account = api
        .get(&target)
        .await?
        .ok_or_else(|| Error::ClusterApi(format!("{} not found", target)))?;
    set_automount(&mut account.manifest, setting);
    tracing::debug!(service_account = %target, setting = ?setting, "updating token automount");
    api.update(&account).await
}

/// Names and defaults a fixture is rendered with
pub struct RenderContext<'a> {
    pub namespace: &'a str,
    pub defaults: &'a FixtureDefaults,
    /// Run-token-suffixed names of cluster-scoped fixtures, by kind and base name
    pub scoped: &'a HashMap<(ResourceKind, String), String>,
}

impl RenderContext<'_> {
    /// Name a cluster-scoped fixture is created under
    pub fn cluster_name(&self, kind: ResourceKind, base: &str) -> String {
        self.scoped
            .get(&(kind, base.to_string()))
            .cloned()
            .unwrap_or_else(|| base.to_string())
    }
}

/// Build the manifest for one fixture
pub fn render(spec: &FixtureSpec, cx: &RenderContext<'_>) -> Result<Value> {
    let image_or_default = |image: &Option<String>| {
        image
            .clone()
            .unwrap_or_else(|| cx.defaults.test_image.clone())
    };
    let manifest = match spec {
        FixtureSpec::Pod {
            name,
            image,
            isolated_cpu,
            runtime_class,
            labels,
            ..
        } => {
            let image = image_or_default(image);
            let rtc = runtime_class
                .as_deref()
                .map(|rtc| cx.cluster_name(ResourceKind::RuntimeClass, rtc));
            match (*isolated_cpu, rtc) {
                (true, Some(rtc)) => isolated_cpu_pod(name, cx.namespace, &image, labels, &rtc),
                (true, None) => return Err(Error::invalid_value("runtime_class", "<none>")),
                (false, rtc) => {
                    let mut manifest = pod(name, cx.namespace, &image, labels);
                    if let Some(rtc) = rtc {
                        with_runtime_class(&mut manifest, &rtc);
                    }
                    manifest
                }
            }
        }
        FixtureSpec::Deployment {
            name,
            image,
            replicas,
            containers,
            service_account,
            ports,
            labels,
            ..
        } => {
            let image = image_or_default(image);
            let mut manifest = deployment(name, cx.namespace, &image, labels, *replicas, *containers)?;
            if !ports.is_empty() {
                with_container_ports(&mut manifest, &image, ports)?;
            }
            if let Some(sa) = service_account {
                with_service_account(&mut manifest, sa);
            }
            manifest
        }
        FixtureSpec::DaemonSet {
            name,
            image,
            labels,
            ..
        } => daemonset(name, cx.namespace, &image_or_default(image), labels),
        FixtureSpec::Service {
            name,
            port,
            target_port,
            node_port,
            ip_families,
            ip_family_policy,
        } => {
            let mut manifest = service(name, cx.namespace, *port, *target_port);
            if *node_port {
                with_node_port(&mut manifest);
            }
            with_ip_families(&mut manifest, ip_families, ip_family_policy.as_deref());
            manifest
        }
        FixtureSpec::ServiceAccount { name, .. } => service_account(name, cx.namespace),
        FixtureSpec::ClusterRoleBinding {
            name,
            service_account,
            cluster_role,
        } => cluster_role_binding(
            &cx.cluster_name(ResourceKind::ClusterRoleBinding, name),
            cx.namespace,
            service_account,
            cluster_role,
        ),
        FixtureSpec::ResourceQuota {
            name,
            cpu_request,
            memory_request,
            cpu_limit,
            memory_limit,
        } => resource_quota(
            name,
            cx.namespace,
            cpu_request,
            memory_request,
            cpu_limit,
            memory_limit,
        ),
        FixtureSpec::RuntimeClass { name, handler } => {
            runtime_class(&cx.cluster_name(ResourceKind::RuntimeClass, name), handler)
        }
        FixtureSpec::Subscription {
            name,
            package,
            channel,
            source,
            source_namespace,
        } => subscription(
            name,
            cx.namespace,
            package.as_deref().unwrap_or(name),
            channel,
            source,
            source_namespace,
        ),
        FixtureSpec::InstallPlan {
            name,
            cluster_service_versions,
            approved,
        } => install_plan(name, cx.namespace, cluster_service_versions, *approved),
    };
    Ok(manifest)
}
