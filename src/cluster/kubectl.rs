//! kubectl-backed cluster access
//!
//! Every operation is a single kubectl invocation with JSON in and out,
//! bounded by the configured command timeout.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::common::config::ClusterConfig;
use crate::common::{Error, Result};

use super::{ClusterApi, ClusterObject, DeleteOutcome, ExecOutput, ObjectRef};

/// Raw result of one kubectl invocation
struct Invocation {
    status: Option<i32>,
    stdout: String,
    stderr: String,
}

impl Invocation {
    fn success(&self) -> bool {
        self.status == Some(0)
    }

    fn not_found(&self) -> bool {
        self.stderr.contains("NotFound") || self.stderr.contains("not found")
    }
}

/// Cluster client that shells out to kubectl
pub struct KubectlClient {
    program: PathBuf,
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
    timeout: Duration,
}

impl KubectlClient {
    pub fn new(program: PathBuf, config: &ClusterConfig) -> Self {
        Self {
            program,
            kubeconfig: config.kubeconfig.clone(),
            context: config.context.clone(),
            timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    /// Arguments selecting the kubeconfig and context, prepended to every call
    fn global_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(kubeconfig) = &self.kubeconfig {
            args.push(format!("--kubeconfig={}", kubeconfig.display()));
        }
        if let Some(context) = &self.context {
            args.push(format!("--context={}", context));
        }
        args
    }

    fn target_args(verb: &str, target: &ObjectRef) -> Vec<String> {
        let mut args = vec![
            verb.to_string(),
            target.kind.resource_name().to_string(),
            target.name.clone(),
        ];
        if let Some(ns) = &target.namespace {
            args.push(format!("--namespace={}", ns));
        }
        args
    }

    async fn invoke(&self, args: Vec<String>, stdin: Option<Vec<u8>>) -> Result<Invocation> {
        let mut full_args = self.global_args();
        full_args.extend(args);
        let cmdline = format!("kubectl {}", full_args.join(" "));
        tracing::debug!(command = %cmdline, "invoking kubectl");

        let mut child = Command::new(&self.program)
            .args(&full_args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ClusterApi(format!("Failed to spawn kubectl: {}", e)))?;

        let pipe = child.stdin.take();
        let run = async move {
            if let (Some(input), Some(mut pipe)) = (stdin, pipe) {
                pipe.write_all(&input).await?;
                // Dropping the pipe closes kubectl's stdin so `-f -` sees EOF
                drop(pipe);
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| Error::ClusterTimeout {
                command: cmdline.clone(),
                secs: self.timeout.as_secs(),
            })??;

        Ok(Invocation {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn apply_manifest(&self, verb: &str, object: &ClusterObject) -> Result<ClusterObject> {
        let body = serde_json::to_vec(&object.manifest)?;
        let args = vec![
            verb.to_string(),
            "--filename=-".to_string(),
            "--output=json".to_string(),
        ];
        let out = self.invoke(args, Some(body)).await?;
        if !out.success() {
            return Err(Error::cluster_command(
                &format!("{} {}", verb, object.object_ref()),
                &out.stderr,
            ));
        }
        ClusterObject::from_manifest(serde_json::from_str(&out.stdout)?)
    }
}

#[async_trait]
impl ClusterApi for KubectlClient {
    async fn get(&self, target: &ObjectRef) -> Result<Option<ClusterObject>> {
        let mut args = Self::target_args("get", target);
        args.push("--output=json".to_string());
        let out = self.invoke(args, None).await?;
        if out.success() {
            return ClusterObject::from_manifest(serde_json::from_str(&out.stdout)?).map(Some);
        }
        if out.not_found() {
            return Ok(None);
        }
        Err(Error::cluster_command(&format!("get {}", target), &out.stderr))
    }

    async fn create(&self, object: &ClusterObject) -> Result<ClusterObject> {
        self.apply_manifest("create", object).await
    }

    async fn update(&self, object: &ClusterObject) -> Result<ClusterObject> {
        self.apply_manifest("replace", object).await
    }

    async fn delete(&self, target: &ObjectRef) -> Result<DeleteOutcome> {
        let mut args = Self::target_args("delete", target);
        args.push("--wait=false".to_string());
        let out = self.invoke(args, None).await?;
        if out.success() {
            Ok(DeleteOutcome::Deleted)
        } else if out.not_found() {
            Ok(DeleteOutcome::NotFound)
        } else {
            Err(Error::cluster_command(&format!("delete {}", target), &out.stderr))
        }
    }

    async fn exec(
        &self,
        pod: &ObjectRef,
        container: Option<&str>,
        command: &[String],
    ) -> Result<ExecOutput> {
        let mut args = vec!["exec".to_string(), pod.name.clone()];
        if let Some(ns) = &pod.namespace {
            args.push(format!("--namespace={}", ns));
        }
        if let Some(container) = container {
            args.push(format!("--container={}", container));
        }
        args.push("--".to_string());
        args.extend(command.iter().cloned());

        let out = self.invoke(args, None).await?;
        Ok(ExecOutput {
            exit_code: out.status.unwrap_or(-1),
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }
}
