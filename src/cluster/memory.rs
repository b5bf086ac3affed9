//! In-memory cluster for tests
//!
//! Simulates just enough reconciliation to drive the scenario engine:
//! created workloads become ready after a configurable number of reads,
//! deleted objects linger for a configurable number of reads, and any
//! object can have scripted status sequences or injected failures.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::common::{Error, Result};

use super::{ClusterApi, ClusterObject, DeleteOutcome, ExecOutput, ObjectRef, ResourceKind};

#[derive(Debug)]
struct Entry {
    object: ClusterObject,
    /// Reads remaining before the default ready status is applied
    reads_until_ready: Option<u32>,
    /// Reads remaining before a deleted object vanishes
    reads_until_gone: Option<u32>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<ObjectRef, Entry>,
    scripted: HashMap<ObjectRef, VecDeque<Value>>,
    get_failures: HashMap<ObjectRef, u32>,
    delete_failures: HashMap<ObjectRef, String>,
    stuck: Vec<ObjectRef>,
    exec_results: HashMap<String, ExecOutput>,
    exec_log: Vec<(ObjectRef, Vec<String>)>,
    created: Vec<ObjectRef>,
    deleted: Vec<ObjectRef>,
    get_count: u64,
}

/// A fake cluster that keeps objects in memory
#[derive(Debug)]
pub struct MemoryCluster {
    state: Mutex<State>,
    ready_after: Option<u32>,
    gone_after: u32,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    /// Workloads become ready on the first read; deletions complete after one read
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            ready_after: Some(0),
            gone_after: 1,
        }
    }

    /// Workloads become ready after `reads` reads; `None` means never
    pub fn with_ready_after(mut self, reads: Option<u32>) -> Self {
        self.ready_after = reads;
        self
    }

    /// Deleted objects stay visible for `reads` reads
    pub fn with_gone_after(mut self, reads: u32) -> Self {
        self.gone_after = reads;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an object directly, bypassing create
    pub fn insert(&self, object: ClusterObject) {
        let key = object.object_ref();
        self.state().objects.insert(
            key,
            Entry {
                object,
                reads_until_ready: None,
                reads_until_gone: None,
            },
        );
    }

    /// Replace the status of `target` with each value in turn, one per read
    ///
    /// The last value sticks once the sequence is exhausted.
    pub fn script_status(&self, target: &ObjectRef, statuses: Vec<Value>) {
        self.state()
            .scripted
            .insert(target.clone(), statuses.into_iter().collect());
    }

    /// Fail the next `count` reads of `target` with an API error
    pub fn fail_gets(&self, target: &ObjectRef, count: u32) {
        self.state().get_failures.insert(target.clone(), count);
    }

    /// Fail every delete of `target` with the given message
    pub fn fail_deletes(&self, target: &ObjectRef, message: &str) {
        self.state()
            .delete_failures
            .insert(target.clone(), message.to_string());
    }

    /// Accept deletes of `target` but never remove it
    pub fn stick(&self, target: &ObjectRef) {
        self.state().stuck.push(target.clone());
    }

    /// Result returned when a command whose first word is `program` is executed
    pub fn set_exec_result(&self, program: &str, output: ExecOutput) {
        self.state()
            .exec_results
            .insert(program.to_string(), output);
    }

    pub fn exists(&self, target: &ObjectRef) -> bool {
        self.state().objects.contains_key(target)
    }

    pub fn created(&self) -> Vec<ObjectRef> {
        self.state().created.clone()
    }

    pub fn deleted(&self) -> Vec<ObjectRef> {
        self.state().deleted.clone()
    }

    pub fn exec_log(&self) -> Vec<(ObjectRef, Vec<String>)> {
        self.state().exec_log.clone()
    }

    pub fn get_count(&self) -> u64 {
        self.state().get_count
    }

    /// Remove objects whose deletion has completed, cascading namespaces
    fn reap(state: &mut State) {
        let gone: Vec<ObjectRef> = state
            .objects
            .iter()
            .filter(|(_, e)| e.reads_until_gone == Some(0))
            .map(|(k, _)| k.clone())
            .collect();
        for key in gone {
            state.objects.remove(&key);
            if key.kind == ResourceKind::Namespace {
                state
                    .objects
                    .retain(|k, _| k.namespace.as_deref() != Some(key.name.as_str()));
            }
        }
    }
}

/// Status a workload reports once the fake control plane has reconciled it
fn ready_status(object: &ClusterObject) -> Option<Value> {
    match object.kind {
        ResourceKind::Pod => {
            let containers = object
                .manifest
                .pointer("/spec/containers")
                .and_then(Value::as_array)
                .map(|c| c.len())
                .unwrap_or(1);
            let statuses: Vec<Value> = (0..containers)
                .map(|i| json!({"name": format!("c{i}"), "ready": true}))
                .collect();
            Some(json!({"phase": "Running", "containerStatuses": statuses}))
        }
        ResourceKind::Deployment => {
            let replicas = object
                .manifest
                .pointer("/spec/replicas")
                .and_then(Value::as_i64)
                .unwrap_or(1);
            Some(json!({
                "replicas": replicas,
                "readyReplicas": replicas,
                "availableReplicas": replicas,
            }))
        }
        ResourceKind::DaemonSet => Some(json!({
            "desiredNumberScheduled": 1,
            "numberReady": 1,
            "numberUnavailable": 0,
        })),
        ResourceKind::Namespace => Some(json!({"phase": "Active"})),
        _ => None,
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn get(&self, target: &ObjectRef) -> Result<Option<ClusterObject>> {
        let mut state = self.state();
        state.get_count += 1;

        if let Some(remaining) = state.get_failures.get_mut(target) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::ClusterApi(format!("injected failure reading {}", target)));
            }
        }

        let scripted = state.scripted.get_mut(target).and_then(|queue| {
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        });

        let Some(entry) = state.objects.get_mut(target) else {
            return Ok(None);
        };

        if let Some(remaining) = entry.reads_until_gone.as_mut() {
            if *remaining == 0 {
                Self::reap(&mut state);
                return Ok(None);
            }
            *remaining -= 1;
        }

        if let Some(status) = scripted {
            entry.object.manifest["status"] = status;
        } else if let Some(remaining) = entry.reads_until_ready.as_mut() {
            if *remaining == 0 {
                if let Some(status) = ready_status(&entry.object) {
                    entry.object.manifest["status"] = status;
                }
                entry.reads_until_ready = None;
            } else {
                *remaining -= 1;
            }
        }

        Ok(Some(entry.object.clone()))
    }

    async fn create(&self, object: &ClusterObject) -> Result<ClusterObject> {
        let mut state = self.state();
        let key = object.object_ref();
        if state.objects.contains_key(&key) {
            return Err(Error::cluster_command(
                &format!("create {}", key),
                "AlreadyExists",
            ));
        }
        if let Some(ns) = &key.namespace {
            if !state.objects.contains_key(&ObjectRef::namespace(ns)) {
                return Err(Error::cluster_command(
                    &format!("create {}", key),
                    &format!("namespaces \"{}\" not found", ns),
                ));
            }
        }

        let mut stored = object.clone();
        if let Some(fields) = stored.manifest.as_object_mut() {
            fields.remove("status");
        }
        state.created.push(key.clone());
        state.objects.insert(
            key,
            Entry {
                object: stored.clone(),
                reads_until_ready: self.ready_after,
                reads_until_gone: None,
            },
        );
        Ok(stored)
    }

    async fn update(&self, object: &ClusterObject) -> Result<ClusterObject> {
        let mut state = self.state();
        let key = object.object_ref();
        match state.objects.get_mut(&key) {
            Some(entry) => {
                entry.object = object.clone();
                Ok(object.clone())
            }
            None => Err(Error::cluster_command(
                &format!("replace {}", key),
                "NotFound",
            )),
        }
    }

    async fn delete(&self, target: &ObjectRef) -> Result<DeleteOutcome> {
        let mut state = self.state();
        if let Some(message) = state.delete_failures.get(target) {
            return Err(Error::cluster_command(&format!("delete {}", target), message));
        }
        let stuck = state.stuck.contains(target);
        let gone_after = self.gone_after;
        let Some(entry) = state.objects.get_mut(target) else {
            return Ok(DeleteOutcome::NotFound);
        };
        if !stuck && entry.reads_until_gone.is_none() {
            entry.reads_until_gone = Some(gone_after);
        }
        state.deleted.push(target.clone());
        Self::reap(&mut state);
        Ok(DeleteOutcome::Deleted)
    }

    async fn exec(
        &self,
        pod: &ObjectRef,
        _container: Option<&str>,
        command: &[String],
    ) -> Result<ExecOutput> {
        let mut state = self.state();
        if !state.objects.contains_key(pod) {
            return Err(Error::cluster_command(
                &format!("exec {}", pod),
                &format!("pods \"{}\" not found", pod.name),
            ));
        }
        state.exec_log.push((pod.clone(), command.to_vec()));
        let program = command.first().map(String::as_str).unwrap_or_default();
        Ok(state.exec_results.get(program).cloned().unwrap_or_default())
    }
}
