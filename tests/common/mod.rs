//! In-memory cluster and manifest applier shared by the integration tests
//!
//! State changes are scheduled against tokio time, so the tests run with paused time and
//! complete instantly while the waits observe the same progression a real cluster shows.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{
    Container, ContainerStatus, Event, Node, NodeStatus, Pod, PodCondition, PodSpec, PodStatus,
    SecurityContext, Service,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio::time::Instant;

use sgx_plugin_e2e::config::Config;
use sgx_plugin_e2e::deploy::{Manifest, ManifestApplier};
use sgx_plugin_e2e::k8s::ClusterApi;
use sgx_plugin_e2e::scenario::{
    CERT_MANAGER_SELECTOR, CONTROLLER_MANAGER_SELECTOR, ENCLAVE_RESOURCE, EPC_RESOURCE,
    OPERATOR_KUSTOMIZATION, PLUGIN_KUSTOMIZATION, PLUGIN_SELECTOR, PROVISION_RESOURCE,
    SGX_SAMPLE_CR, WEBHOOK_KUSTOMIZATION,
};
use sgx_plugin_e2e::{E2eError, E2eResult};

/// Ordered record of every mutating call and diagnostic fetch
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Index of the first entry starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries().iter().any(|e| e.contains(needle))
    }
}

#[derive(Debug, Clone)]
struct PodRule {
    selector: String,
    count: usize,
    /// `None` keeps the pods pending forever
    ready_after: Option<Duration>,
    read_only_root: bool,
    /// Pods disappear once a manifest whose path ends with this has been deleted
    removed_by: Option<String>,
}

/// A cluster whose pods and node resources come up on a schedule
pub struct FakeCluster {
    start: Instant,
    journal: Journal,
    pods: Vec<PodRule>,
    /// Resource name and when it becomes allocatable; `None` never
    resources: Vec<(String, Option<Duration>)>,
    workload_phase: String,
    fail_namespace_delete: bool,
    /// How long a node listing takes to answer
    list_nodes_delay: Duration,
}

impl FakeCluster {
    pub fn new(journal: Journal) -> Self {
        Self {
            start: Instant::now(),
            journal,
            pods: Vec::new(),
            resources: Vec::new(),
            workload_phase: "Succeeded".to_string(),
            fail_namespace_delete: false,
            list_nodes_delay: Duration::ZERO,
        }
    }

    /// A cluster where everything the scenarios wait for eventually shows up
    pub fn healthy(journal: Journal) -> Self {
        Self::new(journal)
            .with_pods(CERT_MANAGER_SELECTOR, 3, Some(Duration::ZERO))
            .with_pods(CONTROLLER_MANAGER_SELECTOR, 1, Some(Duration::from_secs(5)))
            .with_pods(PLUGIN_SELECTOR, 1, Some(Duration::from_secs(15)))
            .with_pods_removed_by(PLUGIN_SELECTOR, "deviceplugin_v1_sgxdeviceplugin.yaml")
            .with_resource(EPC_RESOURCE, Some(Duration::from_secs(40)))
            .with_resource(ENCLAVE_RESOURCE, Some(Duration::from_secs(40)))
            .with_resource(PROVISION_RESOURCE, Some(Duration::from_secs(40)))
    }

    /// Replace the rule for `selector`
    pub fn with_pods(mut self, selector: &str, count: usize, ready_after: Option<Duration>) -> Self {
        self.pods.retain(|r| r.selector != selector);
        self.pods.push(PodRule {
            selector: selector.to_string(),
            count,
            ready_after,
            read_only_root: true,
            removed_by: None,
        });
        self
    }

    pub fn with_pods_removed_by(mut self, selector: &str, manifest_suffix: &str) -> Self {
        for rule in self.pods.iter_mut().filter(|r| r.selector == selector) {
            rule.removed_by = Some(manifest_suffix.to_string());
        }
        self
    }

    pub fn with_writable_root(mut self, selector: &str) -> Self {
        for rule in self.pods.iter_mut().filter(|r| r.selector == selector) {
            rule.read_only_root = false;
        }
        self
    }

    /// Replace the schedule for `resource`
    pub fn with_resource(mut self, resource: &str, appears_after: Option<Duration>) -> Self {
        self.resources.retain(|(r, _)| r != resource);
        self.resources.push((resource.to_string(), appears_after));
        self
    }

    pub fn with_workload_phase(mut self, phase: &str) -> Self {
        self.workload_phase = phase.to_string();
        self
    }

    /// Make every node listing stall, like an API server that stopped answering
    pub fn with_slow_node_listing(mut self, delay: Duration) -> Self {
        self.list_nodes_delay = delay;
        self
    }

    pub fn with_failing_namespace_delete(mut self) -> Self {
        self.fail_namespace_delete = true;
        self
    }

    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    fn pods_for(&self, rule: &PodRule) -> Vec<Pod> {
        if let Some(suffix) = &rule.removed_by {
            let removed = self
                .journal
                .entries()
                .iter()
                .any(|e| e.starts_with("delete ") && e.contains(suffix.as_str()));
            if removed {
                return Vec::new();
            }
        }

        let ready = rule.ready_after.is_some_and(|after| self.elapsed() >= after);
        let app = rule.selector.split('=').nth(1).unwrap_or("pod");

        (0..rule.count)
            .map(|i| fake_pod(&format!("{}-{}", app, i), ready, rule.read_only_root))
            .collect()
    }
}

pub fn fake_pod(name: &str, ready: bool, read_only_root: bool) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "main".to_string(),
                security_context: Some(SecurityContext {
                    read_only_root_filesystem: Some(read_only_root),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(if ready { "Running" } else { "Pending" }.to_string()),
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            container_statuses: Some(vec![ContainerStatus {
                name: "main".to_string(),
                ready,
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

pub fn fake_node(name: &str, allocatable: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: None,
        status: Some(NodeStatus {
            allocatable: Some(
                allocatable
                    .iter()
                    .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
                    .collect(),
            ),
            ..Default::default()
        }),
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_nodes(&self) -> E2eResult<Vec<Node>> {
        if !self.list_nodes_delay.is_zero() {
            tokio::time::sleep(self.list_nodes_delay).await;
        }

        let elapsed = self.elapsed();
        let mut allocatable = vec![("cpu", "4"), ("memory", "16Gi")];
        for (resource, after) in &self.resources {
            if after.is_some_and(|after| elapsed >= after) {
                allocatable.push((resource.as_str(), "10"));
            }
        }

        Ok(vec![
            fake_node("sgx-node", &allocatable),
            fake_node("plain-node", &[("cpu", "4")]),
        ])
    }

    async fn list_pods(&self, _namespace: &str, selector: &str) -> E2eResult<Vec<Pod>> {
        if selector.is_empty() {
            return Ok(self.pods.iter().flat_map(|r| self.pods_for(r)).collect());
        }

        Ok(self
            .pods
            .iter()
            .filter(|r| r.selector == selector)
            .flat_map(|r| self.pods_for(r))
            .collect())
    }

    async fn get_pod(&self, _namespace: &str, name: &str) -> E2eResult<Pod> {
        let mut pod = fake_pod(name, false, true);
        if let Some(status) = pod.status.as_mut() {
            status.phase = Some(self.workload_phase.clone());
        }
        Ok(pod)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> E2eResult<Pod> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.journal.record(format!("create_pod {}/{}", namespace, name));
        Ok(pod.clone())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> E2eResult<()> {
        self.journal.record(format!("delete_pod {}/{}", namespace, name));
        Ok(())
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        _previous: bool,
        _tail_lines: i64,
    ) -> E2eResult<String> {
        self.journal
            .record(format!("pod_logs {}/{}/{}", namespace, pod, container));
        Ok("waiting for the kubelet socket\n".to_string())
    }

    async fn list_deployments(&self, namespace: &str) -> E2eResult<Vec<Deployment>> {
        self.journal.record(format!("list_deployments {}", namespace));
        Ok(Vec::new())
    }

    async fn list_daemon_sets(&self, _namespace: &str) -> E2eResult<Vec<DaemonSet>> {
        Ok(Vec::new())
    }

    async fn list_services(&self, _namespace: &str) -> E2eResult<Vec<Service>> {
        Ok(Vec::new())
    }

    async fn list_events(&self, _namespace: &str) -> E2eResult<Vec<Event>> {
        Ok(Vec::new())
    }

    async fn create_namespace(&self, name: &str, labels: BTreeMap<String, String>) -> E2eResult<()> {
        assert_eq!(
            labels.get("pod-security.kubernetes.io/enforce").map(String::as_str),
            Some("privileged")
        );
        self.journal.record(format!("create_namespace {}", name));
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> E2eResult<()> {
        self.journal.record(format!("delete_namespace {}", name));
        if self.fail_namespace_delete {
            return Err(E2eError::teardown(format!("namespace {}", name), "forbidden"));
        }
        Ok(())
    }
}

/// Records applies and deletes instead of running kubectl
pub struct RecordingApplier {
    journal: Journal,
    fail_apply: Option<String>,
    fail_delete: Option<String>,
}

impl RecordingApplier {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            fail_apply: None,
            fail_delete: None,
        }
    }

    /// Fail applying any manifest whose path contains `needle`
    pub fn failing_apply(mut self, needle: &str) -> Self {
        self.fail_apply = Some(needle.to_string());
        self
    }

    /// Fail deleting any manifest whose path contains `needle`
    pub fn failing_delete(mut self, needle: &str) -> Self {
        self.fail_delete = Some(needle.to_string());
        self
    }

    fn matches(needle: &Option<String>, manifest: &Manifest) -> bool {
        needle
            .as_deref()
            .is_some_and(|n| manifest.path().to_string_lossy().contains(n))
    }
}

#[async_trait]
impl ManifestApplier for RecordingApplier {
    async fn apply(&self, manifest: &Manifest) -> E2eResult<()> {
        self.journal.record(format!("apply {}", manifest));
        if Self::matches(&self.fail_apply, manifest) {
            return Err(E2eError::apply(manifest.to_string(), "exit status 1"));
        }
        Ok(())
    }

    async fn delete(&self, manifest: &Manifest) -> E2eResult<()> {
        self.journal.record(format!("delete {}", manifest));
        if Self::matches(&self.fail_delete, manifest) {
            return Err(E2eError::teardown(manifest.to_string(), "exit status 1"));
        }
        Ok(())
    }
}

/// A plugins repository checkout holding the manifests the scenarios locate
pub fn fake_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for file in [
        WEBHOOK_KUSTOMIZATION,
        PLUGIN_KUSTOMIZATION,
        OPERATOR_KUSTOMIZATION,
        SGX_SAMPLE_CR,
    ] {
        write_file(dir.path(), file);
    }
    dir
}

pub fn write_file(root: &Path, relative: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, "resources: []\n").unwrap();
}

pub fn test_config(repo: &Path, work_dir: &Path) -> Config {
    Config {
        repo_dir: Some(repo.to_path_buf()),
        work_dir: Some(std::fs::canonicalize(work_dir).unwrap()),
        ..Config::default()
    }
}
