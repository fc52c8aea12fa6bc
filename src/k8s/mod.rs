//! Kubernetes access for the deployment checks
//!
//! - [`ClusterApi`]: the calls the checks make against the control plane
//! - [`KubeCluster`]: the `kube` backed implementation
//! - pod, node and quantity helpers used by the wait primitives

mod client;
mod resources;

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Event, Node, Pod, Service};
#[cfg(test)]
use mockall::automock;

use crate::error::E2eResult;

pub use client::KubeCluster;
pub use resources::{
    check_read_only_root_filesystem, is_pod_running_ready, pod_name, pod_phase, quantity_value,
    termination_reason, test_namespace_labels,
};

/// Control plane operations used by the verification workflow.
///
/// Abstracted so the waits and the orchestrator can run against an in-memory cluster.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_nodes(&self) -> E2eResult<Vec<Node>>;

    /// List pods in `namespace` matching the label `selector`
    async fn list_pods(&self, namespace: &str, selector: &str) -> E2eResult<Vec<Pod>>;

    async fn get_pod(&self, namespace: &str, name: &str) -> E2eResult<Pod>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> E2eResult<Pod>;

    /// Delete a pod; a pod that is already gone is not an error
    async fn delete_pod(&self, namespace: &str, name: &str) -> E2eResult<()>;

    /// Fetch the last `tail_lines` of a container's log
    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        previous: bool,
        tail_lines: i64,
    ) -> E2eResult<String>;

    async fn list_deployments(&self, namespace: &str) -> E2eResult<Vec<Deployment>>;

    async fn list_daemon_sets(&self, namespace: &str) -> E2eResult<Vec<DaemonSet>>;

    async fn list_services(&self, namespace: &str) -> E2eResult<Vec<Service>>;

    async fn list_events(&self, namespace: &str) -> E2eResult<Vec<Event>>;

    async fn create_namespace(&self, name: &str, labels: BTreeMap<String, String>) -> E2eResult<()>;

    /// Delete a namespace; a namespace that is already gone is not an error
    async fn delete_namespace(&self, name: &str) -> E2eResult<()>;
}
