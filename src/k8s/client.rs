//! Kubernetes client wrapper for the deployment checks

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Event, Namespace, Node, Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::{Api, DeleteParams, ListParams, LogParams, PostParams},
    Client, Config,
};
use tracing::{info, instrument};

use super::ClusterApi;
use crate::error::E2eResult;

/// Wrapper around kube::Client implementing [`ClusterApi`]
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Create a new KubeCluster using the default kubeconfig or in-cluster config
    #[instrument(skip_all)]
    pub async fn new() -> E2eResult<Self> {
        let config = Config::infer().await.map_err(kube::Error::InferConfig)?;
        let client = Client::try_from(config)?;

        info!("Connected to Kubernetes cluster");

        Ok(Self { client })
    }

    /// Check if cluster is reachable
    pub async fn health_check(&self) -> E2eResult<()> {
        let version = self.client.apiserver_version().await?;
        info!(version = %version.git_version, "Kubernetes cluster is healthy");
        Ok(())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Treat a 404 as success for idempotent deletes
fn ignore_not_found<T>(result: Result<T, kube::Error>) -> E2eResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_nodes(&self) -> E2eResult<Vec<Node>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        Ok(nodes.list(&ListParams::default()).await?.items)
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> E2eResult<Vec<Pod>> {
        let list = self
            .pods(namespace)
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(list.items)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> E2eResult<Pod> {
        Ok(self.pods(namespace).get(name).await?)
    }

    #[instrument(skip(self, pod), fields(pod_name = %pod.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> E2eResult<Pod> {
        let created = self.pods(namespace).create(&PostParams::default(), pod).await?;
        info!("Created pod");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn delete_pod(&self, namespace: &str, name: &str) -> E2eResult<()> {
        ignore_not_found(self.pods(namespace).delete(name, &DeleteParams::default()).await)?;
        info!(name, "Deleted pod");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        previous: bool,
        tail_lines: i64,
    ) -> E2eResult<String> {
        let log_params = LogParams {
            container: Some(container.to_string()),
            previous,
            tail_lines: Some(tail_lines),
            ..Default::default()
        };

        Ok(self.pods(namespace).logs(pod, &log_params).await?)
    }

    async fn list_deployments(&self, namespace: &str) -> E2eResult<Vec<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_daemon_sets(&self, namespace: &str) -> E2eResult<Vec<DaemonSet>> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_services(&self, namespace: &str) -> E2eResult<Vec<Service>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_events(&self, namespace: &str) -> E2eResult<Vec<Event>> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    #[instrument(skip(self, labels))]
    async fn create_namespace(&self, name: &str, labels: BTreeMap<String, String>) -> E2eResult<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());

        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };

        match namespaces.create(&PostParams::default(), &ns).await {
            Ok(_) => {
                info!(namespace = %name, "Created namespace");
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                info!(namespace = %name, "Namespace already exists");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_namespace(&self, name: &str) -> E2eResult<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        ignore_not_found(namespaces.delete(name, &DeleteParams::default()).await)?;
        info!(namespace = %name, "Deleted namespace");
        Ok(())
    }
}
