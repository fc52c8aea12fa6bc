use std::time::Duration;

use k8s_openapi::api::core::v1::Node;
use tracing::{info, instrument, warn};

use crate::error::{E2eError, E2eResult};
use crate::k8s::{quantity_value, ClusterApi};
use crate::poll::{poll_until, Probe};

/// Wait until `min_nodes` nodes advertise a positive allocatable `resource`
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceQuery {
    resource: String,
    min_nodes: usize,
    interval: Duration,
    deadline: Duration,
}

impl ResourceQuery {
    pub fn new(
        resource: impl Into<String>,
        min_nodes: usize,
        interval: Duration,
        deadline: Duration,
    ) -> E2eResult<Self> {
        let resource = resource.into();

        if deadline.is_zero() {
            return Err(E2eError::invalid_query(format!(
                "deadline for {} must be positive",
                resource
            )));
        }
        if interval.is_zero() || interval >= deadline {
            return Err(E2eError::invalid_query(format!(
                "poll interval {:?} for {} must be positive and shorter than the {:?} deadline",
                interval, resource, deadline
            )));
        }
        if min_nodes == 0 {
            return Err(E2eError::invalid_query(format!(
                "at least one node must advertise {}",
                resource
            )));
        }

        Ok(Self {
            resource,
            min_nodes,
            interval,
            deadline,
        })
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

/// What the cluster advertised for a resource at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceAvailability {
    pub resource: String,
    /// Nodes with a strictly positive allocatable quantity
    pub nodes: Vec<String>,
    /// Sum of the allocatable quantity over all nodes
    pub total: f64,
    pub nodes_listed: usize,
}

impl std::fmt::Display for ResourceAvailability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} nodes advertise {} (total {})",
            self.nodes.len(),
            self.nodes_listed,
            self.resource,
            self.total
        )
    }
}

/// Tally the allocatable quantity of `resource` across `nodes`
pub fn resource_availability(nodes: &[Node], resource: &str) -> ResourceAvailability {
    let mut positive = Vec::new();
    let mut total = 0.0;

    for node in nodes {
        let value = node
            .status
            .as_ref()
            .and_then(|s| s.allocatable.as_ref())
            .and_then(|a| a.get(resource))
            .and_then(quantity_value)
            .unwrap_or(0.0);

        total += value;
        if value > 0.0 {
            positive.push(node.metadata.name.clone().unwrap_or_default());
        }
    }

    ResourceAvailability {
        resource: resource.to_string(),
        nodes: positive,
        total,
        nodes_listed: nodes.len(),
    }
}

/// Poll node listings until the query is satisfied or its deadline passes
#[instrument(skip(cluster, query), fields(resource = %query.resource, deadline = ?query.deadline))]
pub async fn wait_for_resource(
    cluster: &dyn ClusterApi,
    query: &ResourceQuery,
) -> E2eResult<ResourceAvailability> {
    let what = format!("allocatable {}", query.resource);
    let resource = query.resource.as_str();
    let min_nodes = query.min_nodes;

    let availability = poll_until(&what, query.interval, query.deadline, move || async move {
        match cluster.list_nodes().await {
            Ok(nodes) => {
                let availability = resource_availability(&nodes, resource);
                if availability.nodes.len() >= min_nodes {
                    Ok(Probe::Ready(availability))
                } else {
                    Ok(Probe::Pending(availability.to_string()))
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to list nodes");
                Ok(Probe::Pending(format!("listing nodes failed: {}", e)))
            }
        }
    })
    .await?;

    info!(%availability, "Resource is allocatable");
    Ok(availability)
}
