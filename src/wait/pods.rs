use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use tracing::{error, info, instrument, warn};

use crate::diagnostics::DiagnosticCollector;
use crate::error::{E2eError, E2eResult};
use crate::k8s::{is_pod_running_ready, pod_name, pod_phase, termination_reason, ClusterApi};
use crate::poll::{poll_until, Probe};

const DEFAULT_POD_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Wait until exactly `expected` pods matching `selector` are running and ready
#[derive(Debug, Clone, PartialEq)]
pub struct ReadinessQuery {
    selector: String,
    namespace: String,
    expected: usize,
    deadline: Duration,
    interval: Duration,
}

impl ReadinessQuery {
    pub fn new(
        selector: impl Into<String>,
        namespace: impl Into<String>,
        expected: usize,
        deadline: Duration,
    ) -> E2eResult<Self> {
        let selector = selector.into();

        if expected == 0 {
            return Err(E2eError::invalid_query(format!(
                "expected ready count for {} must be at least 1",
                selector
            )));
        }

        Ok(Self {
            selector,
            namespace: namespace.into(),
            expected,
            deadline,
            interval: DEFAULT_POD_POLL_INTERVAL,
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

/// Poll until the query's pods are running and ready.
///
/// On timeout the namespace is dumped before the error is returned, while the failing
/// state still exists in the cluster.
#[instrument(skip_all, fields(selector = %query.selector, namespace = %query.namespace, expected = query.expected))]
pub async fn wait_for_ready_pods(
    cluster: &dyn ClusterApi,
    collector: &DiagnosticCollector,
    query: &ReadinessQuery,
) -> E2eResult<Vec<Pod>> {
    let what = format!(
        "{} pod(s) with {} in {} to be running and ready",
        query.expected, query.selector, query.namespace
    );
    let namespace = query.namespace.as_str();
    let selector = query.selector.as_str();
    let expected = query.expected;

    let outcome = poll_until(&what, query.interval, query.deadline, move || async move {
        match cluster.list_pods(namespace, selector).await {
            Ok(pods) => {
                let matching = pods.len();
                let ready: Vec<Pod> = pods.into_iter().filter(is_pod_running_ready).collect();

                if ready.len() == expected {
                    Ok(Probe::Ready(ready))
                } else {
                    Ok(Probe::Pending(format!(
                        "{}/{} running and ready, {} matching",
                        ready.len(),
                        expected,
                        matching
                    )))
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to list pods");
                Ok(Probe::Pending(format!("listing pods failed: {}", e)))
            }
        }
    })
    .await;

    match outcome {
        Ok(pods) => {
            info!(pods = ?pods.iter().map(pod_name).collect::<Vec<_>>(), "Pods running and ready");
            Ok(pods)
        }
        Err(err) if err.is_timeout() => {
            error!(error = %err, "Pods did not become ready");
            let dump = collector.dump(cluster, namespace).await;
            Err(err.with_diagnostics(dump))
        }
        Err(err) => Err(err),
    }
}

/// Poll a pod until it reports `Succeeded`.
///
/// A `Failed` phase stops the wait with [`E2eError::WorkloadFailure`]. A timeout dumps the
/// namespace first.
#[instrument(skip(cluster, collector))]
pub async fn wait_for_pod_success(
    cluster: &dyn ClusterApi,
    collector: &DiagnosticCollector,
    namespace: &str,
    name: &str,
    interval: Duration,
    deadline: Duration,
) -> E2eResult<Pod> {
    let what = format!("pod {} to finish successfully", name);

    let outcome = poll_until(&what, interval, deadline, move || async move {
        let pod = match cluster.get_pod(namespace, name).await {
            Ok(pod) => pod,
            Err(e) => {
                warn!(error = %e, "Failed to get pod");
                return Ok(Probe::Pending(format!("getting pod failed: {}", e)));
            }
        };

        match pod_phase(&pod) {
            "Succeeded" => Ok(Probe::Ready(pod)),
            "Failed" => Err(E2eError::WorkloadFailure {
                pod: name.to_string(),
                phase: "Failed".to_string(),
                reason: termination_reason(&pod),
            }),
            phase => Ok(Probe::Pending(format!("phase {}", phase))),
        }
    })
    .await;

    match outcome {
        Ok(pod) => {
            info!("Pod finished successfully");
            Ok(pod)
        }
        Err(err) if err.is_timeout() => {
            let dump = collector.dump(cluster, namespace).await;
            Err(err.with_diagnostics(dump))
        }
        Err(err) => Err(err),
    }
}

/// Poll until no pod matching `selector` is left in `namespace`
#[instrument(skip(cluster))]
pub async fn wait_for_pods_gone(
    cluster: &dyn ClusterApi,
    selector: &str,
    namespace: &str,
    interval: Duration,
    deadline: Duration,
) -> E2eResult<()> {
    let what = format!("pods with {} in {} to be removed", selector, namespace);

    poll_until(&what, interval, deadline, move || async move {
        match cluster.list_pods(namespace, selector).await {
            Ok(pods) if pods.is_empty() => Ok(Probe::Ready(())),
            Ok(pods) => Ok(Probe::Pending(format!("{} pod(s) remaining", pods.len()))),
            Err(e) => Ok(Probe::Pending(format!("listing pods failed: {}", e))),
        }
    })
    .await
}
