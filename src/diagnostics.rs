//! Post-mortem capture of namespace state
//!
//! [`DiagnosticCollector::dump`] never fails: anything it cannot fetch is logged and noted
//! in [`NamespaceDump::errors`] so the original failure is never masked.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::k8s::{pod_name, pod_phase, ClusterApi};

/// Snapshot of a namespace taken when a wait fails
#[derive(Debug, Clone, Serialize)]
pub struct NamespaceDump {
    pub namespace: String,
    pub captured_at: DateTime<Utc>,
    pub pods: Vec<PodSummary>,
    pub deployments: Vec<RolloutSummary>,
    pub daemon_sets: Vec<RolloutSummary>,
    pub services: Vec<String>,
    pub events: Vec<EventSummary>,
    pub container_logs: Vec<ContainerLog>,
    /// Fetches that failed while capturing
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PodSummary {
    pub name: String,
    pub phase: String,
    pub node: Option<String>,
    pub containers: Vec<ContainerSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerSummary {
    pub name: String,
    pub ready: bool,
    pub restart_count: i32,
    pub state: String,
}

/// Desired vs ready replica counts of a deployment or daemon set
#[derive(Debug, Clone, Serialize)]
pub struct RolloutSummary {
    pub name: String,
    pub desired: i32,
    pub ready: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventSummary {
    pub kind: String,
    pub object: String,
    pub reason: String,
    pub message: String,
    pub count: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerLog {
    pub pod: String,
    pub container: String,
    pub previous: bool,
    pub logs: String,
}

impl NamespaceDump {
    pub fn empty(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            captured_at: Utc::now(),
            pods: Vec::new(),
            deployments: Vec::new(),
            daemon_sets: Vec::new(),
            services: Vec::new(),
            events: Vec::new(),
            container_logs: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn record_error(&mut self, what: &str, err: impl fmt::Display) {
        warn!(namespace = %self.namespace, what, error = %err, "Unable to collect diagnostics");
        self.errors.push(format!("{}: {}", what, err));
    }
}

impl fmt::Display for NamespaceDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== namespace {} at {} ===", self.namespace, self.captured_at.to_rfc3339())?;

        writeln!(f, "pods:")?;
        for pod in &self.pods {
            writeln!(
                f,
                "  {} phase={} node={}",
                pod.name,
                pod.phase,
                pod.node.as_deref().unwrap_or("<unscheduled>")
            )?;
            for c in &pod.containers {
                writeln!(
                    f,
                    "    {} ready={} restarts={} state={}",
                    c.name, c.ready, c.restart_count, c.state
                )?;
            }
        }

        for (label, rollouts) in [("deployments", &self.deployments), ("daemonsets", &self.daemon_sets)] {
            writeln!(f, "{}:", label)?;
            for r in rollouts {
                writeln!(f, "  {} ready {}/{}", r.name, r.ready, r.desired)?;
            }
        }

        writeln!(f, "services: {}", self.services.join(", "))?;

        writeln!(f, "events:")?;
        for e in &self.events {
            writeln!(f, "  {} {} {} (x{}): {}", e.kind, e.object, e.reason, e.count, e.message)?;
        }

        for log in &self.container_logs {
            writeln!(
                f,
                "--- logs {}/{}{} ---",
                log.pod,
                log.container,
                if log.previous { " (previous)" } else { "" }
            )?;
            writeln!(f, "{}", log.logs.trim_end())?;
        }

        if !self.errors.is_empty() {
            writeln!(f, "collection errors:")?;
            for e in &self.errors {
                writeln!(f, "  {}", e)?;
            }
        }

        Ok(())
    }
}

/// Gathers namespace state and failed container logs
#[derive(Debug, Clone)]
pub struct DiagnosticCollector {
    tail_lines: i64,
    artifacts_dir: Option<PathBuf>,
}

impl DiagnosticCollector {
    pub fn new(tail_lines: i64, artifacts_dir: Option<PathBuf>) -> Self {
        Self {
            tail_lines,
            artifacts_dir,
        }
    }

    /// Capture the state of `namespace`, emit it and return it
    pub async fn dump(&self, cluster: &dyn ClusterApi, namespace: &str) -> NamespaceDump {
        let mut dump = NamespaceDump::empty(namespace);

        match cluster.list_pods(namespace, "").await {
            Ok(pods) => {
                dump.pods = pods.iter().map(summarize_pod).collect();
                self.collect_failed_logs(cluster, &pods, &mut dump).await;
            }
            Err(e) => dump.record_error("pods", e),
        }

        match cluster.list_deployments(namespace).await {
            Ok(deployments) => {
                dump.deployments = deployments
                    .iter()
                    .map(|d| RolloutSummary {
                        name: d.metadata.name.clone().unwrap_or_default(),
                        desired: d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
                        ready: d.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0),
                    })
                    .collect();
            }
            Err(e) => dump.record_error("deployments", e),
        }

        match cluster.list_daemon_sets(namespace).await {
            Ok(daemon_sets) => {
                dump.daemon_sets = daemon_sets
                    .iter()
                    .map(|d| RolloutSummary {
                        name: d.metadata.name.clone().unwrap_or_default(),
                        desired: d.status.as_ref().map(|s| s.desired_number_scheduled).unwrap_or(0),
                        ready: d.status.as_ref().map(|s| s.number_ready).unwrap_or(0),
                    })
                    .collect();
            }
            Err(e) => dump.record_error("daemonsets", e),
        }

        match cluster.list_services(namespace).await {
            Ok(services) => {
                dump.services = services
                    .into_iter()
                    .filter_map(|s| s.metadata.name)
                    .collect();
            }
            Err(e) => dump.record_error("services", e),
        }

        match cluster.list_events(namespace).await {
            Ok(events) => {
                dump.events = events
                    .into_iter()
                    .map(|e| EventSummary {
                        kind: e.type_.unwrap_or_else(|| "Normal".to_string()),
                        object: format!(
                            "{}/{}",
                            e.involved_object.kind.unwrap_or_default(),
                            e.involved_object.name.unwrap_or_default()
                        ),
                        reason: e.reason.unwrap_or_default(),
                        message: e.message.unwrap_or_default(),
                        count: e.count.unwrap_or(1),
                    })
                    .collect();
            }
            Err(e) => dump.record_error("events", e),
        }

        self.emit(&dump).await;
        dump
    }

    async fn collect_failed_logs(&self, cluster: &dyn ClusterApi, pods: &[Pod], dump: &mut NamespaceDump) {
        let namespace = dump.namespace.clone();

        for pod in pods {
            let name = pod_name(pod);
            let statuses = pod
                .status
                .as_ref()
                .and_then(|s| s.container_statuses.as_deref())
                .unwrap_or_default();

            for status in statuses.iter().filter(|s| is_failed_container(s)) {
                let previous_runs = if status.restart_count > 0 {
                    vec![false, true]
                } else {
                    vec![false]
                };

                for previous in previous_runs {
                    match cluster
                        .pod_logs(&namespace, name, &status.name, previous, self.tail_lines)
                        .await
                    {
                        Ok(logs) => dump.container_logs.push(ContainerLog {
                            pod: name.to_string(),
                            container: status.name.clone(),
                            previous,
                            logs,
                        }),
                        Err(e) => dump.record_error(&format!("logs {}/{}", name, status.name), e),
                    }
                }
            }
        }
    }

    async fn emit(&self, dump: &NamespaceDump) {
        error!(namespace = %dump.namespace, "Diagnostics captured\n{}", dump);

        let Some(dir) = self.artifacts_dir.as_ref() else {
            return;
        };

        let yaml = match serde_yaml::to_string(dump) {
            Ok(yaml) => yaml,
            Err(e) => {
                warn!(error = %e, "Failed to serialize diagnostics");
                return;
            }
        };

        let path = dir.join(format!(
            "diagnostics-{}-{}.yaml",
            dump.namespace,
            dump.captured_at.format("%Y%m%dT%H%M%S")
        ));

        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(dir = %dir.display(), error = %e, "Failed to create artifacts dir");
            return;
        }
        match tokio::fs::write(&path, yaml).await {
            Ok(()) => info!(path = %path.display(), "Diagnostics written"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to write diagnostics"),
        }
    }
}

/// A container is worth fetching logs for when it is not ready, restarted or exited non-zero
fn is_failed_container(status: &ContainerStatus) -> bool {
    let exited_badly = status
        .state
        .as_ref()
        .and_then(|s| s.terminated.as_ref())
        .is_some_and(|t| t.exit_code != 0);

    !status.ready || status.restart_count > 0 || exited_badly
}

fn summarize_pod(pod: &Pod) -> PodSummary {
    let containers = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default()
        .iter()
        .map(|c| ContainerSummary {
            name: c.name.clone(),
            ready: c.ready,
            restart_count: c.restart_count,
            state: container_state(c),
        })
        .collect();

    PodSummary {
        name: pod_name(pod).to_string(),
        phase: pod_phase(pod).to_string(),
        node: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        containers,
    }
}

fn container_state(status: &ContainerStatus) -> String {
    let Some(state) = status.state.as_ref() else {
        return "unknown".to_string();
    };

    if let Some(waiting) = &state.waiting {
        format!("waiting ({})", waiting.reason.as_deref().unwrap_or("no reason"))
    } else if let Some(terminated) = &state.terminated {
        format!(
            "terminated ({}, exit {})",
            terminated.reason.as_deref().unwrap_or("no reason"),
            terminated.exit_code
        )
    } else if state.running.is_some() {
        "running".to_string()
    } else {
        "unknown".to_string()
    }
}
