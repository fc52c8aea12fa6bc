use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{
    Scenario, ScenarioResult, ScenarioState, Settle, StepFailure, TeardownItem, TeardownStack,
    CERT_MANAGER_NAMESPACE, CERT_MANAGER_PODS, CERT_MANAGER_SELECTOR, CERT_MANAGER_TIMEOUT,
    CONTROLLER_MANAGER_SELECTOR, DIRECT_PLUGIN_READY_TIMEOUT, EPC_RESOURCE, OPERATOR_KUSTOMIZATION,
    OPERATOR_PLUGIN_READY_TIMEOUT, OPERATOR_READY_TIMEOUT, PLUGIN_KUSTOMIZATION, PLUGIN_SELECTOR,
    SGX_RESOURCES, SGX_SAMPLE_CR, WEBHOOK_KUSTOMIZATION, WEBHOOK_READY_TIMEOUT, WORKLOAD_TIMEOUT,
};
use crate::config::Config;
use crate::deploy::{
    locate_repo_file, write_namespace_overlay, DeploymentHandle, Manifest, ManifestApplier,
};
use crate::diagnostics::DiagnosticCollector;
use crate::error::E2eResult;
use crate::k8s::{check_read_only_root_filesystem, test_namespace_labels, ClusterApi};
use crate::wait::{
    wait_for_pod_success, wait_for_ready_pods, wait_for_resource, ReadinessQuery, ResourceQuery,
};
use crate::workload::WorkloadSpec;

/// Workflow state of a single scenario run
struct Run {
    state: ScenarioState,
    visited: Vec<ScenarioState>,
    teardown: TeardownStack,
}

impl Run {
    fn new() -> Self {
        Self {
            state: ScenarioState::Init,
            visited: vec![ScenarioState::Init],
            teardown: TeardownStack::new(),
        }
    }

    fn enter(&mut self, state: ScenarioState) {
        info!(from = %self.state, to = %state, "State transition");
        self.state = state;
        self.visited.push(state);
    }
}

/// Drives the verification scenarios against a cluster.
///
/// Cluster calls are awaited one at a time. Every scenario ends in teardown, whether or not
/// an earlier step failed.
pub struct Orchestrator<'a> {
    cluster: &'a dyn ClusterApi,
    applier: &'a dyn ManifestApplier,
    config: &'a Config,
    collector: DiagnosticCollector,
}

impl<'a> Orchestrator<'a> {
    pub fn new(cluster: &'a dyn ClusterApi, applier: &'a dyn ManifestApplier, config: &'a Config) -> Self {
        Self {
            cluster,
            applier,
            config,
            collector: DiagnosticCollector::new(config.log_tail_lines, config.artifacts_dir.clone()),
        }
    }

    #[instrument(skip(self))]
    pub async fn run(&self, scenario: Scenario) -> ScenarioResult {
        let started_at = Utc::now();
        let mut run = Run::new();
        info!("Starting scenario");

        let outcome = match scenario {
            Scenario::DirectDeployment => self.direct_deployment(&mut run).await,
            Scenario::OperatorDeployment => self.operator_deployment(&mut run).await,
        };

        let failure = outcome.err().map(|error| {
            error!(state = %run.state, error = %error, "Scenario step failed");
            StepFailure {
                state: run.state,
                error,
            }
        });

        run.enter(ScenarioState::Teardown);
        let teardown = std::mem::take(&mut run.teardown);
        let teardown_errors = teardown
            .unwind(self.cluster, self.applier, self.config.poll_interval())
            .await;
        if !teardown_errors.is_empty() {
            warn!(count = teardown_errors.len(), "Teardown finished with errors");
        }

        run.enter(if failure.is_some() {
            ScenarioState::Failed
        } else {
            ScenarioState::Done
        });

        ScenarioResult {
            scenario,
            visited: run.visited,
            failure,
            teardown_errors,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Webhook and plugin via kustomize into a fresh namespace, then the EPC workload
    async fn direct_deployment(&self, run: &mut Run) -> E2eResult<()> {
        let repo = self.config.repo_dir.as_deref();
        let webhook_base = Manifest::kustomization(&locate_repo_file(repo, WEBHOOK_KUSTOMIZATION)?)?;
        let plugin = Manifest::kustomization(&locate_repo_file(repo, PLUGIN_KUSTOMIZATION)?)?;

        let namespace = self.create_test_namespace(run).await?;

        run.enter(ScenarioState::PluginDeploying);
        self.deploy_webhook(run, &webhook_base, &namespace).await?;
        self.apply(run, plugin.in_namespace(namespace.as_str()), None).await?;

        let query = self.readiness(PLUGIN_SELECTOR, &namespace, 1, DIRECT_PLUGIN_READY_TIMEOUT)?;
        let plugin_pods = wait_for_ready_pods(self.cluster, &self.collector, &query).await?;

        run.enter(ScenarioState::PluginReady);
        check_read_only_root_filesystem(&plugin_pods)?;
        self.wait_for_sgx_resources().await?;

        run.enter(ScenarioState::ResourcesAdvertised);
        let workload = WorkloadSpec::sgx_tester(self.config.workload_image.as_str(), EPC_RESOURCE)?;
        run.teardown.push(TeardownItem::Pod {
            namespace: namespace.clone(),
            name: workload.name().to_string(),
        });
        self.cluster.create_pod(&namespace, &workload.to_pod()).await?;

        run.enter(ScenarioState::WorkloadSubmitted);
        wait_for_pod_success(
            self.cluster,
            &self.collector,
            &namespace,
            workload.name(),
            self.config.poll_interval(),
            WORKLOAD_TIMEOUT,
        )
        .await?;

        run.enter(ScenarioState::WorkloadSucceeded);
        Ok(())
    }

    /// Operator plus the sample custom resource; the operator creates the plugin
    async fn operator_deployment(&self, run: &mut Run) -> E2eResult<()> {
        let repo = self.config.repo_dir.as_deref();
        let operator = Manifest::kustomization(&locate_repo_file(repo, OPERATOR_KUSTOMIZATION)?)?;
        let sample = Manifest::file(locate_repo_file(repo, SGX_SAMPLE_CR)?);
        let namespace = self.config.operator_namespace.as_str();

        run.enter(ScenarioState::PluginDeploying);
        self.apply(run, operator, None).await?;

        let query = self.readiness(CONTROLLER_MANAGER_SELECTOR, namespace, 1, OPERATOR_READY_TIMEOUT)?;
        wait_for_ready_pods(self.cluster, &self.collector, &query).await?;

        let settle = Settle {
            selector: PLUGIN_SELECTOR.to_string(),
            namespace: namespace.to_string(),
            deadline: self.config.operator_cleanup_timeout(),
        };
        self.apply(run, sample, Some(settle)).await?;

        let query = self.readiness(PLUGIN_SELECTOR, namespace, 1, OPERATOR_PLUGIN_READY_TIMEOUT)?;
        wait_for_ready_pods(self.cluster, &self.collector, &query).await?;

        run.enter(ScenarioState::PluginReady);
        self.wait_for_sgx_resources().await?;

        run.enter(ScenarioState::ResourcesAdvertised);
        Ok(())
    }

    async fn create_test_namespace(&self, run: &mut Run) -> E2eResult<String> {
        let prefix = self.config.namespace_prefix.as_str();
        let suffix = Uuid::new_v4().simple().to_string();
        let namespace = format!("{}-{}", prefix, &suffix[..8]);

        run.teardown.push(TeardownItem::Namespace(namespace.clone()));
        self.cluster
            .create_namespace(&namespace, test_namespace_labels(prefix))
            .await?;

        info!(namespace = %namespace, "Created test namespace");
        Ok(namespace)
    }

    /// Retarget the webhook overlay at the test namespace, apply it and wait for it to serve
    async fn deploy_webhook(&self, run: &mut Run, base: &Manifest, namespace: &str) -> E2eResult<()> {
        if self.config.require_cert_manager {
            let query = self.readiness(
                CERT_MANAGER_SELECTOR,
                CERT_MANAGER_NAMESPACE,
                CERT_MANAGER_PODS,
                CERT_MANAGER_TIMEOUT,
            )?;
            wait_for_ready_pods(self.cluster, &self.collector, &query).await?;
        }

        let work_dir = self.config.work_dir().join(format!("webhook-e2e-{}", namespace));
        run.teardown.push(TeardownItem::WorkDir(work_dir.clone()));
        let webhook = write_namespace_overlay(&work_dir, base.path(), namespace).await?;
        self.apply(run, webhook, None).await?;

        let query = self.readiness(CONTROLLER_MANAGER_SELECTOR, namespace, 1, WEBHOOK_READY_TIMEOUT)?;
        wait_for_ready_pods(self.cluster, &self.collector, &query).await?;
        Ok(())
    }

    /// Register the manifest for teardown, then apply it
    async fn apply(&self, run: &mut Run, manifest: Manifest, settle: Option<Settle>) -> E2eResult<()> {
        run.teardown.push(TeardownItem::Manifest {
            handle: DeploymentHandle::new(manifest.clone()),
            settle,
        });
        self.applier.apply(&manifest).await?;
        run.teardown.mark_applied();
        Ok(())
    }

    async fn wait_for_sgx_resources(&self) -> E2eResult<()> {
        for (resource, deadline) in SGX_RESOURCES {
            let query = ResourceQuery::new(resource, 1, self.config.poll_interval(), deadline)?;
            let availability = wait_for_resource(self.cluster, &query).await?;
            info!(%availability, "Resource advertised");
        }
        Ok(())
    }

    fn readiness(
        &self,
        selector: &str,
        namespace: &str,
        expected: usize,
        deadline: Duration,
    ) -> E2eResult<ReadinessQuery> {
        Ok(ReadinessQuery::new(selector, namespace, expected, deadline)?
            .with_interval(self.config.poll_interval()))
    }
}

/// Deploy the webhook and plugin directly and run a workload against the advertised EPC
pub async fn run_direct_deployment(
    cluster: &dyn ClusterApi,
    applier: &dyn ManifestApplier,
    config: &Config,
) -> ScenarioResult {
    Orchestrator::new(cluster, applier, config)
        .run(Scenario::DirectDeployment)
        .await
}

/// Deploy the plugin through the operator and check it advertises the SGX resources
pub async fn run_operator_deployment(
    cluster: &dyn ClusterApi,
    applier: &dyn ManifestApplier,
    config: &Config,
) -> ScenarioResult {
    Orchestrator::new(cluster, applier, config)
        .run(Scenario::OperatorDeployment)
        .await
}

/// Run both scenarios, one after the other
pub async fn run_all(
    cluster: &dyn ClusterApi,
    applier: &dyn ManifestApplier,
    config: &Config,
) -> Vec<ScenarioResult> {
    let orchestrator = Orchestrator::new(cluster, applier, config);
    let mut results = Vec::new();

    for scenario in [Scenario::DirectDeployment, Scenario::OperatorDeployment] {
        results.push(orchestrator.run(scenario).await);
    }

    results
}
