//! Live cluster checks
//!
//! These need a cluster with SGX capable nodes, cert-manager and a plugins repository
//! checkout (`SGX_E2E_REPO_DIR` or `PLUGINS_REPO_DIR`). Run with:
//!
//! ```text
//! cargo test --test sgx_e2e -- --ignored --test-threads=1
//! ```

use sgx_plugin_e2e::config::Config;
use sgx_plugin_e2e::deploy::KubectlApplier;
use sgx_plugin_e2e::k8s::KubeCluster;
use sgx_plugin_e2e::{run_direct_deployment, run_operator_deployment};

async fn setup() -> (Config, KubeCluster, KubectlApplier) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();

    let config = Config::load().expect("configuration");
    let cluster = KubeCluster::new().await.expect("kubeconfig");
    let applier = KubectlApplier::new(config.kubectl.clone());
    (config, cluster, applier)
}

#[tokio::test]
#[ignore]
async fn checks_availability_of_sgx_resources() {
    let (config, cluster, applier) = setup().await;

    let result = run_direct_deployment(&cluster, &applier, &config).await;

    assert!(result.passed(), "{}", result);
}

#[tokio::test]
#[ignore]
async fn deploys_sgx_plugin_with_operator() {
    let (config, cluster, applier) = setup().await;

    let result = run_operator_deployment(&cluster, &applier, &config).await;

    assert!(result.passed(), "{}", result);
}
