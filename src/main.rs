use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sgx_plugin_e2e::{config::Config, deploy::KubectlApplier, k8s::KubeCluster, run_all, ScenarioResult};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(config.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!config.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    tracing::info!("Starting SGX plugin deployment checks");

    let cluster = KubeCluster::new().await?;
    cluster.health_check().await?;
    tracing::info!("Connected to Kubernetes cluster");

    let applier = KubectlApplier::new(config.kubectl.clone());
    let results = run_all(&cluster, &applier, &config).await;

    for result in &results {
        println!("{}", result);
    }

    if let Some(dir) = config.artifacts_dir.as_ref() {
        write_summaries(dir, &results).await?;
    }

    let failed = results.iter().filter(|r| !r.passed()).count();
    if failed > 0 {
        tracing::error!(failed, total = results.len(), "Deployment checks failed");
        std::process::exit(1);
    }

    tracing::info!(total = results.len(), "All deployment checks passed");
    Ok(())
}

async fn write_summaries(dir: &std::path::Path, results: &[ScenarioResult]) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let summaries: Vec<_> = results.iter().map(ScenarioResult::summary).collect();
    let path = dir.join("summary.json");
    tokio::fs::write(&path, serde_json::to_vec_pretty(&summaries)?)
        .await
        .with_context(|| format!("writing {}", path.display()))?;

    tracing::info!(path = %path.display(), "Wrote run summary");
    Ok(())
}
