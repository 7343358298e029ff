//! Serving operator - installs and manages Knative Serving

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use serving_common::telemetry::{init_telemetry, TelemetryConfig};
use serving_manifest::{KubeClusterClient, Manifest};

use serving_operator::controller::{Context, KubeClient, KubeClientImpl};
use serving_operator::controller_runner::run_controller;
use serving_operator::extension::ExtensionRegistry;
use serving_operator::startup::{crd_yaml, ensure_crd_installed, ensure_default_instance};
use serving_operator::{Cli, Commands, OperatorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.command == Some(Commands::Crd) {
        println!("{}", crd_yaml()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        format: cli.log_format,
        ..Default::default()
    })?;

    let config = OperatorConfig::from_cli(&cli, std::env::var("KO_DATA_PATH").ok())?;
    run(config).await
}

async fn run(config: OperatorConfig) -> anyhow::Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        manifest = %config.manifest_path.display(),
        "starting serving operator"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kube client: {}", e))?;

    let cluster = Arc::new(KubeClusterClient::new(client.clone()));
    let manifest = Manifest::from_path(&config.manifest_path, config.recursive, cluster)
        .map_err(|e| anyhow::anyhow!("failed to load manifest: {}", e))?;
    tracing::info!(resources = manifest.len(), "manifest loaded");

    ensure_crd_installed(&client).await?;

    let kube: Arc<dyn KubeClient> = Arc::new(KubeClientImpl::new(client.clone()));
    if let Err(e) = ensure_default_instance(
        kube.as_ref(),
        &manifest,
        &config.operand_namespace,
        &config.operand_name,
    )
    .await
    {
        tracing::warn!(error = %e, "failed to ensure default instance");
    }

    let ctx = Context::builder(kube, manifest)
        .extensions(ExtensionRegistry::with_defaults())
        .requeue_after(config.requeue_after)
        .build();

    run_controller(client, Arc::new(ctx)).await;
    Ok(())
}
