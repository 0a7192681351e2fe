// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use clap::Parser;
use kube::Client;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flux_extension_controller::config::Config;
use flux_extension_controller::github::GitHubClient;
use flux_extension_controller::kubernetes::{wait_for_gitrepository_crd, SecretStore};
use flux_extension_controller::metrics::register_metrics;
use flux_extension_controller::reconcilers::{
    ConfigMapReconciler, GitRepositoryReconciler, NamespaceReconciler,
};
use flux_extension_controller::server::{metrics_router, probe_router, start_server, ServerState};
use flux_extension_controller::token::{RefreshManager, RefreshSettings};

#[derive(Parser, Debug)]
#[command(name = "flux-extension-controller", version, about)]
struct Args {
    /// Path to the configuration file
    #[arg(long, env = "CONFIG_PATH", default_value = "/etc/config/config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!("Starting flux-extension-controller");

    let config = Config::load(&args.config)?;
    info!(
        "Configuration loaded: organization={}, refresh_interval={:?}",
        config.github.organization, config.token_refresh.refresh_interval
    );

    register_metrics().context("Failed to register metrics")?;
    let shutdown = CancellationToken::new();
    let server_state = Arc::new(ServerState::new());
    start_server(config.metrics.address, metrics_router(), shutdown.clone()).await?;
    start_server(
        config.health_probe.address,
        probe_router(server_state.clone()),
        shutdown.clone(),
    )
    .await?;

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let github = Arc::new(GitHubClient::new(&config.github).context("Failed to create GitHub client")?);
    let store = Arc::new(SecretStore::new(client.clone()));

    info!("Waiting for GitRepository CRD to become available...");
    wait_for_gitrepository_crd(&client).await?;

    let refresh_manager = RefreshManager::new(
        store.clone(),
        github.clone(),
        RefreshSettings::from(&config.token_refresh),
    );
    refresh_manager.start(shutdown.clone()).await?;
    server_state.set_ready();

    let gitrepository_reconciler = GitRepositoryReconciler::new(
        client.clone(),
        &config,
        store,
        github,
        Arc::new(refresh_manager.clone()),
    );
    let configmap_reconciler = ConfigMapReconciler::new(client.clone());
    let namespace_reconciler = NamespaceReconciler::new(client);

    info!("Starting reconcilers...");

    let reconcilers = async {
        tokio::try_join!(
            gitrepository_reconciler.run(),
            configmap_reconciler.run(),
            namespace_reconciler.run()
        )
    };

    tokio::select! {
        result = reconcilers => {
            result?;
            warn!("All reconcilers stopped unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    shutdown.cancel();
    refresh_manager.stop();
    info!("flux-extension-controller stopped");
    Ok(())
}
