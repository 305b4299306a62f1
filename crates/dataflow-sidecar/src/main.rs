// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dataflow Sidecar - Step Data Plane
//!
//! Runs next to a step's user container and:
//! - Connects the step's sources and hands their messages to the container
//! - Sends the container's output to the step's sinks
//! - Publishes per-source and per-sink status

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use dataflow_sidecar::config::Config;
use dataflow_sidecar::runtime::SidecarRuntime;
use dataflow_sidecar::store::ClusterClient;

/// Time blocking tasks get after shutdown, e.g. a FIFO open nobody answers.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dataflow_sidecar=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(config));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    if let Err(e) = &result {
        error!(error = %e, "sidecar exited with error");
    }
    result
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        pipeline = %config.pipeline_name,
        step = %config.step_spec.name,
        namespace = %config.namespace,
        replica = config.replica,
        listen_addr = %config.listen_addr,
        "Starting Dataflow Sidecar"
    );

    let cluster = Arc::new(ClusterClient::in_cluster()?);

    let shutdown = CancellationToken::new();
    let signalled = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signalled.cancel();
    });

    let started = SidecarRuntime::builder()
        .config(config)
        .status_store(cluster.clone())
        .secret_store(cluster)
        .shutdown_token(shutdown.clone())
        .build()?
        .start()
        .await;
    let sidecar = match started {
        Ok(sidecar) => sidecar,
        Err(_) if shutdown.is_cancelled() => {
            info!("Startup abandoned on shutdown");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    // Wait for a shutdown signal or a fatal task failure
    let failure = tokio::select! {
        _ = shutdown.cancelled() => None,
        reason = sidecar.failed() => Some(reason),
    };

    sidecar.shutdown().await?;
    info!("Dataflow Sidecar shut down");

    match failure {
        Some(reason) => Err(anyhow::anyhow!("fatal: {}", reason)),
        None => Ok(()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
