// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for dataflow-sidecar.
//!
//! [`SidecarRuntime`] wires a step together: it enriches the step spec from
//! secrets, connects sinks, starts the out side of the bridge, opens the in
//! side, connects sources and starts the status publisher.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dataflow_sidecar::{Config, SidecarRuntime, store::ClusterClient};
//!
//! let cluster = Arc::new(ClusterClient::in_cluster()?);
//! let runtime = SidecarRuntime::builder()
//!     .config(Config::from_env()?)
//!     .status_store(cluster.clone())
//!     .secret_store(cluster)
//!     .build()?
//!     .start()
//!     .await?;
//!
//! // ... wait for a signal or runtime.failed() ...
//!
//! runtime.shutdown().await?;
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::bridge::{self, ToMain};
use crate::config::Config;
use crate::context::SidecarContext;
use crate::enrich::enrich_spec;
use crate::error::Error;
use crate::publisher::{StatusPublisher, publish_final};
use crate::sinks::connect_sinks;
use crate::sources::connect_sources;
use crate::store::{SecretStore, StatusStore};

/// Default time tasks get to stop after cancellation.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Builder for [`SidecarRuntime`].
pub struct SidecarRuntimeBuilder {
    config: Option<Config>,
    status_store: Option<Arc<dyn StatusStore>>,
    secret_store: Option<Arc<dyn SecretStore>>,
    shutdown_grace: Duration,
    shutdown: CancellationToken,
}

impl Default for SidecarRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SidecarRuntimeBuilder {
    /// Create a builder with defaults.
    pub fn new() -> Self {
        Self {
            config: None,
            status_store: None,
            secret_store: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            shutdown: CancellationToken::new(),
        }
    }

    /// Set the configuration (required).
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set where step status is written (required).
    pub fn status_store(mut self, store: Arc<dyn StatusStore>) -> Self {
        self.status_store = Some(store);
        self
    }

    /// Set where connection secrets are read (required).
    pub fn secret_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.secret_store = Some(store);
        self
    }

    /// Set how long tasks get to stop during shutdown.
    ///
    /// Default: 5 seconds
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set a token that abandons startup when cancelled.
    ///
    /// Whatever was acquired before the cancellation is released, and
    /// [`start`](SidecarRuntimeConfig::start) returns an error.
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<SidecarRuntimeConfig> {
        let config = self
            .config
            .ok_or_else(|| anyhow::anyhow!("config is required"))?;
        let status_store = self
            .status_store
            .ok_or_else(|| anyhow::anyhow!("status_store is required"))?;
        let secret_store = self
            .secret_store
            .ok_or_else(|| anyhow::anyhow!("secret_store is required"))?;
        Ok(SidecarRuntimeConfig {
            config,
            status_store,
            secret_store,
            shutdown_grace: self.shutdown_grace,
            shutdown: self.shutdown,
        })
    }
}

/// Configuration for a [`SidecarRuntime`].
pub struct SidecarRuntimeConfig {
    config: Config,
    status_store: Arc<dyn StatusStore>,
    secret_store: Arc<dyn SecretStore>,
    shutdown_grace: Duration,
    shutdown: CancellationToken,
}

impl SidecarRuntimeConfig {
    /// Connect everything and start the background tasks.
    ///
    /// Startup is abandoned when a fatal task fails while it is still in
    /// progress, or when the shutdown token is cancelled. On any failure,
    /// tasks are stopped, status is published one last time and whatever
    /// was already acquired is released before the error is returned.
    pub async fn start(self) -> Result<SidecarRuntime> {
        let config = self.config;
        let mut spec = config.step_spec.clone();
        enrich_spec(
            &mut spec,
            self.secret_store.as_ref(),
            &config.namespace,
            &config.pipeline_name,
        )
        .await?;

        let ctx = Arc::new(SidecarContext::new(
            config.pipeline_name.clone(),
            config.namespace.clone(),
            config.replica,
            spec,
            config.update_interval,
        ));
        info!(
            pipeline = %ctx.pipeline_name,
            step = %ctx.spec.name,
            namespace = %ctx.namespace,
            replica = ctx.replica,
            sources = ctx.spec.sources.len(),
            sinks = ctx.spec.sinks.len(),
            update_interval = ?ctx.update_interval,
            "starting sidecar"
        );

        let connected = tokio::select! {
            result = connect(&ctx, &config, self.status_store.clone()) => result,
            reason = ctx.lifecycle.failed() => Err(Error::Other(reason)),
            _ = self.shutdown.cancelled() => Err(Error::Cancelled),
        };
        match connected {
            Ok(listen_addr) => {
                info!(addr = %listen_addr, "sidecar ready");
                Ok(SidecarRuntime {
                    ctx,
                    status_store: self.status_store,
                    shutdown_grace: self.shutdown_grace,
                    listen_addr,
                })
            }
            Err(e) => {
                error!(error = %e, "sidecar failed to start");
                ctx.cancel.cancel();
                publish_final(self.status_store.as_ref(), &ctx.step_ref(), &ctx.status).await;
                ctx.lifecycle.join(self.shutdown_grace).await;
                ctx.lifecycle.close().await;
                Err(e.into())
            }
        }
    }
}

async fn connect(
    ctx: &Arc<SidecarContext>,
    config: &Config,
    status_store: Arc<dyn StatusStore>,
) -> crate::error::Result<SocketAddr> {
    let fan_out = Arc::new(connect_sinks(ctx).await?);

    let to_main_cell = Arc::new(OnceLock::new());
    let listen_addr = bridge::connect_out(
        ctx,
        &config.fifo_out,
        config.listen_addr,
        fan_out,
        to_main_cell.clone(),
    )
    .await?;

    let to_main = Arc::new(
        ToMain::connect(
            ctx,
            &config.fifo_in,
            &config.main_url,
            config.ready_poll_interval,
        )
        .await?,
    );
    let _ = to_main_cell.set(to_main.clone());

    connect_sources(ctx, to_main).await?;

    let publisher = StatusPublisher::new(status_store, ctx.step_ref(), ctx.status.clone());
    ctx.lifecycle
        .spawn("status-publisher", publisher.run(ctx.clone()));
    Ok(listen_addr)
}

/// A running sidecar.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct SidecarRuntime {
    ctx: Arc<SidecarContext>,
    status_store: Arc<dyn StatusStore>,
    shutdown_grace: Duration,
    listen_addr: SocketAddr,
}

impl SidecarRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> SidecarRuntimeBuilder {
        SidecarRuntimeBuilder::new()
    }

    /// Address the HTTP listener is bound to.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Shared context of the running sidecar.
    pub fn context(&self) -> &Arc<SidecarContext> {
        &self.ctx
    }

    /// Resolves with the reason once a fatal task has failed.
    pub async fn failed(&self) -> String {
        self.ctx.lifecycle.failed().await
    }

    /// Check if no fatal task has failed.
    pub fn is_running(&self) -> bool {
        self.ctx.lifecycle.failure().is_none() && !self.ctx.cancel.is_cancelled()
    }

    /// Gracefully shut down.
    ///
    /// Cancels every task, publishes status one final time, waits up to the
    /// shutdown grace for tasks to stop, then releases connections newest
    /// first.
    pub async fn shutdown(self) -> Result<()> {
        info!("sidecar shutting down");
        self.ctx.cancel.cancel();
        publish_final(
            self.status_store.as_ref(),
            &self.ctx.step_ref(),
            &self.ctx.status,
        )
        .await;
        self.ctx.lifecycle.join(self.shutdown_grace).await;
        self.ctx.lifecycle.close().await;
        info!("sidecar shutdown complete");
        Ok(())
    }
}
