// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The sidecar's HTTP listener.
//!
//! - `POST /messages`: a message from the user container, fanned out to sinks
//! - `POST /sources/{name}`: a message for HTTP source `name`, delivered to
//!   the user container
//! - `GET /ready`: liveness of the sidecar itself

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use dataflow_api::SourceKind;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use super::ToMain;
use crate::context::SidecarContext;
use crate::error::Result;
use crate::sinks::FanOut;
use crate::sources;

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct ServerState {
    ctx: Arc<SidecarContext>,
    fan_out: Arc<FanOut>,
    to_main: Arc<OnceLock<Arc<ToMain>>>,
    http_sources: Arc<HashSet<String>>,
}

impl ServerState {
    /// State for `ctx`. HTTP sources answer 503 until `to_main` is set.
    pub fn new(
        ctx: Arc<SidecarContext>,
        fan_out: Arc<FanOut>,
        to_main: Arc<OnceLock<Arc<ToMain>>>,
    ) -> Self {
        let http_sources = ctx
            .spec
            .sources
            .iter()
            .filter(|s| matches!(s.kind, SourceKind::Http))
            .map(|s| s.name.clone())
            .collect();
        Self {
            ctx,
            fan_out,
            to_main,
            http_sources: Arc::new(http_sources),
        }
    }
}

/// Router serving the sidecar's endpoints.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/ready", get(ready))
        .route("/messages", post(receive_message))
        .route("/sources/{name}", post(receive_source_message))
        .with_state(state)
}

async fn ready() -> StatusCode {
    StatusCode::OK
}

async fn receive_message(State(state): State<ServerState>, body: Bytes) -> StatusCode {
    match state.fan_out.send(&body).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!(error = %e, "failed to send message from main to sinks");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn receive_source_message(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    body: Bytes,
) -> StatusCode {
    if !state.http_sources.contains(&name) {
        warn!(source = %name, "message for unknown HTTP source");
        return StatusCode::NOT_FOUND;
    }
    let Some(to_main) = state.to_main.get() else {
        return StatusCode::SERVICE_UNAVAILABLE;
    };
    if sources::deliver(&state.ctx, to_main, &name, &body).await {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Serve `router` on `listener` until `ctx` is cancelled.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    ctx: Arc<SidecarContext>,
) -> Result<()> {
    info!(addr = ?listener.local_addr().ok(), "HTTP server listening");
    let cancel = ctx.cancel.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("HTTP server stopped");
    Ok(())
}
