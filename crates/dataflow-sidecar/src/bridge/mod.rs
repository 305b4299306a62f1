// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bridge between the sidecar and the user container.
//!
//! ```text
//!  sources ──► ToMain ──(in FIFO | POST main/messages)──► user container
//!  user container ──(out FIFO | POST sidecar/messages)──► FanOut ──► sinks
//! ```
//!
//! The out side is started before the in side: a user container may block
//! opening its output before it opens its input.

mod inbound;
mod outbound;
mod server;

pub use inbound::{DeliveryError, ToMain, wait_until_ready};
pub use outbound::read_fifo;
pub use server::{ServerState, router, serve};

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use tokio::net::TcpListener;

use crate::context::SidecarContext;
use crate::error::{Error, Result};
use crate::sinks::FanOut;

/// Start the out side: the output FIFO reader and the HTTP listener.
///
/// Both run as fatal tasks, so an output FIFO that cannot be opened or read
/// shuts the sidecar down. Binding the listener happens here, so a port
/// already in use fails startup.
pub async fn connect_out(
    ctx: &Arc<SidecarContext>,
    fifo_out: &Path,
    listen_addr: SocketAddr,
    fan_out: Arc<FanOut>,
    to_main: Arc<OnceLock<Arc<ToMain>>>,
) -> Result<SocketAddr> {
    let path = fifo_out.to_path_buf();
    let reader_fan_out = fan_out.clone();
    let cancel = ctx.cancel.clone();
    ctx.lifecycle.spawn_fatal("output-fifo", async move {
        read_fifo(&path, reader_fan_out, cancel).await
    });

    let listener = TcpListener::bind(listen_addr)
        .await
        .map_err(|e| Error::Other(format!("failed to listen on {}: {}", listen_addr, e)))?;
    let local_addr = listener.local_addr()?;
    let app = router(ServerState::new(ctx.clone(), fan_out, to_main));
    ctx.lifecycle
        .spawn_fatal("http-server", serve(listener, app, ctx.clone()));
    Ok(local_addr)
}
