// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Source adapters.
//!
//! Each declared source gets its own task that turns external events into
//! messages for the user container. HTTP sources have no task; they are
//! served by the sidecar's listener under `/sources/{name}`.
//!
//! All sources deliver through [`deliver`]: the message is counted first,
//! then handed to the user container, and a failed hand-off is counted as an
//! error. Nothing is retried.

pub mod cron;
pub mod kafka;
pub mod nats;

use std::sync::Arc;

use dataflow_api::{SourceKind, printable};
use tracing::{debug, error, info};

use crate::bridge::ToMain;
use crate::context::SidecarContext;
use crate::error::Result;

/// Record `data` as received by `source` and deliver it to the user container.
///
/// Returns whether delivery succeeded.
pub async fn deliver(ctx: &SidecarContext, to_main: &ToMain, source: &str, data: &[u8]) -> bool {
    debug!(source = %source, m = %printable(data), "delivering to main");
    ctx.status.record_source_message(source, data);
    match to_main.send(data).await {
        Ok(()) => true,
        Err(e) => {
            error!(source = %source, error = %e, "failed to deliver message to main");
            ctx.status.record_source_error(source, &e);
            false
        }
    }
}

/// Connect every declared source, in declaration order.
pub async fn connect_sources(ctx: &Arc<SidecarContext>, to_main: Arc<ToMain>) -> Result<()> {
    for (index, source) in ctx.spec.sources.iter().enumerate() {
        match &source.kind {
            SourceKind::Cron(c) => cron::connect(ctx, &source.name, c, to_main.clone())?,
            SourceKind::Nats(n) => {
                nats::connect(ctx, &source.name, index, n, to_main.clone()).await?
            }
            SourceKind::Kafka(k) => kafka::connect(ctx, &source.name, k, to_main.clone()).await?,
            SourceKind::Http => {
                let path = format!("/sources/{}", source.name);
                info!(source = %source.name, path = %path, "HTTP source configured")
            }
        }
    }
    Ok(())
}
