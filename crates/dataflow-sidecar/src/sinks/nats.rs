// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! NATS JetStream sink. Each sink has its own connection, flushed at
//! shutdown.

use std::sync::Arc;

use async_nats::jetstream;
use async_trait::async_trait;
use bytes::Bytes;
use dataflow_api::Nats;
use tracing::info;

use super::{Sink, SinkError};
use crate::clients::connect_nats;
use crate::context::SidecarContext;
use crate::error::{Error, Result};

/// Publishes to a JetStream subject and waits for the server's ack.
pub struct NatsSink {
    jetstream: jetstream::Context,
    subject: String,
}

impl NatsSink {
    /// Connect the `index`-th sink of the step.
    pub async fn connect(
        ctx: &Arc<SidecarContext>,
        name: &str,
        index: usize,
        nats: &Nats,
    ) -> Result<Self> {
        let client_name = ctx.client_name("sink", index);
        info!(
            sink = %name,
            url = %nats.nats_url,
            cluster_id = %nats.cluster_id,
            client = %client_name,
            subject = %nats.subject,
            "connecting NATS sink"
        );
        let client = connect_nats(&nats.nats_url, &client_name).await?;
        let closing = client.clone();
        ctx.lifecycle.push(format!("NATS sink {}", name), async move {
            closing
                .flush()
                .await
                .map_err(|e| Error::nats("failed to flush NATS connection", e))
        });

        Ok(Self {
            jetstream: jetstream::new(client),
            subject: nats.subject.clone(),
        })
    }
}

#[async_trait]
impl Sink for NatsSink {
    fn sink_type(&self) -> &'static str {
        "nats"
    }

    async fn send(&self, message: &[u8]) -> std::result::Result<(), SinkError> {
        let ack = self
            .jetstream
            .publish(self.subject.clone(), Bytes::copy_from_slice(message))
            .await
            .map_err(|e| SinkError::Nats(e.to_string()))?;
        ack.await.map_err(|e| SinkError::Nats(e.to_string()))?;
        Ok(())
    }
}
