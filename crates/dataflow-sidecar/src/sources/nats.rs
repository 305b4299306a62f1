// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! NATS JetStream source.
//!
//! All replicas of a step bind to one durable pull consumer named
//! `<pipeline>-<step>`, so the stream's messages are split between them.
//! New consumers start from the beginning of the stream. Each message is
//! acknowledged after the delivery attempt, whatever its outcome.

use std::sync::Arc;

use async_nats::jetstream::{self, consumer};
use dataflow_api::Nats;
use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::bridge::ToMain;
use crate::clients::connect_nats;
use crate::context::SidecarContext;
use crate::error::{Error, Result};

/// Connect the `index`-th source of the step and start consuming.
pub async fn connect(
    ctx: &Arc<SidecarContext>,
    name: &str,
    index: usize,
    nats: &Nats,
    to_main: Arc<ToMain>,
) -> Result<()> {
    let client_name = ctx.client_name("source", index);
    info!(
        source = %name,
        url = %nats.nats_url,
        cluster_id = %nats.cluster_id,
        client = %client_name,
        subject = %nats.subject,
        "connecting NATS source"
    );
    let client = connect_nats(&nats.nats_url, &client_name).await?;
    let closing = client.clone();
    ctx.lifecycle.push(format!("NATS source {}", name), async move {
        closing
            .flush()
            .await
            .map_err(|e| Error::nats("failed to flush NATS connection", e))
    });

    let context = jetstream::new(client);
    let stream_name = context
        .stream_by_subject(nats.subject.clone())
        .await
        .map_err(|e| Error::nats(&format!("no stream for subject {}", nats.subject), e))?;
    let stream = context
        .get_stream(&stream_name)
        .await
        .map_err(|e| Error::nats(&format!("failed to get stream {}", stream_name), e))?;

    let durable = ctx.group_name();
    let consumer: consumer::PullConsumer = stream
        .get_or_create_consumer(
            &durable,
            consumer::pull::Config {
                durable_name: Some(durable.clone()),
                deliver_policy: consumer::DeliverPolicy::All,
                ack_policy: consumer::AckPolicy::Explicit,
                filter_subject: nats.subject.clone(),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| Error::nats(&format!("failed to bind consumer {}", durable), e))?;
    let messages = consumer
        .messages()
        .await
        .map_err(|e| Error::nats("failed to start message stream", e))?;

    ctx.lifecycle.spawn(
        format!("nats-source-{}", name),
        consume(ctx.clone(), name.to_string(), messages, to_main),
    );
    ctx.lifecycle.spawn(
        format!("nats-source-pending-{}", name),
        poll_pending(ctx.clone(), name.to_string(), consumer),
    );
    Ok(())
}

async fn consume(
    ctx: Arc<SidecarContext>,
    name: String,
    mut messages: consumer::pull::Stream,
    to_main: Arc<ToMain>,
) -> Result<()> {
    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Ok(()),
            next = messages.next() => next,
        };
        match next {
            None => {
                warn!(source = %name, "NATS message stream ended");
                return Ok(());
            }
            Some(Err(e)) => warn!(source = %name, error = %e, "failed to receive NATS message"),
            Some(Ok(message)) => {
                super::deliver(&ctx, &to_main, &name, &message.payload).await;
                if let Err(e) = message.ack().await {
                    warn!(source = %name, error = %e, "failed to ack NATS message");
                }
            }
        }
    }
}

async fn poll_pending(
    ctx: Arc<SidecarContext>,
    name: String,
    mut consumer: consumer::PullConsumer,
) -> Result<()> {
    loop {
        match consumer.info().await {
            Ok(info) => {
                let pending = info.num_pending;
                debug!(source = %name, pending, "NATS source pending");
                ctx.status.set_source_pending(&name, pending);
            }
            Err(e) => error!(source = %name, error = %e, "failed to get NATS consumer info"),
        }
        if !ctx.sleep(ctx.update_interval).await {
            return Ok(());
        }
    }
}
