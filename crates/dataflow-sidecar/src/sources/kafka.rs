// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kafka source.
//!
//! Replicas join the consumer group `<pipeline>-<step>`. A group with no
//! committed offsets starts from the newest messages. A poller compares the
//! newest offset across partitions with the last consumed offset and reports
//! the difference as the source's pending count.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use dataflow_api::Kafka;
use rdkafka::Message;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use tracing::{debug, error, info, warn};

use crate::bridge::ToMain;
use crate::clients::{KAFKA_METADATA_TIMEOUT, kafka_config};
use crate::context::SidecarContext;
use crate::error::{Error, Result};

/// Backlog given the newest offset and the last consumed one.
///
/// `None` until a message has been consumed, since a zero offset means
/// nothing has been observed yet.
pub fn pending_depth(newest: i64, last_consumed: i64) -> Option<u64> {
    if last_consumed <= 0 {
        return None;
    }
    Some((newest - last_consumed).max(0) as u64)
}

/// Join the consumer group and start consuming.
///
/// Fails if the brokers cannot be reached.
pub async fn connect(
    ctx: &Arc<SidecarContext>,
    name: &str,
    kafka: &Kafka,
    to_main: Arc<ToMain>,
) -> Result<()> {
    info!(
        source = %name,
        brokers = ?kafka.brokers,
        topic = %kafka.topic,
        group = %ctx.group_name(),
        "connecting Kafka source"
    );
    let mut config = kafka_config(kafka)?;
    config
        .set("group.id", ctx.group_name())
        .set("auto.offset.reset", "latest")
        .set("enable.auto.commit", "true");
    let consumer: Arc<StreamConsumer> = Arc::new(config.create()?);

    let probe = consumer.clone();
    let topic = kafka.topic.clone();
    tokio::task::spawn_blocking(move || {
        probe
            .fetch_metadata(Some(topic.as_str()), KAFKA_METADATA_TIMEOUT)
            .map(|_| ())
    })
    .await
    .map_err(|e| Error::Other(format!("Kafka metadata probe failed: {}", e)))??;

    consumer.subscribe(&[kafka.topic.as_str()])?;
    let closing = consumer.clone();
    ctx.lifecycle.push(format!("Kafka source {}", name), async move {
        closing.unsubscribe();
        Ok(())
    });

    let offset = Arc::new(AtomicI64::new(0));
    ctx.lifecycle.spawn(
        format!("kafka-source-{}", name),
        consume(
            ctx.clone(),
            name.to_string(),
            consumer.clone(),
            offset.clone(),
            to_main,
        ),
    );
    ctx.lifecycle.spawn(
        format!("kafka-source-pending-{}", name),
        poll_pending(
            ctx.clone(),
            name.to_string(),
            consumer,
            kafka.topic.clone(),
            offset,
        ),
    );
    Ok(())
}

async fn consume(
    ctx: Arc<SidecarContext>,
    name: String,
    consumer: Arc<StreamConsumer>,
    offset: Arc<AtomicI64>,
    to_main: Arc<ToMain>,
) -> Result<()> {
    loop {
        let received = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Ok(()),
            received = consumer.recv() => received,
        };
        let (payload, consumed) = match received {
            Ok(message) => (
                message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                message.offset(),
            ),
            Err(e) => {
                error!(source = %name, error = %e, "failed to receive Kafka message");
                continue;
            }
        };
        super::deliver(&ctx, &to_main, &name, &payload).await;
        offset.store(consumed, Ordering::Relaxed);
    }
}

fn newest_offset(consumer: &StreamConsumer, topic: &str) -> KafkaResult<i64> {
    let metadata = consumer.fetch_metadata(Some(topic), KAFKA_METADATA_TIMEOUT)?;
    let mut newest = 0;
    for partition in metadata.topics().iter().flat_map(|t| t.partitions()) {
        match consumer.fetch_watermarks(topic, partition.id(), KAFKA_METADATA_TIMEOUT) {
            Ok((_, high)) => newest = newest.max(high),
            Err(e) => {
                let partition = partition.id();
                warn!(topic = %topic, partition, error = %e, "failed to get offset")
            }
        }
    }
    Ok(newest)
}

async fn poll_pending(
    ctx: Arc<SidecarContext>,
    name: String,
    consumer: Arc<StreamConsumer>,
    topic: String,
    offset: Arc<AtomicI64>,
) -> Result<()> {
    loop {
        let probe = consumer.clone();
        let probe_topic = topic.clone();
        match tokio::task::spawn_blocking(move || newest_offset(&probe, &probe_topic)).await {
            Ok(Ok(newest)) => {
                if let Some(pending) = pending_depth(newest, offset.load(Ordering::Relaxed)) {
                    debug!(source = %name, topic = %topic, pending, "Kafka source pending");
                    ctx.status.set_source_pending(&name, pending);
                }
            }
            Ok(Err(e)) => {
                error!(source = %name, topic = %topic, error = %e, "failed to get offsets")
            }
            Err(e) => error!(source = %name, error = %e, "offset poll task failed"),
        }
        if !ctx.sleep(ctx.update_interval).await {
            return Ok(());
        }
    }
}
