// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kafka sink.
//!
//! The producer is flushed at shutdown. Messages not yet delivered are
//! reported as the sink's pending count.

use std::sync::Arc;

use async_trait::async_trait;
use dataflow_api::Kafka;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::{error, info};

use super::{Sink, SinkError};
use crate::clients::{KAFKA_METADATA_TIMEOUT, kafka_config};
use crate::context::SidecarContext;
use crate::error::{Error, Result};

/// Produces to a Kafka topic and waits for delivery.
pub struct KafkaSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaSink {
    /// Connect a sink, failing if the brokers cannot be reached.
    ///
    /// Also starts a poller that reports messages still awaiting delivery
    /// as the sink's pending count.
    pub async fn connect(ctx: &Arc<SidecarContext>, name: &str, kafka: &Kafka) -> Result<Self> {
        info!(
            sink = %name,
            brokers = ?kafka.brokers,
            topic = %kafka.topic,
            version = %kafka.version,
            "connecting Kafka sink"
        );
        let producer: FutureProducer = kafka_config(kafka)?.create()?;

        let probe = producer.clone();
        let topic = kafka.topic.clone();
        tokio::task::spawn_blocking(move || {
            probe
                .client()
                .fetch_metadata(Some(topic.as_str()), KAFKA_METADATA_TIMEOUT)
                .map(|_| ())
        })
        .await
        .map_err(|e| Error::Other(format!("Kafka metadata probe failed: {}", e)))??;

        let flushing = producer.clone();
        ctx.lifecycle.push(format!("Kafka sink {}", name), async move {
            tokio::task::spawn_blocking(move || flushing.flush(KAFKA_METADATA_TIMEOUT))
                .await
                .map_err(|e| Error::Other(format!("Kafka flush failed: {}", e)))??;
            Ok(())
        });

        ctx.lifecycle.spawn(
            format!("kafka-sink-pending-{}", name),
            poll_pending(ctx.clone(), name.to_string(), producer.clone()),
        );

        Ok(Self {
            producer,
            topic: kafka.topic.clone(),
        })
    }
}

async fn poll_pending(
    ctx: Arc<SidecarContext>,
    name: String,
    producer: FutureProducer,
) -> Result<()> {
    loop {
        let in_flight = producer.in_flight_count();
        if in_flight >= 0 {
            ctx.status.set_sink_pending(&name, in_flight as u64);
        } else {
            error!(sink = %name, in_flight, "invalid in-flight count");
        }
        if !ctx.sleep(ctx.update_interval).await {
            return Ok(());
        }
    }
}

#[async_trait]
impl Sink for KafkaSink {
    fn sink_type(&self) -> &'static str {
        "kafka"
    }

    async fn send(&self, message: &[u8]) -> std::result::Result<(), SinkError> {
        let record = FutureRecord::<(), [u8]>::to(&self.topic).payload(message);
        self.producer
            .send(record, Timeout::Never)
            .await
            .map(|_| ())
            .map_err(|(e, _)| SinkError::Kafka(e))
    }
}
