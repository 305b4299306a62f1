// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sinks and the fan-out that feeds them.
//!
//! Every message the user container produces goes to every declared sink,
//! one after another in declaration order. The sink's status is updated
//! before the send. The first failing sink ends the fan-out for that
//! message; later sinks never see it.

mod kafka;
mod log;
mod nats;

pub use kafka::KafkaSink;
pub use self::log::LogSink;
pub use nats::NatsSink;

use std::sync::Arc;

use async_trait::async_trait;
use dataflow_api::{SinkKind, printable};
use thiserror::Error;
use tracing::{debug, info};

use crate::context::SidecarContext;
use crate::error::Result;
use crate::status::StatusTable;

/// Failure of a single sink send.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SinkError {
    /// NATS publish or acknowledgement failed.
    #[error("NATS publish failed: {0}")]
    Nats(String),

    /// Kafka produce failed.
    #[error("Kafka produce failed: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Fan-out stopped at a failing sink.
#[derive(Debug, Error)]
#[error("failed to send message to sink {sink:?}: {source}")]
pub struct FanOutError {
    /// Name of the failing sink.
    pub sink: String,
    /// Underlying failure.
    #[source]
    pub source: SinkError,
}

/// An output of the step.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Technology name for logs.
    fn sink_type(&self) -> &'static str;

    /// Send one message, returning once the sink has accepted it.
    async fn send(&self, message: &[u8]) -> std::result::Result<(), SinkError>;
}

/// Ordered list of sinks sharing one status table.
pub struct FanOut {
    status: Arc<StatusTable>,
    sinks: Vec<(String, Box<dyn Sink>)>,
}

impl FanOut {
    /// Empty fan-out recording into `status`.
    pub fn new(status: Arc<StatusTable>) -> Self {
        Self {
            status,
            sinks: Vec::new(),
        }
    }

    /// Append a sink. Sinks receive messages in the order they were added.
    pub fn push(&mut self, name: impl Into<String>, sink: Box<dyn Sink>) {
        self.sinks.push((name.into(), sink));
    }

    /// Whether there are no sinks.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Send `message` to each sink in order, stopping at the first failure.
    pub async fn send(&self, message: &[u8]) -> std::result::Result<(), FanOutError> {
        for (name, sink) in &self.sinks {
            self.status.record_sink_message(name, message);
            debug!(
                sink = %name,
                sink_type = sink.sink_type(),
                m = %printable(message),
                "sending to sink"
            );
            sink.send(message).await.map_err(|source| FanOutError {
                sink: name.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Connect every declared sink, in declaration order.
pub async fn connect_sinks(ctx: &Arc<SidecarContext>) -> Result<FanOut> {
    let mut fan_out = FanOut::new(ctx.status.clone());
    for (index, sink) in ctx.spec.sinks.iter().enumerate() {
        info!(sink = %sink.name, sink_type = sink.kind.type_name(), "connecting sink");
        let connected: Box<dyn Sink> = match &sink.kind {
            SinkKind::Nats(nats) => {
                Box::new(NatsSink::connect(ctx, &sink.name, index, nats).await?)
            }
            SinkKind::Kafka(kafka) => Box::new(KafkaSink::connect(ctx, &sink.name, kafka).await?),
            SinkKind::Log => Box::new(LogSink::new(&sink.name)),
        };
        fan_out.push(sink.name.clone(), connected);
    }
    Ok(fan_out)
}
