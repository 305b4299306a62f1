// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Step status.
//!
//! Every replica of a step merge-patches the same status object, so counters
//! are kept per replica under `metrics.<replica>` and summed when read. The
//! `replicas` and `lastScaledAt` fields belong to whoever enacts scaling
//! decisions; sidecars never write them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observed state of a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStatus {
    /// Per-source status keyed by source name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_statuses: BTreeMap<String, SourceStatus>,
    /// Per-sink status keyed by sink name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sink_statuses: BTreeMap<String, SinkStatus>,
    /// Replicas currently running.
    #[serde(default)]
    pub replicas: u32,
    /// When `replicas` last changed. `None` if never scaled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scaled_at: Option<DateTime<Utc>>,
}

impl StepStatus {
    /// Messages received by all sources across all replicas.
    pub fn total_source_messages(&self) -> u64 {
        self.source_statuses.values().map(SourceStatus::total).sum()
    }

    /// Delivery errors across all sources and replicas.
    pub fn total_source_errors(&self) -> u64 {
        self.source_statuses.values().map(SourceStatus::errors).sum()
    }

    /// Backlog across all sources.
    pub fn source_pending(&self) -> u64 {
        self.source_statuses.values().map(|s| s.pending).sum()
    }

    /// Messages handed to all sinks across all replicas.
    pub fn total_sunk_messages(&self) -> u64 {
        self.sink_statuses.values().map(SinkStatus::total).sum()
    }
}

/// A message sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Printable, size-bounded sample of the payload.
    pub data: String,
    /// When the message was seen.
    pub time: DateTime<Utc>,
}

/// An error sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageError {
    /// Error text.
    pub message: String,
    /// When the error happened.
    pub time: DateTime<Utc>,
}

/// Counters of one replica.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    /// Messages seen.
    #[serde(default)]
    pub total: u64,
    /// Messages that could not be delivered.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub errors: u64,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// Status of one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    /// Last message received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    /// Last delivery error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<MessageError>,
    /// Messages waiting at the source, as last polled.
    #[serde(default)]
    pub pending: u64,
    /// Counters keyed by replica index.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, Metrics>,
}

impl SourceStatus {
    /// Record a received message for `replica`.
    pub fn record_message(&mut self, replica: u32, data: String, time: DateTime<Utc>) {
        self.last_message = Some(Message { data, time });
        self.metrics.entry(replica.to_string()).or_default().total += 1;
    }

    /// Record a delivery error for `replica`.
    pub fn record_error(&mut self, replica: u32, message: String, time: DateTime<Utc>) {
        self.last_error = Some(MessageError { message, time });
        self.metrics.entry(replica.to_string()).or_default().errors += 1;
    }

    /// Messages received across replicas.
    pub fn total(&self) -> u64 {
        self.metrics.values().map(|m| m.total).sum()
    }

    /// Delivery errors across replicas.
    pub fn errors(&self) -> u64 {
        self.metrics.values().map(|m| m.errors).sum()
    }
}

/// Status of one sink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkStatus {
    /// Last message sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    /// Messages not yet acknowledged by the sink, as last polled.
    #[serde(default)]
    pub pending: u64,
    /// Counters keyed by replica index.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, Metrics>,
}

impl SinkStatus {
    /// Record a message handed to the sink by `replica`.
    pub fn record_message(&mut self, replica: u32, data: String, time: DateTime<Utc>) {
        self.last_message = Some(Message { data, time });
        self.metrics.entry(replica.to_string()).or_default().total += 1;
    }

    /// Messages handed to the sink across replicas.
    pub fn total(&self) -> u64 {
        self.metrics.values().map(|m| m.total).sum()
    }
}
