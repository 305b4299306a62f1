// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory status of this replica.
//!
//! Sources, sinks and pollers write to a [`StatusTable`] concurrently. The
//! publisher reads consistent copies of it with [`StatusTable::snapshot`].
//! Entries exist for every declared source and sink from the start, so a
//! write to an undeclared name is dropped.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use dataflow_api::{SinkStatus, SourceStatus, StepSpec, printable};
use serde_json::{Value, json};
use tracing::warn;

/// Point-in-time copy of the status table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    /// Per-source status keyed by source name.
    pub sources: BTreeMap<String, SourceStatus>,
    /// Per-sink status keyed by sink name.
    pub sinks: BTreeMap<String, SinkStatus>,
}

impl StatusSnapshot {
    /// Merge patch writing only the source and sink statuses.
    pub fn to_patch(&self) -> Value {
        json!({
            "status": {
                "sourceStatuses": self.sources,
                "sinkStatuses": self.sinks,
            }
        })
    }
}

/// Thread-safe status of one replica.
#[derive(Debug)]
pub struct StatusTable {
    replica: u32,
    inner: Mutex<StatusSnapshot>,
}

impl StatusTable {
    /// Create a table with an empty entry per declared source and sink.
    pub fn new(spec: &StepSpec, replica: u32) -> Self {
        let sources = spec
            .sources
            .iter()
            .map(|s| (s.name.clone(), SourceStatus::default()))
            .collect();
        let sinks = spec
            .sinks
            .iter()
            .map(|s| (s.name.clone(), SinkStatus::default()))
            .collect();
        Self {
            replica,
            inner: Mutex::new(StatusSnapshot { sources, sinks }),
        }
    }

    /// Replica index counters are recorded under.
    pub fn replica(&self) -> u32 {
        self.replica
    }

    fn lock(&self) -> MutexGuard<'_, StatusSnapshot> {
        // A panicking writer leaves the table usable; every write is a single field update.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a message received by source `name`.
    pub fn record_source_message(&self, name: &str, data: &[u8]) {
        let sample = printable(data);
        let now = Utc::now();
        match self.lock().sources.get_mut(name) {
            Some(status) => status.record_message(self.replica, sample, now),
            None => warn!(source = name, "status update for undeclared source dropped"),
        }
    }

    /// Record a failure to deliver a message from source `name`.
    pub fn record_source_error(&self, name: &str, error: &dyn Display) {
        let message = error.to_string();
        let now = Utc::now();
        match self.lock().sources.get_mut(name) {
            Some(status) => status.record_error(self.replica, message, now),
            None => warn!(source = name, "status update for undeclared source dropped"),
        }
    }

    /// Set the backlog of source `name`.
    pub fn set_source_pending(&self, name: &str, pending: u64) {
        match self.lock().sources.get_mut(name) {
            Some(status) => status.pending = pending,
            None => warn!(source = name, "status update for undeclared source dropped"),
        }
    }

    /// Record a message handed to sink `name`.
    pub fn record_sink_message(&self, name: &str, data: &[u8]) {
        let sample = printable(data);
        let now = Utc::now();
        match self.lock().sinks.get_mut(name) {
            Some(status) => status.record_message(self.replica, sample, now),
            None => warn!(sink = name, "status update for undeclared sink dropped"),
        }
    }

    /// Set the number of messages sink `name` has not yet had acknowledged.
    pub fn set_sink_pending(&self, name: &str, pending: u64) {
        match self.lock().sinks.get_mut(name) {
            Some(status) => status.pending = pending,
            None => warn!(sink = name, "status update for undeclared sink dropped"),
        }
    }

    /// Consistent copy of the whole table.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow_api::printable::REDACTED;

    fn spec() -> StepSpec {
        StepSpec::from_json(
            r#"{
                "name": "main",
                "sources": [{"name": "tick", "cron": {"schedule": "@hourly"}}, {"name": "web", "http": {}}],
                "sinks": [{"name": "out", "log": {}}]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_prepopulated_entries() {
        let table = StatusTable::new(&spec(), 0);
        let snapshot = table.snapshot();
        assert_eq!(
            snapshot.sources.keys().collect::<Vec<_>>(),
            vec!["tick", "web"]
        );
        assert_eq!(snapshot.sinks.keys().collect::<Vec<_>>(), vec!["out"]);
        assert!(snapshot.sources["tick"].last_message.is_none());
    }

    #[test]
    fn test_source_writes() {
        let table = StatusTable::new(&spec(), 3);
        table.record_source_message("tick", b"hello");
        table.record_source_message("tick", &[0xff, 0x00]);
        table.record_source_error("web", &"connection refused");
        table.set_source_pending("tick", 7);

        let snapshot = table.snapshot();
        let tick = &snapshot.sources["tick"];
        assert_eq!(tick.total(), 2);
        assert_eq!(tick.metrics["3"].total, 2);
        assert_eq!(tick.last_message.as_ref().unwrap().data, REDACTED);
        assert_eq!(tick.pending, 7);

        let web = &snapshot.sources["web"];
        assert_eq!(web.errors(), 1);
        assert_eq!(web.last_error.as_ref().unwrap().message, "connection refused");
    }

    #[test]
    fn test_sink_writes() {
        let table = StatusTable::new(&spec(), 1);
        table.record_sink_message("out", b"bye");
        table.set_sink_pending("out", 2);

        let snapshot = table.snapshot();
        assert_eq!(snapshot.sinks["out"].total(), 1);
        assert_eq!(snapshot.sinks["out"].pending, 2);
        assert_eq!(
            snapshot.sinks["out"].last_message.as_ref().unwrap().data,
            "bye"
        );
    }

    #[test]
    fn test_undeclared_names_ignored() {
        let table = StatusTable::new(&spec(), 0);
        let before = table.snapshot();
        table.record_source_message("nope", b"x");
        table.record_source_error("nope", &"e");
        table.set_source_pending("nope", 1);
        table.record_sink_message("nope", b"x");
        table.set_sink_pending("nope", 1);
        assert_eq!(table.snapshot(), before);
    }

    #[test]
    fn test_patch_shape() {
        let table = StatusTable::new(&spec(), 0);
        table.set_sink_pending("out", 4);
        let patch = table.snapshot().to_patch();
        assert_eq!(patch["status"]["sinkStatuses"]["out"]["pending"], 4);
        assert!(patch["status"]["sourceStatuses"]["tick"].is_object());
        assert!(patch["status"].get("replicas").is_none());
        assert!(patch["status"].get("lastScaledAt").is_none());
    }
}
