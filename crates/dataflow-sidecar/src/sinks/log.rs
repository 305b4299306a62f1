// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Log sink: writes every message to the sidecar's own log.

use async_trait::async_trait;
use tracing::info;

use super::{Sink, SinkError};

/// Writes each message to the sidecar's log.
pub struct LogSink {
    name: String,
}

impl LogSink {
    /// Log sink called `name`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Sink for LogSink {
    fn sink_type(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &[u8]) -> Result<(), SinkError> {
        info!(sink = %self.name, message = %String::from_utf8_lossy(message), "log sink");
        Ok(())
    }
}
