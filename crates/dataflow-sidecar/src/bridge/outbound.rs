// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Messages from the user container through the output FIFO.

use std::path::Path;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::sinks::FanOut;

/// Strip the record terminator, including a carriage return before it.
fn trim_record(mut line: &[u8]) -> &[u8] {
    if let Some(rest) = line.strip_suffix(b"\n") {
        line = rest;
    }
    if let Some(rest) = line.strip_suffix(b"\r") {
        line = rest;
    }
    line
}

/// Read newline-delimited records from `path` and fan each one out.
///
/// Opening blocks until the user container opens the write end. A failed
/// fan-out is logged and the next record is read. A read error ends the
/// reader with an error; end of stream or cancellation ends it cleanly.
pub async fn read_fifo(
    path: &Path,
    fan_out: Arc<FanOut>,
    cancel: CancellationToken,
) -> Result<()> {
    info!(path = %path.display(), "opening output FIFO");
    let file = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        file = File::open(path) => file.map_err(|e| {
            Error::Other(format!("failed to open output FIFO {}: {}", path.display(), e))
        })?,
    };
    info!(path = %path.display(), "opened output FIFO");

    let mut reader = BufReader::new(file);
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = reader.read_until(b'\n', &mut line) => read,
        };
        let read = read.map_err(|e| {
            Error::Other(format!("failed to read output FIFO {}: {}", path.display(), e))
        })?;
        if read == 0 {
            info!(path = %path.display(), "output FIFO closed by main");
            return Ok(());
        }

        let record = trim_record(&line);
        debug!(bytes = record.len(), "message from main via FIFO");
        if let Err(e) = fan_out.send(record).await {
            warn!(error = %e, "failed to send message from main to sinks");
        }
    }
}
