// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Periodic status publishing.
//!
//! Every update interval the publisher takes a snapshot of the status table
//! and, if it differs from the last snapshot successfully written, merge
//! patches the step's `sourceStatuses` and `sinkStatuses`. Failed writes are
//! logged and retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::context::SidecarContext;
use crate::error::Result;
use crate::status::{StatusSnapshot, StatusTable};
use crate::store::{StatusStore, StepRef};

/// Upper bound on the last status write during shutdown.
pub const FINAL_PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Writes changed status snapshots to a [`StatusStore`].
pub struct StatusPublisher {
    store: Arc<dyn StatusStore>,
    step: StepRef,
    table: Arc<StatusTable>,
    last: Option<StatusSnapshot>,
}

impl StatusPublisher {
    /// Publisher for `table`, writing to `step` through `store`.
    pub fn new(store: Arc<dyn StatusStore>, step: StepRef, table: Arc<StatusTable>) -> Self {
        Self {
            store,
            step,
            table,
            last: None,
        }
    }

    /// Publish the current snapshot if it changed since the last successful
    /// write. Returns whether a write succeeded.
    pub async fn publish_if_changed(&mut self) -> bool {
        let snapshot = self.table.snapshot();
        if self.last.as_ref() == Some(&snapshot) {
            debug!(step = %self.step, "status unchanged");
            return false;
        }
        match publish(self.store.as_ref(), &self.step, &snapshot).await {
            Ok(()) => {
                self.last = Some(snapshot);
                true
            }
            Err(e) => {
                error!(step = %self.step, error = %e, "failed to patch step status");
                false
            }
        }
    }

    /// Publish every `interval` until `ctx` is cancelled.
    pub async fn run(mut self, ctx: Arc<SidecarContext>) -> Result<()> {
        info!(step = %self.step, interval = ?ctx.update_interval, "status publisher started");
        loop {
            self.publish_if_changed().await;
            if !ctx.sleep(ctx.update_interval).await {
                break;
            }
        }
        info!(step = %self.step, "status publisher stopped");
        Ok(())
    }
}

/// Write `snapshot` unconditionally.
pub async fn publish(
    store: &dyn StatusStore,
    step: &StepRef,
    snapshot: &StatusSnapshot,
) -> crate::store::Result<()> {
    debug!(step = %step, "patching step status");
    store.patch_status(step, &snapshot.to_patch()).await
}

/// Last write on shutdown, bounded by [`FINAL_PUBLISH_TIMEOUT`]. Failures are logged.
pub async fn publish_final(store: &dyn StatusStore, step: &StepRef, table: &StatusTable) {
    let snapshot = table.snapshot();
    match tokio::time::timeout(FINAL_PUBLISH_TIMEOUT, publish(store, step, &snapshot)).await {
        Ok(Ok(())) => info!(step = %step, "published final status"),
        Ok(Err(e)) => error!(step = %step, error = %e, "failed to publish final status"),
        Err(_) => error!(step = %step, "timed out publishing final status"),
    }
}
