// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared state of a running sidecar.

use std::sync::Arc;
use std::time::Duration;

use dataflow_api::StepSpec;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::Lifecycle;
use crate::status::StatusTable;
use crate::store::StepRef;

/// Everything sources, sinks and bridges share.
///
/// Handed around as `Arc<SidecarContext>`. Cancelling [`cancel`](Self::cancel)
/// asks every loop to stop at its next boundary.
pub struct SidecarContext {
    /// Pipeline name.
    pub pipeline_name: String,
    /// Pipeline namespace.
    pub namespace: String,
    /// Replica index of this process.
    pub replica: u32,
    /// Step spec after secret enrichment.
    pub spec: StepSpec,
    /// Period of status publishing and backlog polling.
    pub update_interval: Duration,
    /// Status of this replica.
    pub status: Arc<StatusTable>,
    /// Closers and supervised tasks.
    pub lifecycle: Lifecycle,
    /// Process-wide cancellation.
    pub cancel: CancellationToken,
}

impl SidecarContext {
    /// Create a context with a fresh status table for `spec`.
    pub fn new(
        pipeline_name: impl Into<String>,
        namespace: impl Into<String>,
        replica: u32,
        spec: StepSpec,
        update_interval: Duration,
    ) -> Self {
        let status = Arc::new(StatusTable::new(&spec, replica));
        Self {
            pipeline_name: pipeline_name.into(),
            namespace: namespace.into(),
            replica,
            spec,
            update_interval,
            status,
            lifecycle: Lifecycle::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Step object this replica reports to.
    pub fn step_ref(&self) -> StepRef {
        StepRef::new(&self.namespace, &self.pipeline_name, &self.spec.name)
    }

    /// Name shared by all replicas of the step, used as consumer group and
    /// durable queue name so replicas split the work.
    pub fn group_name(&self) -> String {
        format!("{}-{}", self.pipeline_name, self.spec.name)
    }

    /// Unique client name for the `index`-th source or sink connection.
    pub fn client_name(&self, role: &str, index: usize) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            self.pipeline_name, self.spec.name, self.replica, role, index
        )
    }

    /// Sleep for `period`, returning `false` if cancelled first.
    pub async fn sleep(&self, period: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(period) => true,
        }
    }
}
