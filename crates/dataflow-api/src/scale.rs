// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Replica-count decision engine.
//!
//! [`decide`] maps a step's scale policy and its current scaling state to the
//! number of replicas the reconciliation loop should run. It is a pure function
//! of its inputs, so it can be evaluated at any cadence:
//!
//! ```text
//!                 elapsed >= scaling_delay
//!   ┌───────────┐ ─────────────────────────►  min
//!   │ below-min │
//!   └───────────┘ ─────────────────────────►  current
//!                 elapsed <  scaling_delay
//!
//!   ┌───────────┐ elapsed >= scaling_delay ►  min
//!   │ above-min │
//!   └───────────┘ elapsed <  scaling_delay ►  current
//!
//!   ┌───────────┐ elapsed >= peek_delay    ►  1
//!   │ zero/zero │
//!   └───────────┘ elapsed <  peek_delay    ►  0
//!
//!   ┌───────────┐
//!   │  stable   │ ─────────────────────────►  current
//!   └───────────┘
//! ```
//!
//! `elapsed` is the time since the step was last scaled. A step that has never
//! been scaled has unbounded `elapsed` and passes every threshold.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Decide the target replica count for a step.
///
/// - `min_replicas`: lower bound from the step's scale policy
/// - `current_replicas`: replicas currently running
/// - `last_scaled_at`: when replicas last changed, `None` if never
/// - `scaling_delay`: minimum time between two scaling actions
/// - `peek_delay`: how long a step stays at zero before one replica is
///   started to look for new work
pub fn decide(
    min_replicas: u32,
    current_replicas: u32,
    last_scaled_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    scaling_delay: Duration,
    peek_delay: Duration,
) -> u32 {
    let elapsed = elapsed_since(last_scaled_at, now);

    if current_replicas != min_replicas {
        // Scaling up and scaling down are gated by the same delay.
        if elapsed >= scaling_delay {
            min_replicas
        } else {
            current_replicas
        }
    } else if current_replicas == 0 {
        if elapsed >= peek_delay { 1 } else { 0 }
    } else {
        current_replicas
    }
}

/// Time since `last_scaled_at`. A timestamp in the future counts as zero.
fn elapsed_since(last_scaled_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    match last_scaled_at {
        None => Duration::MAX,
        Some(at) => (now - at).to_std().unwrap_or(Duration::ZERO),
    }
}
