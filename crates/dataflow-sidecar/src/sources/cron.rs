// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scheduled trigger source.
//!
//! Accepts five or six field cron expressions (seconds optional), presets
//! such as `@hourly`, and `@every <duration>`. Each fire delivers the fire
//! time as an RFC 3339 timestamp. Fires run in their own supervised task so
//! a slow or panicking delivery does not hold up the schedule.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use croner::Cron;
use tracing::{debug, info, warn};

use crate::bridge::ToMain;
use crate::config::parse_duration;
use crate::context::SidecarContext;
use crate::error::{Error, Result};
use crate::lifecycle::supervised;

/// A parsed schedule.
pub enum Schedule {
    /// Fixed period starting from when the schedule is started.
    Every(Duration),
    /// Cron expression or preset.
    Cron(Cron),
}

impl Schedule {
    /// Parse `expr`, failing on anything that is not a valid schedule.
    pub fn parse(expr: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidSchedule {
            schedule: expr.to_string(),
            reason,
        };
        let trimmed = expr.trim();
        if let Some(period) = trimmed.strip_prefix("@every ") {
            let period = parse_duration(period)
                .ok_or_else(|| invalid("invalid duration".to_string()))?;
            if period.is_zero() {
                return Err(invalid("period must be positive".to_string()));
            }
            return Ok(Schedule::Every(period));
        }
        let cron = Cron::new(trimmed)
            .with_seconds_optional()
            .parse()
            .map_err(|e| invalid(e.to_string()))?;
        Ok(Schedule::Cron(cron))
    }

    /// First fire time strictly after `after`, or `None` if there is none.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Every(period) => {
                let period = chrono::Duration::from_std(*period).ok()?;
                after.checked_add_signed(period)
            }
            Schedule::Cron(cron) => cron.find_next_occurrence(&after, false).ok(),
        }
    }
}

/// Payload delivered for a fire at `time`.
pub fn fire_payload(time: DateTime<Utc>) -> Vec<u8> {
    time.to_rfc3339_opts(SecondsFormat::Secs, true).into_bytes()
}

/// Validate the schedule and start the trigger task.
pub fn connect(
    ctx: &Arc<SidecarContext>,
    name: &str,
    cron: &dataflow_api::spec::Cron,
    to_main: Arc<ToMain>,
) -> Result<()> {
    info!(source = %name, schedule = %cron.schedule, "connecting cron source");
    let schedule = Schedule::parse(&cron.schedule)?;
    ctx.lifecycle.spawn(
        format!("cron-source-{}", name),
        run(ctx.clone(), name.to_string(), schedule, to_main),
    );
    Ok(())
}

async fn run(
    ctx: Arc<SidecarContext>,
    name: String,
    schedule: Schedule,
    to_main: Arc<ToMain>,
) -> Result<()> {
    let mut last = Utc::now();
    loop {
        let Some(next) = schedule.next_after(last) else {
            warn!(source = %name, "schedule has no further fire times");
            return Ok(());
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        if !ctx.sleep(wait).await {
            return Ok(());
        }
        last = next;

        debug!(source = %name, time = %next, "cron fired");
        let ctx = ctx.clone();
        let name = name.clone();
        let to_main = to_main.clone();
        supervised(format!("cron-fire-{}", name), async move {
            super::deliver(&ctx, &to_main, &name, &fire_payload(Utc::now())).await;
            Ok(())
        });
    }
}
