// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Target replica scenarios for steps with and without scale policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dataflow_api::{Scale, StepSpec, StepStatus, decide};

const SCALING_DELAY: Duration = Duration::from_secs(60);
const PEEK_DELAY: Duration = Duration::from_secs(4 * 60);

fn step(min_replicas: u32) -> StepSpec {
    StepSpec {
        name: "main".to_string(),
        sources: Vec::new(),
        sinks: Vec::new(),
        input: None,
        scale: Some(Scale { min_replicas }),
    }
}

fn status(replicas: u32, last_scaled_at: Option<DateTime<Utc>>) -> StepStatus {
    StepStatus {
        replicas,
        last_scaled_at,
        ..Default::default()
    }
}

fn target(
    min: u32,
    replicas: u32,
    last_scaled_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> u32 {
    let status = status(replicas, last_scaled_at);
    step(min).target_replicas(&status, now, SCALING_DELAY, PEEK_DELAY)
}

// ============================================================================
// Initial state (never scaled, nothing running)
// ============================================================================

#[test]
fn test_init_min_zero_peeks() {
    assert_eq!(target(0, 0, None, Utc::now()), 1);
}

#[test]
fn test_init_min_one() {
    assert_eq!(target(1, 0, None, Utc::now()), 1);
}

#[test]
fn test_no_scale_policy_behaves_like_min_zero() {
    let spec = StepSpec {
        scale: None,
        ..step(0)
    };
    let now = Utc::now();
    assert_eq!(
        spec.target_replicas(&status(0, None), now, SCALING_DELAY, PEEK_DELAY),
        1
    );
    assert_eq!(
        spec.target_replicas(&status(0, Some(now)), now, SCALING_DELAY, PEEK_DELAY),
        0
    );
}

// ============================================================================
// Scaling up
// ============================================================================

#[test]
fn test_scaling_up() {
    let now = Utc::now();
    let recent = now - chrono::Duration::minutes(2);
    assert_eq!(target(2, 1, None, now), 2);
    assert_eq!(target(2, 1, Some(recent), now), 2);
    assert_eq!(target(2, 1, Some(now), now), 1);
}

// ============================================================================
// Scaling down
// ============================================================================

#[test]
fn test_scaling_down() {
    let now = Utc::now();
    let recent = now - chrono::Duration::minutes(2);
    assert_eq!(target(1, 2, None, now), 1);
    assert_eq!(target(1, 2, Some(recent), now), 1);
    assert_eq!(target(1, 2, Some(now), now), 2);
}

#[test]
fn test_scale_to_zero() {
    let now = Utc::now();
    let recent = now - chrono::Duration::minutes(2);
    assert_eq!(target(0, 1, None, now), 0);
    assert_eq!(target(0, 1, Some(recent), now), 0);
    assert_eq!(target(0, 1, Some(now), now), 1);
}

// ============================================================================
// Peeking from zero
// ============================================================================

#[test]
fn test_peek() {
    let now = Utc::now();
    assert_eq!(target(0, 0, None, now), 1);
    assert_eq!(target(0, 0, Some(now - chrono::Duration::minutes(2)), now), 0);
    assert_eq!(target(0, 0, Some(now), now), 0);
    assert_eq!(target(0, 0, Some(now - chrono::Duration::minutes(5)), now), 1);
}

// ============================================================================
// Properties over a grid of inputs
// ============================================================================

#[test]
fn test_decision_properties() {
    let now = Utc::now();
    let elapsed_minutes = [0i64, 1, 2, 3, 4, 5, 60];

    for min in 0..4u32 {
        for current in 0..4u32 {
            for minutes in elapsed_minutes {
                let last = Some(now - chrono::Duration::minutes(minutes));
                let elapsed = Duration::from_secs(minutes as u64 * 60);
                let got = decide(min, current, last, now, SCALING_DELAY, PEEK_DELAY);

                let expected = if current != min {
                    if elapsed >= SCALING_DELAY { min } else { current }
                } else if current == 0 {
                    if elapsed >= PEEK_DELAY { 1 } else { 0 }
                } else {
                    current
                };
                assert_eq!(
                    got, expected,
                    "min={} current={} elapsed={}m",
                    min, current, minutes
                );

                // Never scaled passes every threshold.
                let never = decide(min, current, None, now, SCALING_DELAY, PEEK_DELAY);
                let expected_never = if current != min {
                    min
                } else if current == 0 {
                    1
                } else {
                    current
                };
                assert_eq!(never, expected_never);
            }
        }
    }
}
