// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dataflow API - step specification, step status and scaling policy.
//!
//! A pipeline is a graph of named steps. Each step runs as a user container
//! paired with a sidecar that bridges external messaging systems to it. This
//! crate holds the types both halves of the system agree on:
//!
//! - [`spec`]: the step specification handed to the sidecar at startup
//! - [`status`]: the per-source and per-sink status the sidecar publishes
//! - [`printable`]: redaction of message samples stored in status
//! - [`scale`]: the replica-count decision derived from spec and status
//!
//! Nothing here performs I/O.
//!
//! # Step resource
//!
//! Step status lives on a cluster resource addressed as
//! `<namespace>/<pipeline>-<step>` in the [`STEP_GROUP`]/[`STEP_VERSION`] API.

#![warn(missing_docs)]

/// Message sample redaction.
pub mod printable;

/// Replica-count decision engine.
pub mod scale;

/// Step specification types.
pub mod spec;

/// Step status types.
pub mod status;

pub use printable::printable;
pub use scale::decide;
pub use spec::{
    Interface, Kafka, Nats, Scale, Sink, SinkKind, Source, SourceKind, SpecError, StepSpec,
    SubjectPrefix,
};
pub use status::{Message, MessageError, Metrics, SinkStatus, SourceStatus, StepStatus};

/// API group of the step resource.
pub const STEP_GROUP: &str = "dataflow.argoproj.io";

/// API version of the step resource.
pub const STEP_VERSION: &str = "v1alpha1";

/// Plural resource name of steps.
pub const STEP_RESOURCE: &str = "steps";

/// Name of the step object for `step` in `pipeline`.
pub fn step_object_name(pipeline: &str, step: &str) -> String {
    format!("{}-{}", pipeline, step)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_object_name() {
        assert_eq!(step_object_name("etl", "main"), "etl-main");
    }
}
