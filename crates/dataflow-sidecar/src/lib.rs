// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dataflow Sidecar - Step Data Plane
//!
//! Every replica of a pipeline step runs a user container next to this
//! sidecar. The sidecar connects the step's declared sources and sinks,
//! moves messages between them and the user container, and reports what it
//! saw to the step's status.
//!
//! # Architecture
//!
//! ```text
//!   cron / NATS / Kafka / HTTP
//!             │
//!             ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │                  dataflow-sidecar (This Crate)                 │
//! │  ┌───────────┐   ┌──────────┐           ┌──────────────────┐  │
//! │  │  Sources  │──►│  ToMain  │           │  FanOut → Sinks  │──┼──► NATS / Kafka / log
//! │  └───────────┘   └────┬─────┘           └────────▲─────────┘  │
//! │        │              │                          │            │
//! │        ▼              │ in FIFO or HTTP          │ out FIFO or │
//! │  ┌───────────┐        │                          │ POST :3569  │
//! │  │  Status   │◄───────┼──────────────────────────┘            │
//! │  │  Table    │        │                                       │
//! │  └─────┬─────┘        │                                       │
//! └────────┼──────────────┼───────────────────────────────────────┘
//!          │              ▼
//!          │     ┌─────────────────┐
//!          │     │ user container  │
//!          │     └─────────────────┘
//!          ▼
//!   step status (merge patch every update interval)
//! ```
//!
//! # HTTP Listener (Port 3569)
//!
//! | Route | Description |
//! |-------|-------------|
//! | `POST /messages` | Message from the user container, sent to every sink |
//! | `POST /sources/{name}` | Message for HTTP source `name`, delivered to the user container |
//! | `GET /ready` | Sidecar liveness |
//!
//! # Configuration
//!
//! See [`config::Config`]. The step spec arrives as JSON in
//! `DATAFLOW_STEP_SPEC`; connection secrets fill blanks in it at startup.
//!
//! # Shutdown
//!
//! On a termination signal, or when the output FIFO reader or the HTTP
//! listener fails, every task is cancelled, status is published one last
//! time and connections are closed in reverse order of opening.

#![warn(missing_docs)]

/// Bridge to and from the user container.
pub mod bridge;

/// Shared NATS and Kafka client settings.
pub mod clients;

/// Configuration loaded from environment variables.
pub mod config;

/// Shared state of a running sidecar.
pub mod context;

/// Connection settings from secrets.
pub mod enrich;

/// Error types.
pub mod error;

/// Release stack and task supervision.
pub mod lifecycle;

/// Periodic status publishing.
pub mod publisher;

/// Embeddable runtime.
pub mod runtime;

/// Sinks and fan-out.
pub mod sinks;

/// Source adapters.
pub mod sources;

/// In-memory status table.
pub mod status;

/// Status and secret stores.
pub mod store;

pub use config::Config;
pub use context::SidecarContext;
pub use error::{Error, Result};
pub use runtime::SidecarRuntime;
