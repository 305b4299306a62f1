// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for dataflow-sidecar.

use thiserror::Error;

/// Sidecar errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The step specification is invalid.
    #[error("Spec error: {0}")]
    Spec(#[from] dataflow_api::SpecError),

    /// Cluster API operation failed.
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client operation failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Kafka client operation failed.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// NATS client operation failed.
    #[error("NATS error: {0}")]
    Nats(String),

    /// Kafka broker version is not a dotted numeric version.
    #[error("Invalid Kafka version: {0:?}")]
    InvalidKafkaVersion(String),

    /// Cron schedule could not be parsed.
    #[error("Invalid schedule {schedule:?}: {reason}")]
    InvalidSchedule {
        /// The schedule as declared.
        schedule: String,
        /// Parser message.
        reason: String,
    },

    /// The operation was abandoned because the sidecar is shutting down.
    #[error("Cancelled")]
    Cancelled,

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap any displayable NATS client error.
    pub fn nats(context: &str, err: impl std::fmt::Display) -> Self {
        Error::Nats(format!("{}: {}", context, err))
    }
}

/// Result type using sidecar Error.
pub type Result<T> = std::result::Result<T, Error>;
