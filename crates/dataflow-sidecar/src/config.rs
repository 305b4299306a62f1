// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for dataflow-sidecar.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use dataflow_api::{SpecError, StepSpec};

/// Default FIFO the sidecar writes messages into.
pub const DEFAULT_FIFO_IN: &str = "/var/run/dataflow/in";

/// Default FIFO the sidecar reads processed messages from.
pub const DEFAULT_FIFO_OUT: &str = "/var/run/dataflow/out";

/// Default base URL of the user container's HTTP interface.
pub const DEFAULT_MAIN_URL: &str = "http://localhost:8080";

/// Default port of the sidecar's HTTP listener.
pub const DEFAULT_LISTEN_PORT: u16 = 3569;

/// Sidecar configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Specification of the step this sidecar serves.
    pub step_spec: StepSpec,
    /// Name of the pipeline the step belongs to.
    pub pipeline_name: String,
    /// Namespace of the pipeline.
    pub namespace: String,
    /// Index of this replica.
    pub replica: u32,
    /// How often status is published and backlogs are polled.
    pub update_interval: Duration,
    /// FIFO written to deliver messages to the user container.
    pub fifo_in: PathBuf,
    /// FIFO read for messages produced by the user container.
    pub fifo_out: PathBuf,
    /// Base URL of the user container's HTTP interface.
    pub main_url: String,
    /// Address of the sidecar's HTTP listener.
    pub listen_addr: SocketAddr,
    /// Interval between readiness probes of the user container.
    pub ready_poll_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| lookup(key).ok_or(ConfigError::MissingEnvVar(key));

        let step_spec = StepSpec::from_json(&required("DATAFLOW_STEP_SPEC")?)?;
        let pipeline_name = required("DATAFLOW_PIPELINE_NAME")?;
        let namespace = required("DATAFLOW_NAMESPACE")?;

        let replica_var = required("DATAFLOW_REPLICA")?;
        let replica = replica_var
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidReplica(replica_var))?;

        let duration = |key: &'static str, default: &str| {
            let value = lookup(key).unwrap_or_else(|| default.to_string());
            parse_duration(&value)
                .filter(|d| !d.is_zero())
                .ok_or(ConfigError::InvalidDuration { var: key, value })
        };
        let update_interval = duration("DATAFLOW_UPDATE_INTERVAL", "15s")?;
        let ready_poll_interval = duration("DATAFLOW_READY_POLL_INTERVAL", "3s")?;

        let fifo_in = PathBuf::from(
            lookup("DATAFLOW_FIFO_IN").unwrap_or_else(|| DEFAULT_FIFO_IN.to_string()),
        );
        let fifo_out = PathBuf::from(
            lookup("DATAFLOW_FIFO_OUT").unwrap_or_else(|| DEFAULT_FIFO_OUT.to_string()),
        );

        let main_url = lookup("DATAFLOW_MAIN_URL")
            .unwrap_or_else(|| DEFAULT_MAIN_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let port: u16 = match lookup("DATAFLOW_LISTEN_PORT") {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidPort(value))?,
            None => DEFAULT_LISTEN_PORT,
        };
        let listen_addr = SocketAddr::from(([0, 0, 0, 0], port));

        Ok(Self {
            step_spec,
            pipeline_name,
            namespace,
            replica,
            update_interval,
            fifo_in,
            fifo_out,
            main_url,
            listen_addr,
            ready_poll_interval,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// The replica index is not a non-negative integer.
    #[error("Invalid replica index: {0:?}")]
    InvalidReplica(String),

    /// A duration variable could not be parsed or is zero.
    #[error("Invalid duration in {var}: {value:?}")]
    InvalidDuration {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },

    /// The port number is invalid.
    #[error("Invalid port number: {0:?}")]
    InvalidPort(String),

    /// The step specification could not be parsed.
    #[error(transparent)]
    InvalidSpec(#[from] SpecError),
}

/// Parse a duration such as `15s`, `1m30s`, `500ms` or `1.5h`.
///
/// Accepted units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare `0`
/// is zero. Returns `None` for anything else.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s == "0" {
        return Some(Duration::ZERO);
    }
    if s.is_empty() {
        return None;
    }

    let mut nanos = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let value: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_nanos = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        nanos += value * unit_nanos;
        rest = &rest[unit_len..];
    }

    Some(Duration::from_nanos(nanos as u64))
}
