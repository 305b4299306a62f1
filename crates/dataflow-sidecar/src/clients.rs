// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connection settings shared by sources and sinks.

use std::time::Duration;

use dataflow_api::Kafka;
use rdkafka::ClientConfig;
use tracing::debug;

use crate::error::{Error, Result};

/// Client id every Kafka connection announces.
pub const KAFKA_CLIENT_ID: &str = "dataflow-sidecar";

/// How long to wait for broker metadata when checking a connection.
pub const KAFKA_METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect to a NATS server, naming the connection `client_name`.
pub async fn connect_nats(url: &str, client_name: &str) -> Result<async_nats::Client> {
    debug!(url = %url, client = %client_name, "connecting to NATS");
    async_nats::ConnectOptions::new()
        .name(client_name)
        .connect(url)
        .await
        .map_err(|e| Error::nats(&format!("failed to connect to {}", url), e))
}

/// Validate a broker protocol version such as `2.8.0` or `0.10.2.1`.
pub fn parse_kafka_version(version: &str) -> Result<String> {
    let parts: Vec<&str> = version.split('.').collect();
    let numeric = parts
        .iter()
        .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if !(2..=4).contains(&parts.len()) || !numeric {
        return Err(Error::InvalidKafkaVersion(version.to_string()));
    }
    Ok(version.to_string())
}

/// Base client configuration for `kafka`.
pub fn kafka_config(kafka: &Kafka) -> Result<ClientConfig> {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", kafka.brokers.join(","))
        .set("client.id", KAFKA_CLIENT_ID);
    if !kafka.version.is_empty() {
        let version = parse_kafka_version(&kafka.version)?;
        config.set("broker.version.fallback", version);
    }
    if kafka.tls_enabled() {
        config.set("security.protocol", "ssl");
    }
    Ok(config)
}
