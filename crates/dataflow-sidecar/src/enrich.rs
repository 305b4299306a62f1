// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fill connection settings from cluster secrets.
//!
//! Each NATS or Kafka connection may have a secret named
//! `dataflow-nats-<connection>` or `dataflow-kafka-<connection>`. Values
//! declared in the step spec win; the secret only fills blanks. After
//! enrichment NATS subjects get their prefix applied.

use dataflow_api::{Kafka, Nats, SinkKind, SourceKind, StepSpec, SubjectPrefix};
use tracing::debug;

use crate::error::Result;
use crate::store::{SecretData, SecretStore};

fn secret_name(technology: &str, connection: &str) -> String {
    format!("dataflow-{}-{}", technology, connection)
}

fn text(secret: &SecretData, key: &str) -> String {
    secret
        .get(key)
        .map(|v| String::from_utf8_lossy(v).into_owned())
        .unwrap_or_default()
}

fn or(value: &mut String, fallback: String) {
    if value.is_empty() {
        *value = fallback;
    }
}

async fn lookup(
    secrets: &dyn SecretStore,
    namespace: &str,
    name: &str,
) -> Result<Option<SecretData>> {
    let secret = secrets.get_secret(namespace, name).await?;
    if secret.is_none() {
        debug!(secret = name, "no connection secret, using spec values");
    }
    Ok(secret)
}

async fn enrich_nats(
    nats: &mut Nats,
    secrets: &dyn SecretStore,
    namespace: &str,
    pipeline: &str,
) -> Result<()> {
    let name = secret_name("nats", &nats.name);
    if let Some(secret) = lookup(secrets, namespace, &name).await? {
        or(&mut nats.nats_url, text(&secret, "natsUrl"));
        or(&mut nats.cluster_id, text(&secret, "clusterId"));
        let prefix: SubjectPrefix = text(&secret, "subjectPrefix").parse()?;
        nats.subject_prefix = nats.subject_prefix.or(prefix);
    }
    nats.subject = nats.subject_prefix.apply(namespace, pipeline, &nats.subject);
    Ok(())
}

async fn enrich_kafka(kafka: &mut Kafka, secrets: &dyn SecretStore, namespace: &str) -> Result<()> {
    let name = secret_name("kafka", &kafka.name);
    if let Some(secret) = lookup(secrets, namespace, &name).await? {
        if kafka.brokers.is_empty() {
            kafka.brokers = text(&secret, "brokers")
                .split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(String::from)
                .collect();
        }
        or(&mut kafka.version, text(&secret, "version"));
        if secret.contains_key("net.tls") {
            kafka.enable_tls();
        }
    }
    Ok(())
}

/// Fill blank connection settings of every source and sink from secrets in
/// `namespace`, then apply NATS subject prefixes.
///
/// A missing secret is skipped. Any other lookup failure is returned.
pub async fn enrich_spec(
    spec: &mut StepSpec,
    secrets: &dyn SecretStore,
    namespace: &str,
    pipeline: &str,
) -> Result<()> {
    for source in &mut spec.sources {
        match &mut source.kind {
            SourceKind::Nats(nats) => enrich_nats(nats, secrets, namespace, pipeline).await?,
            SourceKind::Kafka(kafka) => enrich_kafka(kafka, secrets, namespace).await?,
            SourceKind::Cron(_) | SourceKind::Http => {}
        }
    }
    for sink in &mut spec.sinks {
        match &mut sink.kind {
            SinkKind::Nats(nats) => enrich_nats(nats, secrets, namespace, pipeline).await?,
            SinkKind::Kafka(kafka) => enrich_kafka(kafka, secrets, namespace).await?,
            SinkKind::Log => {}
        }
    }
    Ok(())
}
