// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Step specification.
//!
//! The specification is serialized as JSON with camelCase keys. Sources and
//! sinks are written as a name plus exactly one technology key:
//!
//! ```json
//! {
//!   "name": "main",
//!   "in": { "fifo": true },
//!   "sources": [ { "name": "tick", "cron": { "schedule": "*/5 * * * * *" } } ],
//!   "sinks": [ { "name": "out", "kafka": { "brokers": ["kafka:9092"], "topic": "out" } } ],
//!   "scale": { "minReplicas": 0 }
//! }
//! ```
//!
//! On deserialization the alternatives are folded into the closed enums
//! [`SourceKind`] and [`SinkKind`]. An entry naming no technology or more than
//! one is rejected, as are duplicate names.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::status::StepStatus;

/// Errors from parsing or validating a step specification.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SpecError {
    /// A source or sink names no technology.
    #[error("{kind} {name:?} misconfigured: no variant specified")]
    NoVariant {
        /// `"source"` or `"sink"`.
        kind: &'static str,
        /// Declared name.
        name: String,
    },

    /// A source or sink names more than one technology.
    #[error("{kind} {name:?} misconfigured: multiple variants specified ({variants})")]
    MultipleVariants {
        /// `"source"` or `"sink"`.
        kind: &'static str,
        /// Declared name.
        name: String,
        /// Comma separated list of the technologies found.
        variants: String,
    },

    /// Two sources or two sinks share a name.
    #[error("duplicate {kind} name {name:?}")]
    DuplicateName {
        /// `"source"` or `"sink"`.
        kind: &'static str,
        /// Repeated name.
        name: String,
    },

    /// The `in` interface names both FIFO and HTTP.
    #[error("in interface misconfigured: both fifo and http specified")]
    AmbiguousInterface,

    /// The `in` interface is present but names neither FIFO nor HTTP.
    #[error("in interface misconfigured: neither fifo nor http specified")]
    EmptyInterface,

    /// Unknown subject prefix mode.
    #[error("invalid subject prefix {0:?}")]
    InvalidSubjectPrefix(String),

    /// The document is not valid JSON for a step specification.
    #[error("invalid step spec: {0}")]
    Json(#[from] serde_json::Error),
}

/// Specification of one pipeline step, as seen by its sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawStepSpec")]
pub struct StepSpec {
    /// Step name, unique within the pipeline.
    pub name: String,
    /// Inputs, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
    /// Outputs, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sinks: Vec<Sink>,
    /// How messages are handed to the user container.
    #[serde(default, rename = "in", skip_serializing_if = "Option::is_none")]
    pub input: Option<Interface>,
    /// Scaling policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Scale>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStepSpec {
    name: String,
    #[serde(default)]
    sources: Vec<Source>,
    #[serde(default)]
    sinks: Vec<Sink>,
    #[serde(default, rename = "in")]
    input: Option<Interface>,
    #[serde(default)]
    scale: Option<Scale>,
}

impl TryFrom<RawStepSpec> for StepSpec {
    type Error = SpecError;

    fn try_from(raw: RawStepSpec) -> Result<Self, Self::Error> {
        ensure_unique("source", raw.sources.iter().map(|s| s.name.as_str()))?;
        ensure_unique("sink", raw.sinks.iter().map(|s| s.name.as_str()))?;
        Ok(Self {
            name: raw.name,
            sources: raw.sources,
            sinks: raw.sinks,
            input: raw.input,
            scale: raw.scale,
        })
    }
}

fn ensure_unique<'a>(
    kind: &'static str,
    names: impl Iterator<Item = &'a str>,
) -> Result<(), SpecError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(SpecError::DuplicateName {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

impl StepSpec {
    /// Parse a JSON step specification.
    pub fn from_json(json: &str) -> Result<Self, SpecError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Minimum replicas from the scale policy, zero when none is declared.
    pub fn min_replicas(&self) -> u32 {
        self.scale.as_ref().map_or(0, |s| s.min_replicas)
    }

    /// Target replica count for this step given its current status.
    ///
    /// See [`crate::scale::decide`].
    pub fn target_replicas(
        &self,
        status: &StepStatus,
        now: DateTime<Utc>,
        scaling_delay: Duration,
        peek_delay: Duration,
    ) -> u32 {
        crate::scale::decide(
            self.min_replicas(),
            status.replicas,
            status.last_scaled_at,
            now,
            scaling_delay,
            peek_delay,
        )
    }
}

/// Interface through which the sidecar hands messages to the user container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawInterface", into = "RawInterface")]
pub enum Interface {
    /// Newline-delimited writes to a named pipe.
    Fifo,
    /// One HTTP request per message.
    Http,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawInterface {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    fifo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    http: Option<Empty>,
}

/// Marker for variants without settings, serialized as `{}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Empty {}

impl TryFrom<RawInterface> for Interface {
    type Error = SpecError;

    fn try_from(raw: RawInterface) -> Result<Self, Self::Error> {
        match (raw.fifo, raw.http.is_some()) {
            (true, true) => Err(SpecError::AmbiguousInterface),
            (true, false) => Ok(Interface::Fifo),
            (false, true) => Ok(Interface::Http),
            (false, false) => Err(SpecError::EmptyInterface),
        }
    }
}

impl From<Interface> for RawInterface {
    fn from(interface: Interface) -> Self {
        match interface {
            Interface::Fifo => RawInterface {
                fifo: true,
                http: None,
            },
            Interface::Http => RawInterface {
                fifo: false,
                http: Some(Empty {}),
            },
        }
    }
}

/// Scaling policy of a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scale {
    /// Replicas to keep running. Zero enables scale-to-zero.
    #[serde(default)]
    pub min_replicas: u32,
}

/// How a NATS subject is prefixed with the step's identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectPrefix {
    /// Subject used as written.
    #[default]
    #[serde(rename = "")]
    None,
    /// `<namespace>.<subject>`
    NamespaceName,
    /// `<namespace>.<pipeline>.<subject>`
    NamespacedPipelineName,
}

impl SubjectPrefix {
    /// `self` unless it is [`SubjectPrefix::None`], in which case `other`.
    pub fn or(self, other: SubjectPrefix) -> SubjectPrefix {
        match self {
            SubjectPrefix::None => other,
            _ => self,
        }
    }

    /// Apply the prefix to `subject`.
    pub fn apply(self, namespace: &str, pipeline: &str, subject: &str) -> String {
        match self {
            SubjectPrefix::None => subject.to_string(),
            SubjectPrefix::NamespaceName => format!("{}.{}", namespace, subject),
            SubjectPrefix::NamespacedPipelineName => {
                format!("{}.{}.{}", namespace, pipeline, subject)
            }
        }
    }
}

impl FromStr for SubjectPrefix {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(SubjectPrefix::None),
            "NamespaceName" => Ok(SubjectPrefix::NamespaceName),
            "NamespacedPipelineName" => Ok(SubjectPrefix::NamespacedPipelineName),
            other => Err(SpecError::InvalidSubjectPrefix(other.to_string())),
        }
    }
}

/// NATS JetStream connection settings, shared by sources and sinks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nats {
    /// Logical connection name, used to find connection secrets.
    #[serde(default = "default_name")]
    pub name: String,
    /// Server URL, e.g. `nats://nats:4222`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nats_url: String,
    /// Streaming cluster identifier.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_id: String,
    /// Subject to consume from or publish to.
    pub subject: String,
    /// Subject prefix mode.
    #[serde(default)]
    pub subject_prefix: SubjectPrefix,
}

/// Kafka connection settings, shared by sources and sinks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kafka {
    /// Logical connection name, used to find connection secrets.
    #[serde(default = "default_name")]
    pub name: String,
    /// Bootstrap brokers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub brokers: Vec<String>,
    /// Topic to consume from or produce to.
    pub topic: String,
    /// Broker protocol version, e.g. `2.8.0`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Network settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net: Option<KafkaNet>,
}

impl Kafka {
    /// Whether connections use TLS.
    pub fn tls_enabled(&self) -> bool {
        self.net.as_ref().is_some_and(|n| n.tls.is_some())
    }

    /// Enable TLS for connections.
    pub fn enable_tls(&mut self) {
        self.net = Some(KafkaNet { tls: Some(Tls {}) });
    }
}

/// Kafka network settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaNet {
    /// Present when TLS is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<Tls>,
}

/// TLS marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tls {}

/// Cron trigger settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cron {
    /// Cron expression, preset (`@hourly`) or `@every <duration>`.
    pub schedule: String,
}

fn default_name() -> String {
    "default".to_string()
}

/// A declared input of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSource", into = "RawSource")]
pub struct Source {
    /// Name, unique among the step's sources.
    pub name: String,
    /// Technology and its settings.
    pub kind: SourceKind,
}

/// Technology of a source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceKind {
    /// Scheduled trigger producing the fire time.
    Cron(Cron),
    /// NATS JetStream durable queue consumer.
    Nats(Nats),
    /// Kafka consumer group member.
    Kafka(Kafka),
    /// Messages pushed over HTTP to the sidecar.
    Http,
}

impl SourceKind {
    /// Short technology name used in logs and errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            SourceKind::Cron(_) => "cron",
            SourceKind::Nats(_) => "nats",
            SourceKind::Kafka(_) => "kafka",
            SourceKind::Http => "http",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawSource {
    #[serde(default = "default_name")]
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cron: Option<Cron>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nats: Option<Nats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kafka: Option<Kafka>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    http: Option<Empty>,
}

impl TryFrom<RawSource> for Source {
    type Error = SpecError;

    fn try_from(raw: RawSource) -> Result<Self, Self::Error> {
        let mut kinds = Vec::with_capacity(1);
        if let Some(c) = raw.cron {
            kinds.push(SourceKind::Cron(c));
        }
        if let Some(n) = raw.nats {
            kinds.push(SourceKind::Nats(n));
        }
        if let Some(k) = raw.kafka {
            kinds.push(SourceKind::Kafka(k));
        }
        if raw.http.is_some() {
            kinds.push(SourceKind::Http);
        }
        let kind = single_variant("source", &raw.name, kinds, SourceKind::type_name)?;
        Ok(Source {
            name: raw.name,
            kind,
        })
    }
}

impl From<Source> for RawSource {
    fn from(source: Source) -> Self {
        let mut raw = RawSource {
            name: source.name,
            cron: None,
            nats: None,
            kafka: None,
            http: None,
        };
        match source.kind {
            SourceKind::Cron(c) => raw.cron = Some(c),
            SourceKind::Nats(n) => raw.nats = Some(n),
            SourceKind::Kafka(k) => raw.kafka = Some(k),
            SourceKind::Http => raw.http = Some(Empty {}),
        }
        raw
    }
}

/// A declared output of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSink", into = "RawSink")]
pub struct Sink {
    /// Name, unique among the step's sinks.
    pub name: String,
    /// Technology and its settings.
    pub kind: SinkKind,
}

/// Technology of a sink.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkKind {
    /// NATS JetStream publish.
    Nats(Nats),
    /// Kafka produce.
    Kafka(Kafka),
    /// Write to the sidecar's log.
    Log,
}

impl SinkKind {
    /// Short technology name used in logs and errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            SinkKind::Nats(_) => "nats",
            SinkKind::Kafka(_) => "kafka",
            SinkKind::Log => "log",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawSink {
    #[serde(default = "default_name")]
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nats: Option<Nats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kafka: Option<Kafka>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    log: Option<Empty>,
}

impl TryFrom<RawSink> for Sink {
    type Error = SpecError;

    fn try_from(raw: RawSink) -> Result<Self, Self::Error> {
        let mut kinds = Vec::with_capacity(1);
        if let Some(n) = raw.nats {
            kinds.push(SinkKind::Nats(n));
        }
        if let Some(k) = raw.kafka {
            kinds.push(SinkKind::Kafka(k));
        }
        if raw.log.is_some() {
            kinds.push(SinkKind::Log);
        }
        let kind = single_variant("sink", &raw.name, kinds, SinkKind::type_name)?;
        Ok(Sink {
            name: raw.name,
            kind,
        })
    }
}

impl From<Sink> for RawSink {
    fn from(sink: Sink) -> Self {
        let mut raw = RawSink {
            name: sink.name,
            nats: None,
            kafka: None,
            log: None,
        };
        match sink.kind {
            SinkKind::Nats(n) => raw.nats = Some(n),
            SinkKind::Kafka(k) => raw.kafka = Some(k),
            SinkKind::Log => raw.log = Some(Empty {}),
        }
        raw
    }
}

fn single_variant<K>(
    kind: &'static str,
    name: &str,
    mut kinds: Vec<K>,
    type_name: fn(&K) -> &'static str,
) -> Result<K, SpecError> {
    match kinds.len() {
        0 => Err(SpecError::NoVariant {
            kind,
            name: name.to_string(),
        }),
        1 => Ok(kinds.remove(0)),
        _ => Err(SpecError::MultipleVariants {
            kind,
            name: name.to_string(),
            variants: kinds.iter().map(type_name).collect::<Vec<_>>().join(", "),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_spec() {
        let spec = StepSpec::from_json(
            r#"{
                "name": "main",
                "in": {"fifo": true},
                "sources": [
                    {"name": "tick", "cron": {"schedule": "@every 5s"}},
                    {"name": "events", "nats": {"natsUrl": "nats://nats:4222", "clusterId": "stan", "subject": "events", "subjectPrefix": "NamespaceName"}},
                    {"name": "log", "kafka": {"brokers": ["kafka:9092"], "topic": "in", "version": "2.8.0", "net": {"tls": {}}}},
                    {"name": "push", "http": {}}
                ],
                "sinks": [
                    {"name": "out", "kafka": {"topic": "out"}},
                    {"name": "audit", "log": {}}
                ],
                "scale": {"minReplicas": 2}
            }"#,
        )
        .unwrap();

        assert_eq!(spec.name, "main");
        assert_eq!(spec.input, Some(Interface::Fifo));
        assert_eq!(spec.sources.len(), 4);
        assert_eq!(
            spec.sources[0].kind,
            SourceKind::Cron(Cron {
                schedule: "@every 5s".to_string()
            })
        );
        match &spec.sources[1].kind {
            SourceKind::Nats(n) => {
                assert_eq!(n.name, "default");
                assert_eq!(n.nats_url, "nats://nats:4222");
                assert_eq!(n.cluster_id, "stan");
                assert_eq!(n.subject_prefix, SubjectPrefix::NamespaceName);
            }
            other => panic!("unexpected source kind {:?}", other),
        }
        match &spec.sources[2].kind {
            SourceKind::Kafka(k) => {
                assert_eq!(k.brokers, vec!["kafka:9092"]);
                assert!(k.tls_enabled());
            }
            other => panic!("unexpected source kind {:?}", other),
        }
        assert_eq!(spec.sources[3].kind, SourceKind::Http);
        assert_eq!(spec.sinks[1].kind, SinkKind::Log);
        assert_eq!(spec.min_replicas(), 2);
    }

    #[test]
    fn test_source_without_variant_rejected() {
        let err = StepSpec::from_json(r#"{"name": "main", "sources": [{"name": "a"}]}"#)
            .unwrap_err()
            .to_string();
        assert!(err.contains("no variant"), "{}", err);
    }

    #[test]
    fn test_source_with_two_variants_rejected() {
        let err = StepSpec::from_json(
            r#"{"name": "main", "sources": [{"name": "a", "http": {}, "cron": {"schedule": "@daily"}}]}"#,
        )
        .unwrap_err()
        .to_string();
        assert!(err.contains("multiple variants"), "{}", err);
        assert!(err.contains("cron, http"), "{}", err);
    }

    #[test]
    fn test_sink_with_two_variants_rejected() {
        let err = StepSpec::from_json(
            r#"{"name": "main", "sinks": [{"name": "a", "log": {}, "kafka": {"topic": "t"}}]}"#,
        )
        .unwrap_err()
        .to_string();
        assert!(err.contains("multiple variants"), "{}", err);
    }

    #[test]
    fn test_duplicate_sink_names_rejected() {
        let err = StepSpec::from_json(
            r#"{"name": "main", "sinks": [{"name": "a", "log": {}}, {"name": "a", "log": {}}]}"#,
        )
        .unwrap_err()
        .to_string();
        assert!(err.contains("duplicate sink name"), "{}", err);
    }

    #[test]
    fn test_default_names_must_be_unique() {
        let result = StepSpec::from_json(
            r#"{"name": "main", "sources": [{"http": {}}, {"cron": {"schedule": "@hourly"}}]}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_interface_variants() {
        let http: Interface = serde_json::from_value(json!({"http": {}})).unwrap();
        assert_eq!(http, Interface::Http);
        let fifo: Interface = serde_json::from_value(json!({"fifo": true})).unwrap();
        assert_eq!(fifo, Interface::Fifo);
        let both = serde_json::from_value::<Interface>(json!({"fifo": true, "http": {}}));
        assert!(both.is_err());
    }

    #[test]
    fn test_empty_interface_rejected() {
        for input in [r#"{}"#, r#"{"fifo": false}"#] {
            let json = format!(r#"{{"name": "main", "in": {}}}"#, input);
            let err = StepSpec::from_json(&json).unwrap_err();
            assert!(
                err.to_string().contains("neither fifo nor http"),
                "{}: {}",
                input,
                err
            );
        }
    }

    #[test]
    fn test_missing_interface_is_none() {
        let spec = StepSpec::from_json(r#"{"name": "main"}"#).unwrap();
        assert_eq!(spec.input, None);
        assert_eq!(spec.min_replicas(), 0);
    }

    #[test]
    fn test_serialization_uses_wire_shape() {
        let spec = StepSpec {
            name: "main".to_string(),
            sources: vec![Source {
                name: "push".to_string(),
                kind: SourceKind::Http,
            }],
            sinks: vec![Sink {
                name: "out".to_string(),
                kind: SinkKind::Log,
            }],
            input: Some(Interface::Http),
            scale: None,
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "main",
                "sources": [{"name": "push", "http": {}}],
                "sinks": [{"name": "out", "log": {}}],
                "in": {"http": {}}
            })
        );
    }

    #[test]
    fn test_subject_prefix() {
        assert_eq!(SubjectPrefix::None.apply("ns", "p", "s"), "s");
        assert_eq!(SubjectPrefix::NamespaceName.apply("ns", "p", "s"), "ns.s");
        assert_eq!(
            SubjectPrefix::NamespacedPipelineName.apply("ns", "p", "s"),
            "ns.p.s"
        );
        assert_eq!(
            SubjectPrefix::None.or(SubjectPrefix::NamespaceName),
            SubjectPrefix::NamespaceName
        );
        assert_eq!(
            SubjectPrefix::NamespacedPipelineName.or(SubjectPrefix::NamespaceName),
            SubjectPrefix::NamespacedPipelineName
        );
        assert!("Bogus".parse::<SubjectPrefix>().is_err());
        assert_eq!("".parse::<SubjectPrefix>().unwrap(), SubjectPrefix::None);
    }

    #[test]
    fn test_kafka_tls_toggle() {
        let mut k = Kafka::default();
        assert!(!k.tls_enabled());
        k.enable_tls();
        assert!(k.tls_enabled());
    }
}
