// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster state the sidecar reads and writes.
//!
//! Two seams: [`StatusStore`] merge-patches the step status, and
//! [`SecretStore`] looks up connection secrets. [`ClusterClient`] implements
//! both against the cluster API. [`MemoryStatusStore`] and
//! [`MemorySecretStore`] stand in for it in tests.

mod cluster;
mod memory;

pub use cluster::ClusterClient;
pub use memory::{MemorySecretStore, MemoryStatusStore};

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors from cluster API operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The request could not be sent or its response read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with an unexpected status.
    #[error("API returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// In-cluster credentials could not be loaded.
    #[error("Cluster configuration error: {0}")]
    Config(String),

    /// A secret value is not valid base64.
    #[error("Invalid secret data for key {key:?}: {reason}")]
    Decode {
        /// Secret key.
        key: String,
        /// Decoder message.
        reason: String,
    },

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Namespaced name of a step object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepRef {
    /// Namespace.
    pub namespace: String,
    /// Object name, `<pipeline>-<step>`.
    pub name: String,
}

impl StepRef {
    /// Reference to `step` of `pipeline` in `namespace`.
    pub fn new(namespace: &str, pipeline: &str, step: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: dataflow_api::step_object_name(pipeline, step),
        }
    }
}

impl fmt::Display for StepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Decoded secret data keyed by secret key.
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// Writes step status.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Apply a JSON merge patch to the status subresource of `step`.
    async fn patch_status(&self, step: &StepRef, patch: &Value) -> Result<()>;
}

/// Reads connection secrets.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch secret `name` in `namespace`. `Ok(None)` when it does not exist.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>>;
}
