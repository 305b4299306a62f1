// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster API client.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use dataflow_api::{STEP_GROUP, STEP_RESOURCE, STEP_VERSION};
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{Result, SecretData, SecretStore, StatusStore, StepRef, StoreError};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const MERGE_PATCH: &str = "application/merge-patch+json";

/// Status and secret store backed by the cluster API server.
#[derive(Debug, Clone)]
pub struct ClusterClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct SecretObject {
    #[serde(default)]
    data: BTreeMap<String, String>,
}

impl ClusterClient {
    /// Client for an API server at `base_url`, authenticating with `token` when set.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Client using the pod's service account.
    pub fn in_cluster() -> Result<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| StoreError::Config("KUBERNETES_SERVICE_HOST not set".to_string()))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT")
            .map_err(|_| StoreError::Config("KUBERNETES_SERVICE_PORT not set".to_string()))?;
        let base_url = if host.contains(':') {
            format!("https://[{}]:{}", host, port)
        } else {
            format!("https://{}:{}", host, port)
        };

        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = std::fs::read_to_string(dir.join("token"))
            .map_err(|e| {
                StoreError::Config(format!("failed to read service account token: {}", e))
            })?;
        let ca = std::fs::read(dir.join("ca.crt"))
            .map_err(|e| StoreError::Config(format!("failed to read cluster CA: {}", e)))?;

        let client = reqwest::Client::builder()
            .add_root_certificate(reqwest::Certificate::from_pem(&ca)?)
            .build()?;

        debug!(url = %base_url, "using in-cluster API server");
        Ok(Self {
            client,
            base_url,
            token: Some(token.trim().to_string()),
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn status_url(&self, step: &StepRef) -> String {
        format!(
            "{}/apis/{}/{}/namespaces/{}/{}/{}/status",
            self.base_url, STEP_GROUP, STEP_VERSION, step.namespace, STEP_RESOURCE, step.name
        )
    }

    fn secret_url(&self, namespace: &str, name: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/secrets/{}",
            self.base_url, namespace, name
        )
    }
}

async fn error_for(response: reqwest::Response) -> StoreError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StoreError::Status { status, body }
}

#[async_trait]
impl StatusStore for ClusterClient {
    async fn patch_status(&self, step: &StepRef, patch: &Value) -> Result<()> {
        let response = self
            .authorized(self.client.patch(self.status_url(step)))
            .header(CONTENT_TYPE, MERGE_PATCH)
            .body(serde_json::to_vec(patch)?)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStore for ClusterClient {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>> {
        let response = self
            .authorized(self.client.get(self.secret_url(namespace, name)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }

        let secret: SecretObject = response.json().await?;
        let mut data = SecretData::new();
        for (key, encoded) in secret.data {
            let value = STANDARD.decode(encoded.as_bytes()).map_err(|e| StoreError::Decode {
                key: key.clone(),
                reason: e.to_string(),
            })?;
            data.insert(key, value);
        }
        Ok(Some(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let client = ClusterClient::new("https://10.0.0.1:443/", None);
        let step = StepRef::new("prod", "etl", "main");
        assert_eq!(
            client.status_url(&step),
            "https://10.0.0.1:443/apis/dataflow.argoproj.io/v1alpha1/namespaces/prod/steps/etl-main/status"
        );
        assert_eq!(
            client.secret_url("prod", "dataflow-nats-default"),
            "https://10.0.0.1:443/api/v1/namespaces/prod/secrets/dataflow-nats-default"
        );
    }
}
