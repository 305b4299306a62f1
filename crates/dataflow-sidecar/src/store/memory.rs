// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory stores for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{Result, SecretData, SecretStore, StatusStore, StepRef, StoreError};

/// Status store that records every patch it receives.
#[derive(Default)]
pub struct MemoryStatusStore {
    patches: Mutex<Vec<(StepRef, Value)>>,
    failing: AtomicBool,
}

impl MemoryStatusStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent patches fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Patches applied so far, oldest first.
    pub async fn patches(&self) -> Vec<(StepRef, Value)> {
        self.patches.lock().await.clone()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn patch_status(&self, step: &StepRef, patch: &Value) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.patches.lock().await.push((step.clone(), patch.clone()));
        Ok(())
    }
}

/// Secret store serving a fixed set of secrets.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<(String, String), SecretData>>,
    failing: AtomicBool,
}

impl MemorySecretStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a secret.
    pub async fn insert<K, V>(
        &self,
        namespace: &str,
        name: &str,
        data: impl IntoIterator<Item = (K, V)>,
    ) where
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let data = data
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.secrets
            .lock()
            .await
            .insert((namespace.to_string(), name.to_string()), data);
    }

    /// Make subsequent lookups fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Status {
                status: 403,
                body: "forbidden".to_string(),
            });
        }
        Ok(self
            .secrets
            .lock()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}
