// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Model listing with retry and a per-provider cache

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Result, WardenError};
use crate::llm::provider::ProviderId;
use crate::llm::registry::AdapterRegistry;
use crate::llm::retry::{with_retry, RetryConfig};
use crate::llm::transport::Transport;

/// Source of model ids for a provider
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    /// Model ids, served from cache when available
    async fn fetch_models(&self, provider: ProviderId) -> Result<Vec<String>>;

    /// Model ids, always asking the vendor
    async fn refresh(&self, provider: ProviderId) -> Result<Vec<String>>;
}

/// Lists models through the vendor APIs
pub struct ModelLister {
    registry: Arc<AdapterRegistry>,
    transport: Arc<dyn Transport>,
    retry: RetryConfig,
    cache: RwLock<HashMap<ProviderId, Vec<String>>>,
}

impl ModelLister {
    pub fn new(registry: Arc<AdapterRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
            retry: RetryConfig::default(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Drop cached lists
    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    async fn fetch_uncached(&self, provider: ProviderId) -> Result<Vec<String>> {
        let adapter = self.registry.get(provider)?;
        if let Some(models) = adapter.static_models() {
            return Ok(models);
        }

        let adapter = &adapter;
        let transport = &self.transport;
        let operation = format!("list models ({})", provider);

        with_retry(
            || async move {
                let request = adapter.models_request()?;
                let response = transport.send(request).await?;
                let status = response.status;
                let retry_after = response.retry_after;
                let body = response.text().await?;
                if !(200..300).contains(&status) {
                    return Err(WardenError::Api(adapter.parse_error(
                        status,
                        &body,
                        retry_after,
                    )));
                }
                adapter.parse_models(&body)
            },
            Some(self.retry.clone()),
            &operation,
        )
        .await
    }
}

#[async_trait]
impl ModelCatalog for ModelLister {
    async fn fetch_models(&self, provider: ProviderId) -> Result<Vec<String>> {
        if let Some(models) = self.cache.read().await.get(&provider) {
            tracing::debug!(target: "warden.models", provider = %provider, "model list cache hit");
            return Ok(models.clone());
        }
        self.refresh(provider).await
    }

    async fn refresh(&self, provider: ProviderId) -> Result<Vec<String>> {
        let mut models = self.fetch_uncached(provider).await?;
        models.sort();
        models.dedup();
        tracing::debug!(
            target: "warden.models",
            provider = %provider,
            count = models.len(),
            "fetched model list"
        );
        self.cache.write().await.insert(provider, models.clone());
        Ok(models)
    }
}
