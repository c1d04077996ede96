//! Multi-source memory router.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::AgentError;
use crate::memory::source::{
    ListKeysOpts, MemoryItem, MemoryMetadata, MemorySource, RetrieveOpts, SearchOpts, StoreOpts,
};

/// Registry of named memory backends with exactly one default source.
///
/// The manager is the sole mutation point for cross-stage memory state; each
/// registered backend is expected to internally serialize its own
/// operations.
pub struct MemoryManager {
    sources: DashMap<String, Arc<dyn MemorySource>>,
    insertion_order: RwLock<Vec<String>>,
    default_source: RwLock<Option<String>>,
}

impl MemoryManager {
    pub fn new() -> Self {
        MemoryManager {
            sources: DashMap::new(),
            insertion_order: RwLock::new(Vec::new()),
            default_source: RwLock::new(None),
        }
    }

    /// Registers a backend under `name`. If the registry was empty, this
    /// becomes the default source.
    pub async fn add_source(&self, name: impl Into<String>, backend: Arc<dyn MemorySource>) {
        let name = name.into();
        self.sources.insert(name.clone(), backend);
        let mut order = self.insertion_order.write().await;
        if !order.contains(&name) {
            order.push(name.clone());
        }
        let mut default = self.default_source.write().await;
        if default.is_none() {
            *default = Some(name);
        }
    }

    /// Removes a source. If it was the default, the default becomes the
    /// next remaining source in insertion order, or `None` if none remain.
    pub async fn remove_source(&self, name: &str) {
        self.sources.remove(name);
        let mut order = self.insertion_order.write().await;
        order.retain(|n| n != name);
        let mut default = self.default_source.write().await;
        if default.as_deref() == Some(name) {
            *default = order.first().cloned();
        }
    }

    pub async fn set_default_source(&self, name: &str) -> Result<(), AgentError> {
        if !self.sources.contains_key(name) {
            return Err(AgentError::UnknownSource(name.to_string()));
        }
        *self.default_source.write().await = Some(name.to_string());
        Ok(())
    }

    pub async fn default_source_name(&self) -> Option<String> {
        self.default_source.read().await.clone()
    }

    /// Lists registered source names in insertion order.
    pub async fn list_sources(&self) -> Vec<String> {
        self.insertion_order.read().await.clone()
    }

    async fn resolve(&self, source: Option<&str>) -> Result<Arc<dyn MemorySource>, AgentError> {
        let name = match source {
            Some(n) => n.to_string(),
            None => self
                .default_source_name()
                .await
                .ok_or_else(|| AgentError::UnknownSource("<no default source>".to_string()))?,
        };
        self.sources
            .get(&name)
            .map(|e| e.value().clone())
            .ok_or(AgentError::UnknownSource(name))
    }

    pub async fn store(
        &self,
        key: &str,
        value: Value,
        opts: StoreOpts,
        source: Option<&str>,
    ) -> Result<MemoryMetadata, AgentError> {
        self.resolve(source).await?.store(key, value, opts).await
    }

    pub async fn retrieve(
        &self,
        key: &str,
        opts: RetrieveOpts,
        source: Option<&str>,
    ) -> Result<Option<MemoryItem>, AgentError> {
        self.resolve(source).await?.retrieve(key, opts).await
    }

    pub async fn delete(&self, key: &str, source: Option<&str>) -> Result<(), AgentError> {
        self.resolve(source).await?.delete(key).await
    }

    pub async fn search(
        &self,
        query: &str,
        opts: SearchOpts,
        source: Option<&str>,
    ) -> Result<Vec<MemoryItem>, AgentError> {
        self.resolve(source).await?.search(query, opts).await
    }

    pub async fn list_keys(
        &self,
        opts: ListKeysOpts,
        source: Option<&str>,
    ) -> Result<Vec<String>, AgentError> {
        self.resolve(source).await?.list_keys(opts).await
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}
