//! Reference in-memory backend: a `tokio::sync::RwLock<HashMap<...>>`
//! guarding stored items, with lazy expiry filtering on read rather than a
//! background sweep task.

use std::collections::HashMap;
use std::sync::RwLock as StdRwLock;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::AgentError;
use crate::memory::source::{
    matches_pattern, ListKeysOpts, MemoryItem, MemoryMetadata, MemorySource, RetrieveOpts,
    SearchOpts, StoreOpts,
};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

struct Entry {
    value: Value,
    metadata: MemoryMetadata,
}

/// The reference memory backend: one process-local map, guarded by a
/// `tokio::sync::RwLock`. Suitable for tests and as the default source when
/// a host registers no other backend.
pub struct InMemorySource {
    data: RwLock<HashMap<String, Entry>>,
    /// Counts keys physically removed by `sweep_expired`, for observability
    /// in tests; not part of the public contract.
    swept: StdRwLock<u64>,
}

impl InMemorySource {
    pub fn new() -> Self {
        InMemorySource {
            data: RwLock::new(HashMap::new()),
            swept: StdRwLock::new(0),
        }
    }

    /// Physically removes every expired entry. Eager GC is out of scope
    /// here; this is an optional hook a host may schedule.
    pub async fn sweep_expired(&self) -> usize {
        let now = now_ms();
        let mut guard = self.data.write().await;
        let before = guard.len();
        guard.retain(|_, entry| !entry.metadata.is_expired(now));
        let removed = before - guard.len();
        if removed > 0 {
            *self.swept.write().unwrap() += removed as u64;
        }
        removed
    }

    pub fn swept_count(&self) -> u64 {
        *self.swept.read().unwrap()
    }
}

impl Default for InMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemorySource for InMemorySource {
    async fn store(
        &self,
        key: &str,
        value: Value,
        opts: StoreOpts,
    ) -> Result<MemoryMetadata, AgentError> {
        let metadata = MemoryMetadata {
            stored_at: now_ms(),
            ttl_ms: opts.ttl_ms,
            tags: opts.tags,
        };
        let mut guard = self.data.write().await;
        guard.insert(
            key.to_string(),
            Entry {
                value,
                metadata: metadata.clone(),
            },
        );
        Ok(metadata)
    }

    async fn retrieve(
        &self,
        key: &str,
        _opts: RetrieveOpts,
    ) -> Result<Option<MemoryItem>, AgentError> {
        let now = now_ms();
        let guard = self.data.read().await;
        Ok(guard.get(key).and_then(|entry| {
            if entry.metadata.is_expired(now) {
                None
            } else {
                Some(MemoryItem {
                    key: key.to_string(),
                    value: entry.value.clone(),
                    metadata: entry.metadata.clone(),
                })
            }
        }))
    }

    async fn delete(&self, key: &str) -> Result<(), AgentError> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn search(&self, query: &str, opts: SearchOpts) -> Result<Vec<MemoryItem>, AgentError> {
        let now = now_ms();
        let guard = self.data.read().await;
        let mut items: Vec<MemoryItem> = guard
            .iter()
            .filter(|(_, entry)| !entry.metadata.is_expired(now))
            .filter(|(key, _)| matches_pattern(key, query))
            .map(|(key, entry)| MemoryItem {
                key: key.clone(),
                value: entry.value.clone(),
                metadata: entry.metadata.clone(),
            })
            .collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        if let Some(limit) = opts.limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    async fn list_keys(&self, opts: ListKeysOpts) -> Result<Vec<String>, AgentError> {
        let now = now_ms();
        let guard = self.data.read().await;
        let mut keys: Vec<String> = guard
            .iter()
            .filter(|(_, entry)| !entry.metadata.is_expired(now))
            .filter(|(key, _)| {
                opts.pattern
                    .as_deref()
                    .map(|p| matches_pattern(key, p))
                    .unwrap_or(true)
            })
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        if let Some(limit) = opts.limit {
            keys.truncate(limit);
        }
        Ok(keys)
    }
}
