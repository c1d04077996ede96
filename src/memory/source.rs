//! The single-backend memory contract.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AgentError;

/// Metadata recorded alongside a stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryMetadata {
    /// Epoch milliseconds the item was stored at.
    pub stored_at: i64,
    /// Time to live in milliseconds. `None` means never expire.
    pub ttl_ms: Option<i64>,
    pub tags: Vec<String>,
}

impl MemoryMetadata {
    /// True when `now_ms >= stored_at + ttl_ms`. Always false for no TTL.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        match self.ttl_ms {
            None => false,
            Some(ttl) => now_ms >= self.stored_at + ttl,
        }
    }
}

/// A value plus its metadata, as returned by `retrieve`/`search`.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryItem {
    pub key: String,
    pub value: Value,
    pub metadata: MemoryMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct StoreOpts {
    pub ttl_ms: Option<i64>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RetrieveOpts {
    pub include_metadata: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOpts {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ListKeysOpts {
    pub pattern: Option<String>,
    pub limit: Option<usize>,
}

/// Contract every memory backend must implement.
///
/// `init` is intentionally not part of this trait: backends are constructed
/// already-initialized (the Rust equivalent of the source's
/// `init(opts) -> context`, since backend state lives in the struct itself
/// rather than a separately threaded context value).
#[async_trait]
pub trait MemorySource: Send + Sync {
    async fn store(
        &self,
        key: &str,
        value: Value,
        opts: StoreOpts,
    ) -> Result<MemoryMetadata, AgentError>;

    async fn retrieve(
        &self,
        key: &str,
        opts: RetrieveOpts,
    ) -> Result<Option<MemoryItem>, AgentError>;

    async fn delete(&self, key: &str) -> Result<(), AgentError>;

    async fn search(&self, query: &str, opts: SearchOpts) -> Result<Vec<MemoryItem>, AgentError>;

    async fn list_keys(&self, opts: ListKeysOpts) -> Result<Vec<String>, AgentError>;
}

/// Default reference-backend pattern semantics: `"*"`
/// matches everything; otherwise substring match.
pub fn matches_pattern(key: &str, pattern: &str) -> bool {
    pattern == "*" || key.contains(pattern)
}
