//! The six fixed memory tools exposed to the LLM.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::AgentError;
use crate::memory::source::{ListKeysOpts, RetrieveOpts, SearchOpts, StoreOpts};
use crate::tools::{ToolCallContext, ToolModule, ToolRegistry, ToolSpec};

fn source_arg(args: &Value) -> Option<&str> {
    args.get("memory_source").and_then(Value::as_str)
}

fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, AgentError> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::InvalidMessageFormat {
            reason: format!("missing required field `{field}`"),
            offending: args.to_string(),
        })
}

pub struct MemoryStoreTool;

#[async_trait]
impl ToolModule for MemoryStoreTool {
    fn name(&self) -> &str {
        "memory_store"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "memory_store".to_string(),
            description: "Stores a value under a key in memory.".to_string(),
            parameters: json!({
                "type": "object",
                "required": ["key", "value"],
                "properties": {
                    "key": {"type": "string"},
                    "value": {"type": "object"},
                    "metadata": {
                        "type": "object",
                        "properties": {
                            "tags": {"type": "array", "items": {"type": "string"}},
                            "ttl": {"type": "integer", "description": "seconds"},
                            "source": {"type": "string"}
                        }
                    },
                    "memory_source": {"type": "string"}
                }
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, AgentError> {
        let key = required_str(&args, "key")?.to_string();
        let value = args
            .get("value")
            .cloned()
            .ok_or_else(|| AgentError::InvalidMessageFormat {
                reason: "missing required field `value`".to_string(),
                offending: args.to_string(),
            })?;
        let metadata = args.get("metadata");
        let tags = metadata
            .and_then(|m| m.get("tags"))
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        // wire boundary is seconds; internal representation is milliseconds
        // — this conversion belongs here, never in the manager.
        let ttl_ms = metadata
            .and_then(|m| m.get("ttl"))
            .and_then(Value::as_i64)
            .map(|secs| secs * 1000);
        let source = source_arg(&args);

        let stored = ctx
            .memory_manager
            .store(&key, value, StoreOpts { ttl_ms, tags }, source)
            .await?;
        Ok(json!({"key": key, "stored_at": stored.stored_at, "ttl_ms": stored.ttl_ms}))
    }
}

pub struct MemoryRetrieveTool;

#[async_trait]
impl ToolModule for MemoryRetrieveTool {
    fn name(&self) -> &str {
        "memory_retrieve"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "memory_retrieve".to_string(),
            description: "Retrieves a value by key from memory.".to_string(),
            parameters: json!({
                "type": "object",
                "required": ["key"],
                "properties": {
                    "key": {"type": "string"},
                    "memory_source": {"type": "string"}
                }
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, AgentError> {
        let key = required_str(&args, "key")?;
        let item = ctx
            .memory_manager
            .retrieve(key, RetrieveOpts::default(), source_arg(&args))
            .await?;
        Ok(match item {
            Some(item) => json!({"found": true, "value": item.value}),
            None => json!({"found": false}),
        })
    }
}

pub struct MemorySearchTool;

#[async_trait]
impl ToolModule for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "memory_search".to_string(),
            description: "Searches memory by pattern.".to_string(),
            parameters: json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {"type": "object"},
                    "limit": {"type": "integer", "default": 10},
                    "memory_source": {"type": "string"}
                }
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, AgentError> {
        let query = args
            .get("query")
            .ok_or_else(|| AgentError::InvalidMessageFormat {
                reason: "missing required field `query`".to_string(),
                offending: args.to_string(),
            })?;
        let pattern = match query {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("pattern")
                .and_then(Value::as_str)
                .unwrap_or("*")
                .to_string(),
            _ => "*".to_string(),
        };
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;
        let items = ctx
            .memory_manager
            .search(
                &pattern,
                SearchOpts { limit: Some(limit) },
                source_arg(&args),
            )
            .await?;
        let results: Vec<Value> = items
            .into_iter()
            .map(|i| json!({"key": i.key, "value": i.value}))
            .collect();
        Ok(json!({"results": results}))
    }
}

pub struct MemoryDeleteTool;

#[async_trait]
impl ToolModule for MemoryDeleteTool {
    fn name(&self) -> &str {
        "memory_delete"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "memory_delete".to_string(),
            description: "Deletes a value by key from memory.".to_string(),
            parameters: json!({
                "type": "object",
                "required": ["key"],
                "properties": {
                    "key": {"type": "string"},
                    "memory_source": {"type": "string"}
                }
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, AgentError> {
        let key = required_str(&args, "key")?;
        ctx.memory_manager.delete(key, source_arg(&args)).await?;
        Ok(json!({"deleted": true}))
    }
}

pub struct MemoryListKeysTool;

#[async_trait]
impl ToolModule for MemoryListKeysTool {
    fn name(&self) -> &str {
        "memory_list_keys"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "memory_list_keys".to_string(),
            description: "Lists keys in memory, optionally filtered by pattern.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string"},
                    "limit": {"type": "integer", "default": 100},
                    "memory_source": {"type": "string"}
                }
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, AgentError> {
        let pattern = args
            .get("pattern")
            .and_then(Value::as_str)
            .map(str::to_string);
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(100) as usize;
        let keys = ctx
            .memory_manager
            .list_keys(
                ListKeysOpts {
                    pattern,
                    limit: Some(limit),
                },
                source_arg(&args),
            )
            .await?;
        Ok(json!({"keys": keys}))
    }
}

pub struct MemoryListSourcesTool;

#[async_trait]
impl ToolModule for MemoryListSourcesTool {
    fn name(&self) -> &str {
        "memory_list_sources"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "memory_list_sources".to_string(),
            description: "Lists the names of registered memory sources.".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    async fn call(&self, _args: Value, ctx: &ToolCallContext) -> Result<Value, AgentError> {
        Ok(json!({"sources": ctx.memory_manager.list_sources().await}))
    }
}

/// Registers all six fixed memory tools into `registry`.
pub fn register_memory_tools(registry: &mut ToolRegistry) {
    registry.register(Arc::new(MemoryStoreTool));
    registry.register(Arc::new(MemoryRetrieveTool));
    registry.register(Arc::new(MemorySearchTool));
    registry.register(Arc::new(MemoryDeleteTool));
    registry.register(Arc::new(MemoryListKeysTool));
    registry.register(Arc::new(MemoryListSourcesTool));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemorySource, MemoryManager};
    use std::sync::Arc;

    async fn ctx() -> ToolCallContext {
        let manager = MemoryManager::new();
        manager.add_source("default", Arc::new(InMemorySource::new())).await;
        ToolCallContext {
            memory_manager: Arc::new(manager),
            session_id: "s1".to_string(),
            stage_name: "stage".to_string(),
        }
    }

    /// **Scenario**: storing a value with a seconds-denominated TTL persists
    /// it internally as milliseconds (S6-style round trip).
    #[tokio::test]
    async fn store_converts_seconds_ttl_to_milliseconds() {
        let ctx = ctx().await;
        let result = MemoryStoreTool
            .call(
                json!({"key": "k", "value": {"n": 7}, "metadata": {"ttl": 5}}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(result["ttl_ms"], json!(5000));
    }

    /// **Scenario**: memory_store then memory_retrieve in a later turn finds
    /// the stored value (S6).
    #[tokio::test]
    async fn store_then_retrieve_round_trips() {
        let ctx = ctx().await;
        MemoryStoreTool
            .call(json!({"key": "k", "value": {"n": 7}}), &ctx)
            .await
            .unwrap();
        let result = MemoryRetrieveTool.call(json!({"key": "k"}), &ctx).await.unwrap();
        assert_eq!(result, json!({"found": true, "value": {"n": 7}}));
    }

    /// **Scenario**: retrieving a missing key returns `found: false`, not an error.
    #[tokio::test]
    async fn retrieve_missing_key_reports_not_found() {
        let ctx = ctx().await;
        let result = MemoryRetrieveTool
            .call(json!({"key": "ghost"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result, json!({"found": false}));
    }

    /// **Scenario**: memory_list_sources reflects registered source names.
    #[tokio::test]
    async fn list_sources_reports_registered_names() {
        let ctx = ctx().await;
        let result = MemoryListSourcesTool.call(json!({}), &ctx).await.unwrap();
        assert_eq!(result, json!({"sources": ["default"]}));
    }

    /// **Scenario**: memory_delete removes the key so a later retrieve misses.
    #[tokio::test]
    async fn delete_then_retrieve_reports_not_found() {
        let ctx = ctx().await;
        MemoryStoreTool
            .call(json!({"key": "k", "value": 1}), &ctx)
            .await
            .unwrap();
        MemoryDeleteTool.call(json!({"key": "k"}), &ctx).await.unwrap();
        let result = MemoryRetrieveTool.call(json!({"key": "k"}), &ctx).await.unwrap();
        assert_eq!(result, json!({"found": false}));
    }
}
