//! Tool registry and executor.

pub mod memory_tools;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;

use crate::error::AgentError;
use crate::memory::MemoryManager;
use crate::telemetry;

/// JSON-Schema-shaped description of a tool, as declared in a `StageSpec`'s
/// `LLMCall.tools` and surfaced to the provider.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Context available to a tool invocation: at minimum the
/// memory manager, the callback module handle, and session/stage identity.
pub struct ToolCallContext {
    pub memory_manager: Arc<MemoryManager>,
    pub session_id: String,
    pub stage_name: String,
}

/// A named capability invokable by the LLM via a `FunctionCallPart`.
///
/// `name`/`spec` are synchronous metadata; `call` is the async invocation
/// point.
#[async_trait]
pub trait ToolModule: Send + Sync {
    fn name(&self) -> &str;
    fn spec(&self) -> ToolSpec;
    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, AgentError>;
}

/// Lookup table of tools by declared name.
///
/// Resolution is always by name, never by module reference.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolModule>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn ToolModule>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolModule>> {
        self.tools.get(name).cloned()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec()).collect()
    }
}

/// Invokes a registered tool, catching any internal failure and converting
/// it into a `ToolError` rather than propagating raw panics or error types.
/// Wrapped in a `tool_execution` span from start through completion,
/// including the not-found and panic cases.
pub async fn invoke_tool(
    registry: &ToolRegistry,
    name: &str,
    args: Value,
    ctx: &ToolCallContext,
) -> Result<Value, AgentError> {
    let span = telemetry::tool_execution_start(&ctx.session_id, &ctx.stage_name, name);
    let result = async {
        let tool = registry.get(name).ok_or_else(|| AgentError::ToolError {
            module: name.to_string(),
            cause: format!("Tool not defined: {name}"),
        })?;
        match std::panic::AssertUnwindSafe(tool.call(args, ctx))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => Err(AgentError::ToolError {
                module: name.to_string(),
                cause: "tool panicked during execution".to_string(),
            }),
        }
    }
    .await;
    telemetry::tool_execution_stop(&span, if result.is_ok() { "ok" } else { "error" });
    result
}
