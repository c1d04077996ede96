//! Provider capability boundary.
//!
//! One trait, one required async method, plain request/response types — no
//! assumptions about the provider's wire format leak past this boundary.

use async_trait::async_trait;
use serde_json::Value;

use crate::message::{Message, Part};
use crate::tools::ToolSpec;

/// Sampling knobs and optional structured-response schema for one `LLMCall`.
#[derive(Debug, Clone, Default)]
pub struct CompletionParams {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// When set, the final assistant turn must contain a `Part::Data`
    /// conforming to this JSON Schema.
    pub structured_response: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A non-2xx response from a provider. `status` follows HTTP-style
/// conventions even for non-HTTP transports, since `AgentError::class`
/// branches on the 4xx/5xx boundary.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub provider: String,
    pub status: u16,
    pub cause: String,
}

/// One LLM completion request/response cycle. Providers are pure from the
/// core's perspective — the core never assumes a particular wire format.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn completion(
        &self,
        model: &str,
        messages: &[Message],
        params: &CompletionParams,
        tools: &[ToolSpec],
    ) -> Result<(Vec<Part>, LlmUsage), ProviderError>;
}
