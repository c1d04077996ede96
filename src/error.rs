//! Error taxonomy: classes, kinds, and the single `AgentError` surfaced to callers.

use thiserror::Error;

/// Coarse error class used for recovery-policy decisions (`handle_error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Bad user/agent-spec input; never retried by default policy.
    Invalid,
    /// Internal invariant violated (cycle, missing dep, max iterations...).
    Framework,
    /// Provider, network, or backend failure; retried by default policy.
    External,
    /// Could not be classified.
    Unknown,
}

/// A single typed error produced anywhere in the crate.
///
/// Each variant documents the `ErrorClass` returned by [`AgentError::class`].
#[derive(Debug, Error)]
pub enum AgentError {
    /// Malformed `LLMCall`/`ToolSpec`/`MemorySourceSpec` configuration.
    #[error("invalid config: {cause}")]
    InvalidConfig { cause: String },

    /// A message or part did not conform to the expected shape.
    #[error("invalid message format: {reason} ({offending})")]
    InvalidMessageFormat { reason: String, offending: String },

    /// Input or output schema validation failed.
    #[error("validation error: {cause}")]
    ValidationError { cause: String },

    /// Internal executor/DAG fault: cycle, missing dep, max iterations, empty response.
    #[error("execution error{}: {cause}", stage.as_ref().map(|s| format!(" (stage {s})")).unwrap_or_default())]
    ExecutionError {
        stage: Option<String>,
        cause: String,
    },

    /// Declarative spec / DSL parsing failure (external collaborator concern).
    #[error("parsing error in {module}: {cause}")]
    ParsingError { module: String, cause: String },

    /// Non-2xx response from an LLM provider.
    #[error("provider error ({provider}, status {status}): {cause}")]
    ProviderError {
        provider: String,
        status: u16,
        cause: String,
    },

    /// A tool invocation failed (including panics, which are caught and wrapped).
    #[error("tool error in {module}: {cause}")]
    ToolError { module: String, cause: String },

    /// A memory-manager operation referenced an unregistered source name.
    #[error("unknown memory source: {0}")]
    UnknownSource(String),

    /// A lookup (memory key, checkpoint, etc.) found nothing.
    #[error("not found")]
    NotFound,
}

impl AgentError {
    /// Classifies this error for `handle_error` policy decisions.
    ///
    /// `handle_error` receives the *class*, not the raw error; 4xx provider
    /// errors are `Invalid` (non-retryable), 5xx are `External` (retryable).
    pub fn class(&self) -> ErrorClass {
        match self {
            AgentError::InvalidConfig { .. }
            | AgentError::InvalidMessageFormat { .. }
            | AgentError::ParsingError { .. }
            | AgentError::UnknownSource(_)
            | AgentError::NotFound => ErrorClass::Invalid,
            AgentError::ValidationError { .. } | AgentError::ExecutionError { .. } => {
                ErrorClass::Framework
            }
            AgentError::ProviderError { status, .. } => {
                if (400..500).contains(status) {
                    ErrorClass::Invalid
                } else {
                    ErrorClass::External
                }
            }
            AgentError::ToolError { .. } => ErrorClass::External,
        }
    }

    pub fn execution(stage: impl Into<String>, cause: impl Into<String>) -> Self {
        AgentError::ExecutionError {
            stage: Some(stage.into()),
            cause: cause.into(),
        }
    }

    pub fn execution_global(cause: impl Into<String>) -> Self {
        AgentError::ExecutionError {
            stage: None,
            cause: cause.into(),
        }
    }
}
