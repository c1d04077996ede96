//! LLM Processor: the recursive tool-calling loop at the heart of a stage
//! run — call the provider, dispatch any function calls in parallel, feed
//! the results back, repeat until a final response or the iteration budget
//! is exhausted.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;

use crate::assembly::{
    append_response, merge_intermediate_content_with_results, separate_function_calls,
    ToolOutcome,
};
use crate::error::AgentError;
use crate::llm::{CompletionParams, LlmUsage, Provider};
use crate::message::{Message, Part};
use crate::stage::AgentModule;
use crate::tools::{invoke_tool, ToolCallContext, ToolRegistry, ToolSpec};

/// Upper bound on provider calls per stage, absent an explicit override.
pub const DEFAULT_MAX_TOOL_ITERATIONS: u32 = 5;

/// Successful outcome of the LLM loop: the final parts (or validated
/// structured-response data), the updated history, and usage totals.
pub struct ProcessorOutcome {
    pub final_value: Value,
    pub updated_history: Vec<Message>,
    pub usage: LlmUsage,
}

/// Runs the tool-calling loop for one stage's `LLMCall` to completion.
///
/// `agent_module`/`user_state` thread the lifecycle callbacks; `handle_error`
/// is intentionally NOT consulted here — stage-internal tool/validation
/// failures are converted into tool-result messages and fed back to the
/// model; only a
/// session-terminating failure (provider error, max iterations, empty
/// response) propagates out of this function as an `Err`.
#[allow(clippy::too_many_arguments)]
pub async fn run_llm_processor<S: Send + 'static>(
    model: &str,
    params: &CompletionParams,
    declared_tools: &[ToolSpec],
    provider: &dyn Provider,
    tool_registry: &ToolRegistry,
    mut history: Vec<Message>,
    agent_module: &dyn AgentModule<S>,
    user_state: &mut S,
    tool_ctx: &ToolCallContext,
    max_tool_iterations: u32,
) -> Result<ProcessorOutcome, AgentError> {
    let mut remaining = max_tool_iterations;
    let mut usage = LlmUsage::default();

    loop {
        if remaining == 0 {
            return Err(AgentError::execution_global(
                "max_tool_iterations exceeded without a final response",
            ));
        }

        let (response, turn_usage) = provider
            .completion(model, &history, params, declared_tools)
            .await
            .map_err(|e| AgentError::ProviderError {
                provider: e.provider,
                status: e.status,
                cause: e.cause,
            })?;
        usage.prompt_tokens += turn_usage.prompt_tokens;
        usage.completion_tokens += turn_usage.completion_tokens;
        usage.total_tokens += turn_usage.total_tokens;

        let response = validate_structured(response, params.structured_response.as_ref())?;

        append_response(&mut history, response.clone());
        let (content, calls) = separate_function_calls(&response);

        if calls.is_empty() && content.is_empty() {
            return Err(AgentError::execution_global("empty response from provider"));
        }

        if calls.is_empty() {
            let final_value = extract_final_value(&content, params.structured_response.as_ref())?;
            return Ok(ProcessorOutcome {
                final_value,
                updated_history: history,
                usage,
            });
        }

        let outcomes = execute_tool_calls(&calls, tool_registry, agent_module, user_state, tool_ctx).await;
        for message in merge_intermediate_content_with_results(content, outcomes) {
            history.push(message);
        }

        remaining -= 1;
    }
}

/// Executes every function call from one assistant turn in parallel,
/// preserving the original call order in the returned outcomes.
async fn execute_tool_calls<S: Send + 'static>(
    calls: &[Part],
    tool_registry: &ToolRegistry,
    agent_module: &dyn AgentModule<S>,
    user_state: &mut S,
    tool_ctx: &ToolCallContext,
) -> Vec<ToolOutcome> {
    // handle_tool_call is consulted sequentially first (it may mutate
    // user_state, and callbacks are applied serially), then the actual
    // invocations run concurrently.
    for call in calls {
        if let Part::FunctionCall { name, .. } = call {
            agent_module
                .handle_tool_call(&tool_ctx.stage_name, name, user_state)
                .await;
        }
    }

    let futures = calls.iter().map(|call| async move {
        match call {
            Part::FunctionCall { id, name, arguments } => {
                let result = invoke_tool(tool_registry, name, arguments.clone(), tool_ctx).await;
                (id.clone(), name.clone(), result)
            }
            _ => unreachable!("execute_tool_calls only receives FunctionCall parts"),
        }
    });
    let results = join_all(futures).await;

    let mut outcomes = Vec::with_capacity(results.len());
    for (id, name, result) in results {
        let outcome_result = match &result {
            Ok(value) => {
                agent_module
                    .handle_tool_result(&tool_ctx.stage_name, &name, value, user_state)
                    .await;
                Ok(value.clone())
            }
            Err(err) => {
                let rendered = err.to_string();
                agent_module
                    .handle_tool_result(
                        &tool_ctx.stage_name,
                        &name,
                        &Value::String(rendered.clone()),
                        user_state,
                    )
                    .await;
                Err(rendered)
            }
        };
        outcomes.push(ToolOutcome {
            call_id: id,
            name,
            result: outcome_result,
        });
    }
    outcomes
}

/// Validates a final assistant response against `schema` when one is
/// declared: the response MUST contain a `Part::Data` conforming to it.
/// A full JSON-Schema validator is out of scope here; the core contract
/// exercised is presence/shape of the `Part::Data`, with structural checks
/// (required keys) against an object schema.
fn validate_structured(
    response: Vec<Part>,
    schema: Option<&Value>,
) -> Result<Vec<Part>, AgentError> {
    let Some(schema) = schema else {
        return Ok(response);
    };
    let data = response.iter().find_map(|p| match p {
        Part::Data { data } => Some(data),
        _ => None,
    });
    let Some(data) = data else {
        return Err(AgentError::ValidationError {
            cause: "structured_response set but no DataPart in response".to_string(),
        });
    };
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required {
            if let Some(field_name) = field.as_str() {
                if data.get(field_name).is_none() {
                    return Err(AgentError::ValidationError {
                        cause: format!("missing required field `{field_name}` in structured response"),
                    });
                }
            }
        }
    }
    Ok(response)
}

/// Extracts the value a stage should publish as its result: the validated
/// `Part::Data` payload when a structured-response schema is set;
/// otherwise, when the final content is exactly one `Part::Data` (a stage
/// that returns structured data without declaring a schema, as in a
/// producer stage a downstream `select` reads from), that data verbatim;
/// otherwise the raw parts serialized as a JSON array.
fn extract_final_value(content: &[Part], schema: Option<&Value>) -> Result<Value, AgentError> {
    if schema.is_some() {
        let data = content.iter().find_map(|p| match p {
            Part::Data { data } => Some(data.clone()),
            _ => None,
        });
        return data.ok_or_else(|| AgentError::ValidationError {
            cause: "structured_response set but no DataPart in final content".to_string(),
        });
    }
    if let [Part::Data { data }] = content {
        return Ok(data.clone());
    }
    Ok(serde_json::to_value(content).unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderError;
    use crate::stage::NoopModule;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct ScriptedProvider {
        responses: Mutex<Vec<Vec<Part>>>,
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn completion(
            &self,
            _model: &str,
            _messages: &[Message],
            _params: &CompletionParams,
            _tools: &[ToolSpec],
        ) -> Result<(Vec<Part>, LlmUsage), ProviderError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(ProviderError {
                    provider: "scripted".to_string(),
                    status: 500,
                    cause: "script exhausted".to_string(),
                });
            }
            Ok((responses.remove(0), LlmUsage::default()))
        }
    }

    fn ctx() -> ToolCallContext {
        ToolCallContext {
            memory_manager: Arc::new(crate::memory::MemoryManager::new()),
            session_id: "s1".to_string(),
            stage_name: "stage".to_string(),
        }
    }

    /// **Scenario** (S1): a single text response with no tool calls returns
    /// immediately after one provider call.
    #[tokio::test]
    async fn text_only_response_returns_after_one_call() {
        let provider = ScriptedProvider {
            responses: Mutex::new(vec![vec![Part::Text { text: "ok".into() }]]),
        };
        let module = NoopModule;
        let mut state = ();
        let outcome = run_llm_processor(
            "m",
            &CompletionParams::default(),
            &[],
            &provider,
            &ToolRegistry::new(),
            vec![Message::user("hi")],
            &module,
            &mut state,
            &ctx(),
            DEFAULT_MAX_TOOL_ITERATIONS,
        )
        .await
        .unwrap();
        assert_eq!(outcome.final_value, json!([{"type": "text", "text": "ok"}]));
    }

    /// **Scenario** (S3): a tool call in the first turn is dispatched, and
    /// the second turn's text response is the stage result — exactly two
    /// provider calls.
    #[tokio::test]
    async fn tool_call_then_final_text_takes_two_calls() {
        let provider = ScriptedProvider {
            responses: Mutex::new(vec![
                vec![Part::FunctionCall {
                    id: "1".into(),
                    name: "echo".into(),
                    arguments: json!({"v": 2}),
                }],
                vec![Part::Text { text: "done".into() }],
            ]),
        };
        struct EchoTool;
        #[async_trait]
        impl crate::tools::ToolModule for EchoTool {
            fn name(&self) -> &str {
                "echo"
            }
            fn spec(&self) -> ToolSpec {
                ToolSpec {
                    name: "echo".into(),
                    description: "".into(),
                    parameters: json!({}),
                }
            }
            async fn call(&self, args: Value, _ctx: &ToolCallContext) -> Result<Value, AgentError> {
                Ok(args)
            }
        }
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let module = NoopModule;
        let mut state = ();
        let outcome = run_llm_processor(
            "m",
            &CompletionParams::default(),
            &[],
            &provider,
            &registry,
            vec![Message::user("hi")],
            &module,
            &mut state,
            &ctx(),
            DEFAULT_MAX_TOOL_ITERATIONS,
        )
        .await
        .unwrap();
        assert_eq!(outcome.final_value, json!([{"type": "text", "text": "done"}]));
    }

    /// **Scenario** (S4): `max_tool_iterations = 1` with a provider that
    /// always returns a function call fails with a framework execution error.
    #[tokio::test]
    async fn max_iterations_zero_remaining_fails() {
        let provider = ScriptedProvider {
            responses: Mutex::new(vec![vec![Part::FunctionCall {
                id: "1".into(),
                name: "echo".into(),
                arguments: json!({}),
            }]]),
        };
        let module = NoopModule;
        let mut state = ();
        let err = run_llm_processor(
            "m",
            &CompletionParams::default(),
            &[],
            &provider,
            &ToolRegistry::new(),
            vec![Message::user("hi")],
            &module,
            &mut state,
            &ctx(),
            1,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::ExecutionError { .. }));
    }

    /// **Scenario** (S5): a structured-response schema with a conforming
    /// `DataPart` yields the validated data as the stage result.
    #[tokio::test]
    async fn structured_response_extracts_data_part() {
        let provider = ScriptedProvider {
            responses: Mutex::new(vec![vec![Part::Data {
                data: json!({"r": "ok"}),
            }]]),
        };
        let module = NoopModule;
        let mut state = ();
        let params = CompletionParams {
            structured_response: Some(json!({"type": "object", "required": ["r"]})),
            ..Default::default()
        };
        let outcome = run_llm_processor(
            "m",
            &params,
            &[],
            &provider,
            &ToolRegistry::new(),
            vec![Message::user("hi")],
            &module,
            &mut state,
            &ctx(),
            DEFAULT_MAX_TOOL_ITERATIONS,
        )
        .await
        .unwrap();
        assert_eq!(outcome.final_value, json!({"r": "ok"}));
    }

    /// **Scenario**: a structured-response schema set but the response lacks
    /// a `DataPart` fails with `ValidationError`, not a retry.
    #[tokio::test]
    async fn structured_response_missing_data_part_fails_validation() {
        let provider = ScriptedProvider {
            responses: Mutex::new(vec![vec![Part::Text { text: "oops".into() }]]),
        };
        let module = NoopModule;
        let mut state = ();
        let params = CompletionParams {
            structured_response: Some(json!({"type": "object"})),
            ..Default::default()
        };
        let err = run_llm_processor(
            "m",
            &params,
            &[],
            &provider,
            &ToolRegistry::new(),
            vec![Message::user("hi")],
            &module,
            &mut state,
            &ctx(),
            DEFAULT_MAX_TOOL_ITERATIONS,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::ValidationError { .. }));
    }

    /// **Scenario**: calling an undeclared tool does not kill the loop — the
    /// model sees a tool-result error and the loop continues until the next
    /// turn resolves it.
    #[tokio::test]
    async fn undeclared_tool_name_produces_error_result_not_failure() {
        let provider = ScriptedProvider {
            responses: Mutex::new(vec![
                vec![Part::FunctionCall {
                    id: "1".into(),
                    name: "missing".into(),
                    arguments: json!({}),
                }],
                vec![Part::Text { text: "recovered".into() }],
            ]),
        };
        let module = NoopModule;
        let mut state = ();
        let outcome = run_llm_processor(
            "m",
            &CompletionParams::default(),
            &[],
            &provider,
            &ToolRegistry::new(),
            vec![Message::user("hi")],
            &module,
            &mut state,
            &ctx(),
            DEFAULT_MAX_TOOL_ITERATIONS,
        )
        .await
        .unwrap();
        assert_eq!(outcome.final_value, json!([{"type": "text", "text": "recovered"}]));
    }
}
