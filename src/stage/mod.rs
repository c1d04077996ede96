//! Stage specification and lifecycle callback capability set.
//!
//! `AgentModule` is one trait with six default no-op hooks, so a host
//! overrides only the lifecycle points it cares about.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ErrorClass;
use crate::llm::CompletionParams;
use crate::message::Message;
use crate::tools::ToolSpec;

/// How a stage's prepared input is seeded from an upstream dependency's result.
#[derive(Debug, Clone)]
pub struct InputSelection {
    pub from: String,
    pub select: Option<String>,
}

/// One LLM interaction declared on a stage.
#[derive(Clone)]
pub struct LLMCall {
    pub model: String,
    pub params: CompletionParams,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
}

/// One node in the agent DAG.
#[derive(Clone)]
pub struct StageSpec {
    pub name: String,
    pub depends_on: HashSet<String>,
    pub llm_call: Option<LLMCall>,
    pub entrypoint: bool,
    pub input_selection: Option<InputSelection>,
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
}

impl StageSpec {
    pub fn new(name: impl Into<String>) -> Self {
        StageSpec {
            name: name.into(),
            depends_on: HashSet::new(),
            llm_call: None,
            entrypoint: false,
            input_selection: None,
            input_schema: None,
            output_schema: None,
        }
    }
}

/// Projects `path` (a dotted JSON-pointer-like key sequence) out of `value`.
fn get_in(value: &Value, path: &str) -> Option<Value> {
    path.split('.')
        .try_fold(value.clone(), |acc, segment| acc.get(segment).cloned())
}

/// Builds a stage's prepared input map: base is `global_input`; if the
/// stage declares `{from, select}`, look up the
/// upstream result and either merge it (if it's an object) or stash it under
/// `"selected_input"`.
pub fn prepare_stage_input(
    stage: &StageSpec,
    global_input: &HashMap<String, Value>,
    dependency_results: &HashMap<String, Value>,
) -> Result<HashMap<String, Value>, crate::error::AgentError> {
    let mut base = global_input.clone();
    if let Some(selection) = &stage.input_selection {
        let upstream = dependency_results.get(&selection.from).ok_or_else(|| {
            crate::error::AgentError::execution(
                stage.name.clone(),
                format!("dependency result not found: {}", selection.from),
            )
        })?;
        let selected = match &selection.select {
            Some(path) => get_in(upstream, path).unwrap_or(Value::Null),
            None => upstream.clone(),
        };
        match selected {
            Value::Object(map) => {
                for (k, v) in map {
                    base.insert(k, v);
                }
            }
            other => {
                base.insert("selected_input".to_string(), other);
            }
        }
    }
    Ok(base)
}

/// Lifecycle callback capability set.
///
/// Every hook defaults to a no-op passthrough; hosts override only what they
/// need. `S` is the host-defined `user_state` type threaded through a
/// session.
#[async_trait]
pub trait AgentModule<S>: Send + Sync
where
    S: Send + 'static,
{
    async fn handle_stage_start(&self, _stage: &str, _state: &mut S) {}

    async fn handle_tool_call(&self, _stage: &str, _tool_name: &str, _state: &mut S) {}

    async fn handle_tool_result(
        &self,
        _stage: &str,
        _tool_name: &str,
        _result: &Value,
        _state: &mut S,
    ) {
    }

    /// Consulted on a stage-level failure. Receives the error *class*, not
    /// the raw error; the raw error is retained on `SessionState.error`.
    ///
    /// Default policy: `external`-class failures (provider/tool errors) get
    /// at least one retry attempt; every other class stops the session.
    /// Retries are still bounded by the executor's per-stage retry budget.
    async fn handle_error(&self, class: ErrorClass, _state: &mut S) -> ErrorPolicy {
        match class {
            ErrorClass::External => ErrorPolicy::Retry,
            _ => ErrorPolicy::Stop,
        }
    }

    async fn handle_stage_finish(&self, _stage: &str, _result: &Value, _state: &mut S) {}

    async fn handle_complete(&self, _results: &HashMap<String, Value>, _state: &mut S) {}
}

/// The recovery decision a `handle_error` callback may request.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorPolicy {
    Retry,
    Restart,
    Stop,
}

/// Default no-op callback module, used when a host supplies none.
pub struct NoopModule;

#[async_trait]
impl<S: Send + 'static> AgentModule<S> for NoopModule {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: With no `input_selection`, prepared input is exactly
    /// the global input.
    #[test]
    fn prepare_input_without_selection_is_global_input() {
        let stage = StageSpec::new("a");
        let mut global = HashMap::new();
        global.insert("x".to_string(), json!(1));
        let prepared = prepare_stage_input(&stage, &global, &HashMap::new()).unwrap();
        assert_eq!(prepared.get("x"), Some(&json!(1)));
    }

    /// **Scenario**: A selection referencing an object result merges its
    /// keys over the base input (S2-style).
    #[test]
    fn prepare_input_merges_object_selection() {
        let mut stage = StageSpec::new("b");
        stage.input_selection = Some(InputSelection {
            from: "a".to_string(),
            select: None,
        });
        let mut deps = HashMap::new();
        deps.insert("a".to_string(), json!({"x": 1}));
        let prepared = prepare_stage_input(&stage, &HashMap::new(), &deps).unwrap();
        assert_eq!(prepared.get("x"), Some(&json!(1)));
    }

    /// **Scenario**: A selection with `select` projecting a scalar stashes
    /// it under `selected_input`.
    #[test]
    fn prepare_input_stashes_scalar_selection() {
        let mut stage = StageSpec::new("b");
        stage.input_selection = Some(InputSelection {
            from: "a".to_string(),
            select: Some("x".to_string()),
        });
        let mut deps = HashMap::new();
        deps.insert("a".to_string(), json!({"x": 1}));
        let prepared = prepare_stage_input(&stage, &HashMap::new(), &deps).unwrap();
        assert_eq!(prepared.get("selected_input"), Some(&json!(1)));
    }

    /// **Scenario**: Referencing an unknown upstream stage fails.
    #[test]
    fn prepare_input_missing_dependency_fails() {
        let mut stage = StageSpec::new("b");
        stage.input_selection = Some(InputSelection {
            from: "ghost".to_string(),
            select: None,
        });
        let result = prepare_stage_input(&stage, &HashMap::new(), &HashMap::new());
        assert!(result.is_err());
    }

    /// **Scenario**: The default `NoopModule` leaves state untouched and
    /// retries `external`-class failures.
    #[tokio::test]
    async fn noop_module_retries_external_errors_by_default() {
        let module = NoopModule;
        let mut state = 0u32;
        let policy = module.handle_error(ErrorClass::External, &mut state).await;
        assert_eq!(policy, ErrorPolicy::Retry);
        assert_eq!(state, 0);
    }

    /// **Scenario**: The default `NoopModule` stops on non-`external` classes.
    #[tokio::test]
    async fn noop_module_stops_on_non_external_errors_by_default() {
        let module = NoopModule;
        let mut state = 0u32;
        let policy = module.handle_error(ErrorClass::Invalid, &mut state).await;
        assert_eq!(policy, ErrorPolicy::Stop);
    }
}
