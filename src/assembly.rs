//! Message assembly: template expansion, history splice, tool-result
//! messages.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::message::{Message, Part, Role};

static TEMPLATE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<%=\s*([A-Za-z_][A-Za-z0-9_]*)\s*%>").unwrap());

/// Renders `<%= name %>` expressions in `text` against the top-level keys of
/// `input`. Unbound names are left untouched (conservative: never panics on
/// an absent binding, since the stage input map may legitimately omit
/// optional keys).
pub fn expand_template(text: &str, input: &HashMap<String, Value>) -> String {
    TEMPLATE_PATTERN
        .replace_all(text, |caps: &regex::Captures| {
            let name = &caps[1];
            match input.get(name) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Expands every `Part::Text` in `parts` against `input`. `Part::Data` is
/// forwarded unchanged (non-string data is already structured JSON content).
pub fn expand_parts(parts: &[Part], input: &HashMap<String, Value>) -> Vec<Part> {
    parts
        .iter()
        .map(|p| match p {
            Part::Text { text } => Part::Text {
                text: expand_template(text, input),
            },
            other => other.clone(),
        })
        .collect()
}

/// Expands every message's parts exactly once. Called only when the Stage
/// Runtime is entering the LLM loop for the first time — on later tool-loop
/// iterations the existing history is reused verbatim.
pub fn assemble_initial_history(
    declared: &[Message],
    input: &HashMap<String, Value>,
) -> Vec<Message> {
    declared
        .iter()
        .map(|m| Message {
            role: m.role,
            parts: expand_parts(&m.parts, input),
        })
        .collect()
}

/// Wraps a provider response as an assistant message appended to history.
pub fn append_response(history: &mut Vec<Message>, response: Vec<Part>) {
    history.push(Message::assistant(response));
}

/// Splits an assistant turn's parts into (intermediate content, function
/// calls). Intermediate content (thoughts, text) must precede the follow-up
/// tool-results turn as its own assistant message.
pub fn separate_function_calls(parts: &[Part]) -> (Vec<Part>, Vec<Part>) {
    let mut content = Vec::new();
    let mut calls = Vec::new();
    for part in parts {
        match part {
            Part::FunctionCall { .. } => calls.push(part.clone()),
            other => content.push(other.clone()),
        }
    }
    (content, calls)
}

/// One tool call's outcome, ready to be rendered into a `FunctionResultPart`.
pub struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    pub result: Result<Value, String>,
}

/// Builds the follow-up turn for a batch of tool calls executed within one
/// assistant turn: if there was non-empty intermediate content, it is
/// recorded as a preceding assistant message so the provider sees it ahead
/// of the tool-results user message. Results preserve call order within the
/// single user message.
pub fn merge_intermediate_content_with_results(
    intermediate_content: Vec<Part>,
    outcomes: Vec<ToolOutcome>,
) -> Vec<Message> {
    let mut messages = Vec::new();
    if !intermediate_content.is_empty() {
        messages.push(Message::assistant(intermediate_content));
    }
    let parts = outcomes
        .into_iter()
        .map(|outcome| {
            let result = match outcome.result {
                Ok(v) => v,
                Err(cause) => Value::String(cause),
            };
            Part::FunctionResult {
                id: outcome.call_id,
                name: outcome.name,
                result,
            }
        })
        .collect();
    messages.push(Message {
        role: Role::User,
        parts,
    });
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: A bound template variable is substituted.
    #[test]
    fn template_substitutes_bound_variable() {
        let mut input = HashMap::new();
        input.insert("name".to_string(), json!("world"));
        assert_eq!(expand_template("hello <%= name %>", &input), "hello world");
    }

    /// **Scenario**: An unbound template variable is left as-is.
    #[test]
    fn template_leaves_unbound_variable_untouched() {
        let input = HashMap::new();
        assert_eq!(expand_template("hi <%= missing %>", &input), "hi <%= missing %>");
    }

    /// **Scenario**: `separate_function_calls` splits calls out from content,
    /// preserving each group's relative order.
    #[test]
    fn separate_function_calls_splits_groups() {
        let parts = vec![
            Part::Thought { text: "thinking".into() },
            Part::FunctionCall {
                id: "1".into(),
                name: "echo".into(),
                arguments: json!({}),
            },
            Part::Text { text: "ok".into() },
        ];
        let (content, calls) = separate_function_calls(&parts);
        assert_eq!(content.len(), 2);
        assert_eq!(calls.len(), 1);
    }

    /// **Scenario**: With non-empty intermediate content, the merge produces
    /// an assistant message followed by the tool-results user message, in
    /// call order.
    #[test]
    fn merge_preserves_content_then_results_ordering() {
        let content = vec![Part::Thought { text: "thinking".into() }];
        let outcomes = vec![
            ToolOutcome {
                call_id: "1".into(),
                name: "a".into(),
                result: Ok(json!(1)),
            },
            ToolOutcome {
                call_id: "2".into(),
                name: "b".into(),
                result: Err("boom".into()),
            },
        ];
        let messages = merge_intermediate_content_with_results(content, outcomes);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[1].role, Role::User);
        match &messages[1].parts[1] {
            Part::FunctionResult { id, result, .. } => {
                assert_eq!(id, "2");
                assert_eq!(result, &json!("boom"));
            }
            _ => panic!("expected function result"),
        }
    }

    /// **Scenario**: With no intermediate content, only the results message
    /// is produced.
    #[test]
    fn merge_without_content_yields_single_message() {
        let outcomes = vec![ToolOutcome {
            call_id: "1".into(),
            name: "a".into(),
            result: Ok(json!(1)),
        }];
        let messages = merge_intermediate_content_with_results(vec![], outcomes);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }
}
