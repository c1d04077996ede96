//! Message and part model shared by stages, the LLM processor, and tools.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One piece of a message's content.
///
/// Tagged on the wire as `{"type": "text", ...}` etc., matching the shape
/// providers actually send/receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    Data { data: Value },
    File {
        name: Option<String>,
        mime: Option<String>,
        bytes: Option<Vec<u8>>,
        uri: Option<String>,
    },
    FunctionCall {
        id: String,
        name: String,
        arguments: Value,
    },
    FunctionResult {
        id: String,
        name: String,
        result: Value,
    },
    Thought { text: String },
}

/// The role a message is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single turn in a conversation: a role plus one or more parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Message {
            role,
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Message::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Message::text(Role::User, text)
    }

    pub fn assistant(parts: Vec<Part>) -> Self {
        Message {
            role: Role::Assistant,
            parts,
        }
    }

    /// Concatenates every `Part::Text`/`Part::Thought` fragment, ignoring
    /// structured parts. Used where a plain-text view is needed (e.g.
    /// composing a tool-not-found follow-up).
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } | Part::Thought { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Every function-call part in this message, in order.
    pub fn function_calls(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.parts.iter().filter_map(|p| match p {
            Part::FunctionCall {
                id,
                name,
                arguments,
            } => Some((id.as_str(), name.as_str(), arguments)),
            _ => None,
        })
    }
}
