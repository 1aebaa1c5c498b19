//! Wire payloads exchanged with the Perplexity API.
//!
//! Outbound bodies are plain serde structs. Inbound bodies are first decoded
//! into `serde_json::Value` and then validated into typed results, so a 2xx
//! reply with the wrong shape becomes a classified error instead of a panic or
//! a silently empty answer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::PerplexityError;

pub mod models;
pub mod validate;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize, Debug)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub max_results: u32,
    pub max_tokens_per_page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// A chat completion that passed shape validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub content: String,
    pub citations: Vec<String>,
    pub finish_reason: Option<String>,
    pub model: Option<String>,
    pub usage: Option<Value>,
}

pub const MISSING_CHOICES: &str = "missing or empty choices array";
pub const MISSING_CONTENT: &str = "missing message content";

/// Decodes a raw success body into a [`ChatCompletion`].
pub fn parse_chat_response(body: &str) -> Result<ChatCompletion, PerplexityError> {
    let value: Value =
        serde_json::from_str(body).map_err(|err| PerplexityError::Parse(err.to_string()))?;
    chat_completion_from_value(&value)
}

pub fn chat_completion_from_value(value: &Value) -> Result<ChatCompletion, PerplexityError> {
    let first = value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| PerplexityError::InvalidResponse(MISSING_CHOICES.to_string()))?;

    let content = first
        .pointer("/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| PerplexityError::InvalidResponse(MISSING_CONTENT.to_string()))?;

    let citations = value
        .get("citations")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(display_value).collect())
        .unwrap_or_default();

    Ok(ChatCompletion {
        content: content.to_string(),
        citations,
        finish_reason: first
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(str::to_owned),
        model: value.get("model").and_then(Value::as_str).map(str::to_owned),
        usage: value.get("usage").cloned(),
    })
}

/// Renders a JSON value for display: strings verbatim, everything else as JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Truthiness as the upstream's display rules expect it: `null`, `false`, `0`
/// and `""` are falsy, everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
