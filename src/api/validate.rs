//! Structural validation of conversation turns.

use serde_json::Value;

use crate::api::ChatMessage;
use crate::core::errors::PerplexityError;

/// Checks that `input` is an array of `{role, content}` string pairs.
///
/// `context` names the caller (usually the tool) in the array-level error.
/// Element errors report the 0-based index of the first offending element.
pub fn validate_messages(input: &Value, context: &str) -> Result<Vec<ChatMessage>, PerplexityError> {
    let items = input.as_array().ok_or_else(|| {
        PerplexityError::Shape(format!(
            "Invalid arguments for {context}: 'messages' must be an array"
        ))
    })?;

    items
        .iter()
        .enumerate()
        .map(|(index, item)| validate_message(index, item))
        .collect()
}

fn validate_message(index: usize, item: &Value) -> Result<ChatMessage, PerplexityError> {
    let object = item.as_object().ok_or_else(|| {
        PerplexityError::Shape(format!("Invalid message at index {index}: must be an object"))
    })?;

    let role = object.get("role").and_then(Value::as_str).ok_or_else(|| {
        PerplexityError::Shape(format!(
            "Invalid message at index {index}: 'role' must be a string"
        ))
    })?;
    let content = object.get("content").and_then(Value::as_str).ok_or_else(|| {
        PerplexityError::Shape(format!(
            "Invalid message at index {index}: 'content' must be a string"
        ))
    })?;

    Ok(ChatMessage {
        role: role.to_string(),
        content: content.to_string(),
    })
}
