use rust_mcp_schema::{
    CallToolResult, ContentBlock, Implementation, InitializeResult, ServerCapabilities,
    ServerCapabilitiesTools, TextContent,
};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::api::validate::validate_messages;
use crate::core::completion::CompletionClient;
use crate::core::errors::PerplexityError;
use crate::core::search::SearchClient;
use crate::core::upstream::Upstream;
use crate::mcp::tools::{
    search_request_from_args, strip_thinking_arg, tool_definitions, ToolKind,
};

pub const SERVER_NAME: &str = "perplexity-mcp";

const INSTRUCTIONS: &str = "Tools for real-time web answers, deep research, step-by-step \
reasoning and raw web search backed by the Perplexity API.";

/// Protocol-level server state shared by every channel.
pub struct McpServer {
    completion: CompletionClient,
    search: SearchClient,
}

impl McpServer {
    pub fn new(upstream: Upstream) -> Self {
        Self {
            completion: CompletionClient::new(upstream.clone()),
            search: SearchClient::new(upstream),
        }
    }

    pub fn initialize_result(&self, protocol_version: &str) -> InitializeResult {
        InitializeResult {
            capabilities: ServerCapabilities {
                tools: Some(ServerCapabilitiesTools::default()),
                ..ServerCapabilities::default()
            },
            instructions: Some(INSTRUCTIONS.to_string()),
            meta: None,
            protocol_version: protocol_version.to_string(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("Perplexity MCP Server".to_string()),
                description: None,
                icons: Vec::new(),
                website_url: None,
            },
        }
    }

    pub fn list_tools(&self) -> Value {
        json!({ "tools": tool_definitions() })
    }

    /// Runs a tool. Failures come back as an `isError` result, never as a
    /// protocol error, so the calling model can read them.
    pub async fn call_tool(&self, name: &str, arguments: Option<&Map<String, Value>>) -> CallToolResult {
        let Some(tool) = ToolKind::from_name(name) else {
            warn!(tool = name, "Unknown tool requested");
            return error_result(format!("Tool not found: {name}"));
        };

        let empty = Map::new();
        let arguments = arguments.unwrap_or(&empty);
        info!(tool = tool.name(), "Calling tool");

        match self.run(tool, arguments).await {
            Ok(text) => text_result(tool, text),
            Err(err) => {
                warn!(tool = tool.name(), kind = err.kind(), error = %err, "Tool call failed");
                error_result(err.to_string())
            }
        }
    }

    async fn run(&self, tool: ToolKind, arguments: &Map<String, Value>) -> Result<String, PerplexityError> {
        match tool.model() {
            Some(model) => {
                let messages = arguments.get("messages").unwrap_or(&Value::Null);
                let messages = validate_messages(messages, tool.name())?;
                let strip = tool.accepts_strip_thinking() && strip_thinking_arg(arguments);
                self.completion.complete(messages, model, strip).await
            }
            None => {
                let request = search_request_from_args(arguments)?;
                self.search.search(request).await
            }
        }
    }
}

fn text_result(tool: ToolKind, text: String) -> CallToolResult {
    let mut structured = Map::new();
    structured.insert(tool.result_key().to_string(), Value::String(text.clone()));
    CallToolResult {
        content: vec![ContentBlock::TextContent(TextContent::new(text, None, None))],
        is_error: None,
        meta: None,
        structured_content: Some(structured),
    }
}

fn error_result(message: String) -> CallToolResult {
    CallToolResult {
        content: vec![ContentBlock::TextContent(TextContent::new(message, None, None))],
        is_error: Some(true),
        meta: None,
        structured_content: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{MapSource, API_KEY_ENV, BASE_URL_ENV};
    use crate::utils::test_utils::{spawn_stub, StubReply};
    use std::sync::Arc;

    fn server_for(base_url: &str) -> McpServer {
        let source = MapSource::new()
            .with(API_KEY_ENV, "test-key")
            .with(BASE_URL_ENV, base_url);
        McpServer::new(Upstream::new(Arc::new(source)).unwrap())
    }

    fn text_of(result: &CallToolResult) -> &str {
        match &result.content[0] {
            ContentBlock::TextContent(text) => &text.text,
            other => panic!("expected text content, got {other:?}"),
        }
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn initialize_advertises_tools_and_identity() {
        let server = server_for("http://127.0.0.1:9");
        let result = server.initialize_result("2025-06-18");
        assert_eq!(result.protocol_version, "2025-06-18");
        assert_eq!(result.server_info.name, SERVER_NAME);
        assert!(result.capabilities.tools.is_some());
    }

    #[tokio::test]
    async fn ask_returns_text_and_structured_response() {
        let stub = spawn_stub(StubReply::json(json!({
            "choices": [{"message": {"content": "Hello."}}],
            "citations": ["https://a.example"]
        })))
        .await;
        let server = server_for(&stub.base_url);

        let result = server
            .call_tool(
                "perplexity_ask",
                Some(&args(json!({"messages": [{"role": "user", "content": "hi"}]}))),
            )
            .await;

        assert_eq!(result.is_error, None);
        let expected = "Hello.\n\nCitations:\n[1] https://a.example\n";
        assert_eq!(text_of(&result), expected);
        assert_eq!(
            result.structured_content.unwrap().get("response"),
            Some(&Value::String(expected.to_string()))
        );
        assert_eq!(stub.requests().await[0].body["model"], "sonar-pro");
    }

    #[tokio::test]
    async fn strip_thinking_is_ignored_for_ask() {
        let stub = spawn_stub(StubReply::json(json!({
            "choices": [{"message": {"content": "<think>x</think>y"}}]
        })))
        .await;
        let server = server_for(&stub.base_url);
        let arguments = args(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "strip_thinking": true
        }));

        let ask = server.call_tool("perplexity_ask", Some(&arguments)).await;
        assert_eq!(text_of(&ask), "<think>x</think>y");

        let reason = server.call_tool("perplexity_reason", Some(&arguments)).await;
        assert_eq!(text_of(&reason), "y");
        assert_eq!(stub.requests().await[1].body["model"], "sonar-reasoning-pro");
    }

    #[tokio::test]
    async fn search_uses_results_key() {
        let stub = spawn_stub(StubReply::json(json!({"results": []}))).await;
        let server = server_for(&stub.base_url);
        let result = server
            .call_tool("perplexity_search", Some(&args(json!({"query": "q"}))))
            .await;
        assert!(result.structured_content.unwrap().contains_key("results"));
    }

    #[tokio::test]
    async fn failures_become_error_results_without_upstream_calls() {
        let stub = spawn_stub(StubReply::json(json!({}))).await;
        let server = server_for(&stub.base_url);

        let unknown = server.call_tool("perplexity_nope", None).await;
        assert_eq!(unknown.is_error, Some(true));
        assert_eq!(text_of(&unknown), "Tool not found: perplexity_nope");

        let missing = server.call_tool("perplexity_research", None).await;
        assert_eq!(missing.is_error, Some(true));
        assert_eq!(
            text_of(&missing),
            "Invalid arguments for perplexity_research: 'messages' must be an array"
        );

        let bad_role = server
            .call_tool(
                "perplexity_ask",
                Some(&args(json!({"messages": [{"role": 1, "content": "x"}]}))),
            )
            .await;
        assert_eq!(bad_role.is_error, Some(true));
        assert!(stub.requests().await.is_empty());
    }

    #[tokio::test]
    async fn upstream_errors_surface_as_error_text() {
        let stub = spawn_stub(StubReply::text(500, "boom")).await;
        let server = server_for(&stub.base_url);
        let result = server
            .call_tool("perplexity_search", Some(&args(json!({"query": "q"}))))
            .await;
        assert_eq!(result.is_error, Some(true));
        assert_eq!(
            text_of(&result),
            "Perplexity API error: 500 Internal Server Error\nboom"
        );
    }
}
