use tracing::debug;

use crate::api::models::CHAT_COMPLETIONS_ENDPOINT;
use crate::api::{parse_chat_response, ChatMessage, ChatRequest};
use crate::core::errors::PerplexityError;
use crate::core::upstream::Upstream;

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

#[derive(Clone)]
pub struct CompletionClient {
    upstream: Upstream,
}

impl CompletionClient {
    pub fn new(upstream: Upstream) -> Self {
        Self { upstream }
    }

    /// Runs one chat completion and returns the post-processed answer text.
    ///
    /// A single attempt is made; retrying is left to the caller.
    pub async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        strip_reasoning: bool,
    ) -> Result<String, PerplexityError> {
        debug!(model, turns = messages.len(), strip_reasoning, "Requesting completion");
        let request = ChatRequest {
            model: model.to_string(),
            messages,
        };
        let body = self
            .upstream
            .post_json(CHAT_COMPLETIONS_ENDPOINT, &request)
            .await?;
        let completion = parse_chat_response(&body)?;
        debug!(
            model = completion.model.as_deref().unwrap_or(model),
            finish_reason = completion.finish_reason.as_deref().unwrap_or("-"),
            citations = completion.citations.len(),
            usage = ?completion.usage,
            "Completion received"
        );

        let content = if strip_reasoning {
            strip_thinking(&completion.content)
        } else {
            completion.content
        };
        Ok(append_citations(content, &completion.citations))
    }
}

/// Removes every complete `<think>...</think>` span and trims the result.
///
/// Spans match minimally and never overlap. Tags without a partner are kept.
/// If the text holds a tag but no complete span, it is returned untouched,
/// without trimming.
pub fn strip_thinking(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    let mut stripped_any = false;

    while let Some(open) = rest.find(THINK_OPEN) {
        let after_open = &rest[open + THINK_OPEN.len()..];
        let Some(close) = after_open.find(THINK_CLOSE) else {
            break;
        };
        output.push_str(&rest[..open]);
        rest = &after_open[close + THINK_CLOSE.len()..];
        stripped_any = true;
    }
    output.push_str(rest);

    let has_tag = text.contains(THINK_OPEN) || text.contains(THINK_CLOSE);
    if has_tag && !stripped_any {
        return text.to_string();
    }
    output.trim().to_string()
}

/// Appends a numbered `Citations:` block when there is at least one citation.
pub fn append_citations(mut content: String, citations: &[String]) -> String {
    if citations.is_empty() {
        return content;
    }
    content.push_str("\n\nCitations:\n");
    for (index, citation) in citations.iter().enumerate() {
        content.push_str(&format!("[{}] {}\n", index + 1, citation));
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{MapSource, API_KEY_ENV, BASE_URL_ENV, TIMEOUT_ENV};
    use crate::utils::test_utils::{spawn_stub, SharedSource, StubReply};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn client_for(base_url: &str, extra: &[(&str, &str)]) -> CompletionClient {
        let mut source = MapSource::new()
            .with(API_KEY_ENV, "test-key")
            .with(BASE_URL_ENV, base_url);
        for (key, value) in extra {
            source = source.with(key, value);
        }
        CompletionClient::new(Upstream::new(Arc::new(source)).unwrap())
    }

    fn user(content: &str) -> Vec<ChatMessage> {
        vec![ChatMessage {
            role: "user".to_string(),
            content: content.to_string(),
        }]
    }

    #[test]
    fn strip_thinking_removes_spans_and_trims() {
        assert_eq!(
            strip_thinking("<think>plan\nsteps</think>\n\nAnswer"),
            "Answer"
        );
        assert_eq!(
            strip_thinking("A <think>x</think>B<think>y</think> C"),
            "A B C"
        );
    }

    #[test]
    fn strip_thinking_matches_minimally() {
        assert_eq!(
            strip_thinking("<think>a</think>keep</think>"),
            "keep</think>"
        );
        assert_eq!(strip_thinking("<think>a<think>b</think>c"), "c");
    }

    #[test]
    fn strip_thinking_without_tags_only_trims() {
        assert_eq!(strip_thinking("  plain answer \n"), "plain answer");
        assert_eq!(strip_thinking("plain"), "plain");
    }

    #[test]
    fn strip_thinking_leaves_unbalanced_tags_untouched() {
        let unclosed = "  <think>never closed\nanswer  ";
        assert_eq!(strip_thinking(unclosed), unclosed);
        let stray_close = " answer</think> ";
        assert_eq!(strip_thinking(stray_close), stray_close);
    }

    #[test]
    fn append_citations_numbers_in_order() {
        let text = append_citations(
            "Body".to_string(),
            &["https://a.example".to_string(), "https://b.example".to_string()],
        );
        assert_eq!(
            text,
            "Body\n\nCitations:\n[1] https://a.example\n[2] https://b.example\n"
        );
        assert_eq!(append_citations("Body".to_string(), &[]), "Body");
    }

    #[tokio::test]
    async fn complete_returns_content_with_citations() {
        let stub = spawn_stub(StubReply::json(json!({
            "choices": [{"message": {"role": "assistant", "content": "<think>hm</think> Rust is fast."}}],
            "citations": ["https://a.example", "https://b.example", "https://c.example"]
        })))
        .await;
        let client = client_for(&stub.base_url, &[]);

        let text = client.complete(user("why rust"), "sonar-reasoning-pro", true).await.unwrap();

        assert_eq!(
            text,
            "Rust is fast.\n\nCitations:\n[1] https://a.example\n[2] https://b.example\n[3] https://c.example\n"
        );
        let captured = stub.requests().await;
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].path, "/chat/completions");
        assert_eq!(captured[0].authorization.as_deref(), Some("Bearer test-key"));
        assert_eq!(
            captured[0].body,
            json!({"model": "sonar-reasoning-pro", "messages": [{"role": "user", "content": "why rust"}]})
        );
    }

    #[tokio::test]
    async fn complete_keeps_reasoning_when_not_stripping() {
        let stub = spawn_stub(StubReply::json(json!({
            "choices": [{"message": {"content": "<think>hm</think> ok"}}]
        })))
        .await;
        let client = client_for(&stub.base_url, &[]);
        let text = client.complete(user("q"), "sonar-pro", false).await.unwrap();
        assert_eq!(text, "<think>hm</think> ok");
    }

    #[tokio::test]
    async fn complete_classifies_malformed_bodies() {
        let stub = spawn_stub(StubReply::json(json!({}))).await;
        let err = client_for(&stub.base_url, &[])
            .complete(user("q"), "sonar-pro", false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing or empty choices array"));

        let stub = spawn_stub(StubReply::json(json!({"choices": [{}]}))).await;
        let err = client_for(&stub.base_url, &[])
            .complete(user("q"), "sonar-pro", false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_response");
        assert!(err.to_string().contains("missing message content"));

        let stub = spawn_stub(StubReply::text(200, "not json")).await;
        let err = client_for(&stub.base_url, &[])
            .complete(user("q"), "sonar-pro", false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "parse");
    }

    #[tokio::test]
    async fn complete_surfaces_upstream_status_and_body() {
        let stub = spawn_stub(StubReply::text(401, r#"{"error":"bad key"}"#)).await;
        let err = client_for(&stub.base_url, &[])
            .complete(user("q"), "sonar-pro", false)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PerplexityError::Upstream {
                status: 401,
                status_text: "Unauthorized".to_string(),
                body: r#"{"error":"bad key"}"#.to_string(),
            }
        );
    }

    #[tokio::test]
    async fn complete_times_out_at_configured_budget() {
        let stub = spawn_stub(StubReply::Hang).await;
        let client = client_for(&stub.base_url, &[(TIMEOUT_ENV, "100")]);

        let started = Instant::now();
        let err = client.complete(user("q"), "sonar-pro", false).await.unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(err, PerplexityError::Timeout { timeout_ms: 100 });
        assert!(err.to_string().contains("100"));
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn complete_requires_credential_before_any_request() {
        let stub = spawn_stub(StubReply::json(json!({}))).await;
        let source = MapSource::new().with(BASE_URL_ENV, &stub.base_url);
        let client = CompletionClient::new(Upstream::new(Arc::new(source)).unwrap());

        let err = client.complete(user("q"), "sonar-pro", false).await.unwrap_err();
        assert_eq!(err.kind(), "config");
        assert!(stub.requests().await.is_empty());
    }

    #[tokio::test]
    async fn complete_reports_unreachable_upstream_as_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client_for(&format!("http://{addr}"), &[])
            .complete(user("q"), "sonar-pro", false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "network");
        assert!(err
            .to_string()
            .starts_with("Network error while calling Perplexity API:"));
    }

    #[tokio::test]
    async fn proxy_setting_routes_calls_and_is_read_per_call() {
        let proxy = spawn_stub(StubReply::json(json!({
            "choices": [{"message": {"content": "via proxy"}}]
        })))
        .await;
        let other_proxy = spawn_stub(StubReply::json(json!({
            "choices": [{"message": {"content": "via other proxy"}}]
        })))
        .await;
        let source = SharedSource::new(&[
            (API_KEY_ENV, "test-key"),
            (BASE_URL_ENV, "http://upstream.invalid"),
            ("PERPLEXITY_PROXY", &proxy.base_url),
        ]);
        let client = CompletionClient::new(Upstream::new(source.clone()).unwrap());

        let text = client.complete(user("q"), "sonar-pro", false).await.unwrap();
        assert_eq!(text, "via proxy");
        let captured = proxy.requests().await;
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].path, "/chat/completions");
        assert_eq!(captured[0].authorization.as_deref(), Some("Bearer test-key"));

        source.remove("PERPLEXITY_PROXY");
        source.set("HTTPS_PROXY", &other_proxy.base_url);
        let text = client.complete(user("q"), "sonar-pro", false).await.unwrap();
        assert_eq!(text, "via other proxy");
        assert_eq!(proxy.requests().await.len(), 1);
        assert_eq!(other_proxy.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn timeout_change_applies_to_the_next_call() {
        let stub = spawn_stub(StubReply::Hang).await;
        let source = SharedSource::new(&[
            (API_KEY_ENV, "test-key"),
            (BASE_URL_ENV, &stub.base_url),
            (TIMEOUT_ENV, "50"),
        ]);
        let client = CompletionClient::new(Upstream::new(source.clone()).unwrap());

        let err = client.complete(user("q"), "sonar-pro", false).await.unwrap_err();
        assert_eq!(err, PerplexityError::Timeout { timeout_ms: 50 });

        source.set(TIMEOUT_ENV, "250");
        let started = Instant::now();
        let err = client.complete(user("q"), "sonar-pro", false).await.unwrap_err();
        assert_eq!(err, PerplexityError::Timeout { timeout_ms: 250 });
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert_eq!(stub.requests().await.len(), 2);
    }
}
