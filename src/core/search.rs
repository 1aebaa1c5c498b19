use serde_json::Value;
use tracing::debug;

use crate::api::models::SEARCH_ENDPOINT;
use crate::api::{display_value, is_truthy, SearchRequest};
use crate::core::errors::PerplexityError;
use crate::core::upstream::Upstream;

pub const DEFAULT_MAX_RESULTS: u32 = 10;
pub const DEFAULT_MAX_TOKENS_PER_PAGE: u32 = 1024;
pub const NO_RESULTS: &str = "No search results found.";

#[derive(Clone)]
pub struct SearchClient {
    upstream: Upstream,
}

impl SearchClient {
    pub fn new(upstream: Upstream) -> Self {
        Self { upstream }
    }

    pub async fn search(&self, request: SearchRequest) -> Result<String, PerplexityError> {
        debug!(
            max_results = request.max_results,
            max_tokens_per_page = request.max_tokens_per_page,
            country = request.country.as_deref().unwrap_or("-"),
            "Requesting search"
        );
        let body = self.upstream.post_json(SEARCH_ENDPOINT, &request).await?;
        let value: Value =
            serde_json::from_str(&body).map_err(|err| PerplexityError::Parse(err.to_string()))?;
        Ok(format_search_results(&value))
    }
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results: DEFAULT_MAX_RESULTS,
            max_tokens_per_page: DEFAULT_MAX_TOKENS_PER_PAGE,
            country: None,
        }
    }
}

/// Renders a search response as a numbered, human-readable list.
///
/// A missing or non-array `results` field yields [`NO_RESULTS`]. Optional
/// fields (`snippet`, `date`) are skipped when absent or falsy, while `title`
/// and `url` are always rendered.
pub fn format_search_results(response: &Value) -> String {
    let Some(results) = response.get("results").and_then(Value::as_array) else {
        return NO_RESULTS.to_string();
    };

    let mut output = format!("Found {} search results:\n\n", results.len());
    for (index, result) in results.iter().enumerate() {
        output.push_str(&format!(
            "{}. **{}**\n",
            index + 1,
            required_field(result, "title")
        ));
        output.push_str(&format!("   URL: {}\n", required_field(result, "url")));
        if let Some(snippet) = optional_field(result, "snippet") {
            output.push_str(&format!("   {snippet}\n"));
        }
        if let Some(date) = optional_field(result, "date") {
            output.push_str(&format!("   Date: {date}\n"));
        }
        output.push('\n');
    }
    output
}

fn required_field(result: &Value, key: &str) -> String {
    result
        .get(key)
        .map(display_value)
        .unwrap_or_else(|| "null".to_string())
}

fn optional_field(result: &Value, key: &str) -> Option<String> {
    result
        .get(key)
        .filter(|value| is_truthy(value))
        .map(display_value)
}
