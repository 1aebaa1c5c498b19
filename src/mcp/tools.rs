//! Tool catalog: names, schemas and argument extraction.

use serde_json::{json, Map, Value};

use crate::api::models::{ASK_MODEL, REASON_MODEL, RESEARCH_MODEL};
use crate::api::SearchRequest;
use crate::core::errors::PerplexityError;

pub const ASK_TOOL: &str = "perplexity_ask";
pub const RESEARCH_TOOL: &str = "perplexity_research";
pub const REASON_TOOL: &str = "perplexity_reason";
pub const SEARCH_TOOL: &str = "perplexity_search";

pub const MAX_RESULTS_RANGE: (u32, u32) = (1, 20);
pub const MAX_TOKENS_PER_PAGE_RANGE: (u32, u32) = (256, 2048);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Ask,
    Research,
    Reason,
    Search,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::Ask,
        ToolKind::Research,
        ToolKind::Reason,
        ToolKind::Search,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::Ask => ASK_TOOL,
            ToolKind::Research => RESEARCH_TOOL,
            ToolKind::Reason => REASON_TOOL,
            ToolKind::Search => SEARCH_TOOL,
        }
    }

    /// Chat model backing a conversation tool; `None` for search.
    pub fn model(self) -> Option<&'static str> {
        match self {
            ToolKind::Ask => Some(ASK_MODEL),
            ToolKind::Research => Some(RESEARCH_MODEL),
            ToolKind::Reason => Some(REASON_MODEL),
            ToolKind::Search => None,
        }
    }

    pub fn accepts_strip_thinking(self) -> bool {
        matches!(self, ToolKind::Research | ToolKind::Reason)
    }

    /// Key under which the tool's text lands in structured output.
    pub fn result_key(self) -> &'static str {
        match self {
            ToolKind::Search => "results",
            _ => "response",
        }
    }

    fn title(self) -> &'static str {
        match self {
            ToolKind::Ask => "Ask Perplexity",
            ToolKind::Research => "Deep Research",
            ToolKind::Reason => "Advanced Reasoning",
            ToolKind::Search => "Search the Web",
        }
    }

    fn description(self) -> &'static str {
        match self {
            ToolKind::Ask => {
                "Answers a question using real-time web search via the sonar-pro model. \
                 Takes the conversation so far and returns the answer with numbered citations."
            }
            ToolKind::Research => {
                "Runs an in-depth, multi-source research pass via the sonar-deep-research model. \
                 Slow; use it for thorough reports. Set strip_thinking to drop <think> blocks."
            }
            ToolKind::Reason => {
                "Works through analytical or multi-step problems via the sonar-reasoning-pro model. \
                 Set strip_thinking to drop <think> blocks from the answer."
            }
            ToolKind::Search => {
                "Searches the web and returns ranked results with titles, URLs, snippets and dates."
            }
        }
    }

    fn input_schema(self) -> Value {
        if self == ToolKind::Search {
            return json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query"},
                    "max_results": {
                        "type": "integer",
                        "minimum": MAX_RESULTS_RANGE.0,
                        "maximum": MAX_RESULTS_RANGE.1,
                        "default": crate::core::search::DEFAULT_MAX_RESULTS,
                        "description": "Number of results to return"
                    },
                    "max_tokens_per_page": {
                        "type": "integer",
                        "minimum": MAX_TOKENS_PER_PAGE_RANGE.0,
                        "maximum": MAX_TOKENS_PER_PAGE_RANGE.1,
                        "default": crate::core::search::DEFAULT_MAX_TOKENS_PER_PAGE,
                        "description": "Content extracted per result page, in tokens"
                    },
                    "country": {
                        "type": "string",
                        "pattern": "^[A-Za-z]{2}$",
                        "description": "ISO 3166-1 alpha-2 country code to localize results"
                    }
                },
                "required": ["query"]
            });
        }

        let mut properties = Map::new();
        properties.insert(
            "messages".to_string(),
            json!({
                "type": "array",
                "description": "Conversation history, oldest first",
                "items": {
                    "type": "object",
                    "properties": {
                        "role": {"type": "string", "description": "Speaker role, e.g. system, user or assistant"},
                        "content": {"type": "string", "description": "Message text"}
                    },
                    "required": ["role", "content"]
                }
            }),
        );
        if self.accepts_strip_thinking() {
            properties.insert(
                "strip_thinking".to_string(),
                json!({
                    "type": "boolean",
                    "default": false,
                    "description": "Remove <think>...</think> reasoning blocks from the answer"
                }),
            );
        }
        json!({"type": "object", "properties": properties, "required": ["messages"]})
    }

    fn output_schema(self) -> Value {
        let key = self.result_key();
        json!({
            "type": "object",
            "properties": {key: {"type": "string"}},
            "required": [key]
        })
    }

    pub fn definition(self) -> Value {
        json!({
            "name": self.name(),
            "title": self.title(),
            "description": self.description(),
            "inputSchema": self.input_schema(),
            "outputSchema": self.output_schema(),
            "annotations": {
                "title": self.title(),
                "readOnlyHint": true,
                "openWorldHint": true
            }
        })
    }
}

pub fn tool_definitions() -> Vec<Value> {
    ToolKind::ALL.into_iter().map(ToolKind::definition).collect()
}

/// Reads the reasoning-trace toggle; anything but a JSON boolean means `false`.
pub fn strip_thinking_arg(arguments: &Map<String, Value>) -> bool {
    arguments
        .get("strip_thinking")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Builds a search request from raw tool arguments.
///
/// `query` must be a string. Numeric options that are absent or not numbers
/// take their defaults; numbers outside the documented range are rejected.
pub fn search_request_from_args(
    arguments: &Map<String, Value>,
) -> Result<SearchRequest, PerplexityError> {
    let query = arguments
        .get("query")
        .and_then(Value::as_str)
        .ok_or_else(|| shape_error("'query' must be a string"))?;

    let mut request = SearchRequest::new(query);
    if let Some(value) = bounded_integer(arguments, "max_results", MAX_RESULTS_RANGE)? {
        request.max_results = value;
    }
    if let Some(value) =
        bounded_integer(arguments, "max_tokens_per_page", MAX_TOKENS_PER_PAGE_RANGE)?
    {
        request.max_tokens_per_page = value;
    }
    if let Some(country) = arguments.get("country").and_then(Value::as_str) {
        let country = country.trim();
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(shape_error(
                "'country' must be an ISO 3166-1 alpha-2 code such as \"US\"",
            ));
        }
        request.country = Some(country.to_ascii_uppercase());
    }
    Ok(request)
}

fn bounded_integer(
    arguments: &Map<String, Value>,
    key: &str,
    (min, max): (u32, u32),
) -> Result<Option<u32>, PerplexityError> {
    let Some(number) = arguments.get(key).and_then(Value::as_f64) else {
        return Ok(None);
    };
    if number.fract() != 0.0 || number < f64::from(min) || number > f64::from(max) {
        return Err(shape_error(&format!(
            "'{key}' must be an integer between {min} and {max}"
        )));
    }
    Ok(Some(number as u32))
}

fn shape_error(detail: &str) -> PerplexityError {
    PerplexityError::Shape(format!("Invalid arguments for {SEARCH_TOOL}: {detail}"))
}
