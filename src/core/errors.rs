//! Error taxonomy for upstream calls and tool argument handling.

use std::fmt;

use crate::core::config::TIMEOUT_ENV;

/// Errors surfaced by the completion and search clients.
///
/// Every variant renders to a message that is safe to hand back to a protocol
/// client verbatim, so an operator can diagnose a failure from the tool result
/// alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PerplexityError {
    /// Missing or unusable configuration (credential, proxy URL).
    Config(String),
    /// Caller input did not have the expected shape. Never reaches the network.
    Shape(String),
    /// The upstream did not answer within the configured budget.
    Timeout { timeout_ms: u64 },
    /// Transport failure below HTTP semantics (DNS, refused connection, reset).
    Network(String),
    /// Upstream answered with a non-success status.
    Upstream {
        status: u16,
        status_text: String,
        body: String,
    },
    /// Upstream answered 2xx with a body of the wrong shape.
    InvalidResponse(String),
    /// Upstream answered 2xx with a body that is not JSON.
    Parse(String),
}

impl PerplexityError {
    pub fn missing_api_key() -> Self {
        PerplexityError::Config(format!(
            "{} environment variable is required",
            crate::core::config::API_KEY_ENV
        ))
    }

    /// Short classification label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PerplexityError::Config(_) => "config",
            PerplexityError::Shape(_) => "shape",
            PerplexityError::Timeout { .. } => "timeout",
            PerplexityError::Network(_) => "network",
            PerplexityError::Upstream { .. } => "upstream",
            PerplexityError::InvalidResponse(_) => "invalid_response",
            PerplexityError::Parse(_) => "parse",
        }
    }
}

impl fmt::Display for PerplexityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerplexityError::Config(msg) => write!(f, "{msg}"),
            PerplexityError::Shape(msg) => write!(f, "{msg}"),
            PerplexityError::Timeout { timeout_ms } => write!(
                f,
                "Request timeout: Perplexity API did not respond within {timeout_ms}ms. \
                 Consider increasing {TIMEOUT_ENV}."
            ),
            PerplexityError::Network(cause) => {
                write!(f, "Network error while calling Perplexity API: {cause}")
            }
            PerplexityError::Upstream {
                status,
                status_text,
                body,
            } => write!(f, "Perplexity API error: {status} {status_text}\n{body}"),
            PerplexityError::InvalidResponse(detail) => {
                write!(f, "Invalid API response: {detail}")
            }
            PerplexityError::Parse(cause) => write!(
                f,
                "Failed to parse JSON response from Perplexity API: {cause}"
            ),
        }
    }
}

impl std::error::Error for PerplexityError {}
