//! Runtime configuration.
//!
//! Settings are looked up through a [`ConfigSource`] every time they are
//! needed instead of being captured once at startup, so an operator can adjust
//! the timeout or proxy of a running server between calls.

pub mod defaults;
pub mod source;


pub use defaults::*;
pub use source::{ConfigSource, EnvSource, MapSource};

use crate::core::errors::PerplexityError;

/// Returns the trimmed value for `key`, treating blank values as unset.
pub fn read_var(source: &dyn ConfigSource, key: &str) -> Option<String> {
    source
        .var(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn api_key(source: &dyn ConfigSource) -> Result<String, PerplexityError> {
    read_var(source, API_KEY_ENV).ok_or_else(PerplexityError::missing_api_key)
}

/// Per-call timeout budget in milliseconds.
///
/// Unparseable or zero values fall back to [`DEFAULT_TIMEOUT_MS`].
pub fn timeout_ms(source: &dyn ConfigSource) -> u64 {
    read_var(source, TIMEOUT_ENV)
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .unwrap_or(DEFAULT_TIMEOUT_MS)
}

pub fn base_url(source: &dyn ConfigSource) -> String {
    read_var(source, BASE_URL_ENV).unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

/// Filter directive for the log subscriber, if one is configured.
pub fn log_directive(source: &dyn ConfigSource) -> Option<String> {
    read_var(source, LOG_LEVEL_ENV).or_else(|| read_var(source, "RUST_LOG"))
}

/// Origins allowed to call the HTTP endpoint from a browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    Any,
    List(Vec<String>),
}

impl AllowedOrigins {
    /// Parses `*` or a comma-separated origin list. Empty entries are dropped.
    pub fn parse(raw: &str) -> Self {
        let entries: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| entry.trim_end_matches('/').to_string())
            .collect();
        if entries.is_empty() || entries.iter().any(|entry| entry == "*") {
            AllowedOrigins::Any
        } else {
            AllowedOrigins::List(entries)
        }
    }

    pub fn allows(&self, origin: &str) -> bool {
        match self {
            AllowedOrigins::Any => true,
            AllowedOrigins::List(entries) => {
                let origin = origin.trim_end_matches('/');
                entries.iter().any(|entry| entry.eq_ignore_ascii_case(origin))
            }
        }
    }
}

/// Bind and CORS settings for the HTTP host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub port: u16,
    pub bind_address: String,
    pub allowed_origins: AllowedOrigins,
    pub session_ttl_secs: u64,
}

impl HttpSettings {
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, PerplexityError> {
        let port = match read_var(source, PORT_ENV) {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                PerplexityError::Config(format!("{PORT_ENV} must be a valid port number, got '{raw}'"))
            })?,
            None => DEFAULT_PORT,
        };
        let bind_address =
            read_var(source, BIND_ADDRESS_ENV).unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());
        let allowed_origins = read_var(source, ALLOWED_ORIGINS_ENV)
            .map(|raw| AllowedOrigins::parse(&raw))
            .unwrap_or(AllowedOrigins::Any);
        let session_ttl_secs = match read_var(source, SESSION_TTL_ENV) {
            Some(raw) => raw.parse::<u64>().ok().filter(|secs| *secs > 0).ok_or_else(|| {
                PerplexityError::Config(format!(
                    "{SESSION_TTL_ENV} must be a positive number of seconds, got '{raw}'"
                ))
            })?,
            None => DEFAULT_SESSION_TTL_SECS,
        };

        Ok(Self {
            port,
            bind_address,
            allowed_origins,
            session_ttl_secs,
        })
    }
}
