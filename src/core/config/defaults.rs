//! Environment variable names and built-in defaults.

pub const API_KEY_ENV: &str = "PERPLEXITY_API_KEY";
pub const BASE_URL_ENV: &str = "PERPLEXITY_BASE_URL";
pub const TIMEOUT_ENV: &str = "PERPLEXITY_TIMEOUT_MS";
pub const LOG_LEVEL_ENV: &str = "PERPLEXITY_LOG_LEVEL";
pub const PORT_ENV: &str = "PORT";
pub const BIND_ADDRESS_ENV: &str = "BIND_ADDRESS";
pub const ALLOWED_ORIGINS_ENV: &str = "ALLOWED_ORIGINS";
pub const SESSION_TTL_ENV: &str = "SESSION_IDLE_TIMEOUT_SECS";

/// Proxy settings in precedence order; the first non-empty one wins.
pub const PROXY_ENVS: [&str; 3] = ["PERPLEXITY_PROXY", "HTTPS_PROXY", "HTTP_PROXY"];

pub const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
/// Sessions with no traffic and no open push stream for this long are evicted.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 1800;
pub const DEFAULT_LOG_DIRECTIVE: &str = "info";
