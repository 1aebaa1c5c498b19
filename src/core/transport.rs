//! Outbound HTTP with per-call proxy resolution.
//!
//! The proxy is resolved from configuration on every dispatch, so switching
//! between a direct route and a forward proxy needs no restart. Both routes go
//! through `reqwest` and return the same response and error types.

use std::sync::Mutex;

use tracing::debug;

use crate::core::config::{read_var, ConfigSource, PROXY_ENVS};
use crate::core::errors::PerplexityError;
use crate::utils::url::redact_userinfo;

/// Returns the first non-empty proxy setting, in precedence order.
pub fn resolve_proxy(source: &dyn ConfigSource) -> Option<String> {
    PROXY_ENVS.iter().find_map(|key| read_var(source, key))
}

pub struct ProxyAwareTransport {
    direct: reqwest::Client,
    proxied: Mutex<Option<(String, reqwest::Client)>>,
}

impl ProxyAwareTransport {
    pub fn new() -> Result<Self, PerplexityError> {
        // The direct client must not pick proxies up from the environment on
        // its own; routing is decided by `resolve_proxy` alone.
        let direct = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|err| PerplexityError::Config(format!("Unable to build HTTP client: {err}")))?;
        Ok(Self {
            direct,
            proxied: Mutex::new(None),
        })
    }

    /// Picks the client for the current proxy setting.
    pub fn client_for(&self, proxy: Option<&str>) -> Result<reqwest::Client, PerplexityError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };

        let mut cached = self
            .proxied
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some((url, client)) = cached.as_ref() {
            if url == proxy {
                return Ok(client.clone());
            }
        }

        debug!(proxy = %redact_userinfo(proxy), "Building proxy client");
        let proxy_config = reqwest::Proxy::all(proxy)
            .map_err(|err| PerplexityError::Config(format!("Invalid proxy URL: {err}")))?;
        let client = reqwest::Client::builder()
            .proxy(proxy_config)
            .build()
            .map_err(|err| PerplexityError::Config(format!("Unable to build proxy client: {err}")))?;
        *cached = Some((proxy.to_string(), client.clone()));
        Ok(client)
    }

    /// Sends a JSON POST with a bearer credential over the resolved route.
    ///
    /// Failures below HTTP semantics come back as [`PerplexityError::Network`].
    /// The caller owns the timeout around this future.
    pub async fn dispatch(
        &self,
        source: &dyn ConfigSource,
        url: &str,
        api_key: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, PerplexityError> {
        let proxy = resolve_proxy(source);
        debug!(url = %url, proxied = proxy.is_some(), "Dispatching Perplexity request");
        let client = self.client_for(proxy.as_deref())?;
        client
            .post(url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|err| PerplexityError::Network(err.to_string()))
    }
}
