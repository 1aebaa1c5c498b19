//! Shared request lifecycle for the completion and search clients.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::config::{self, ConfigSource};
use crate::core::errors::PerplexityError;
use crate::core::transport::ProxyAwareTransport;
use crate::utils::url::construct_api_url;

pub const UNREADABLE_ERROR_BODY: &str = "Unable to parse error response";

/// Issues one authenticated POST per call against a Perplexity endpoint.
///
/// Cheap to clone; clones share the configuration source and transport.
#[derive(Clone)]
pub struct Upstream {
    source: Arc<dyn ConfigSource>,
    transport: Arc<ProxyAwareTransport>,
}

impl Upstream {
    pub fn new(source: Arc<dyn ConfigSource>) -> Result<Self, PerplexityError> {
        Ok(Self {
            source,
            transport: Arc::new(ProxyAwareTransport::new()?),
        })
    }

    pub fn source(&self) -> &dyn ConfigSource {
        self.source.as_ref()
    }

    /// Posts `body` to `endpoint` and returns the raw success body.
    ///
    /// The credential check happens before anything else, and the timeout is
    /// read from configuration on every call. The timer covers the whole
    /// exchange including the body read and is dropped on every exit path.
    pub async fn post_json<T: Serialize>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<String, PerplexityError> {
        let api_key = config::api_key(self.source())?;
        let timeout_ms = config::timeout_ms(self.source());
        let url = construct_api_url(&config::base_url(self.source()), endpoint);
        let payload = serde_json::to_value(body)
            .map_err(|err| PerplexityError::Shape(format!("Unable to encode request: {err}")))?;

        let started = Instant::now();
        let exchange = self.exchange(&url, &api_key, &payload);
        let result = match tokio::time::timeout(Duration::from_millis(timeout_ms), exchange).await {
            Ok(result) => result,
            Err(_) => Err(PerplexityError::Timeout { timeout_ms }),
        };

        match &result {
            Ok(_) => debug!(
                endpoint,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Perplexity request succeeded"
            ),
            Err(err) => warn!(
                endpoint,
                kind = err.kind(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Perplexity request failed"
            ),
        }
        result
    }

    async fn exchange(
        &self,
        url: &str,
        api_key: &str,
        payload: &serde_json::Value,
    ) -> Result<String, PerplexityError> {
        let response = self
            .transport
            .dispatch(self.source(), url, api_key, payload)
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| UNREADABLE_ERROR_BODY.to_string());
            return Err(PerplexityError::Upstream {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("").to_string(),
                body,
            });
        }

        response
            .text()
            .await
            .map_err(|err| PerplexityError::Network(err.to_string()))
    }
}
