//! Diagnostic logging to stderr.
//!
//! Stdout carries protocol traffic in stdio mode, so every log line goes to
//! stderr regardless of transport.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::core::config::{self, ConfigSource, DEFAULT_LOG_DIRECTIVE};

/// Builds the level filter from configuration, falling back to
/// [`DEFAULT_LOG_DIRECTIVE`] when the configured directive does not parse.
pub fn filter_from(source: &dyn ConfigSource) -> (EnvFilter, Option<String>) {
    let Some(directive) = config::log_directive(source) else {
        return (EnvFilter::new(DEFAULT_LOG_DIRECTIVE), None);
    };
    match EnvFilter::try_new(&directive) {
        Ok(filter) => (filter, None),
        Err(err) => (
            EnvFilter::new(DEFAULT_LOG_DIRECTIVE),
            Some(format!("Ignoring invalid log filter '{directive}': {err}")),
        ),
    }
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init(source: &dyn ConfigSource) {
    let (filter, warning) = filter_from(source);
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .is_ok();

    if let (true, Some(warning)) = (installed, warning) {
        tracing::warn!("{warning}");
    }
}
