//! Command-line interface parsing and process startup.


use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::config::{self, ConfigSource, EnvSource, HttpSettings};
use crate::core::upstream::Upstream;
use crate::logging;
use crate::mcp::server::McpServer;
use crate::mcp::transport::stdio::serve_stdio;
use crate::mcp::transport::streamable_http::{self, HttpServerOptions, SessionMode};

#[derive(Parser, Debug)]
#[command(name = "perplexity-mcp", version)]
#[command(about = "Model Context Protocol server for Perplexity chat and search")]
#[command(
    long_about = "perplexity-mcp exposes Perplexity's chat completion and search APIs as MCP tools \
(perplexity_ask, perplexity_research, perplexity_reason, perplexity_search). It serves a single \
client over stdin/stdout by default, or many clients over streamable HTTP.\n\n\
Environment Variables:\n\
  PERPLEXITY_API_KEY       Perplexity API key (required)\n\
  PERPLEXITY_BASE_URL      API base URL (default https://api.perplexity.ai)\n\
  PERPLEXITY_TIMEOUT_MS    Per-call timeout in milliseconds (default 300000)\n\
  PERPLEXITY_PROXY         Proxy URL; HTTPS_PROXY and HTTP_PROXY are used as fallbacks\n\
  PERPLEXITY_LOG_LEVEL     Log filter written to stderr (default info)\n\
  PORT                     HTTP port (default 8080)\n\
  BIND_ADDRESS             HTTP bind address (default 127.0.0.1)\n\
  ALLOWED_ORIGINS          Comma-separated CORS origins, or * (default *)\n\
  SESSION_IDLE_TIMEOUT_SECS  Evict HTTP sessions idle this long without a push stream (default 1800)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Serve one client over stdin/stdout (default)
    Stdio,
    /// Serve clients over streamable HTTP at /mcp
    Http {
        /// Port to listen on; overrides PORT
        #[arg(long)]
        port: Option<u16>,
        /// Address to bind; overrides BIND_ADDRESS
        #[arg(long)]
        bind: Option<String>,
        /// Give every POST its own short-lived channel instead of tracking sessions
        #[arg(long)]
        stateless: bool,
        /// Seconds between keep-alive comments on push streams
        #[arg(long, value_name = "SECONDS", default_value_t = 15)]
        keep_alive: u64,
        /// Seconds a session may stay idle before eviction; overrides SESSION_IDLE_TIMEOUT_SECS
        #[arg(long, value_name = "SECONDS")]
        session_ttl: Option<u64>,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let source: Arc<dyn ConfigSource> = Arc::new(EnvSource);
    logging::init(source.as_ref());

    if let Err(err) = config::api_key(source.as_ref()) {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }

    tokio::runtime::Runtime::new()?.block_on(run(args, source))
}

pub async fn run(args: Args, source: Arc<dyn ConfigSource>) -> Result<(), Box<dyn Error>> {
    let server = Arc::new(McpServer::new(Upstream::new(source.clone())?));

    match args.command.unwrap_or(Commands::Stdio) {
        Commands::Stdio => {
            info!(version = env!("CARGO_PKG_VERSION"), "Serving MCP over stdio");
            tokio::select! {
                result = serve_stdio(server) => result?,
                _ = shutdown_signal() => info!("Interrupted; exiting"),
            }
        }
        Commands::Http {
            port,
            bind,
            stateless,
            keep_alive,
            session_ttl,
        } => {
            let settings = HttpSettings::from_source(source.as_ref())?;
            let address = bind_address(&settings, bind.as_deref(), port);
            let options = http_options(settings, stateless, keep_alive, session_ttl);
            let listener = TcpListener::bind(&address)
                .await
                .map_err(|err| format!("Unable to bind {address}: {err}"))?;
            streamable_http::serve(listener, server, options, shutdown_signal()).await?;
        }
    }
    Ok(())
}

/// Command-line flags win over environment settings.
pub fn bind_address(settings: &HttpSettings, bind: Option<&str>, port: Option<u16>) -> String {
    format!(
        "{}:{}",
        bind.unwrap_or(&settings.bind_address),
        port.unwrap_or(settings.port)
    )
}

pub fn http_options(
    settings: HttpSettings,
    stateless: bool,
    keep_alive_secs: u64,
    session_ttl_secs: Option<u64>,
) -> HttpServerOptions {
    let session_ttl_secs = session_ttl_secs.unwrap_or(settings.session_ttl_secs).max(1);
    HttpServerOptions {
        mode: if stateless {
            SessionMode::Stateless
        } else {
            SessionMode::Stateful
        },
        allowed_origins: settings.allowed_origins,
        keep_alive: Duration::from_secs(keep_alive_secs.max(1)),
        session_ttl: Duration::from_secs(session_ttl_secs),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Unable to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
