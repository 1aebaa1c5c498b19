//! Streamable HTTP host.
//!
//! Clients POST JSON-RPC payloads to [`MCP_PATH`] and may open one SSE push
//! stream per session with GET. In stateful mode every session is keyed by
//! the `mcp-session-id` header and lives in the [`SessionManager`]; in
//! stateless mode each POST gets a throwaway channel. Stateful sessions that
//! see no traffic for [`HttpServerOptions::session_ttl`] and hold no push
//! stream are evicted.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, Stream};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::config::{AllowedOrigins, DEFAULT_SESSION_TTL_SECS};
use crate::mcp::protocol::{is_initialize_payload, transport_error};
use crate::mcp::server::{McpServer, SERVER_NAME};
use crate::mcp::session::{ChannelGuard, SessionManager};


pub const MCP_PATH: &str = "/mcp";
pub const HEALTH_PATH: &str = "/health";
pub const SESSION_HEADER: &str = "mcp-session-id";
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(DEFAULT_SESSION_TTL_SECS);

pub const NOT_INITIALIZED: &str = "Bad Request: Server not initialized";
pub const NO_VALID_SESSION: &str = "Bad Request: No valid session ID provided";
pub const STREAM_CONFLICT: &str = "Conflict: Only one SSE stream is allowed per session";
pub const SESSION_NOT_FOUND: &str = "Session not found";
pub const METHOD_NOT_ALLOWED: &str = "Method not allowed.";

const TRANSPORT_ERROR_CODE: i64 = -32000;
const ALLOWED_METHODS: &str = "GET, POST, DELETE, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization, Accept, mcp-session-id, mcp-protocol-version, last-event-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Stateful,
    Stateless,
}

#[derive(Debug, Clone)]
pub struct HttpServerOptions {
    pub mode: SessionMode,
    pub allowed_origins: AllowedOrigins,
    pub keep_alive: Duration,
    pub session_ttl: Duration,
}

impl Default for HttpServerOptions {
    fn default() -> Self {
        Self {
            mode: SessionMode::Stateful,
            allowed_origins: AllowedOrigins::Any,
            keep_alive: DEFAULT_KEEP_ALIVE,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

#[derive(Clone)]
struct AppState {
    sessions: Arc<SessionManager>,
    options: Arc<HttpServerOptions>,
}

/// Builds the HTTP routes and returns the session manager backing them.
///
/// In stateful mode this also starts the idle sweep, so it must be called
/// from within a Tokio runtime.
pub fn router(server: Arc<McpServer>, options: HttpServerOptions) -> (Router, Arc<SessionManager>) {
    let sessions = SessionManager::new(server);
    if options.mode == SessionMode::Stateful {
        sessions.spawn_idle_sweep(options.session_ttl);
    }
    let state = AppState {
        sessions: sessions.clone(),
        options: Arc::new(options),
    };
    let router = Router::new()
        .route(
            MCP_PATH,
            post(handle_post)
                .get(handle_get)
                .delete(handle_delete)
                .options(preflight),
        )
        .route(HEALTH_PATH, get(health))
        .layer(middleware::from_fn_with_state(state.clone(), cors))
        .with_state(state);
    (router, sessions)
}

/// Serves until `shutdown` resolves, then closes every live session so open
/// push streams end and the listener can drain.
pub async fn serve(
    listener: TcpListener,
    server: Arc<McpServer>,
    options: HttpServerOptions,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let mode = options.mode;
    let (router, sessions) = router(server, options);
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, path = MCP_PATH, ?mode, "Streamable HTTP transport listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Shutting down; closing live sessions");
            sessions.close_all().await;
        })
        .await
}

async fn handle_post(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    if state.options.mode == SessionMode::Stateless {
        let channel = state.sessions.ephemeral_channel();
        let _guard = ChannelGuard(channel.clone());
        return reply(channel.handle(&body).await);
    }

    if let Some(id) = session_id(&headers) {
        if let Some(channel) = state.sessions.get(id).await {
            return reply(channel.handle(&body).await);
        }
        debug!(session = id, "Unknown session id on POST");
    }

    if !is_initialize_payload(&body) {
        return rejection(StatusCode::BAD_REQUEST, NOT_INITIALIZED);
    }

    let channel = state.sessions.open_channel();
    let answer = channel.handle(&body).await;
    if !channel.is_initialized() {
        channel.close();
        return reply(answer);
    }

    let mut response = reply(answer);
    if let Some(value) = channel.id().and_then(|id| HeaderValue::from_str(id).ok()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    state.sessions.register(channel).await;
    response
}

async fn handle_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if state.options.mode == SessionMode::Stateless {
        return rejection(StatusCode::METHOD_NOT_ALLOWED, METHOD_NOT_ALLOWED);
    }
    let channel = match session_id(&headers) {
        Some(id) => state.sessions.get(id).await,
        None => None,
    };
    let Some(channel) = channel else {
        return rejection(StatusCode::BAD_REQUEST, NO_VALID_SESSION);
    };
    let Some(receiver) = channel.take_push_stream() else {
        return rejection(StatusCode::CONFLICT, STREAM_CONFLICT);
    };

    debug!(session = channel.id().unwrap_or("-"), "Push stream opened");
    Sse::new(push_events(receiver, ChannelGuard(channel)))
        .keep_alive(KeepAlive::new().interval(state.options.keep_alive))
        .into_response()
}

/// Turns the channel's push queue into SSE events. The stream ends when the
/// channel closes; dropping it (peer gone) closes the channel.
fn push_events(
    receiver: mpsc::Receiver<Value>,
    guard: ChannelGuard,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold((receiver, guard), |(mut receiver, guard)| async move {
        let channel = guard.0.clone();
        let next = tokio::select! {
            message = receiver.recv() => message,
            _ = channel.closed() => None,
        };
        let message = next?;
        let event = Event::default()
            .event("message")
            .data(message.to_string());
        Some((Ok(event), (receiver, guard)))
    })
}

async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if state.options.mode == SessionMode::Stateless {
        return rejection(StatusCode::METHOD_NOT_ALLOWED, METHOD_NOT_ALLOWED);
    }
    let Some(id) = session_id(&headers) else {
        return rejection(StatusCode::BAD_REQUEST, NO_VALID_SESSION);
    };
    if state.sessions.close(id).await {
        StatusCode::OK.into_response()
    } else {
        rejection(StatusCode::NOT_FOUND, SESSION_NOT_FOUND)
    }
}

async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "service": SERVER_NAME}))
}

/// Adds CORS headers when the request's `Origin` is allowed.
async fn cors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let is_preflight = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;

    let allow_origin = match (&state.options.allowed_origins, origin) {
        (AllowedOrigins::Any, _) => Some(HeaderValue::from_static("*")),
        (allowed, Some(origin)) if allowed.allows(&origin) => HeaderValue::from_str(&origin).ok(),
        (_, Some(origin)) => {
            warn!(%origin, "Origin not in allow list");
            None
        }
        (_, None) => None,
    };
    let Some(allow_origin) = allow_origin else {
        return response;
    };

    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(SESSION_HEADER),
    );
    if is_preflight {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        );
    }
    response
}

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

fn reply(answer: Option<Value>) -> Response {
    match answer {
        Some(body) => Json(body).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

fn rejection(status: StatusCode, message: &str) -> Response {
    (status, Json(transport_error(TRANSPORT_ERROR_CODE, message))).into_response()
}
