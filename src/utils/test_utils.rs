use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::core::config::ConfigSource;

/// Configuration that tests can change while clients hold it.
#[derive(Default)]
pub struct SharedSource {
    values: RwLock<HashMap<String, String>>,
}

impl SharedSource {
    pub fn new(pairs: &[(&str, &str)]) -> Arc<Self> {
        let source = Arc::new(Self::default());
        for (key, value) in pairs {
            source.set(key, value);
        }
        source
    }

    pub fn set(&self, key: &str, value: &str) {
        self.values
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn remove(&self, key: &str) {
        self.values.write().unwrap().remove(key);
    }
}

impl ConfigSource for SharedSource {
    fn var(&self, key: &str) -> Option<String> {
        self.values.read().unwrap().get(key).cloned()
    }
}

/// How the local Perplexity stub answers every request.
#[derive(Clone, Debug)]
pub enum StubReply {
    Status {
        status: u16,
        body: String,
        content_type: &'static str,
    },
    /// Never answers.
    Hang,
}

impl StubReply {
    pub fn json(body: Value) -> Self {
        StubReply::Status {
            status: 200,
            body: body.to_string(),
            content_type: "application/json",
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        StubReply::Status {
            status,
            body: body.to_string(),
            content_type: "text/plain",
        }
    }
}

#[derive(Clone, Debug)]
pub struct CapturedRequest {
    pub path: String,
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Clone)]
struct StubState {
    reply: StubReply,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
}

pub struct StubServer {
    pub base_url: String,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    task: JoinHandle<()>,
}

impl StubServer {
    pub async fn requests(&self) -> Vec<CapturedRequest> {
        self.captured.lock().await.clone()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Starts a local upstream stub on an ephemeral port.
pub async fn spawn_stub(reply: StubReply) -> StubServer {
    let captured = Arc::new(Mutex::new(Vec::new()));
    let state = StubState {
        reply,
        captured: captured.clone(),
    };
    let app = Router::new().fallback(stub_handler).with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("axum serve");
    });

    StubServer {
        base_url: format!("http://{addr}"),
        captured,
        task,
    }
}

async fn stub_handler(
    State(state): State<StubState>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let body = serde_json::from_str(&body).unwrap_or(Value::String(body));
    state.captured.lock().await.push(CapturedRequest {
        path: uri.path().to_string(),
        authorization: headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned),
        body,
    });

    match state.reply {
        StubReply::Status {
            status,
            body,
            content_type,
        } => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            [(header::CONTENT_TYPE, content_type)],
            body,
        )
            .into_response(),
        StubReply::Hang => futures_util::future::pending::<Response>().await,
    }
}
