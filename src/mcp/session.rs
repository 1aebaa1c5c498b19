//! Channels and the live-session map.
//!
//! A [`Channel`] is the duplex handle behind one client: it answers JSON-RPC
//! payloads and buffers server-initiated messages for whichever transport
//! drains its push stream. The [`SessionManager`] owns every registered
//! stateful channel and drops it as soon as the channel reports closure.
//! Sessions that go quiet without ever holding a push stream are closed by
//! an idle sweep, since no connection is left whose loss could close them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use rust_mcp_schema::{RpcError, LATEST_PROTOCOL_VERSION};
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, warn};

use crate::mcp::protocol::{
    classify, failure, invalid_params, invalid_request, notification, parse_payload, success,
    Incoming, Payload, METHOD_INITIALIZE,
};
use crate::mcp::server::McpServer;

pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_PING: &str = "ping";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const METHOD_PROGRESS: &str = "notifications/progress";

/// Server-initiated messages buffered per channel before they are dropped.
const PUSH_BUFFER: usize = 64;

pub struct Channel {
    id: Option<String>,
    server: Arc<McpServer>,
    initialized: AtomicBool,
    requests_served: AtomicU64,
    push_tx: mpsc::Sender<Value>,
    push_rx: Mutex<Option<mpsc::Receiver<Value>>>,
    last_seen: Mutex<Instant>,
    closed: CancellationToken,
}

impl Channel {
    pub fn new(id: Option<String>, server: Arc<McpServer>) -> Arc<Self> {
        let (push_tx, push_rx) = mpsc::channel(PUSH_BUFFER);
        Arc::new(Self {
            id,
            server,
            initialized: AtomicBool::new(false),
            requests_served: AtomicU64::new(0),
            push_tx,
            push_rx: Mutex::new(Some(push_rx)),
            last_seen: Mutex::new(Instant::now()),
            closed: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Requests (not notifications) answered over this channel's lifetime.
    pub fn requests_served(&self) -> u64 {
        self.requests_served.load(Ordering::Relaxed)
    }

    /// Hands out the push receiver. Only the first caller gets it.
    pub fn take_push_stream(&self) -> Option<mpsc::Receiver<Value>> {
        self.touch();
        self.push_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// True once a transport has taken the push receiver.
    pub fn has_push_stream(&self) -> bool {
        self.push_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    /// Queues a server-initiated message. Dropped when no push stream is
    /// attached yet, when it is not drained fast enough, or after close.
    pub fn push(&self, message: Value) {
        if self.is_closed() {
            return;
        }
        if !self.has_push_stream() {
            debug!(session = self.id().unwrap_or("-"), "No push stream attached; dropping message");
            return;
        }
        if self.push_tx.try_send(message).is_err() {
            debug!(session = self.id().unwrap_or("-"), "Push buffer full; dropping message");
        }
    }

    /// Records client activity for the idle sweep.
    pub fn touch(&self) {
        *self
            .last_seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .elapsed()
    }

    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!(session = self.id().unwrap_or("-"), "Closing channel");
            self.closed.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the channel has been closed from any side.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Answers one raw JSON-RPC payload. `None` means nothing to send back
    /// (notifications and client responses only).
    pub async fn handle(&self, text: &str) -> Option<Value> {
        self.touch();
        let payload = match parse_payload(text) {
            Ok(payload) => payload,
            Err(err) => return Some(failure(None, &err)),
        };
        match payload {
            Payload::Single(message) => self.handle_message(message).await,
            Payload::Batch(messages) if messages.is_empty() => {
                Some(failure(None, &invalid_request("empty batch")))
            }
            Payload::Batch(messages) => {
                let replies: Vec<Value> =
                    join_all(messages.into_iter().map(|message| self.handle_message(message)))
                        .await
                        .into_iter()
                        .flatten()
                        .collect();
                (!replies.is_empty()).then_some(Value::Array(replies))
            }
        }
    }

    async fn handle_message(&self, message: Value) -> Option<Value> {
        match classify(message) {
            Err(err) => Some(failure(None, &err)),
            Ok(Incoming::Response) => None,
            Ok(Incoming::Notification { method }) if method == METHOD_INITIALIZED => {
                debug!(session = self.id().unwrap_or("-"), "Client confirmed initialization");
                None
            }
            Ok(Incoming::Notification { method }) => {
                debug!(session = self.id().unwrap_or("-"), method = %method, "Ignoring notification");
                None
            }
            Ok(Incoming::Request { id, method, params }) => {
                self.requests_served.fetch_add(1, Ordering::Relaxed);
                Some(match self.dispatch(&method, params).await {
                    Ok(result) => success(&id, result),
                    Err(err) => failure(Some(&id), &err),
                })
            }
        }
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        match method {
            METHOD_INITIALIZE => {
                let version = params
                    .as_ref()
                    .and_then(|params| params.get("protocolVersion"))
                    .and_then(Value::as_str)
                    .unwrap_or(LATEST_PROTOCOL_VERSION);
                let result = self.server.initialize_result(version);
                self.initialized.store(true, Ordering::Release);
                info!(session = self.id().unwrap_or("-"), protocol_version = version, "Client initialized");
                to_result_value(&result)
            }
            METHOD_PING => Ok(json!({})),
            METHOD_TOOLS_LIST => Ok(self.server.list_tools()),
            METHOD_TOOLS_CALL => self.call_tool(params).await,
            other => Err(RpcError::method_not_found()
                .with_message(format!("Method not found: {other}").as_str())),
        }
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let params = params.ok_or_else(|| invalid_params("tools/call requires params"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_params("'name' must be a string"))?;
        let arguments = params.get("arguments").and_then(Value::as_object);
        let progress_token = params
            .get("_meta")
            .and_then(|meta| meta.get("progressToken"))
            .cloned();

        if let Some(token) = &progress_token {
            self.push(progress(token, 0, &format!("Calling {name}")));
        }
        let result = self.server.call_tool(name, arguments).await;
        if let Some(token) = &progress_token {
            self.push(progress(token, 1, &format!("{name} finished")));
        }
        to_result_value(&result)
    }
}

fn progress(token: &Value, step: u32, message: &str) -> Value {
    notification(
        METHOD_PROGRESS,
        json!({"progressToken": token, "progress": step, "total": 1, "message": message}),
    )
}

fn to_result_value<T: serde::Serialize>(result: &T) -> Result<Value, RpcError> {
    serde_json::to_value(result).map_err(|err| {
        RpcError::internal_error().with_message(format!("Unable to encode result: {err}").as_str())
    })
}

/// Closes the wrapped channel when dropped.
pub struct ChannelGuard(pub Arc<Channel>);

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

pub struct SessionManager {
    server: Arc<McpServer>,
    sessions: RwLock<HashMap<String, Arc<Channel>>>,
}

impl SessionManager {
    pub fn new(server: Arc<McpServer>) -> Arc<Self> {
        Arc::new(Self {
            server,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// A channel with a fresh session id, not yet registered.
    pub fn open_channel(&self) -> Arc<Channel> {
        Channel::new(Some(generate_session_id()), self.server.clone())
    }

    /// A channel that never enters the map.
    pub fn ephemeral_channel(&self) -> Arc<Channel> {
        Channel::new(None, self.server.clone())
    }

    /// Adds the channel to the live map and removes it once it closes.
    pub async fn register(self: &Arc<Self>, channel: Arc<Channel>) {
        let Some(id) = channel.id().map(str::to_owned) else {
            warn!("Refusing to register a channel without a session id");
            return;
        };
        self.sessions.write().await.insert(id.clone(), channel.clone());
        info!(session = %id, "Session registered");

        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            channel.closed().await;
            if let Some(manager) = manager.upgrade() {
                manager.forget(&id, &channel).await;
            }
        });
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Channel>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Closes and unregisters a session. Returns false for unknown ids.
    pub async fn close(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id);
        match removed {
            Some(channel) => {
                channel.close();
                info!(session = %id, "Session closed");
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&self) {
        let drained: Vec<_> = self.sessions.write().await.drain().collect();
        for (_, channel) in &drained {
            channel.close();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "Closed all sessions");
        }
    }

    /// Closes and unregisters sessions idle for at least `ttl`.
    ///
    /// A session with an attached push stream is never idle here; losing
    /// that stream's connection already closes it.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let evicted: Vec<(String, Arc<Channel>)> = {
            let mut sessions = self.sessions.write().await;
            let stale: Vec<String> = sessions
                .iter()
                .filter(|(_, channel)| !channel.has_push_stream() && channel.idle_for() >= ttl)
                .map(|(id, _)| id.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|id| sessions.remove(&id).map(|channel| (id, channel)))
                .collect()
        };
        for (id, channel) in &evicted {
            channel.close();
            info!(session = %id, idle_secs = channel.idle_for().as_secs(), "Evicted idle session");
        }
        evicted.len()
    }

    /// Runs [`Self::evict_idle`] periodically until the manager is dropped.
    pub fn spawn_idle_sweep(self: &Arc<Self>, ttl: Duration) -> JoinHandle<()> {
        let period = (ttl / 2).clamp(Duration::from_millis(10), Duration::from_secs(60));
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.evict_idle(ttl).await;
            }
        })
    }

    async fn forget(&self, id: &str, channel: &Arc<Channel>) {
        let mut sessions = self.sessions.write().await;
        if sessions
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, channel))
        {
            sessions.remove(id);
            info!(session = %id, "Session removed after close");
        }
    }
}

/// 128-bit hex id: 48 bits of millisecond clock followed by 80 random bits.
pub fn generate_session_id() -> String {
    static FALLBACK: AtomicU64 = AtomicU64::new(0);

    let millis = chrono::Utc::now().timestamp_millis() as u64 & 0xffff_ffff_ffff;
    let mut random = [0u8; 10];
    if let Err(err) = getrandom::fill(&mut random) {
        warn!(error = %err, "OS randomness unavailable; using counter for session id");
        let counter = FALLBACK.fetch_add(1, Ordering::Relaxed);
        let nanos = chrono::Utc::now().timestamp_subsec_nanos();
        random[..8].copy_from_slice(&counter.to_be_bytes());
        random[8..].copy_from_slice(&nanos.to_be_bytes()[2..]);
    }

    let mut id = format!("{millis:012x}");
    for byte in random {
        id.push_str(&format!("{byte:02x}"));
    }
    id
}
