//! Persistent gateway event connection.
//!
//! One long-lived socket shared by every consumer in the process: inbound
//! events fan out to per-name and catch-all broadcast channels, and RPC
//! calls multiplex over the same authenticated stream. A supervisor task
//! owns the socket and reconnects after a fixed delay, forever; failures
//! surface as status notifications, never as panics or terminal states.

use std::{collections::HashMap, sync::Arc};

use {
    clawdeck_identity::{DeviceIdentity, DeviceIdentityProvider},
    clawdeck_protocol::{GatewayFrame, HelloOk, encode_frame, parse_frame},
    futures::{SinkExt as _, StreamExt as _},
    tokio::sync::{Mutex, RwLock, broadcast, mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tokio_util::sync::CancellationToken,
};

use crate::{
    config::GatewayConfig,
    error::{Result, RpcError},
    handshake::authenticate,
    now_ms,
    rpc::request_id,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const STATUS_CHANNEL_CAPACITY: usize = 16;

/// An inbound gateway event, stamped with the local receipt time.
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    pub event: String,
    pub payload: Option<serde_json::Value>,
    pub seq: Option<u64>,
    pub state_version: Option<serde_json::Value>,
    /// Unix millis at receipt.
    pub received_at: u64,
}

/// Lifecycle notifications for the shared connection.
#[derive(Debug, Clone)]
pub enum ConnectionStatus {
    Connected(HelloOk),
    Disconnected,
    AuthFailed(String),
}

enum ConnState {
    Disconnected,
    Connecting,
    Authenticated {
        hello: HelloOk,
        writer: mpsc::UnboundedSender<Message>,
    },
}

struct SupervisorHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

struct Inner {
    config: GatewayConfig,
    identity: Option<Arc<DeviceIdentity>>,
    state: RwLock<ConnState>,
    pending: Mutex<HashMap<String, oneshot::Sender<Result<serde_json::Value>>>>,
    named: RwLock<HashMap<String, broadcast::Sender<GatewayEvent>>>,
    all: broadcast::Sender<GatewayEvent>,
    status: broadcast::Sender<ConnectionStatus>,
    supervisor: Mutex<Option<SupervisorHandle>>,
}

/// Handle to the shared event connection. Clones share one socket.
#[derive(Clone)]
pub struct EventConnection {
    inner: Arc<Inner>,
}

impl EventConnection {
    /// Build a connection, loading the device identity from the configured
    /// state directory.
    pub fn new(config: GatewayConfig) -> Self {
        let identity = DeviceIdentityProvider::new(&config.state_dir).load();
        Self::with_identity(config, identity)
    }

    /// Build a connection with an explicit identity (or none).
    pub fn with_identity(config: GatewayConfig, identity: Option<Arc<DeviceIdentity>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                identity,
                state: RwLock::new(ConnState::Disconnected),
                pending: Mutex::new(HashMap::new()),
                named: RwLock::new(HashMap::new()),
                all: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
                status: broadcast::channel(STATUS_CHANNEL_CAPACITY).0,
                supervisor: Mutex::new(None),
            }),
        }
    }

    /// Start the supervisor. Idempotent: a no-op while a supervisor is
    /// already running, so concurrent callers coalesce onto one socket.
    pub async fn connect(&self) {
        let mut slot = self.inner.supervisor.lock().await;
        if let Some(handle) = slot.as_ref()
            && !handle.task.is_finished()
        {
            return;
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(self.inner.clone(), cancel.clone()));
        *slot = Some(SupervisorHandle { cancel, task });
    }

    /// Stop the supervisor and drop the socket.
    pub async fn disconnect(&self) {
        let handle = self.inner.supervisor.lock().await.take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            let _ = handle.task.await;
        }
    }

    pub async fn is_connected(&self) -> bool {
        matches!(
            &*self.inner.state.read().await,
            ConnState::Authenticated { .. }
        )
    }

    /// The hello payload of the current session, if authenticated.
    pub async fn hello(&self) -> Option<HelloOk> {
        match &*self.inner.state.read().await {
            ConnState::Authenticated { hello, .. } => Some(hello.clone()),
            _ => None,
        }
    }

    /// Call `method` over the shared socket.
    ///
    /// Fails immediately with [`RpcError::ConnectionNotEstablished`] when
    /// the connection is not authenticated; requests are never queued.
    pub async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let writer = match &*self.inner.state.read().await {
            ConnState::Authenticated { writer, .. } => writer.clone(),
            _ => return Err(RpcError::ConnectionNotEstablished),
        };

        let id = request_id();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id.clone(), tx);

        let frame = GatewayFrame::Request {
            id: id.clone(),
            method: method.to_string(),
            params: Some(params.unwrap_or_else(|| serde_json::json!({}))),
        };
        let encoded = match encode_frame(&frame) {
            Ok(text) => text,
            Err(err) => {
                self.inner.pending.lock().await.remove(&id);
                return Err(err.into());
            },
        };
        if writer.send(Message::text(encoded)).is_err() {
            self.inner.pending.lock().await.remove(&id);
            return Err(RpcError::ConnectionClosed);
        }

        match tokio::time::timeout(self.inner.config.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::ConnectionClosed),
            Err(_) => {
                self.inner.pending.lock().await.remove(&id);
                Err(RpcError::Timeout)
            },
        }
    }

    /// Subscribe to one event name. No replay: events before the
    /// subscription are missed.
    pub async fn subscribe(&self, event: &str) -> broadcast::Receiver<GatewayEvent> {
        self.inner
            .named
            .write()
            .await
            .entry(event.to_string())
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Subscribe to every event regardless of name.
    pub fn subscribe_all(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.all.subscribe()
    }

    /// Subscribe to connection lifecycle notifications.
    pub fn status_stream(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }
}

// ── Supervisor ───────────────────────────────────────────────────────────────

async fn run(inner: Arc<Inner>, cancel: CancellationToken) {
    loop {
        *inner.state.write().await = ConnState::Connecting;
        session(&inner, &cancel).await;
        inner.drop_connection().await;
        if cancel.is_cancelled() {
            break;
        }
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(inner.config.reconnect_delay) => {},
        }
    }
}

/// One connection attempt: dial, authenticate, then pump frames until the
/// socket drops or the supervisor is cancelled.
async fn session(inner: &Arc<Inner>, cancel: &CancellationToken) {
    let mut stream = tokio::select! {
        () = cancel.cancelled() => return,
        dialed = connect_async(&inner.config.url) => match dialed {
            Ok((stream, _)) => stream,
            Err(err) => {
                tracing::warn!(url = %inner.config.url, "gateway dial failed: {err}");
                return;
            },
        },
    };

    let hello = tokio::select! {
        () = cancel.cancelled() => return,
        auth = authenticate(&mut stream, &inner.config, inner.identity.as_deref()) => match auth {
            Ok(hello) => hello,
            Err(RpcError::AuthFailed(message)) => {
                tracing::warn!(%message, "gateway rejected connect");
                let _ = inner.status.send(ConnectionStatus::AuthFailed(message));
                return;
            },
            Err(err) => {
                tracing::warn!("gateway handshake failed: {err}");
                return;
            },
        },
    };

    let (mut ws_tx, mut ws_rx) = stream.split();
    let (writer, mut writer_rx) = mpsc::unbounded_channel();
    *inner.state.write().await = ConnState::Authenticated {
        hello: hello.clone(),
        writer,
    };
    let _ = inner.status.send(ConnectionStatus::Connected(hello));
    tracing::info!(url = %inner.config.url, "gateway event connection established");

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = ws_tx.close().await;
                return;
            },
            outbound = writer_rx.recv() => match outbound {
                Some(message) => {
                    if let Err(err) = ws_tx.send(message).await {
                        tracing::warn!("gateway write failed: {err}");
                        return;
                    }
                },
                None => return,
            },
            inbound = ws_rx.next() => match inbound {
                Some(Ok(Message::Text(text))) => inner.dispatch(&text).await,
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!("gateway socket closed");
                    return;
                },
                Some(Ok(_)) => {},
                Some(Err(err)) => {
                    tracing::warn!("gateway read failed: {err}");
                    return;
                },
            },
        }
    }
}

impl Inner {
    /// Route one inbound text frame to subscribers or a pending call.
    async fn dispatch(&self, text: &str) {
        match parse_frame(text) {
            Some(GatewayFrame::Event {
                event,
                payload,
                seq,
                state_version,
            }) => {
                let item = GatewayEvent {
                    event: event.clone(),
                    payload,
                    seq,
                    state_version,
                    received_at: now_ms(),
                };
                if let Some(sender) = self.named.read().await.get(&event) {
                    let _ = sender.send(item.clone());
                }
                let _ = self.all.send(item);
            },
            Some(GatewayFrame::Response {
                id,
                ok,
                payload,
                error,
            }) => {
                // Responses nobody is waiting for are dropped.
                let Some(tx) = self.pending.lock().await.remove(&id) else {
                    return;
                };
                let result = if ok {
                    Ok(payload.unwrap_or_else(|| serde_json::json!({})))
                } else {
                    Err(RpcError::remote(error.as_ref()))
                };
                let _ = tx.send(result);
            },
            _ => {},
        }
    }

    /// Reset to `Disconnected`, failing every in-flight call.
    async fn drop_connection(&self) {
        *self.state.write().await = ConnState::Disconnected;
        let pending: Vec<_> = self.pending.lock().await.drain().collect();
        for (_, tx) in pending {
            let _ = tx.send(Err(RpcError::ConnectionClosed));
        }
        let _ = self.status.send(ConnectionStatus::Disconnected);
    }
}
