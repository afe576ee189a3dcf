//! WebSocket engine transport
//!
//! JSON-RPC 2.0 over tokio-tungstenite with request/response correlation,
//! heartbeats, and an automatic reconnect loop that tracks downtime so
//! consumers know when their caches went stale.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use cl_core::EngineConfig;

use crate::protocol::{Method, RpcRequest, RpcResponse};
use crate::sdk::{ConnectionState, EngineError, EngineResult, EngineSdk, SdkEvent};

type PendingMap = HashMap<u64, oneshot::Sender<EngineResult<Value>>>;

struct WsShared {
    config: EngineConfig,
    long_downtime_threshold_ms: u64,
    state: RwLock<ConnectionState>,
    events_tx: broadcast::Sender<SdkEvent>,
    /// Writer handle of the live connection, absent while disconnected
    outgoing: RwLock<Option<mpsc::Sender<Message>>>,
    pending: Mutex<PendingMap>,
    next_id: AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
    disconnected_at: Mutex<Option<Instant>>,
    ever_connected: AtomicBool,
}

impl WsShared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    fn fail_pending(&self) {
        let mut pending = self.pending.lock();
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(EngineError::NotConnected));
        }
    }

    fn emit(&self, event: SdkEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Record the connection as up and report downtime to subscribers
    fn mark_connected(&self) {
        let downtime_ms = self
            .disconnected_at
            .lock()
            .take()
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        let first = !self.ever_connected.swap(true, Ordering::SeqCst);
        let requires_cache_invalidation =
            !first && downtime_ms > self.long_downtime_threshold_ms;

        self.set_state(ConnectionState::Connected);
        self.emit(SdkEvent::Connected {
            requires_cache_invalidation,
            downtime_ms,
        });

        if requires_cache_invalidation {
            log::warn!(
                "[Engine] Reconnected after {downtime_ms} ms downtime, caches must be invalidated"
            );
        } else {
            log::info!("[Engine] Connected ({downtime_ms} ms downtime)");
        }
    }

    fn mark_disconnected(&self, reason: &str) {
        if self.disconnected_at.lock().is_none() {
            *self.disconnected_at.lock() = Some(Instant::now());
        }
        *self.outgoing.write() = None;
        self.set_state(ConnectionState::Disconnected);
        self.fail_pending();
        self.emit(SdkEvent::Disconnected {
            reason: reason.to_string(),
        });
        log::warn!("[Engine] Disconnected: {reason}");
    }
}

/// WebSocket implementation of [`EngineSdk`]
pub struct WsEngine {
    shared: Arc<WsShared>,
}

impl WsEngine {
    /// Create a transport for the configured engine endpoint
    ///
    /// `long_downtime_threshold_ms` controls when a reconnect is reported
    /// with `requires_cache_invalidation` set.
    pub fn new(config: EngineConfig, long_downtime_threshold_ms: u64) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shared: Arc::new(WsShared {
                config,
                long_downtime_threshold_ms,
                state: RwLock::new(ConnectionState::Initializing),
                events_tx,
                outgoing: RwLock::new(None),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                shutdown_tx,
                disconnected_at: Mutex::new(None),
                ever_connected: AtomicBool::new(false),
            }),
        }
    }

    /// One connection attempt with the configured timeout
    async fn establish(
        shared: &Arc<WsShared>,
    ) -> EngineResult<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>>
    {
        let raw = shared.config.url();
        let _ = url::Url::parse(&raw)
            .map_err(|e| EngineError::ConnectionFailed(format!("Invalid URL {raw}: {e}")))?;

        let timeout = Duration::from_millis(shared.config.connection_timeout_ms);
        let (ws, _) = tokio::time::timeout(timeout, connect_async(&raw))
            .await
            .map_err(|_| EngineError::Timeout)?
            .map_err(|e| EngineError::ConnectionFailed(e.to_string()))?;
        Ok(ws)
    }

    /// Install a fresh writer channel; must happen before the connection is
    /// announced so no command can observe Connected without a writer
    fn prepare_writer(shared: &Arc<WsShared>) -> mpsc::Receiver<Message> {
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<Message>(64);
        *shared.outgoing.write() = Some(outgoing_tx);
        outgoing_rx
    }

    /// Run one connection until it drops, then reconnect until shutdown
    fn spawn_supervisor(
        shared: Arc<WsShared>,
        ws: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        outgoing_rx: mpsc::Receiver<Message>,
    ) {
        tokio::spawn(async move {
            let mut current = Some((ws, outgoing_rx));

            loop {
                let (ws, outgoing_rx) = match current.take() {
                    Some(pair) => pair,
                    None => break,
                };

                let reason = Self::run_connection(&shared, ws, outgoing_rx).await;
                match reason {
                    None => break, // shutdown requested
                    Some(reason) => shared.mark_disconnected(&reason),
                }

                // Reconnect loop
                let mut shutdown_rx = shared.shutdown_tx.subscribe();
                let mut attempt: u32 = 0;
                loop {
                    attempt += 1;
                    shared.set_state(ConnectionState::Reconnecting);
                    shared.emit(SdkEvent::Reconnecting { attempt });
                    log::info!("[Engine] Reconnect attempt {attempt}");

                    let delay = Duration::from_millis(shared.config.reconnect_ms);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_rx.recv() => return,
                    }

                    match Self::establish(&shared).await {
                        Ok(ws) => {
                            let outgoing_rx = Self::prepare_writer(&shared);
                            shared.mark_connected();
                            current = Some((ws, outgoing_rx));
                            break;
                        }
                        Err(e) => {
                            log::warn!("[Engine] Reconnect attempt {attempt} failed: {e}");
                        }
                    }
                }
            }
        });
    }

    /// Drive one live connection; returns the drop reason, or `None` on
    /// orderly shutdown
    async fn run_connection(
        shared: &Arc<WsShared>,
        ws: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        mut outgoing_rx: mpsc::Receiver<Message>,
    ) -> Option<String> {
        let (mut write, mut read) = ws.split();

        let mut shutdown_rx = shared.shutdown_tx.subscribe();
        let mut heartbeat =
            tokio::time::interval(Duration::from_millis(shared.config.heartbeat_ms.max(1)));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await; // first tick fires immediately, skip it

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_frame(shared, text.as_ref());
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Some("Connection closed by engine".to_string());
                        }
                        Some(Err(e)) => {
                            return Some(format!("WebSocket error: {e}"));
                        }
                        _ => {} // ping/pong/binary
                    }
                }

                out = outgoing_rx.recv() => {
                    match out {
                        Some(msg) => {
                            if let Err(e) = write.send(msg).await {
                                return Some(format!("Write failed: {e}"));
                            }
                        }
                        None => return Some("Writer channel closed".to_string()),
                    }
                }

                _ = heartbeat.tick() => {
                    let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
                    let frame = RpcRequest::new(id, Method::NoOp.as_str(), None);
                    if let Ok(json) = serde_json::to_string(&frame)
                        && write.send(Message::Text(json.into())).await.is_err() {
                            return Some("Heartbeat write failed".to_string());
                        }
                }

                _ = shutdown_rx.recv() => {
                    let _ = write.send(Message::Close(None)).await;
                    return None;
                }
            }
        }
    }

    fn handle_frame(shared: &Arc<WsShared>, text: &str) {
        let frame: RpcResponse = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("[Engine] Invalid frame: {e}");
                return;
            }
        };

        if let Some(id) = frame.id {
            let waiter = shared.pending.lock().remove(&id);
            if let Some(tx) = waiter {
                let outcome = match frame.error {
                    Some(err) => Err(EngineError::Rpc {
                        code: err.code,
                        message: err.message,
                    }),
                    None => Ok(frame.result.unwrap_or(Value::Null)),
                };
                let _ = tx.send(outcome);
            }
            // Unsolicited ids (heartbeat acks) are fine to ignore
        } else if let Some(method) = frame.method {
            log::debug!("[Engine] Notification: {method}");
        }
    }
}

#[async_trait]
impl EngineSdk for WsEngine {
    async fn connect(&self) -> EngineResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        *self.shared.state.write() = ConnectionState::Connecting;
        match Self::establish(&self.shared).await {
            Ok(ws) => {
                let outgoing_rx = Self::prepare_writer(&self.shared);
                self.shared.mark_connected();
                Self::spawn_supervisor(Arc::clone(&self.shared), ws, outgoing_rx);
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) {
        let _ = self.shared.shutdown_tx.send(());
        *self.shared.outgoing.write() = None;
        self.shared.set_state(ConnectionState::Disconnected);
        self.shared.fail_pending();
    }

    fn is_connected(&self) -> bool {
        *self.shared.state.read() == ConnectionState::Connected
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    async fn send_command(&self, method: &str, params: Option<Value>) -> EngineResult<Value> {
        let outgoing = self
            .shared
            .outgoing
            .read()
            .clone()
            .ok_or(EngineError::NotConnected)?;

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);

        let frame = RpcRequest::new(id, method, params);
        let json = serde_json::to_string(&frame)
            .map_err(|e| EngineError::Protocol(e.to_string()))?;

        if outgoing.send(Message::Text(json.into())).await.is_err() {
            self.shared.pending.lock().remove(&id);
            return Err(EngineError::SendFailed);
        }

        let timeout = Duration::from_millis(self.shared.config.connection_timeout_ms);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(EngineError::NotConnected),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                Err(EngineError::Timeout)
            }
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<SdkEvent> {
        self.shared.events_tx.subscribe()
    }
}
