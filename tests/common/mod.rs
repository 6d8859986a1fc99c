//! Shared test doubles for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::StreamExt;
use resilient_session::config::LayerConfig;
use resilient_session::http::ServerFrame;
use resilient_session::session::{Connection, ConnectionId, ProbeError};
use resilient_session::store::{DataStore, MemoryStore, StoreError};
use resilient_session::{HttpServer, SessionLayer, Shutdown};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Memory store with scripted failures and latency.
#[derive(Default)]
pub struct ScriptedStore {
    inner: MemoryStore,
    queued: Mutex<VecDeque<StoreError>>,
    always: Mutex<Option<StoreError>>,
    fail_writes_only: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: AtomicU32,
}

impl ScriptedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `n` calls with `err`.
    pub fn fail_next(&self, n: usize, err: StoreError) {
        let mut queued = self.queued.lock().unwrap();
        queued.extend(std::iter::repeat(err).take(n));
    }

    /// Fail every call with `err` until `recover`.
    pub fn fail_always(&self, err: StoreError) {
        *self.always.lock().unwrap() = Some(err);
    }

    /// Restrict `fail_always` to set/delete.
    pub fn fail_writes_only(&self, on: bool) {
        self.fail_writes_only.store(on, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        *self.always.lock().unwrap() = None;
        self.queued.lock().unwrap().clear();
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }

    async fn before(&self, write: bool) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.queued.lock().unwrap().pop_front() {
            return Err(err);
        }
        let always = self.always.lock().unwrap().clone();
        match always {
            Some(err) if write || !self.fail_writes_only.load(Ordering::SeqCst) => Err(err),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl DataStore for ScriptedStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.before(false).await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.before(true).await?;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.before(true).await?;
        self.inner.delete(key).await
    }
}

/// How a mock connection answers probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProbeMode {
    Alive = 0,
    Dead = 1,
    Hang = 2,
}

pub struct MockConnection {
    id: ConnectionId,
    mode: AtomicU8,
    closed: AtomicBool,
    probes: AtomicU32,
}

impl MockConnection {
    pub fn new(mode: ProbeMode) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(),
            mode: AtomicU8::new(mode as u8),
            closed: AtomicBool::new(false),
            probes: AtomicU32::new(0),
        })
    }

    pub fn set_mode(&self, mode: ProbeMode) {
        self.mode.store(mode as u8, Ordering::SeqCst);
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn probe(&self) -> Result<(), ProbeError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        match self.mode.load(Ordering::SeqCst) {
            0 => Ok(()),
            1 => Err(ProbeError::Transport("no pong".into())),
            _ => std::future::pending().await,
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        !self.was_closed()
    }
}

/// Small thresholds, no retries, short timings.
pub fn fast_config() -> LayerConfig {
    let mut config = LayerConfig::default();
    for breaker in [
        &mut config.breakers.read,
        &mut config.breakers.write,
        &mut config.breakers.delete,
    ] {
        breaker.failure_threshold = 5;
        breaker.success_threshold = 3;
        breaker.timeout_secs = 60;
        breaker.time_window_secs = 60;
        breaker.max_retry_attempts = 0;
        breaker.base_delay_ms = 10;
        breaker.max_delay_ms = 100;
    }
    config.session.probe_timeout_ms = 2000;
    config.session.grace_period_secs = 30;
    config.operations.timeout_ms = 1000;
    config.observability.metrics_enabled = false;
    config
}

pub fn layer_over(store: Arc<ScriptedStore>, config: &LayerConfig) -> Arc<SessionLayer> {
    Arc::new(SessionLayer::new(store, config))
}

pub const ADMIN_KEY: &str = "test-admin-key";

/// Serve a layer on an ephemeral port.
pub async fn start_server(config: LayerConfig) -> (SocketAddr, Arc<SessionLayer>, Shutdown) {
    let mut config = config;
    config.admin.api_key = ADMIN_KEY.to_string();

    let layer = Arc::new(SessionLayer::new(Arc::new(MemoryStore::new()), &config));
    let shutdown = Shutdown::new();
    let server = HttpServer::new(layer.clone(), &config, shutdown.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let _ = server.run(listener).await;
    });
    (addr, layer, shutdown)
}

pub type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub async fn connect(addr: SocketAddr, player: &str) -> WsClient {
    let url = format!("ws://{addr}/ws?player={player}");
    let (ws, _) = tokio_tungstenite::connect_async(url).await.expect("connect");
    ws
}

/// Next server control frame, skipping pings.
pub async fn next_frame(ws: &mut WsClient) -> ServerFrame {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket ended")
            .expect("socket error");
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => {}
        }
    }
}

/// Close code sent by the server, reading past any other frames.
pub async fn next_close_code(ws: &mut WsClient) -> Option<u16> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close")?;
        match message {
            Ok(Message::Close(frame)) => return frame.map(|f| u16::from(f.code)),
            Ok(_) => {}
            Err(_) => return None,
        }
    }
}
