//! WebSocket transport for player sessions.
//!
//! # Responsibilities
//! - Adapt a socket to the `Connection` trait (ping/pong probe, close)
//! - Register the player on upgrade and hand back restored state
//! - Turn client control frames into snapshots and explicit leaves
//! - Report socket closure to the registry
//!
//! # Data Flow
//! ```text
//! GET /ws?player=<id>
//!     → admission (ConnectionTracker)
//!     → register → restore → resumed / fresh / degraded
//!     → reader loop
//!         Pong  → WsConnection (probe answer, inline)
//!         Text  → dispatcher task → checkpoint / leave
//!         Close → mark_connection_closed
//! ```
//!
//! # Design Decisions
//! - The reader never awaits registry locks: a pong must be seen even while
//!   another socket for the same player is registering and probing this one
//! - All writes go through one writer task fed by a channel
//! - Close codes: 4000 superseded, 4009 rejected, 1001 server shutdown

use axum::{
    body::Bytes,
    extract::{
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use async_trait::async_trait;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::http::server::AppState;
use crate::layer::SessionLayer;
use crate::net::ConnectionGuard;
use crate::session::{Connection, ConnectionId, ProbeError};
use crate::snapshot::RestoreOutcome;

pub const CLOSE_SUPERSEDED: u16 = 4000;
pub const CLOSE_REJECTED: u16 = 4009;
const CLOSE_GOING_AWAY: u16 = 1001;
const CLOSE_NORMAL: u16 = 1000;

const OUTBOUND_BUFFER: usize = 64;
const INBOUND_BUFFER: usize = 32;

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Returning player; last snapshot attached.
    Resumed {
        version: u64,
        phase: String,
        payload: serde_json::Value,
    },
    /// No snapshot on record.
    Fresh,
    /// Registered, but the snapshot could not be fetched.
    Degraded { reason: String },
    /// Another live connection holds this identity.
    Rejected { reason: String },
    /// Checkpoint stored.
    Ack { version: u64 },
    Error { message: String },
}

/// Frames accepted from the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Checkpoint {
        phase: String,
        payload: serde_json::Value,
    },
    Leave,
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub player: String,
}

/// One player socket, as seen by the session registry.
pub struct WsConnection {
    id: ConnectionId,
    outbound: mpsc::Sender<Message>,
    pongs: watch::Sender<u64>,
    next_nonce: AtomicU64,
    open: AtomicBool,
}

impl WsConnection {
    fn new(id: ConnectionId, outbound: mpsc::Sender<Message>) -> Self {
        let (pongs, _) = watch::channel(0);
        Self {
            id,
            outbound,
            pongs,
            next_nonce: AtomicU64::new(1),
            open: AtomicBool::new(true),
        }
    }

    /// Called by the reader for every Pong.
    fn record_pong(&self, data: &[u8]) {
        if let Ok(bytes) = <[u8; 8]>::try_from(data) {
            self.pongs.send_replace(u64::from_be_bytes(bytes));
        }
    }

    async fn send_frame(&self, frame: &ServerFrame) -> bool {
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(connection_id = %self.id, error = %e, "Failed to encode frame");
                return false;
            }
        };
        self.outbound.send(Message::Text(text.into())).await.is_ok()
    }

    async fn close_with(&self, code: u16, reason: &'static str) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let frame = CloseFrame {
            code,
            reason: Utf8Bytes::from_static(reason),
        };
        let _ = self.outbound.send(Message::Close(Some(frame))).await;
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn probe(&self) -> Result<(), ProbeError> {
        let nonce = self.next_nonce.fetch_add(1, Ordering::Relaxed);
        let mut pongs = self.pongs.subscribe();

        let ping = Message::Ping(Bytes::from(nonce.to_be_bytes().to_vec()));
        self.outbound
            .send(ping)
            .await
            .map_err(|_| ProbeError::Closed)?;

        loop {
            pongs.changed().await.map_err(|_| ProbeError::Closed)?;
            if *pongs.borrow_and_update() == nonce {
                return Ok(());
            }
        }
    }

    async fn close(&self) {
        self.close_with(CLOSE_SUPERSEDED, "superseded").await;
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }
}

/// `GET /ws?player=<logical_id>`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let player = params.player.trim().to_string();
    if player.is_empty() {
        return (StatusCode::BAD_REQUEST, "player must not be empty").into_response();
    }

    let Some(guard) = state.tracker.try_track(ConnectionId::new()) else {
        tracing::warn!(player = %player, limit = state.tracker.limit(), "Connection limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, player, guard, state))
}

async fn handle_socket(socket: WebSocket, player: String, guard: ConnectionGuard, state: AppState) {
    let mut shutdown = state.shutdown.subscribe();
    let (sink, mut stream) = socket.split();
    let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let writer = tokio::spawn(write_loop(sink, outbound_rx));
    let conn = Arc::new(WsConnection::new(guard.id(), outbound));
    let layer = state.layer.clone();

    let registration = match layer.register(&player, conn.clone()).await {
        Ok(registration) => registration,
        Err(e) => {
            conn.send_frame(&ServerFrame::Rejected {
                reason: e.to_string(),
            })
            .await;
            conn.close_with(CLOSE_REJECTED, "already connected").await;
            finish_writer(writer).await;
            return;
        }
    };

    let greeting = match layer.restore(&player).await {
        Ok(RestoreOutcome::Restored(snapshot)) => ServerFrame::Resumed {
            version: snapshot.version,
            phase: snapshot.phase,
            payload: snapshot.payload,
        },
        Ok(RestoreOutcome::NotFound) => ServerFrame::Fresh,
        Err(e) => ServerFrame::Degraded {
            reason: e.to_string(),
        },
    };
    tracing::info!(
        player = %player,
        connection_id = %conn.id(),
        resumed = registration.resumed,
        took_over = registration.superseded.is_some(),
        "Player connected"
    );
    conn.send_frame(&greeting).await;

    let (inbound, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
    let left = Arc::new(AtomicBool::new(false));
    let dispatcher = tokio::spawn(dispatch(
        layer.clone(),
        player.clone(),
        conn.clone(),
        inbound_rx,
        left.clone(),
    ));

    loop {
        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = enqueue(&inbound, text) {
                        tracing::warn!(player = %player, "Dispatcher busy, rejecting frame");
                        conn.send_frame(&reply).await;
                    }
                }
                Some(Ok(Message::Pong(data))) => conn.record_pong(&data),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(player = %player, error = %e, "Socket read failed");
                    break;
                }
            },
            _ = shutdown.recv() => {
                conn.close_with(CLOSE_GOING_AWAY, "server shutting down").await;
                break;
            }
        }
    }

    conn.close_with(CLOSE_NORMAL, "closed").await;
    drop(inbound);
    let _ = dispatcher.await;

    if !left.load(Ordering::SeqCst) && layer.mark_connection_closed(&player, conn.id()).await {
        tracing::info!(player = %player, connection_id = %conn.id(), "Player disconnected");
    }
    finish_writer(writer).await;
    drop(guard);
}

/// Hand a client frame to the dispatcher without waiting on it. Returns
/// the reply for a frame that could not be queued.
fn enqueue(inbound: &mpsc::Sender<Utf8Bytes>, text: Utf8Bytes) -> Option<ServerFrame> {
    let message = match inbound.try_send(text) {
        Ok(()) => return None,
        Err(mpsc::error::TrySendError::Full(_)) => "too many frames in flight, frame not processed",
        Err(mpsc::error::TrySendError::Closed(_)) => "session is closing, frame not processed",
    };
    Some(ServerFrame::Error {
        message: message.to_string(),
    })
}

async fn dispatch(
    layer: Arc<SessionLayer>,
    player: String,
    conn: Arc<WsConnection>,
    mut inbound: mpsc::Receiver<Utf8Bytes>,
    left: Arc<AtomicBool>,
) {
    while let Some(text) = inbound.recv().await {
        let owns_session = layer
            .get_session(&player)
            .await
            .is_some_and(|record| record.connection_id == conn.id() && record.is_active());
        if !owns_session {
            conn.send_frame(&ServerFrame::Error {
                message: "connection no longer owns the session".to_string(),
            })
            .await;
            continue;
        }
        layer.touch(&player).await;

        let reply = match serde_json::from_str::<ClientFrame>(text.as_str()) {
            Ok(ClientFrame::Checkpoint { phase, payload }) => {
                match layer.snapshot(&player, &phase, payload).await {
                    Ok(version) => ServerFrame::Ack { version },
                    Err(e) => ServerFrame::Error {
                        message: e.to_string(),
                    },
                }
            }
            Ok(ClientFrame::Leave) => {
                left.store(true, Ordering::SeqCst);
                conn.close_with(CLOSE_NORMAL, "left").await;
                layer.terminate(&player).await;
                tracing::info!(player = %player, "Player left");
                break;
            }
            Err(e) => ServerFrame::Error {
                message: format!("invalid frame: {e}"),
            },
        };
        conn.send_frame(&reply).await;
    }
}

async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut outbound: mpsc::Receiver<Message>) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if sink.send(message).await.is_err() || closing {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Let queued frames (the close in particular) go out, then stop the writer.
async fn finish_writer(writer: tokio::task::JoinHandle<()>) {
    let abort = writer.abort_handle();
    let flushed = tokio::time::timeout(std::time::Duration::from_secs(1), writer).await;
    if flushed.is_err() {
        abort.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_wire_format() {
        let frame = ServerFrame::Resumed {
            version: 3,
            phase: "deal".into(),
            payload: json!({"hand": [1, 2]}),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "resumed", "version": 3, "phase": "deal", "payload": {"hand": [1, 2]}})
        );
        assert_eq!(serde_json::to_value(ServerFrame::Fresh).unwrap(), json!({"type": "fresh"}));

        let leave: ClientFrame = serde_json::from_str(r#"{"type":"leave"}"#).unwrap();
        assert_eq!(leave, ClientFrame::Leave);
    }

    #[tokio::test]
    async fn test_probe_matches_nonce() {
        let (tx, mut rx) = mpsc::channel(8);
        let conn = Arc::new(WsConnection::new(ConnectionId::new(), tx));

        let probing = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.probe().await })
        };

        let Some(Message::Ping(data)) = rx.recv().await else {
            panic!("expected a ping");
        };
        conn.record_pong(&0u64.to_be_bytes());
        conn.record_pong(&data);
        assert_eq!(probing.await.unwrap(), Ok(()));
    }

    #[test]
    fn test_full_dispatcher_queue_gets_error_reply() {
        let (inbound, mut rx) = mpsc::channel(1);
        let checkpoint = r#"{"type":"checkpoint","phase":"flop","payload":{}}"#;

        assert_eq!(enqueue(&inbound, Utf8Bytes::from_static(checkpoint)), None);
        let reply = enqueue(&inbound, Utf8Bytes::from_static(checkpoint));
        assert!(matches!(reply, Some(ServerFrame::Error { .. })));

        assert!(rx.try_recv().is_ok());
        drop(rx);
        let reply = enqueue(&inbound, Utf8Bytes::from_static(checkpoint));
        assert!(matches!(reply, Some(ServerFrame::Error { .. })));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (tx, mut rx) = mpsc::channel(8);
        let conn = WsConnection::new(ConnectionId::new(), tx);
        conn.close().await;
        conn.close().await;
        assert!(!conn.is_open());

        let Some(Message::Close(Some(frame))) = rx.recv().await else {
            panic!("expected a close frame");
        };
        assert_eq!(frame.code, CLOSE_SUPERSEDED);
        assert!(rx.try_recv().is_err());
    }
}
