use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use quizroom_core::ids::{ConnectionId, GameId};
use quizroom_core::{GameEvent, Viewer};
use quizroom_engine::{ConnectionHandle, TransportError};

use crate::handlers::{self, HandlerState};
use crate::rpc::{RpcRequest, RpcResponse};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Liveness and write-deadline settings for every socket.
#[derive(Clone, Copy, Debug)]
pub struct Heartbeat {
    pub interval: Duration,
    /// A client silent for this long is considered dead.
    pub timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: HEARTBEAT_INTERVAL,
            timeout: CLIENT_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
        }
    }
}

/// Which game a connection is attached to, and as whom.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub game_id: GameId,
    pub viewer: Viewer,
}

/// A connected WebSocket client.
pub struct Client {
    connection: ConnectionHandle,
    reply_tx: mpsc::Sender<String>,
    user: Mutex<Option<String>>,
    binding: Mutex<Option<Binding>>,
    last_pong: AtomicU64,
}

/// Receiving ends drained by the socket writer.
pub struct ClientChannels {
    pub replies: mpsc::Receiver<String>,
    pub events: mpsc::Receiver<Arc<GameEvent>>,
}

impl Client {
    pub fn id(&self) -> &ConnectionId {
        self.connection.id()
    }

    /// The engine-side handle; cloned into a game on attach.
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn user(&self) -> Option<String> {
        self.user.lock().clone()
    }

    pub fn set_user(&self, username: String) {
        *self.user.lock() = Some(username);
    }

    pub fn binding(&self) -> Option<Binding> {
        self.binding.lock().clone()
    }

    pub fn bind(&self, game_id: GameId, viewer: Viewer) {
        *self.binding.lock() = Some(Binding { game_id, viewer });
    }

    pub fn clear_binding(&self) -> Option<Binding> {
        self.binding.lock().take()
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }

    /// Queue an RPC reply for the writer.
    pub async fn reply(&self, response: &RpcResponse) -> bool {
        match serde_json::to_string(response) {
            Ok(json) => self.reply_tx.send(json).await.is_ok(),
            Err(e) => {
                tracing::error!(client_id = %self.id(), error = %e, "Failed to serialize response");
                false
            }
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected WebSocket clients.
pub struct ClientRegistry {
    clients: DashMap<ConnectionId, Arc<Client>>,
    max_send_queue: usize,
    heartbeat: Heartbeat,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize, heartbeat: Heartbeat) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
            heartbeat,
        }
    }

    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat
    }

    /// Register a new client with bounded outbound queues.
    pub fn register(&self) -> (Arc<Client>, ClientChannels) {
        let (connection, events) = ConnectionHandle::channel(self.max_send_queue);
        let (reply_tx, replies) = mpsc::channel(self.max_send_queue.max(1));
        let client = Arc::new(Client {
            connection,
            reply_tx,
            user: Mutex::new(None),
            binding: Mutex::new(None),
            last_pong: AtomicU64::new(now_secs()),
        });
        self.clients
            .insert(client.id().clone(), Arc::clone(&client));
        (client, ClientChannels { replies, events })
    }

    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<Client>> {
        self.clients.remove(id).map(|(_, client)| {
            client.connection.close();
            client
        })
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Client>> {
        self.clients.get(id).map(|c| Arc::clone(c.value()))
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Close clients that haven't answered a ping within the timeout. Their
    /// socket tasks notice and run the normal disconnect path.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<ConnectionId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive(self.heartbeat.timeout))
            .map(|entry| entry.key().clone())
            .collect();

        for id in &dead {
            self.unregister(id);
            tracing::info!(client_id = %id, "Cleaned up dead client");
        }
        dead.len()
    }
}

type WsSink = SplitSink<WebSocket, WsMessage>;

/// Write one frame, bounded by the write deadline.
async fn write_frame(
    ws_tx: &mut WsSink,
    frame: WsMessage,
    deadline: Duration,
) -> Result<(), TransportError> {
    match tokio::time::timeout(deadline, ws_tx.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TransportError::Socket(e.to_string())),
        Err(_) => Err(TransportError::WriteTimeout(deadline)),
    }
}

/// Write whatever is already queued, events first. Stops at the first
/// failed write.
async fn flush_pending(
    ws_tx: &mut WsSink,
    events: &mut mpsc::Receiver<Arc<GameEvent>>,
    replies: &mut mpsc::Receiver<String>,
    deadline: Duration,
) {
    let mut pending = Vec::new();
    while let Ok(event) = events.try_recv() {
        match serde_json::to_string(&*event) {
            Ok(json) => pending.push(json),
            Err(e) => tracing::error!(error = %e, "Failed to serialize game event"),
        }
    }
    while let Ok(reply) = replies.try_recv() {
        pending.push(reply);
    }
    for text in pending {
        if write_frame(ws_tx, WsMessage::Text(text.into()), deadline)
            .await
            .is_err()
        {
            return;
        }
    }
}

/// Handle a WebSocket connection: split into reader/writer, manage lifecycle
/// with heartbeat, and detach from any game once either side stops.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client: Arc<Client>,
    channels: ClientChannels,
    registry: Arc<ClientRegistry>,
    state: Arc<HandlerState>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let heartbeat = registry.heartbeat();
    let shutdown = client.connection.shutdown_token();
    let ClientChannels {
        mut replies,
        mut events,
    } = channels;

    // Cancelled once the reader has queued its last reply.
    let reader_done = CancellationToken::new();

    // Writer task: game events and replies to the socket, plus periodic ping.
    let writer_client = Arc::clone(&client);
    let writer_shutdown = shutdown.clone();
    let writer_reader_done = reader_done.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat.interval);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            let frame = tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => match serde_json::to_string(&*event) {
                        Ok(json) => WsMessage::Text(json.into()),
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize game event");
                            continue;
                        }
                    },
                    None => break,
                },
                reply = replies.recv() => match reply {
                    Some(text) => WsMessage::Text(text.into()),
                    None => break,
                },
                _ = writer_shutdown.cancelled() => {
                    // A request that closed this connection (game.end) still
                    // owes its caller a reply.
                    let _ = tokio::time::timeout(
                        heartbeat.write_timeout,
                        writer_reader_done.cancelled(),
                    )
                    .await;
                    flush_pending(&mut ws_tx, &mut events, &mut replies, heartbeat.write_timeout)
                        .await;
                    break;
                }
                _ = ping_interval.tick() => WsMessage::Ping(Vec::new().into()),
            };

            if let Err(e) = write_frame(&mut ws_tx, frame, heartbeat.write_timeout).await {
                tracing::warn!(client_id = %writer_client.id(), error = %e, "Socket write failed");
                break;
            }
        }

        let _ = ws_tx.send(WsMessage::Close(None)).await;
    });

    // Reader task: requests are handled in arrival order, one at a time.
    let reader_client = Arc::clone(&client);
    let reader_state = Arc::clone(&state);
    let reader_shutdown = shutdown.clone();
    let mut reader = tokio::spawn(async move {
        let _done = reader_done.drop_guard();
        loop {
            let msg = tokio::select! {
                _ = reader_shutdown.cancelled() => break,
                msg = ws_rx.next() => msg,
            };
            match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    let response = handle_text(&reader_state, &reader_client, text.as_str()).await;
                    if !reader_client.reply(&response).await {
                        break;
                    }
                }
                Some(Ok(WsMessage::Pong(_))) => reader_client.record_pong(),
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                // axum answers pings itself
                Some(Ok(_)) => {}
            }
        }
    });

    // Wait for either task to finish, then stop the other.
    tokio::select! {
        _ = &mut writer => {
            shutdown.cancel();
            let _ = reader.await;
        }
        _ = &mut reader => {
            shutdown.cancel();
            let _ = writer.await;
        }
    }

    if let Some(binding) = client.clear_binding() {
        state.orchestrator.disconnect(&binding.game_id, client.id());
    }
    registry.unregister(client.id());
    tracing::info!(client_id = %client.id(), "WebSocket client disconnected");
}

async fn handle_text(state: &Arc<HandlerState>, client: &Arc<Client>, raw: &str) -> RpcResponse {
    let request: RpcRequest = match serde_json::from_str(raw) {
        Ok(req) => req,
        Err(_) => return RpcResponse::parse_error(),
    };
    let params = request.params.unwrap_or(serde_json::json!({}));
    handlers::dispatch(state, client, &request.method, &params, request.id).await
}

/// Start a background task that periodically cleans up dead clients.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed = removed, "Dead client cleanup");
            }
        }
    })
}
