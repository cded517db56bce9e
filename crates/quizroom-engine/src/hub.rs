//! Per-game fan-out of events to attached connections.
//!
//! The hub never touches a socket. Each connection is a bounded queue plus a
//! cancellation token; the transport drains the queue on its own task. A
//! publish only enqueues, so it is safe to call while holding the game lock,
//! and events reach every queue in the order they were published.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use quizroom_core::ids::{ConnectionId, GameId};
use quizroom_core::{GameEvent, GameSnapshot, Viewer};

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("send queue full")]
    QueueFull,
    #[error("connection closed")]
    Closed,
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
    #[error("socket error: {0}")]
    Socket(String),
}

/// The engine's end of one transport connection.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Arc<GameEvent>>,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    /// A fresh handle and the receiving end the transport writer drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<GameEvent>>) {
        Self::with_id(ConnectionId::new(), capacity)
    }

    pub fn with_id(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Arc<GameEvent>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id,
                tx,
                shutdown: CancellationToken::new(),
            },
            rx,
        )
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Enqueue without waiting. A full queue is an error, never a wait.
    pub fn try_deliver(&self, event: Arc<GameEvent>) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::QueueFull,
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    /// Ask the transport to drop the connection.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.tx.is_closed()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

struct Attached {
    handle: ConnectionHandle,
    viewer: Viewer,
}

/// A connection the hub dropped because it could not keep up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dropped {
    pub connection: ConnectionId,
    pub viewer: Viewer,
    pub reason: TransportError,
}

pub struct ChannelHub {
    game_id: GameId,
    connections: HashMap<ConnectionId, Attached>,
}

impl ChannelHub {
    pub fn new(game_id: GameId) -> Self {
        Self {
            game_id,
            connections: HashMap::new(),
        }
    }

    /// Attach a connection and deliver its initial snapshot before anything
    /// else. Re-attaching the same connection replaces its viewer.
    pub fn attach(
        &mut self,
        handle: ConnectionHandle,
        viewer: Viewer,
        snapshot: GameSnapshot,
    ) -> Result<(), TransportError> {
        handle.try_deliver(Arc::new(GameEvent::Snapshot(snapshot)))?;
        debug!(game_id = %self.game_id, connection_id = %handle.id(), ?viewer, "connection attached");
        self.connections
            .insert(handle.id().clone(), Attached { handle, viewer });
        Ok(())
    }

    /// Forget a connection without closing it.
    pub fn detach(&mut self, id: &ConnectionId) -> Option<(ConnectionHandle, Viewer)> {
        self.connections
            .remove(id)
            .map(|attached| (attached.handle, attached.viewer))
    }

    /// Deliver to every attached connection. Connections whose queue is full
    /// or closed are closed and removed; the rest are unaffected.
    pub fn publish(&mut self, event: GameEvent) -> Vec<Dropped> {
        let event_type = event.event_type();
        let event = Arc::new(event);
        let mut failed = Vec::new();

        for (id, attached) in &self.connections {
            if let Err(reason) = attached.handle.try_deliver(Arc::clone(&event)) {
                failed.push((id.clone(), reason));
            }
        }

        let dropped = self.drop_connections(failed);
        debug!(
            game_id = %self.game_id,
            event_type,
            recipients = self.connections.len(),
            dropped = dropped.len(),
            "event published"
        );
        dropped
    }

    /// Deliver to one connection only.
    pub fn send_to(&mut self, id: &ConnectionId, event: GameEvent) -> Vec<Dropped> {
        let result = match self.connections.get(id) {
            Some(attached) => attached.handle.try_deliver(Arc::new(event)),
            None => return Vec::new(),
        };
        match result {
            Ok(()) => Vec::new(),
            Err(reason) => self.drop_connections(vec![(id.clone(), reason)]),
        }
    }

    fn drop_connections(&mut self, failed: Vec<(ConnectionId, TransportError)>) -> Vec<Dropped> {
        failed
            .into_iter()
            .filter_map(|(id, reason)| {
                let attached = self.connections.remove(&id)?;
                warn!(
                    game_id = %self.game_id,
                    connection_id = %id,
                    error = %reason,
                    "dropping slow or closed connection"
                );
                attached.handle.close();
                Some(Dropped {
                    connection: id,
                    viewer: attached.viewer,
                    reason,
                })
            })
            .collect()
    }

    /// Send a final event to everyone, then close every connection.
    pub fn close_all(&mut self, final_event: GameEvent) {
        let event = Arc::new(final_event);
        for (_, attached) in self.connections.drain() {
            let _ = attached.handle.try_deliver(Arc::clone(&event));
            attached.handle.close();
        }
    }

    pub fn viewer_of(&self, id: &ConnectionId) -> Option<Viewer> {
        self.connections.get(id).map(|a| a.viewer)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
