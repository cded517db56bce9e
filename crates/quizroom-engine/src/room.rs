//! A live game: session state, its hub, and the host seat, behind one lock.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use tokio::time::Instant;

use quizroom_core::ids::{ConnectionId, GameId, JoinCode};
use quizroom_core::{GameError, GameEvent, Viewer};

use crate::hub::{ChannelHub, Dropped};
use crate::session::GameSession;

/// Who owns the game and whether they are currently attached.
#[derive(Clone, Debug)]
pub struct HostSeat {
    pub user: String,
    pub connection: Option<ConnectionId>,
    /// Set when the host connection goes away; cleared on reattach.
    pub left_at: Option<Instant>,
}

impl HostSeat {
    pub fn is_host(&self, connection: &ConnectionId) -> bool {
        self.connection.as_ref() == Some(connection)
    }

    /// How long the seat has been empty, if it is.
    pub fn vacant_for(&self, now: Instant) -> Option<Duration> {
        self.left_at.map(|left| now.saturating_duration_since(left))
    }
}

pub struct GameRoom {
    pub session: GameSession,
    pub hub: ChannelHub,
    pub host: HostSeat,
    pub last_activity: Instant,
    /// Set once the registry has destroyed the game. Handles may outlive it.
    pub closed: bool,
}

impl GameRoom {
    pub fn new(session: GameSession, host_user: String) -> Self {
        let hub = ChannelHub::new(session.id().clone());
        Self {
            session,
            hub,
            host: HostSeat {
                user: host_user,
                connection: None,
                left_at: Some(Instant::now()),
            },
            last_activity: Instant::now(),
            closed: false,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn ensure_open(&self) -> Result<(), GameError> {
        if self.closed {
            return Err(GameError::NotFound(format!("game {}", self.session.id())));
        }
        Ok(())
    }

    /// Resolve which role a connection plays in this game.
    pub fn viewer_of(&self, connection: &ConnectionId) -> Option<Viewer> {
        if self.host.is_host(connection) {
            return Some(Viewer::Host);
        }
        self.hub.viewer_of(connection)
    }

    /// Publish a committed event, then account for any connection the hub
    /// had to drop while doing so.
    pub fn broadcast(&mut self, event: GameEvent) {
        let mut pending = vec![event];
        while let Some(event) = pending.pop() {
            let dropped = self.hub.publish(event);
            pending.extend(dropped.into_iter().filter_map(|d| self.release(d)));
        }
    }

    /// Detach a connection the transport reports as gone. Returns whether
    /// the connection was part of this game.
    pub fn disconnect(&mut self, connection: &ConnectionId) -> bool {
        let Some((handle, viewer)) = self.hub.detach(connection) else {
            return false;
        };
        handle.close();
        if let Some(event) = self.release(Dropped {
            connection: connection.clone(),
            viewer,
            reason: crate::hub::TransportError::Closed,
        }) {
            self.broadcast(event);
        }
        true
    }

    /// Undo a connection's binding and produce the presence event, if any.
    fn release(&mut self, dropped: Dropped) -> Option<GameEvent> {
        match dropped.viewer {
            Viewer::Host => {
                if !self.host.is_host(&dropped.connection) {
                    return None;
                }
                self.host.connection = None;
                self.host.left_at = Some(Instant::now());
                Some(GameEvent::HostPresence { connected: false })
            }
            Viewer::Participant { participant_id } => {
                let bound = self
                    .session
                    .participant(participant_id)
                    .and_then(|p| p.connection.as_ref())
                    == Some(&dropped.connection);
                if !bound {
                    return None;
                }
                self.session.unbind(participant_id);
                Some(GameEvent::ParticipantDisconnected { participant_id })
            }
        }
    }
}

/// Shared handle to a live game. The registry and every in-flight request
/// hold one; all access to the game goes through `lock`.
pub struct GameHandle {
    id: GameId,
    code: JoinCode,
    created_at: DateTime<Utc>,
    room: Mutex<GameRoom>,
}

impl GameHandle {
    pub fn new(room: GameRoom) -> Self {
        Self {
            id: room.session.id().clone(),
            code: room.session.code().clone(),
            created_at: room.session.created_at(),
            room: Mutex::new(room),
        }
    }

    pub fn id(&self) -> &GameId {
        &self.id
    }

    pub fn code(&self) -> &JoinCode {
        &self.code
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn lock(&self) -> MutexGuard<'_, GameRoom> {
        self.room.lock()
    }
}

impl std::fmt::Debug for GameHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameHandle")
            .field("id", &self.id)
            .field("code", &self.code)
            .finish_non_exhaustive()
    }
}
