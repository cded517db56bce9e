//! Game orchestrator: connects the transport to the engine.
//!
//! The `GameOrchestrator` trait is everything the transport may ask of a
//! game. `SessionOrchestrator` is the production implementation. It keeps
//! no state of its own; every call resolves the game, takes its lock,
//! checks authorization, runs the transition, and publishes the resulting
//! event before releasing the lock.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use quizroom_core::ids::{ChoiceId, ConnectionId, GameId, JoinCode, ParticipantId, QuizId};
use quizroom_core::{EndReason, GameError, GameEvent, GameSnapshot, SessionPhase, Viewer};

use crate::catalog::QuizCatalog;
use crate::hub::ConnectionHandle;
use crate::registry::SessionRegistry;
use crate::room::GameRoom;

/// Host-only transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostAction {
    Start,
    #[serde(alias = "closeQuestion")]
    CloseQuestion,
    #[serde(alias = "nextQuestion")]
    NextQuestion,
}

impl fmt::Display for HostAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::CloseQuestion => "close_question",
            Self::NextQuestion => "next_question",
        })
    }
}

impl FromStr for HostAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "close_question" | "closeQuestion" => Ok(Self::CloseQuestion),
            "next_question" | "nextQuestion" => Ok(Self::NextQuestion),
            other => Err(format!("unknown host action: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreatedGame {
    pub game_id: GameId,
    pub join_code: JoinCode,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JoinedGame {
    pub game_id: GameId,
    pub participant_id: ParticipantId,
    /// Proof of identity for `rejoin_game`. Only ever sent to the joiner.
    pub rejoin_secret: String,
}

/// Public facts about a game, enough to show a join screen.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GameSummary {
    pub game_id: GameId,
    pub join_code: JoinCode,
    pub quiz_name: String,
    pub phase: SessionPhase,
    pub participant_count: usize,
}

/// Operations the transport layer calls.
///
/// Connections are passed in opaquely; the orchestrator only ever enqueues
/// onto them. `host_user` is the name the transport authenticated, if any.
pub trait GameOrchestrator: Send + Sync {
    fn create_game(
        &self,
        quiz_id: &QuizId,
        host_user: Option<&str>,
        connection: ConnectionHandle,
    ) -> Result<CreatedGame, GameError>;

    fn join_game(
        &self,
        code: &JoinCode,
        display_name: &str,
        connection: ConnectionHandle,
    ) -> Result<JoinedGame, GameError>;

    /// Re-bind a participant whose previous connection is gone. The caller
    /// must present the secret handed out at join.
    fn rejoin_game(
        &self,
        game_id: &GameId,
        participant_id: ParticipantId,
        rejoin_secret: &str,
        connection: ConnectionHandle,
    ) -> Result<(), GameError>;

    /// Re-attach the game's creator as host.
    fn reattach_host(
        &self,
        game_id: &GameId,
        host_user: Option<&str>,
        connection: ConnectionHandle,
    ) -> Result<(), GameError>;

    fn submit_answer(
        &self,
        game_id: &GameId,
        participant_id: ParticipantId,
        choice_id: &ChoiceId,
    ) -> Result<(), GameError>;

    fn host_advance(
        &self,
        game_id: &GameId,
        caller: &ConnectionId,
        action: HostAction,
    ) -> Result<SessionPhase, GameError>;

    fn end_game(&self, game_id: &GameId, caller: &ConnectionId) -> Result<(), GameError>;

    /// The transport lost this connection. Never fails.
    fn disconnect(&self, game_id: &GameId, connection: &ConnectionId);

    fn snapshot(&self, game_id: &GameId, caller: &ConnectionId) -> Result<GameSnapshot, GameError>;

    fn lookup(&self, code: &JoinCode) -> Result<GameSummary, GameError>;

    fn active_games(&self) -> usize;
}

/// Production orchestrator backed by the catalog and registry.
pub struct SessionOrchestrator {
    catalog: Arc<QuizCatalog>,
    registry: Arc<SessionRegistry>,
}

impl SessionOrchestrator {
    pub fn new(catalog: Arc<QuizCatalog>, registry: Arc<SessionRegistry>) -> Self {
        Self { catalog, registry }
    }

    pub fn catalog(&self) -> &Arc<QuizCatalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Run `f` against an open game under its lock, counting the call as
    /// activity.
    fn with_room<T>(
        &self,
        game_id: &GameId,
        f: impl FnOnce(&mut GameRoom) -> Result<T, GameError>,
    ) -> Result<T, GameError> {
        let handle = self.registry.get(game_id)?;
        let mut room = handle.lock();
        room.ensure_open()?;
        room.touch();
        f(&mut room)
    }
}

/// Attach a connection with its snapshot. A connection that cannot take
/// even the snapshot is closed straight away.
fn attach(room: &mut GameRoom, connection: ConnectionHandle, viewer: Viewer) -> bool {
    let snapshot = room.session.snapshot(viewer);
    let id = connection.id().clone();
    match room.hub.attach(connection.clone(), viewer, snapshot) {
        Ok(()) => true,
        Err(e) => {
            warn!(game_id = %room.session.id(), connection_id = %id, error = %e, "attach failed");
            connection.close();
            false
        }
    }
}

impl GameOrchestrator for SessionOrchestrator {
    #[instrument(skip(self, connection), fields(connection_id = %connection.id()))]
    fn create_game(
        &self,
        quiz_id: &QuizId,
        host_user: Option<&str>,
        connection: ConnectionHandle,
    ) -> Result<CreatedGame, GameError> {
        let host_user = host_user.ok_or(GameError::Unauthorized)?;
        let quiz = self.catalog.get(quiz_id)?;
        let handle = self.registry.create_session(quiz, host_user)?;

        let mut room = handle.lock();
        room.host.connection = Some(connection.id().clone());
        room.host.left_at = None;
        if !attach(&mut room, connection, Viewer::Host) {
            room.host.connection = None;
            room.host.left_at = Some(tokio::time::Instant::now());
        }

        Ok(CreatedGame {
            game_id: handle.id().clone(),
            join_code: handle.code().clone(),
        })
    }

    #[instrument(skip(self, connection), fields(connection_id = %connection.id()))]
    fn join_game(
        &self,
        code: &JoinCode,
        display_name: &str,
        connection: ConnectionHandle,
    ) -> Result<JoinedGame, GameError> {
        let handle = self.registry.resolve(code)?;
        let mut room = handle.lock();
        room.ensure_open()?;
        room.touch();

        let (participant_id, joined) = room.session.join(display_name)?;
        let rejoin_secret = room
            .session
            .participant(participant_id)
            .map(|p| p.rejoin_secret().to_string())
            .unwrap_or_default();
        room.session.bind(participant_id, connection.id().clone())?;
        room.broadcast(joined);
        if !attach(
            &mut room,
            connection,
            Viewer::Participant { participant_id },
        ) {
            room.session.unbind(participant_id);
            room.broadcast(GameEvent::ParticipantDisconnected { participant_id });
        }

        info!(game_id = %handle.id(), %participant_id, "participant joined");
        Ok(JoinedGame {
            game_id: handle.id().clone(),
            participant_id,
            rejoin_secret,
        })
    }

    #[instrument(skip(self, rejoin_secret, connection), fields(connection_id = %connection.id()))]
    fn rejoin_game(
        &self,
        game_id: &GameId,
        participant_id: ParticipantId,
        rejoin_secret: &str,
        connection: ConnectionHandle,
    ) -> Result<(), GameError> {
        self.with_room(game_id, |room| {
            let participant = room
                .session
                .participant(participant_id)
                .ok_or(GameError::UnknownParticipant(participant_id))?;
            if !participant.verify_rejoin_secret(rejoin_secret) {
                warn!(game_id = %game_id, %participant_id, "rejoin with wrong secret");
                return Err(GameError::Unauthorized);
            }
            if participant.connection.is_some() {
                return Err(GameError::Unauthorized);
            }

            room.session.bind(participant_id, connection.id().clone())?;
            room.broadcast(GameEvent::ParticipantReconnected { participant_id });
            if !attach(room, connection, Viewer::Participant { participant_id }) {
                room.session.unbind(participant_id);
            }
            Ok(())
        })
    }

    #[instrument(skip(self, connection), fields(connection_id = %connection.id()))]
    fn reattach_host(
        &self,
        game_id: &GameId,
        host_user: Option<&str>,
        connection: ConnectionHandle,
    ) -> Result<(), GameError> {
        self.with_room(game_id, |room| {
            if host_user != Some(room.host.user.as_str()) {
                return Err(GameError::Unauthorized);
            }
            if let Some(previous) = room.host.connection.take() {
                if let Some((old, _)) = room.hub.detach(&previous) {
                    old.close();
                }
            }

            room.host.connection = Some(connection.id().clone());
            room.host.left_at = None;
            room.broadcast(GameEvent::HostPresence { connected: true });
            if !attach(room, connection, Viewer::Host) {
                room.host.connection = None;
                room.host.left_at = Some(tokio::time::Instant::now());
            }
            Ok(())
        })
    }

    #[instrument(skip(self))]
    fn submit_answer(
        &self,
        game_id: &GameId,
        participant_id: ParticipantId,
        choice_id: &ChoiceId,
    ) -> Result<(), GameError> {
        self.with_room(game_id, |room| {
            let ack = room.session.submit_answer(participant_id, choice_id)?;
            room.broadcast(ack);
            Ok(())
        })
    }

    #[instrument(skip(self))]
    fn host_advance(
        &self,
        game_id: &GameId,
        caller: &ConnectionId,
        action: HostAction,
    ) -> Result<SessionPhase, GameError> {
        self.with_room(game_id, |room| {
            if !room.host.is_host(caller) {
                return Err(GameError::Unauthorized);
            }
            let event = match action {
                HostAction::Start => room.session.start()?,
                HostAction::CloseQuestion => room.session.close_question()?,
                HostAction::NextQuestion => room.session.next_question()?,
            };
            room.broadcast(event);
            Ok(room.session.phase())
        })
    }

    #[instrument(skip(self))]
    fn end_game(&self, game_id: &GameId, caller: &ConnectionId) -> Result<(), GameError> {
        self.with_room(game_id, |room| {
            if room.host.is_host(caller) {
                Ok(())
            } else {
                Err(GameError::Unauthorized)
            }
        })?;
        self.registry.destroy(game_id, EndReason::HostEnded)
    }

    fn disconnect(&self, game_id: &GameId, connection: &ConnectionId) {
        let Ok(handle) = self.registry.get(game_id) else {
            return;
        };
        let mut room = handle.lock();
        if room.disconnect(connection) {
            info!(game_id = %game_id, connection_id = %connection, "connection detached");
        }
    }

    fn snapshot(&self, game_id: &GameId, caller: &ConnectionId) -> Result<GameSnapshot, GameError> {
        let handle = self.registry.get(game_id)?;
        let room = handle.lock();
        room.ensure_open()?;
        let viewer = room.viewer_of(caller).ok_or(GameError::Unauthorized)?;
        Ok(room.session.snapshot(viewer))
    }

    fn lookup(&self, code: &JoinCode) -> Result<GameSummary, GameError> {
        let handle = self.registry.resolve(code)?;
        let room = handle.lock();
        room.ensure_open()?;
        Ok(GameSummary {
            game_id: handle.id().clone(),
            join_code: handle.code().clone(),
            quiz_name: room.session.quiz().name.clone(),
            phase: room.session.phase(),
            participant_count: room.session.participants().len(),
        })
    }

    fn active_games(&self) -> usize {
        self.registry.active_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::demo_quiz;
    use crate::registry::RegistryConfig;
    use crate::session::GameConfig;
    use quizroom_core::ids::QuestionId;
    use quizroom_core::{QuizChoice, QuizQuestion};
    use quizroom_store::MemoryQuizStore;
    use tokio::sync::mpsc::Receiver;

    type Events = Receiver<Arc<GameEvent>>;

    fn orchestrator_with(config: RegistryConfig) -> SessionOrchestrator {
        let catalog = Arc::new(QuizCatalog::new(Arc::new(MemoryQuizStore::new())));
        catalog.insert(demo_quiz()).unwrap();
        SessionOrchestrator::new(catalog, Arc::new(SessionRegistry::new(config)))
    }

    fn orchestrator() -> SessionOrchestrator {
        orchestrator_with(RegistryConfig::default())
    }

    fn conn() -> (ConnectionHandle, Events) {
        ConnectionHandle::channel(64)
    }

    fn drain(rx: &mut Events) -> Vec<GameEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push((*event).clone());
        }
        out
    }

    fn types(events: &[GameEvent]) -> Vec<&'static str> {
        events.iter().map(GameEvent::event_type).collect()
    }

    struct Hosted {
        game: CreatedGame,
        host: ConnectionId,
        host_rx: Events,
    }

    fn host_demo(orch: &SessionOrchestrator) -> Hosted {
        let (host, host_rx) = conn();
        let host_id = host.id().clone();
        let game = orch
            .create_game(&demo_quiz().id, Some("quizmaster"), host)
            .unwrap();
        Hosted {
            game,
            host: host_id,
            host_rx,
        }
    }

    fn four_question_quiz(orch: &SessionOrchestrator) -> QuizId {
        let questions = (1..=4)
            .map(|i| QuizQuestion {
                id: QuestionId::from_raw(format!("q{i}")),
                name: format!("Question {i}"),
                choices: vec![
                    QuizChoice {
                        id: ChoiceId::from_raw(format!("q{i}_yes")),
                        name: "yes".into(),
                        correct: true,
                    },
                    QuizChoice {
                        id: ChoiceId::from_raw(format!("q{i}_no")),
                        name: "no".into(),
                        correct: false,
                    },
                ],
            })
            .collect();
        orch.catalog().create("Four", questions).unwrap()
    }

    #[test]
    fn math_quiz_scenario_end_to_end() {
        let orch = orchestrator();
        let mut hosted = host_demo(&orch);
        let game_id = hosted.game.game_id.clone();
        assert_eq!(hosted.game.join_code.as_str().len(), 6);

        let (alice_conn, mut alice_rx) = conn();
        let (bob_conn, mut bob_rx) = conn();
        let alice = orch
            .join_game(&hosted.game.join_code, "Alice", alice_conn)
            .unwrap();
        let bob = orch
            .join_game(&hosted.game.join_code, "Bob", bob_conn)
            .unwrap();
        assert_eq!(alice.game_id, game_id);

        let phase = orch
            .host_advance(&game_id, &hosted.host, HostAction::Start)
            .unwrap();
        assert_eq!(phase, SessionPhase::QuestionOpen);

        orch.submit_answer(&game_id, alice.participant_id, &ChoiceId::from_raw("choice1"))
            .unwrap();
        orch.submit_answer(&game_id, bob.participant_id, &ChoiceId::from_raw("choice3"))
            .unwrap();

        assert_eq!(
            orch.host_advance(&game_id, &hosted.host, HostAction::CloseQuestion)
                .unwrap(),
            SessionPhase::QuestionClosed
        );
        assert_eq!(
            orch.host_advance(&game_id, &hosted.host, HostAction::NextQuestion)
                .unwrap(),
            SessionPhase::Finished
        );

        let host_events = drain(&mut hosted.host_rx);
        assert_eq!(
            types(&host_events),
            vec![
                "snapshot",
                "participant_joined",
                "participant_joined",
                "question_opened",
                "answer_ack",
                "answer_ack",
                "question_closed",
                "game_finished",
            ]
        );
        match &host_events[6] {
            GameEvent::QuestionClosed {
                correct_choice_id,
                scoreboard,
                ..
            } => {
                assert_eq!(correct_choice_id.as_str(), "choice1");
                assert_eq!(
                    scoreboard
                        .iter()
                        .map(|s| (s.display_name.as_str(), s.score))
                        .collect::<Vec<_>>(),
                    vec![("Alice", 1), ("Bob", 0)]
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // Alice attached before Bob joined, so she sees his join; Bob does not
        // see his own join as a delta, only in his snapshot.
        assert_eq!(
            types(&drain(&mut alice_rx))[..3],
            ["snapshot", "participant_joined", "question_opened"]
        );
        let bob_events = drain(&mut bob_rx);
        match &bob_events[0] {
            GameEvent::Snapshot(snap) => assert_eq!(snap.roster.len(), 2),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(bob_events[1].event_type(), "question_opened");
    }

    #[test]
    fn join_while_question_open_is_invalid_state() {
        let orch = orchestrator();
        let hosted = host_demo(&orch);
        orch.join_game(&hosted.game.join_code, "Alice", conn().0).unwrap();
        orch.host_advance(&hosted.game.game_id, &hosted.host, HostAction::Start)
            .unwrap();

        let err = orch
            .join_game(&hosted.game.join_code, "Carol", conn().0)
            .unwrap_err();
        assert!(matches!(
            err,
            GameError::InvalidState {
                phase: SessionPhase::QuestionOpen,
                ..
            }
        ));
    }

    #[test]
    fn join_with_unknown_code_is_not_found() {
        let orch = orchestrator();
        assert!(matches!(
            orch.join_game(&JoinCode::from_raw("000000x"), "A", conn().0),
            Err(GameError::NotFound(_))
        ));
    }

    #[test]
    fn join_beyond_capacity_is_session_full() {
        let orch = orchestrator_with(RegistryConfig {
            game: GameConfig {
                max_participants: 1,
                ..Default::default()
            },
            ..Default::default()
        });
        let hosted = host_demo(&orch);
        orch.join_game(&hosted.game.join_code, "A", conn().0).unwrap();
        assert_eq!(
            orch.join_game(&hosted.game.join_code, "B", conn().0)
                .unwrap_err(),
            GameError::SessionFull { capacity: 1 }
        );
    }

    #[test]
    fn only_the_host_connection_may_advance() {
        let orch = orchestrator();
        let hosted = host_demo(&orch);
        let (alice_conn, _rx) = conn();
        let alice_conn_id = alice_conn.id().clone();
        orch.join_game(&hosted.game.join_code, "Alice", alice_conn)
            .unwrap();

        for caller in [alice_conn_id, ConnectionId::new()] {
            for action in [HostAction::Start, HostAction::CloseQuestion, HostAction::NextQuestion] {
                assert_eq!(
                    orch.host_advance(&hosted.game.game_id, &caller, action)
                        .unwrap_err(),
                    GameError::Unauthorized
                );
            }
            assert_eq!(
                orch.end_game(&hosted.game.game_id, &caller).unwrap_err(),
                GameError::Unauthorized
            );
        }
        assert_eq!(orch.active_games(), 1);
    }

    #[test]
    fn create_requires_authenticated_host_and_known_quiz() {
        let orch = orchestrator();
        assert_eq!(
            orch.create_game(&demo_quiz().id, None, conn().0).unwrap_err(),
            GameError::Unauthorized
        );
        assert!(matches!(
            orch.create_game(&QuizId::from_raw("quiz_missing"), Some("t"), conn().0),
            Err(GameError::NotFound(_))
        ));
        assert_eq!(orch.active_games(), 0);
    }

    #[test]
    fn rejoin_at_question_closed_gets_snapshot_of_closed_question() {
        let orch = orchestrator();
        let quiz_id = four_question_quiz(&orch);
        let (host, _host_rx) = conn();
        let host_id = host.id().clone();
        let game = orch.create_game(&quiz_id, Some("quizmaster"), host).unwrap();

        let (alice_conn, _alice_rx) = conn();
        let alice_conn_id = alice_conn.id().clone();
        let joined = orch.join_game(&game.join_code, "Alice", alice_conn).unwrap();
        let alice = joined.participant_id;

        orch.host_advance(&game.game_id, &host_id, HostAction::Start)
            .unwrap();
        for _ in 0..2 {
            orch.host_advance(&game.game_id, &host_id, HostAction::CloseQuestion)
                .unwrap();
            orch.host_advance(&game.game_id, &host_id, HostAction::NextQuestion)
                .unwrap();
        }
        orch.submit_answer(&game.game_id, alice, &ChoiceId::from_raw("q3_no"))
            .unwrap();
        orch.disconnect(&game.game_id, &alice_conn_id);
        orch.host_advance(&game.game_id, &host_id, HostAction::CloseQuestion)
            .unwrap();

        let (again, mut again_rx) = conn();
        orch.rejoin_game(&game.game_id, alice, &joined.rejoin_secret, again)
            .unwrap();

        let first = drain(&mut again_rx).remove(0);
        let GameEvent::Snapshot(snap) = first else {
            panic!("expected snapshot first, got {first:?}");
        };
        assert_eq!(snap.phase, SessionPhase::QuestionClosed);
        assert_eq!(snap.question_index, Some(2));
        assert_eq!(snap.question.as_ref().unwrap().id.as_str(), "q3");
        assert_eq!(snap.correct_choice_id.unwrap().as_str(), "q3_yes");
        assert_eq!(snap.own_answer.unwrap().as_str(), "q3_no");
        assert_eq!(
            snap.viewer,
            Viewer::Participant {
                participant_id: alice
            }
        );
        let host_view = orch.snapshot(&game.game_id, &host_id).unwrap();
        let json = serde_json::to_string(&GameEvent::Snapshot(host_view)).unwrap();
        assert!(!json.contains("Question 4"));
    }

    #[test]
    fn rejoin_while_still_bound_is_unauthorized() {
        let orch = orchestrator();
        let hosted = host_demo(&orch);
        let (alice_conn, _rx) = conn();
        let alice = orch
            .join_game(&hosted.game.join_code, "Alice", alice_conn)
            .unwrap();

        assert_eq!(
            orch.rejoin_game(
                &hosted.game.game_id,
                alice.participant_id,
                &alice.rejoin_secret,
                conn().0
            )
            .unwrap_err(),
            GameError::Unauthorized
        );
        assert_eq!(
            orch.rejoin_game(&hosted.game.game_id, ParticipantId(42), "", conn().0)
                .unwrap_err(),
            GameError::UnknownParticipant(ParticipantId(42))
        );
    }

    #[test]
    fn rejoin_needs_the_participants_own_secret() {
        let orch = orchestrator();
        let mut hosted = host_demo(&orch);
        let game_id = hosted.game.game_id.clone();
        let (alice_conn, _alice_rx) = conn();
        let alice = orch
            .join_game(&hosted.game.join_code, "Alice", alice_conn)
            .unwrap();
        let (bob_conn, _bob_rx) = conn();
        let bob_conn_id = bob_conn.id().clone();
        let bob = orch
            .join_game(&hosted.game.join_code, "Bob", bob_conn)
            .unwrap();
        orch.host_advance(&game_id, &hosted.host, HostAction::Start)
            .unwrap();
        orch.disconnect(&game_id, &bob_conn_id);
        drain(&mut hosted.host_rx);

        // Alice's second socket tries to take Bob's empty seat.
        for secret in [alice.rejoin_secret.as_str(), "", "guess"] {
            assert_eq!(
                orch.rejoin_game(&game_id, bob.participant_id, secret, conn().0)
                    .unwrap_err(),
                GameError::Unauthorized
            );
        }
        let handle = orch.registry().get(&game_id).unwrap();
        assert!(handle
            .lock()
            .session
            .participant(bob.participant_id)
            .unwrap()
            .connection
            .is_none());
        assert!(drain(&mut hosted.host_rx).is_empty());

        let (back, _back_rx) = conn();
        orch.rejoin_game(&game_id, bob.participant_id, &bob.rejoin_secret, back)
            .unwrap();
        orch.submit_answer(&game_id, bob.participant_id, &ChoiceId::from_raw("choice1"))
            .unwrap();
    }

    #[test]
    fn participant_disconnect_keeps_answer_and_notifies_host() {
        let orch = orchestrator();
        let mut hosted = host_demo(&orch);
        let (alice_conn, _rx) = conn();
        let alice_conn_id = alice_conn.id().clone();
        let alice = orch
            .join_game(&hosted.game.join_code, "Alice", alice_conn)
            .unwrap()
            .participant_id;
        orch.host_advance(&hosted.game.game_id, &hosted.host, HostAction::Start)
            .unwrap();
        orch.submit_answer(&hosted.game.game_id, alice, &ChoiceId::from_raw("choice1"))
            .unwrap();
        drain(&mut hosted.host_rx);

        orch.disconnect(&hosted.game.game_id, &alice_conn_id);
        assert_eq!(
            drain(&mut hosted.host_rx),
            vec![GameEvent::ParticipantDisconnected {
                participant_id: alice
            }]
        );

        orch.host_advance(&hosted.game.game_id, &hosted.host, HostAction::CloseQuestion)
            .unwrap();
        let snap = orch.snapshot(&hosted.game.game_id, &hosted.host).unwrap();
        assert_eq!(snap.scoreboard[0].score, 1);
        assert!(!snap.roster[0].connected);
    }

    #[test]
    fn host_reattach_requires_same_user() {
        let orch = orchestrator();
        let mut hosted = host_demo(&orch);
        let game_id = hosted.game.game_id.clone();
        let (alice_conn, mut alice_rx) = conn();
        orch.join_game(&hosted.game.join_code, "Alice", alice_conn)
            .unwrap();

        orch.disconnect(&game_id, &hosted.host);
        drain(&mut hosted.host_rx);
        assert_eq!(
            orch.host_advance(&game_id, &hosted.host, HostAction::Start)
                .unwrap_err(),
            GameError::Unauthorized
        );

        assert_eq!(
            orch.reattach_host(&game_id, Some("intruder"), conn().0)
                .unwrap_err(),
            GameError::Unauthorized
        );
        assert_eq!(
            orch.reattach_host(&game_id, None, conn().0).unwrap_err(),
            GameError::Unauthorized
        );

        let (again, _again_rx) = conn();
        let again_id = again.id().clone();
        orch.reattach_host(&game_id, Some("quizmaster"), again).unwrap();
        orch.host_advance(&game_id, &again_id, HostAction::Start)
            .unwrap();

        let handle = orch.registry().get(&game_id).unwrap();
        assert!(handle.lock().host.left_at.is_none());
        assert_eq!(
            types(&drain(&mut alice_rx)),
            vec!["snapshot", "host_presence", "host_presence", "question_opened"]
        );
    }

    #[test]
    fn end_game_closes_everything_and_frees_code() {
        let orch = orchestrator();
        let mut hosted = host_demo(&orch);
        let (alice_conn, mut alice_rx) = conn();
        let alice_token = alice_conn.shutdown_token();
        let alice = orch
            .join_game(&hosted.game.join_code, "Alice", alice_conn)
            .unwrap();

        orch.end_game(&hosted.game.game_id, &hosted.host).unwrap();

        assert!(alice_token.is_cancelled());
        assert_eq!(
            drain(&mut alice_rx).last(),
            Some(&GameEvent::GameEnded {
                reason: EndReason::HostEnded
            })
        );
        assert_eq!(
            drain(&mut hosted.host_rx).last(),
            Some(&GameEvent::GameEnded {
                reason: EndReason::HostEnded
            })
        );
        assert!(matches!(
            orch.lookup(&hosted.game.join_code),
            Err(GameError::NotFound(_))
        ));
        assert!(matches!(
            orch.submit_answer(
                &hosted.game.game_id,
                alice.participant_id,
                &ChoiceId::from_raw("choice1")
            ),
            Err(GameError::NotFound(_))
        ));
        assert_eq!(orch.active_games(), 0);
    }

    #[test]
    fn slow_participant_is_dropped_without_failing_the_transition() {
        let orch = orchestrator();
        let mut hosted = host_demo(&orch);
        let (slow, _slow_rx) = ConnectionHandle::channel(1);
        let slow_token = slow.shutdown_token();
        let slow_joined = orch
            .join_game(&hosted.game.join_code, "Slow", slow)
            .unwrap();

        orch.host_advance(&hosted.game.game_id, &hosted.host, HostAction::Start)
            .unwrap();

        assert!(slow_token.is_cancelled());
        let events = drain(&mut hosted.host_rx);
        assert_eq!(
            types(&events),
            vec![
                "snapshot",
                "participant_joined",
                "question_opened",
                "participant_disconnected"
            ]
        );

        // Still a participant; may come back.
        let (back, _back_rx) = conn();
        orch.rejoin_game(
            &hosted.game.game_id,
            slow_joined.participant_id,
            &slow_joined.rejoin_secret,
            back,
        )
        .unwrap();
    }

    #[test]
    fn lookup_summarizes_game() {
        let orch = orchestrator();
        let hosted = host_demo(&orch);
        orch.join_game(&hosted.game.join_code, "A", conn().0).unwrap();

        let summary = orch.lookup(&hosted.game.join_code).unwrap();
        assert_eq!(summary.quiz_name, "Math quiz");
        assert_eq!(summary.phase, SessionPhase::Lobby);
        assert_eq!(summary.participant_count, 1);
    }

    #[test]
    fn snapshot_requires_attached_connection() {
        let orch = orchestrator();
        let hosted = host_demo(&orch);
        assert_eq!(
            orch.snapshot(&hosted.game.game_id, &ConnectionId::new())
                .unwrap_err(),
            GameError::Unauthorized
        );
        assert_eq!(
            orch.snapshot(&hosted.game.game_id, &hosted.host)
                .unwrap()
                .viewer,
            Viewer::Host
        );
    }

    #[test]
    fn concurrent_answers_are_serialized_per_game() {
        let orch = Arc::new(orchestrator_with(RegistryConfig {
            game: GameConfig {
                max_participants: 64,
                ..Default::default()
            },
            ..Default::default()
        }));
        let (host, mut host_rx) = ConnectionHandle::channel(256);
        let host_id = host.id().clone();
        let game = orch
            .create_game(&demo_quiz().id, Some("quizmaster"), host)
            .unwrap();

        let mut pids = Vec::new();
        let mut receivers = Vec::new();
        for i in 0..32 {
            let (c, rx) = ConnectionHandle::channel(128);
            pids.push(
                orch.join_game(&game.join_code, &format!("p{i}"), c)
                    .unwrap()
                    .participant_id,
            );
            receivers.push(rx);
        }
        orch.host_advance(&game.game_id, &host_id, HostAction::Start)
            .unwrap();

        let threads: Vec<_> = pids
            .iter()
            .map(|pid| {
                let orch = Arc::clone(&orch);
                let game_id = game.game_id.clone();
                let pid = *pid;
                std::thread::spawn(move || {
                    let choice = if pid.0 % 2 == 0 { "choice1" } else { "choice2" };
                    let first = orch.submit_answer(&game_id, pid, &ChoiceId::from_raw(choice));
                    let second = orch.submit_answer(&game_id, pid, &ChoiceId::from_raw("choice1"));
                    (first, second)
                })
            })
            .collect();
        for t in threads {
            let (first, second) = t.join().unwrap();
            assert!(first.is_ok());
            assert_eq!(second.unwrap_err(), GameError::AlreadyAnswered);
        }

        orch.host_advance(&game.game_id, &host_id, HostAction::CloseQuestion)
            .unwrap();

        let events = drain(&mut host_rx);
        let acks = events
            .iter()
            .filter(|e| matches!(e, GameEvent::AnswerAck { .. }))
            .count();
        assert_eq!(acks, 32);
        assert_eq!(events.last().map(GameEvent::event_type), Some("question_closed"));

        let GameEvent::QuestionClosed { scoreboard, .. } = events.last().unwrap() else {
            unreachable!();
        };
        assert_eq!(scoreboard.iter().filter(|s| s.score == 1).count(), 16);

        // Every participant saw the same sequence of post-start events.
        let expected: Vec<GameEvent> = events
            .iter()
            .skip_while(|e| !matches!(e, GameEvent::QuestionOpened { .. }))
            .cloned()
            .collect();
        for rx in &mut receivers {
            let seen: Vec<GameEvent> = drain(rx)
                .into_iter()
                .skip_while(|e| !matches!(e, GameEvent::QuestionOpened { .. }))
                .collect();
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn host_action_parsing() {
        assert_eq!("start".parse::<HostAction>().unwrap(), HostAction::Start);
        assert_eq!(
            "closeQuestion".parse::<HostAction>().unwrap(),
            HostAction::CloseQuestion
        );
        assert_eq!(
            "next_question".parse::<HostAction>().unwrap(),
            HostAction::NextQuestion
        );
        assert!("rewind".parse::<HostAction>().is_err());
        let parsed: HostAction = serde_json::from_str("\"nextQuestion\"").unwrap();
        assert_eq!(parsed, HostAction::NextQuestion);
    }
}
