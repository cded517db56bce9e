use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{ChoiceId, GameId, JoinCode, ParticipantId};
use crate::quiz::QuestionView;

/// Where a game sits in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Lobby,
    QuestionOpen,
    QuestionClosed,
    Finished,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lobby => "lobby",
            Self::QuestionOpen => "question_open",
            Self::QuestionClosed => "question_closed",
            Self::Finished => "finished",
        })
    }
}

/// Who a connection speaks for inside one game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Viewer {
    Host,
    Participant { participant_id: ParticipantId },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub score: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub connected: bool,
}

/// Why a game was torn down before or after finishing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    HostEnded,
    IdleTimeout,
    HostAbandoned,
}

/// Full current state for a connection that attaches mid-game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub game_id: GameId,
    pub join_code: JoinCode,
    pub quiz_name: String,
    pub phase: SessionPhase,
    /// `None` before the first question opens.
    pub question_index: Option<usize>,
    pub question_count: usize,
    /// The open or just-closed question. Never a question that has not opened yet.
    pub question: Option<QuestionView>,
    /// Only revealed once the current question is closed.
    pub correct_choice_id: Option<ChoiceId>,
    pub answered: Vec<ParticipantId>,
    pub roster: Vec<RosterEntry>,
    pub scoreboard: Vec<ScoreEntry>,
    pub viewer: Viewer,
    pub own_answer: Option<ChoiceId>,
}

/// State changes pushed to every connection attached to a game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    Snapshot(GameSnapshot),

    ParticipantJoined {
        participant_id: ParticipantId,
        display_name: String,
    },

    ParticipantDisconnected {
        participant_id: ParticipantId,
    },

    ParticipantReconnected {
        participant_id: ParticipantId,
    },

    HostPresence {
        connected: bool,
    },

    QuestionOpened {
        question_index: usize,
        question_count: usize,
        question: QuestionView,
    },

    /// Says that someone answered, never what they answered.
    AnswerAck {
        participant_id: ParticipantId,
    },

    QuestionClosed {
        question_index: usize,
        correct_choice_id: ChoiceId,
        scoreboard: Vec<ScoreEntry>,
    },

    GameFinished {
        final_scoreboard: Vec<ScoreEntry>,
    },

    GameEnded {
        reason: EndReason,
    },
}

impl GameEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "snapshot",
            Self::ParticipantJoined { .. } => "participant_joined",
            Self::ParticipantDisconnected { .. } => "participant_disconnected",
            Self::ParticipantReconnected { .. } => "participant_reconnected",
            Self::HostPresence { .. } => "host_presence",
            Self::QuestionOpened { .. } => "question_opened",
            Self::AnswerAck { .. } => "answer_ack",
            Self::QuestionClosed { .. } => "question_closed",
            Self::GameFinished { .. } => "game_finished",
            Self::GameEnded { .. } => "game_ended",
        }
    }
}
