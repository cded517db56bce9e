use crate::events::SessionPhase;
use crate::ids::{ChoiceId, ParticipantId, QuestionId};

/// Structural problems in an authored quiz. Caught when the template is
/// created, so a malformed quiz never reaches a running game.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("question {question_id} has {count} choices, at least 2 required")]
    TooFewChoices { question_id: QuestionId, count: usize },
    #[error("question {question_id} has {count} correct choices, exactly 1 required")]
    CorrectChoiceCount { question_id: QuestionId, count: usize },
    #[error("question {question_id} repeats choice id {choice_id}")]
    DuplicateChoiceId {
        question_id: QuestionId,
        choice_id: ChoiceId,
    },
    #[error("question id {0} appears more than once")]
    DuplicateQuestionId(QuestionId),
}

/// Every failure a game operation can report back to the transport layer.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("invalid quiz: {0}")]
    Validation(#[from] ValidationError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unknown participant {0}")]
    UnknownParticipant(ParticipantId),
    #[error("unknown choice {0}")]
    UnknownChoice(ChoiceId),
    #[error("cannot {action} while {phase}")]
    InvalidState {
        action: &'static str,
        phase: SessionPhase,
    },
    #[error("answer already submitted for this question")]
    AlreadyAnswered,
    #[error("session is full ({capacity} participants)")]
    SessionFull { capacity: usize },
    #[error("not authorized for this action")]
    Unauthorized,
    #[error("no free join code after {attempts} attempts")]
    CodesExhausted { attempts: usize },
    #[error("storage error: {0}")]
    Storage(String),
}

impl GameError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::UnknownParticipant(_) => "unknown_participant",
            Self::UnknownChoice(_) => "unknown_choice",
            Self::InvalidState { .. } => "invalid_state",
            Self::AlreadyAnswered => "already_answered",
            Self::SessionFull { .. } => "session_full",
            Self::Unauthorized => "unauthorized",
            Self::CodesExhausted { .. } => "codes_exhausted",
            Self::Storage(_) => "storage",
        }
    }

    /// Stable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::UnknownParticipant(_) => "UNKNOWN_PARTICIPANT",
            Self::UnknownChoice(_) => "UNKNOWN_CHOICE",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::AlreadyAnswered => "ALREADY_ANSWERED",
            Self::SessionFull { .. } => "SESSION_FULL",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::CodesExhausted { .. } => "UNAVAILABLE",
            Self::Storage(_) => "INTERNAL_ERROR",
        }
    }

    pub fn invalid_state(action: &'static str, phase: SessionPhase) -> Self {
        Self::InvalidState { action, phase }
    }
}
