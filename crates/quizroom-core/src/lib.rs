//! Shared vocabulary for quizroom: identifiers, quiz templates, the session
//! phase machine's states, wire events, and the error taxonomy.

pub mod errors;
pub mod events;
pub mod ids;
pub mod quiz;

pub use errors::{GameError, ValidationError};
pub use events::{EndReason, GameEvent, GameSnapshot, RosterEntry, ScoreEntry, SessionPhase, Viewer};
pub use quiz::{ChoiceView, QuestionView, QuizChoice, QuizQuestion, QuizTemplate};
