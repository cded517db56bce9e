//! The state machine for one running game.
//!
//! `Lobby -> QuestionOpen -> QuestionClosed -> (QuestionOpen -> QuestionClosed)* -> Finished`
//!
//! Every transition returns the event that describes it. Callers publish
//! that event only after the call returns `Ok`, so nothing is broadcast for
//! a transition that did not commit.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

use quizroom_core::events::RosterEntry;
use quizroom_core::ids::{ChoiceId, ConnectionId, GameId, JoinCode, ParticipantId};
use quizroom_core::quiz::QuizQuestion;
use quizroom_core::{
    GameError, GameEvent, GameSnapshot, QuestionView, QuizTemplate, ScoreEntry, SessionPhase,
    Viewer,
};

pub const DEFAULT_MAX_PARTICIPANTS: usize = 50;
pub const DEFAULT_POINTS_PER_CORRECT: u32 = 1;
const REJOIN_SECRET_LEN: usize = 32;

/// Per-game limits and scoring.
#[derive(Clone, Debug)]
pub struct GameConfig {
    pub max_participants: usize,
    /// Awarded for each correct answer. Speed does not matter.
    pub points_per_correct: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            points_per_correct: DEFAULT_POINTS_PER_CORRECT,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
    /// Id of the bound transport connection. The hub owns the connection.
    pub connection: Option<ConnectionId>,
    /// Handed to the participant at join; required to take the seat back.
    rejoin_secret: String,
}

impl Participant {
    pub fn rejoin_secret(&self) -> &str {
        &self.rejoin_secret
    }

    pub fn verify_rejoin_secret(&self, attempt: &str) -> bool {
        constant_time_eq(self.rejoin_secret.as_bytes(), attempt.as_bytes())
    }
}

fn new_rejoin_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REJOIN_SECRET_LEN)
        .map(char::from)
        .collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[derive(Debug)]
pub struct GameSession {
    id: GameId,
    code: JoinCode,
    quiz: Arc<QuizTemplate>,
    config: GameConfig,
    phase: SessionPhase,
    current: Option<usize>,
    /// Join order.
    participants: Vec<Participant>,
    /// Answers to the current question; cleared when the next one opens.
    answers: HashMap<ParticipantId, ChoiceId>,
    scores: HashMap<ParticipantId, u32>,
    created_at: DateTime<Utc>,
}

impl GameSession {
    pub fn new(id: GameId, code: JoinCode, quiz: Arc<QuizTemplate>, config: GameConfig) -> Self {
        Self {
            id,
            code,
            quiz,
            config,
            phase: SessionPhase::Lobby,
            current: None,
            participants: Vec::new(),
            answers: HashMap::new(),
            scores: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &GameId {
        &self.id
    }

    pub fn code(&self) -> &JoinCode {
        &self.code
    }

    pub fn quiz(&self) -> &Arc<QuizTemplate> {
        &self.quiz
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// `None` before start; equals the question count once finished.
    pub fn question_index(&self) -> Option<usize> {
        self.current
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn score(&self, id: ParticipantId) -> Option<u32> {
        self.scores.get(&id).copied()
    }

    pub fn answer_of(&self, id: ParticipantId) -> Option<&ChoiceId> {
        self.answers.get(&id)
    }

    /// The question currently open or just closed.
    fn current_question(&self) -> Option<&QuizQuestion> {
        match self.phase {
            SessionPhase::QuestionOpen | SessionPhase::QuestionClosed => {
                self.current.and_then(|i| self.quiz.question(i))
            }
            SessionPhase::Lobby | SessionPhase::Finished => None,
        }
    }

    /// Admit a participant. Only legal in the lobby.
    pub fn join(&mut self, display_name: &str) -> Result<(ParticipantId, GameEvent), GameError> {
        if self.phase != SessionPhase::Lobby {
            return Err(GameError::invalid_state("join", self.phase));
        }
        if self.participants.len() >= self.config.max_participants {
            return Err(GameError::SessionFull {
                capacity: self.config.max_participants,
            });
        }

        let id = ParticipantId(self.participants.len() as u32 + 1);
        self.participants.push(Participant {
            id,
            display_name: display_name.to_string(),
            joined_at: Utc::now(),
            connection: None,
            rejoin_secret: new_rejoin_secret(),
        });
        self.scores.insert(id, 0);

        Ok((
            id,
            GameEvent::ParticipantJoined {
                participant_id: id,
                display_name: display_name.to_string(),
            },
        ))
    }

    pub fn start(&mut self) -> Result<GameEvent, GameError> {
        if self.phase != SessionPhase::Lobby {
            return Err(GameError::invalid_state("start", self.phase));
        }
        if self.quiz.is_empty() {
            return Ok(self.finish());
        }
        self.open_question(0)
    }

    /// Record a participant's choice. The first answer per question wins.
    pub fn submit_answer(
        &mut self,
        participant_id: ParticipantId,
        choice_id: &ChoiceId,
    ) -> Result<GameEvent, GameError> {
        if self.phase != SessionPhase::QuestionOpen {
            return Err(GameError::invalid_state("answer", self.phase));
        }
        if self.participant(participant_id).is_none() {
            return Err(GameError::UnknownParticipant(participant_id));
        }
        if self.answers.contains_key(&participant_id) {
            return Err(GameError::AlreadyAnswered);
        }
        let valid = self
            .current_question()
            .is_some_and(|q| q.has_choice(choice_id));
        if !valid {
            return Err(GameError::UnknownChoice(choice_id.clone()));
        }

        self.answers.insert(participant_id, choice_id.clone());
        Ok(GameEvent::AnswerAck { participant_id })
    }

    /// Lock answers and score them.
    pub fn close_question(&mut self) -> Result<GameEvent, GameError> {
        if self.phase != SessionPhase::QuestionOpen {
            return Err(GameError::invalid_state("close question", self.phase));
        }
        let (index, correct) = match (self.current, self.current_question()) {
            (Some(index), Some(question)) => {
                let correct = question.correct_choice().ok_or_else(|| {
                    GameError::NotFound(format!("correct choice for question {}", question.id))
                })?;
                (index, correct.id.clone())
            }
            _ => return Err(GameError::invalid_state("close question", self.phase)),
        };

        let points = self.config.points_per_correct;
        for (participant_id, choice) in &self.answers {
            if *choice == correct {
                let score = self.scores.entry(*participant_id).or_insert(0);
                *score = score.saturating_add(points);
            }
        }
        self.phase = SessionPhase::QuestionClosed;

        Ok(GameEvent::QuestionClosed {
            question_index: index,
            correct_choice_id: correct,
            scoreboard: self.scoreboard(),
        })
    }

    /// Open the next question, or finish after the last one.
    pub fn next_question(&mut self) -> Result<GameEvent, GameError> {
        if self.phase != SessionPhase::QuestionClosed {
            return Err(GameError::invalid_state("advance", self.phase));
        }
        let next = self.current.map_or(0, |i| i + 1);
        if next >= self.quiz.len() {
            return Ok(self.finish());
        }
        self.open_question(next)
    }

    fn open_question(&mut self, index: usize) -> Result<GameEvent, GameError> {
        let question = self
            .quiz
            .question(index)
            .map(QuestionView::from)
            .ok_or_else(|| GameError::NotFound(format!("question {index}")))?;

        self.current = Some(index);
        self.phase = SessionPhase::QuestionOpen;
        self.answers.clear();

        Ok(GameEvent::QuestionOpened {
            question_index: index,
            question_count: self.quiz.len(),
            question,
        })
    }

    fn finish(&mut self) -> GameEvent {
        self.current = Some(self.quiz.len());
        self.phase = SessionPhase::Finished;
        self.answers.clear();
        GameEvent::GameFinished {
            final_scoreboard: self.scoreboard(),
        }
    }

    /// Highest score first; ties keep join order.
    pub fn scoreboard(&self) -> Vec<ScoreEntry> {
        let mut board: Vec<ScoreEntry> = self
            .participants
            .iter()
            .map(|p| ScoreEntry {
                participant_id: p.id,
                display_name: p.display_name.clone(),
                score: self.scores.get(&p.id).copied().unwrap_or(0),
            })
            .collect();
        board.sort_by(|a, b| b.score.cmp(&a.score));
        board
    }

    /// Attach a transport connection id to a participant.
    pub fn bind(&mut self, id: ParticipantId, connection: ConnectionId) -> Result<(), GameError> {
        let participant = self
            .participants
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(GameError::UnknownParticipant(id))?;
        participant.connection = Some(connection);
        Ok(())
    }

    /// Drop a participant's transport binding. Answers and score stay.
    pub fn unbind(&mut self, id: ParticipantId) {
        if let Some(p) = self.participants.iter_mut().find(|p| p.id == id) {
            p.connection = None;
        }
    }

    pub fn snapshot(&self, viewer: Viewer) -> GameSnapshot {
        let question = self.current_question();
        let correct_choice_id = if self.phase == SessionPhase::QuestionClosed {
            question.and_then(|q| q.correct_choice()).map(|c| c.id.clone())
        } else {
            None
        };

        let mut answered: Vec<ParticipantId> = self.answers.keys().copied().collect();
        answered.sort();

        let own_answer = match viewer {
            Viewer::Participant { participant_id } => self.answers.get(&participant_id).cloned(),
            Viewer::Host => None,
        };

        GameSnapshot {
            game_id: self.id.clone(),
            join_code: self.code.clone(),
            quiz_name: self.quiz.name.clone(),
            phase: self.phase,
            question_index: self.current,
            question_count: self.quiz.len(),
            question: question.map(QuestionView::from),
            correct_choice_id,
            answered,
            roster: self
                .participants
                .iter()
                .map(|p| RosterEntry {
                    participant_id: p.id,
                    display_name: p.display_name.clone(),
                    connected: p.connection.is_some(),
                })
                .collect(),
            scoreboard: self.scoreboard(),
            viewer,
            own_answer,
        }
    }
}
