//! Quiz templates: the authored, immutable definitions a game is played from.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::ids::{ChoiceId, QuestionId, QuizId};

/// Fewest choices a question may offer.
pub const MIN_CHOICES: usize = 2;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizChoice {
    pub id: ChoiceId,
    #[serde(alias = "value")]
    pub name: String,
    #[serde(default)]
    pub correct: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: QuestionId,
    pub name: String,
    pub choices: Vec<QuizChoice>,
}

impl QuizQuestion {
    /// The single choice marked correct. Present for every validated question.
    pub fn correct_choice(&self) -> Option<&QuizChoice> {
        self.choices.iter().find(|c| c.correct)
    }

    pub fn has_choice(&self, choice_id: &ChoiceId) -> bool {
        self.choices.iter().any(|c| &c.id == choice_id)
    }

    /// Check the structural rules a question must satisfy before any game
    /// can reference it.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.choices.len() < MIN_CHOICES {
            return Err(ValidationError::TooFewChoices {
                question_id: self.id.clone(),
                count: self.choices.len(),
            });
        }

        let mut seen = HashSet::new();
        for choice in &self.choices {
            if !seen.insert(&choice.id) {
                return Err(ValidationError::DuplicateChoiceId {
                    question_id: self.id.clone(),
                    choice_id: choice.id.clone(),
                });
            }
        }

        let correct = self.choices.iter().filter(|c| c.correct).count();
        if correct != 1 {
            return Err(ValidationError::CorrectChoiceCount {
                question_id: self.id.clone(),
                count: correct,
            });
        }

        Ok(())
    }
}

/// An authored quiz. Never mutated once stored; games hold it behind an `Arc`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizTemplate {
    pub id: QuizId,
    pub name: String,
    pub questions: Vec<QuizQuestion>,
}

impl QuizTemplate {
    /// Build a template with a fresh id, rejecting malformed questions.
    pub fn new(name: impl Into<String>, questions: Vec<QuizQuestion>) -> Result<Self, ValidationError> {
        Self::with_id(QuizId::new(), name, questions)
    }

    pub fn with_id(
        id: QuizId,
        name: impl Into<String>,
        questions: Vec<QuizQuestion>,
    ) -> Result<Self, ValidationError> {
        validate_questions(&questions)?;
        Ok(Self {
            id,
            name: name.into(),
            questions,
        })
    }

    pub fn question(&self, index: usize) -> Option<&QuizQuestion> {
        self.questions.get(index)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

/// Validate an ordered question list.
pub fn validate_questions(questions: &[QuizQuestion]) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for question in questions {
        if !seen.insert(&question.id) {
            return Err(ValidationError::DuplicateQuestionId(question.id.clone()));
        }
        question.validate()?;
    }
    Ok(())
}

/// What a player sees of a question: no correctness flags.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: QuestionId,
    pub name: String,
    pub choices: Vec<ChoiceView>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceView {
    pub id: ChoiceId,
    pub name: String,
}

impl From<&QuizQuestion> for QuestionView {
    fn from(q: &QuizQuestion) -> Self {
        Self {
            id: q.id.clone(),
            name: q.name.clone(),
            choices: q
                .choices
                .iter()
                .map(|c| ChoiceView {
                    id: c.id.clone(),
                    name: c.name.clone(),
                })
                .collect(),
        }
    }
}
