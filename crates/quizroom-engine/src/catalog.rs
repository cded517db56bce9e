use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, instrument};

use quizroom_core::ids::{ChoiceId, QuestionId, QuizId};
use quizroom_core::{GameError, QuizChoice, QuizQuestion, QuizTemplate};
use quizroom_store::QuizStore;

/// Read-mostly view over stored quiz templates.
///
/// Templates are immutable once created, so a loaded template is cached
/// behind an `Arc` and shared by every game playing it.
pub struct QuizCatalog {
    store: Arc<dyn QuizStore>,
    cache: DashMap<QuizId, Arc<QuizTemplate>>,
}

impl QuizCatalog {
    pub fn new(store: Arc<dyn QuizStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    pub fn get(&self, id: &QuizId) -> Result<Arc<QuizTemplate>, GameError> {
        if let Some(hit) = self.cache.get(id) {
            return Ok(Arc::clone(hit.value()));
        }
        let quiz = Arc::new(self.store.load(id)?);
        self.cache.insert(id.clone(), Arc::clone(&quiz));
        Ok(quiz)
    }

    /// Validate and store a new template under a fresh id.
    #[instrument(skip(self, questions), fields(question_count = questions.len()))]
    pub fn create(&self, name: &str, questions: Vec<QuizQuestion>) -> Result<QuizId, GameError> {
        let quiz = QuizTemplate::new(name, questions)?;
        let id = quiz.id.clone();
        self.insert(quiz)?;
        Ok(id)
    }

    /// Store an already-built template, e.g. a seed with a fixed id.
    pub fn insert(&self, quiz: QuizTemplate) -> Result<Arc<QuizTemplate>, GameError> {
        quizroom_core::quiz::validate_questions(&quiz.questions)?;
        self.store.save(&quiz)?;
        info!(quiz_id = %quiz.id, name = %quiz.name, "quiz created");
        let quiz = Arc::new(quiz);
        self.cache.insert(quiz.id.clone(), Arc::clone(&quiz));
        Ok(quiz)
    }

    /// Whether a template exists. Storage failures are errors, not `false`.
    pub fn contains(&self, id: &QuizId) -> Result<bool, GameError> {
        match self.get(id) {
            Ok(_) => Ok(true),
            Err(GameError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// All templates, oldest first.
    pub fn list(&self) -> Result<Vec<QuizTemplate>, GameError> {
        Ok(self.store.list()?)
    }
}

/// The sample quiz a fresh install starts with.
pub fn demo_quiz() -> QuizTemplate {
    let choice = |id: &str, name: &str, correct: bool| QuizChoice {
        id: ChoiceId::from_raw(id),
        name: name.into(),
        correct,
    };
    QuizTemplate {
        id: QuizId::from_raw("quiz_math"),
        name: "Math quiz".into(),
        questions: vec![QuizQuestion {
            id: QuestionId::from_raw("question1"),
            name: "What is 2+2".into(),
            choices: vec![
                choice("choice1", "4", true),
                choice("choice2", "cat", false),
                choice("choice3", "42", false),
                choice("choice4", "pi", false),
            ],
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizroom_core::ValidationError;
    use quizroom_store::{MemoryQuizStore, StoreError};

    fn catalog() -> QuizCatalog {
        QuizCatalog::new(Arc::new(MemoryQuizStore::new()))
    }

    #[test]
    fn create_then_get() {
        let catalog = catalog();
        let id = catalog.create("Math quiz", demo_quiz().questions).unwrap();
        let quiz = catalog.get(&id).unwrap();
        assert_eq!(quiz.name, "Math quiz");
        assert_eq!(quiz.len(), 1);
        assert!(Arc::ptr_eq(&quiz, &catalog.get(&id).unwrap()));
    }

    #[test]
    fn get_unknown_is_not_found() {
        assert!(matches!(
            catalog().get(&QuizId::from_raw("quiz_nope")),
            Err(GameError::NotFound(_))
        ));
    }

    #[test]
    fn create_rejects_two_correct_choices() {
        let mut questions = demo_quiz().questions;
        questions[0].choices[1].correct = true;
        let err = catalog().create("bad", questions).unwrap_err();
        assert!(matches!(
            err,
            GameError::Validation(ValidationError::CorrectChoiceCount { count: 2, .. })
        ));
    }

    #[test]
    fn create_rejects_single_choice() {
        let mut questions = demo_quiz().questions;
        questions[0].choices.truncate(1);
        let err = catalog().create("bad", questions).unwrap_err();
        assert!(matches!(
            err,
            GameError::Validation(ValidationError::TooFewChoices { count: 1, .. })
        ));
    }

    #[test]
    fn insert_rejects_duplicate_choice_ids() {
        let mut quiz = demo_quiz();
        quiz.questions[0].choices[2].id = ChoiceId::from_raw("choice2");
        assert!(matches!(
            catalog().insert(quiz),
            Err(GameError::Validation(ValidationError::DuplicateChoiceId { .. }))
        ));
    }

    #[test]
    fn rejected_templates_are_not_listed() {
        let catalog = catalog();
        let mut questions = demo_quiz().questions;
        questions[0].choices[0].correct = false;
        assert!(catalog.create("bad", questions).is_err());
        catalog.insert(demo_quiz()).unwrap();

        let names: Vec<_> = catalog.list().unwrap().into_iter().map(|q| q.name).collect();
        assert_eq!(names, vec!["Math quiz"]);
    }

    struct BrokenStore;

    impl QuizStore for BrokenStore {
        fn load(&self, _id: &QuizId) -> Result<QuizTemplate, StoreError> {
            Err(StoreError::Database("disk I/O error".into()))
        }
        fn save(&self, _quiz: &QuizTemplate) -> Result<(), StoreError> {
            Err(StoreError::Database("disk I/O error".into()))
        }
        fn list(&self) -> Result<Vec<QuizTemplate>, StoreError> {
            Err(StoreError::Database("disk I/O error".into()))
        }
    }

    #[test]
    fn contains_reports_presence() {
        let catalog = catalog();
        let demo = demo_quiz();
        assert!(!catalog.contains(&demo.id).unwrap());
        catalog.insert(demo.clone()).unwrap();
        assert!(catalog.contains(&demo.id).unwrap());
    }

    #[test]
    fn contains_propagates_storage_failure() {
        let catalog = QuizCatalog::new(Arc::new(BrokenStore));
        assert!(matches!(
            catalog.contains(&demo_quiz().id),
            Err(GameError::Storage(_))
        ));
    }

    #[test]
    fn demo_quiz_is_valid() {
        let quiz = demo_quiz();
        assert!(quizroom_core::quiz::validate_questions(&quiz.questions).is_ok());
        assert_eq!(
            quiz.questions[0].correct_choice().unwrap().id.as_str(),
            "choice1"
        );
    }
}
