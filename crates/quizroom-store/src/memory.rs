//! Process-local stores behind the same traits as the SQLite repos.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;

use quizroom_core::ids::{QuizId, UserId};
use quizroom_core::QuizTemplate;

use crate::error::StoreError;
use crate::password;
use crate::quizzes::QuizStore;
use crate::users::{normalize_username, NewUser, User, UserDirectory};

#[derive(Default)]
pub struct MemoryQuizStore {
    // Insertion order doubles as list order.
    quizzes: RwLock<Vec<QuizTemplate>>,
}

impl MemoryQuizStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QuizStore for MemoryQuizStore {
    fn load(&self, id: &QuizId) -> Result<QuizTemplate, StoreError> {
        self.quizzes
            .read()
            .iter()
            .find(|q| &q.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("quiz {id}")))
    }

    fn save(&self, quiz: &QuizTemplate) -> Result<(), StoreError> {
        let mut quizzes = self.quizzes.write();
        if quizzes.iter().any(|q| q.id == quiz.id) {
            return Err(StoreError::Conflict(format!("quiz {} already exists", quiz.id)));
        }
        quizzes.push(quiz.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<QuizTemplate>, StoreError> {
        Ok(self.quizzes.read().clone())
    }
}

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<String, User>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserDirectory for MemoryUserDirectory {
    fn find_by_username(&self, username: &str) -> Result<User, StoreError> {
        let username = normalize_username(username);
        self.users
            .read()
            .get(&username)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user {username}")))
    }

    fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let username = normalize_username(&user.username);
        // Hash before taking the lock; it is slow.
        let password_hash = password::hash_password(&user.password)?;

        let mut users = self.users.write();
        if users.contains_key(&username) {
            return Err(StoreError::Conflict(format!("user {username} already exists")));
        }
        let row = User {
            id: UserId::new(),
            username: username.clone(),
            password_hash,
            created_at: Utc::now().to_rfc3339(),
        };
        users.insert(username, row.clone());
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizroom_core::ids::{ChoiceId, QuestionId};
    use quizroom_core::{QuizChoice, QuizQuestion};

    fn quiz(name: &str) -> QuizTemplate {
        QuizTemplate::new(
            name,
            vec![QuizQuestion {
                id: QuestionId::from_raw("q1"),
                name: "pick".into(),
                choices: vec![
                    QuizChoice {
                        id: ChoiceId::from_raw("a"),
                        name: "a".into(),
                        correct: true,
                    },
                    QuizChoice {
                        id: ChoiceId::from_raw("b"),
                        name: "b".into(),
                        correct: false,
                    },
                ],
            }],
        )
        .unwrap()
    }

    #[test]
    fn quiz_store_roundtrip_and_order() {
        let store = MemoryQuizStore::new();
        let first = quiz("first");
        store.save(&first).unwrap();
        store.save(&quiz("second")).unwrap();

        assert_eq!(store.load(&first.id).unwrap(), first);
        let names: Vec<_> = store.list().unwrap().into_iter().map(|q| q.name).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert!(matches!(store.save(&first), Err(StoreError::Conflict(_))));
    }

    #[test]
    fn quiz_store_missing() {
        let store = MemoryQuizStore::new();
        assert!(matches!(store.load(&QuizId::new()), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn user_directory_matches_sqlite_semantics() {
        let dir = MemoryUserDirectory::new();
        let user = dir
            .create(NewUser {
                username: " Alice ".into(),
                password: "pw".into(),
            })
            .unwrap();
        assert_eq!(user.username, "alice");
        assert!(dir.verify_password(&dir.find_by_username("alice").unwrap(), "pw"));

        let dup = dir.create(NewUser {
            username: "ALICE".into(),
            password: "other".into(),
        });
        assert!(matches!(dup, Err(StoreError::Conflict(_))));
    }
}
