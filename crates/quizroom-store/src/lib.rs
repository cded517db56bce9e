pub mod database;
pub mod error;
pub mod memory;
pub mod password;
pub mod quizzes;
pub mod schema;
pub mod users;

pub use database::Database;
pub use error::StoreError;
pub use memory::{MemoryQuizStore, MemoryUserDirectory};
pub use quizzes::{QuizRepo, QuizStore};
pub use users::{NewUser, User, UserDirectory, UserRepo};
