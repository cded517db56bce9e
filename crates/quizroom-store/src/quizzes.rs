use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::instrument;

use quizroom_core::ids::QuizId;
use quizroom_core::QuizTemplate;

use crate::database::Database;
use crate::error::StoreError;

/// Load/save of quiz templates. The catalog sits on top of this; whether
/// templates live in SQLite or in a process-local map is not its concern.
pub trait QuizStore: Send + Sync {
    fn load(&self, id: &QuizId) -> Result<QuizTemplate, StoreError>;
    fn save(&self, quiz: &QuizTemplate) -> Result<(), StoreError>;
    /// All templates, oldest first.
    fn list(&self) -> Result<Vec<QuizTemplate>, StoreError>;
}

/// SQLite-backed template store. Each template is one row with the full
/// question tree as a JSON payload.
pub struct QuizRepo {
    db: Database,
}

impl QuizRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl QuizStore for QuizRepo {
    #[instrument(skip(self), fields(quiz_id = %id))]
    fn load(&self, id: &QuizId) -> Result<QuizTemplate, StoreError> {
        let payload: Option<String> = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT payload FROM quizzes WHERE id = ?1",
                    [id.as_str()],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        let payload = payload.ok_or_else(|| StoreError::NotFound(format!("quiz {id}")))?;
        Ok(serde_json::from_str(&payload)?)
    }

    #[instrument(skip(self, quiz), fields(quiz_id = %quiz.id))]
    fn save(&self, quiz: &QuizTemplate) -> Result<(), StoreError> {
        let payload = serde_json::to_string(quiz)?;
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO quizzes (id, name, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![quiz.id.as_str(), quiz.name, payload, now],
            )?;
            if inserted == 0 {
                return Err(StoreError::Conflict(format!("quiz {} already exists", quiz.id)));
            }
            Ok(())
        })
    }

    #[instrument(skip(self))]
    fn list(&self) -> Result<Vec<QuizTemplate>, StoreError> {
        let payloads: Vec<String> = self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT payload FROM quizzes ORDER BY created_at ASC, rowid ASC")?;
            let rows = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(StoreError::from))
            .collect()
    }
}
