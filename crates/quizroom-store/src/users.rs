use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use quizroom_core::ids::UserId;

use crate::database::Database;
use crate::error::StoreError;
use crate::password;

/// A registered host account.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: String,
}

/// Registration input. The password is plaintext until `create` hashes it.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub password: String,
}

/// Credential storage for hosts. Session logic never sees any of this; the
/// transport asks it once at login and keeps the answer on the connection.
pub trait UserDirectory: Send + Sync {
    fn find_by_username(&self, username: &str) -> Result<User, StoreError>;
    fn create(&self, user: NewUser) -> Result<User, StoreError>;

    fn verify_password(&self, stored: &User, attempt: &str) -> bool {
        password::verify_password(attempt, &stored.password_hash)
    }
}

/// Usernames are case-insensitive.
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId::from_raw(row.get::<_, String>(0)?),
        username: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: row.get(3)?,
    })
}

impl UserDirectory for UserRepo {
    #[instrument(skip(self))]
    fn find_by_username(&self, username: &str) -> Result<User, StoreError> {
        let username = normalize_username(username);
        self.db
            .with_conn(|conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, username, password_hash, created_at FROM users WHERE username = ?1",
                        [&username],
                        row_to_user,
                    )
                    .optional()?)
            })?
            .ok_or_else(|| StoreError::NotFound(format!("user {username}")))
    }

    #[instrument(skip(self, user), fields(username = %user.username))]
    fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let username = normalize_username(&user.username);
        let password_hash = password::hash_password(&user.password)?;
        let row = User {
            id: UserId::new(),
            username,
            password_hash,
            created_at: Utc::now().to_rfc3339(),
        };

        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO users (id, username, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![row.id.as_str(), row.username, row.password_hash, row.created_at],
            )?;
            if inserted == 0 {
                return Err(StoreError::Conflict(format!("user {} already exists", row.username)));
            }
            Ok(())
        })?;

        Ok(row)
    }
}
