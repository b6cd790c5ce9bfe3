//! SQLite persistence for users, sessions, conversations and messages.
//!
//! Each operation opens its own connection on the blocking pool; no
//! connection or transaction outlives a single call.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username {0:?} is already taken")]
    UsernameTaken(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage task failed: {0}")]
    Task(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: i64,
    pub title: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Which endpoint produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnType {
    Generate,
    Edit,
}

impl TurnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnType::Generate => "generate",
            TurnType::Edit => "edit",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: String,
    #[serde(rename = "type")]
    pub turn_type: String,
    pub prompt: Option<String>,
    pub images: Vec<String>,
    pub texts: Vec<String>,
    pub params: Value,
    pub created_at: String,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT UNIQUE NOT NULL,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    title TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    type TEXT NOT NULL,
    prompt TEXT,
    images_json TEXT,
    texts_json TEXT,
    params_json TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY(conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
";

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Picks the database file, falling back to the temp dir when the
/// configured directory cannot be written.
pub fn resolve_db_path(requested: &Path) -> PathBuf {
    let parent = match requested.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let probe = parent.join(".db_write_probe");
    let writable = std::fs::create_dir_all(&parent)
        .and_then(|_| std::fs::write(&probe, b"ok"))
        .and_then(|_| std::fs::remove_file(&probe));

    match writable {
        Ok(()) => requested.to_path_buf(),
        Err(e) => {
            let fallback = std::env::temp_dir().join("app.db");
            warn!(
                "database dir {} not writable ({}), falling back to {}",
                parent.display(),
                e,
                fallback.display()
            );
            fallback
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Opens (and migrates) the database at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { path: path.into() };
        store
            .with_conn(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        info!("database ready at {}", store.path.display());
        Ok(store)
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&path)?;
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.execute("PRAGMA foreign_keys = ON;", [])?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    // users

    pub async fn create_user(&self, username: &str, password_hash: &str) -> Result<User, StoreError> {
        let username = username.to_string();
        let password_hash = password_hash.to_string();
        self.with_conn(move |conn| {
            let created_at = now_timestamp();
            let inserted = conn.execute(
                "INSERT INTO users(username, password_hash, created_at) VALUES (?1, ?2, ?3)",
                params![username, password_hash, created_at],
            );
            match inserted {
                Ok(_) => Ok(User { id: conn.last_insert_rowid(), username, created_at }),
                Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                    Err(StoreError::UsernameTaken(username))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    /// Returns `(user_id, password_hash)` for a username.
    pub async fn find_credentials(&self, username: &str) -> Result<Option<(i64, String)>, StoreError> {
        let username = username.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, password_hash FROM users WHERE username = ?1",
                    params![username],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    pub async fn get_user(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        self.with_conn(move |conn| {
            let user = conn
                .query_row(
                    "SELECT id, username, created_at FROM users WHERE id = ?1",
                    params![user_id],
                    |row| {
                        Ok(User {
                            id: row.get(0)?,
                            username: row.get(1)?,
                            created_at: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    // sessions

    pub async fn create_session(
        &self,
        session_id: &str,
        user_id: i64,
        ttl: chrono::Duration,
    ) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO sessions(session_id, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
                params![session_id, user_id, now.to_rfc3339(), (now + ttl).to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])?;
            Ok(())
        })
        .await
    }

    /// Owner of a live session. Expired sessions are deleted on sight.
    pub async fn session_user(&self, session_id: &str) -> Result<Option<i64>, StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let row: Option<(i64, String)> = conn
                .query_row(
                    "SELECT user_id, expires_at FROM sessions WHERE session_id = ?1",
                    params![session_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((user_id, expires_at)) = row else {
                return Ok(None);
            };
            let expired = DateTime::parse_from_rfc3339(&expires_at)
                .map(|at| at.with_timezone(&Utc) < Utc::now())
                .unwrap_or(true);
            if expired {
                conn.execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])?;
                return Ok(None);
            }
            Ok(Some(user_id))
        })
        .await
    }

    // conversations

    pub async fn create_conversation(&self, user_id: i64, title: &str) -> Result<Conversation, StoreError> {
        let title = title.to_string();
        self.with_conn(move |conn| {
            let created_at = now_timestamp();
            conn.execute(
                "INSERT INTO conversations(user_id, title, created_at) VALUES (?1, ?2, ?3)",
                params![user_id, title, created_at],
            )?;
            Ok(Conversation { id: conn.last_insert_rowid(), title, created_at })
        })
        .await
    }

    pub async fn list_conversations(&self, user_id: i64) -> Result<Vec<Conversation>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, COALESCE(title, ''), created_at FROM conversations WHERE user_id = ?1 ORDER BY id DESC",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok(Conversation {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    pub async fn conversation_owner(&self, conversation_id: i64) -> Result<Option<i64>, StoreError> {
        self.with_conn(move |conn| {
            let owner = conn
                .query_row(
                    "SELECT user_id FROM conversations WHERE id = ?1",
                    params![conversation_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(owner)
        })
        .await
    }

    /// True when the conversation exists and belongs to `user_id`.
    pub async fn owns_conversation(&self, user_id: i64, conversation_id: i64) -> Result<bool, StoreError> {
        Ok(self.conversation_owner(conversation_id).await? == Some(user_id))
    }

    pub async fn rename_conversation(
        &self,
        conversation_id: i64,
        title: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let title = title.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE conversations SET title = ?1 WHERE id = ?2",
                params![title, conversation_id],
            )?;
            let conversation = conn
                .query_row(
                    "SELECT id, COALESCE(title, ''), created_at FROM conversations WHERE id = ?1",
                    params![conversation_id],
                    |row| {
                        Ok(Conversation {
                            id: row.get(0)?,
                            title: row.get(1)?,
                            created_at: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(conversation)
        })
        .await
    }

    pub async fn delete_conversation(&self, conversation_id: i64) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM messages WHERE conversation_id = ?1", params![conversation_id])?;
            tx.execute("DELETE FROM conversations WHERE id = ?1", params![conversation_id])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    // messages

    /// Writes a user/assistant pair sharing one timestamp.
    pub async fn insert_turn(
        &self,
        conversation_id: i64,
        turn_type: TurnType,
        prompt: &str,
        images: &[String],
        texts: &[String],
        params_json: &Value,
    ) -> Result<(), StoreError> {
        let prompt = prompt.to_string();
        let images_json = serde_json::to_string(images)?;
        let texts_json = serde_json::to_string(texts)?;
        let params_json = serde_json::to_string(params_json)?;
        self.with_conn(move |conn| {
            let now = now_timestamp();
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages(conversation_id, role, type, prompt, images_json, texts_json, params_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, NULL, NULL, ?5, ?6)",
                params![conversation_id, Role::User.as_str(), turn_type.as_str(), prompt, params_json, now],
            )?;
            tx.execute(
                "INSERT INTO messages(conversation_id, role, type, prompt, images_json, texts_json, params_json, created_at)
                 VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?6, ?7)",
                params![
                    conversation_id,
                    Role::Assistant.as_str(),
                    turn_type.as_str(),
                    images_json,
                    texts_json,
                    params_json,
                    now
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT role, type, prompt, images_json, texts_json, params_json, created_at
                 FROM messages WHERE conversation_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![conversation_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?;

            let mut messages = Vec::new();
            for row in rows {
                let (role, turn_type, prompt, images, texts, params, created_at) = row?;
                messages.push(Message {
                    role,
                    turn_type,
                    prompt,
                    images: decode_json_or_default(images.as_deref())?,
                    texts: decode_json_or_default(texts.as_deref())?,
                    params: match params.as_deref() {
                        Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
                        _ => Value::Object(Default::default()),
                    },
                    created_at,
                });
            }
            Ok(messages)
        })
        .await
    }
}

fn decode_json_or_default(raw: Option<&str>) -> Result<Vec<String>, StoreError> {
    match raw {
        Some(raw) if !raw.is_empty() => Ok(serde_json::from_str(raw)?),
        _ => Ok(Vec::new()),
    }
}
