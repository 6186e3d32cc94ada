//! SQLite backend for conversation records

use super::backend::StoreBackend;
use crate::types::ConversationId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// SQLite database wrapper (thread-safe via Arc<Mutex>)
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open (or create) the database and its schema
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        info!("Initializing state database at {:?}", path);
        Self::init(conn)
    }

    /// Database that lives only as long as this value
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS conversation_state (
                id TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        debug!("State schema initialized");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(conn: &Mutex<Connection>) -> std::sync::MutexGuard<'_, Connection> {
        conn.lock().unwrap_or_else(|poisoned| {
            warn!("Database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

#[async_trait]
impl StoreBackend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn load(&self, conversation: &ConversationId) -> Result<Option<Value>> {
        let conn = Arc::clone(&self.conn);
        let id = conversation.as_str().to_owned();

        tokio::task::spawn_blocking(move || {
            let conn = Self::lock(&conn);
            let raw: Option<String> = conn
                .query_row(
                    "SELECT record FROM conversation_state WHERE id = ?1",
                    params![&id],
                    |row| row.get(0),
                )
                .optional()?;
            match raw {
                Some(text) => {
                    let value = serde_json::from_str(&text)
                        .with_context(|| format!("Stored record for {} is not JSON", id))?;
                    Ok(Some(value))
                }
                None => Ok(None),
            }
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    async fn save(&self, conversation: &ConversationId, record: &Value) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let id = conversation.as_str().to_owned();
        let text = serde_json::to_string(record)?;

        tokio::task::spawn_blocking(move || {
            let conn = Self::lock(&conn);
            conn.execute(
                "INSERT INTO conversation_state (id, record, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET record = excluded.record,
                                               updated_at = excluded.updated_at",
                params![&id, &text, Utc::now().to_rfc3339()],
            )?;
            debug!("Saved state for {}", id);
            Ok(())
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    async fn remove(&self, conversation: &ConversationId) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let id = conversation.as_str().to_owned();

        tokio::task::spawn_blocking(move || {
            let conn = Self::lock(&conn);
            conn.execute("DELETE FROM conversation_state WHERE id = ?1", params![&id])?;
            debug!("Removed state for {}", id);
            Ok(())
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    async fn list(&self) -> Result<Vec<ConversationId>> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = Self::lock(&conn);
            let mut stmt = conn.prepare("SELECT id FROM conversation_state ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids.into_iter().map(ConversationId::from).collect())
        })
        .await
        .context("spawn_blocking task panicked")?
    }
}
