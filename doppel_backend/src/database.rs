use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use crate::memory::Turn;

/// Last inbound message handled for a chat. `message_id` can be null when the
/// bridge did not report one; the row still exists so the chat counts as seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenMarker {
    pub chat_id: String,
    pub message_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Cached persona instruction for one chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToneProfile {
    pub chat_id: String,
    pub instruction: String,
    pub use_count: u32,
    pub refreshed_at: DateTime<Utc>,
}

/// Durable state for the reply loop: seen markers, rolling memory and tone
/// profiles, one table each. Every write goes straight to disk.
pub struct StateDatabase {
    conn: Mutex<Connection>,
}

impl StateDatabase {
    /// Helper to lock the connection
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))
    }

    /// Create or open the database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open state database {:?}", path))?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS seen_markers (
                chat_id TEXT PRIMARY KEY,
                message_id TEXT,
                updated_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS conversation_memory (
                chat_id TEXT PRIMARY KEY,
                turns_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS tone_profiles (
                chat_id TEXT PRIMARY KEY,
                instruction TEXT NOT NULL,
                use_count INTEGER NOT NULL DEFAULT 0,
                refreshed_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
            [],
        )?;

        Ok(())
    }

    // ========================================================================
    // Seen markers
    // ========================================================================

    pub fn get_seen_marker(&self, chat_id: &str) -> Result<Option<SeenMarker>> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT chat_id, message_id, updated_at FROM seen_markers WHERE chat_id = ?1",
            [chat_id],
            |row| {
                Ok(SeenMarker {
                    chat_id: row.get(0)?,
                    message_id: row.get(1)?,
                    updated_at: parse_rfc3339(row.get::<_, String>(2)?, 2)?,
                })
            },
        )
        .optional()
        .context("Failed to read seen marker")
    }

    pub fn set_seen_marker(&self, chat_id: &str, message_id: Option<&str>) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO seen_markers (chat_id, message_id, updated_at) VALUES (?1, ?2, ?3)",
            params![chat_id, message_id, Utc::now().to_rfc3339()],
        )
        .context("Failed to write seen marker")?;
        Ok(())
    }

    pub fn count_seen_markers(&self) -> Result<usize> {
        self.count_rows("seen_markers")
    }

    // ========================================================================
    // Conversation memory
    // ========================================================================

    /// Stored history for a chat, `None` when the chat was never seeded.
    pub fn get_turn_history(&self, chat_id: &str) -> Result<Option<Vec<Turn>>> {
        let conn = self.lock_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT turns_json FROM conversation_memory WHERE chat_id = ?1",
                [chat_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read conversation memory")?;

        match raw {
            Some(json) => {
                let turns = serde_json::from_str(&json).with_context(|| {
                    format!("Corrupt conversation memory for chat {}", chat_id)
                })?;
                Ok(Some(turns))
            }
            None => Ok(None),
        }
    }

    pub fn set_turn_history(&self, chat_id: &str, turns: &[Turn]) -> Result<()> {
        let json = serde_json::to_string(turns).context("Failed to serialize turns")?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO conversation_memory (chat_id, turns_json, updated_at) VALUES (?1, ?2, ?3)",
            params![chat_id, json, Utc::now().to_rfc3339()],
        )
        .context("Failed to write conversation memory")?;
        Ok(())
    }

    pub fn count_conversations(&self) -> Result<usize> {
        self.count_rows("conversation_memory")
    }

    // ========================================================================
    // Tone profiles
    // ========================================================================

    pub fn get_tone_profile(&self, chat_id: &str) -> Result<Option<ToneProfile>> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT chat_id, instruction, use_count, refreshed_at FROM tone_profiles WHERE chat_id = ?1",
            [chat_id],
            |row| {
                Ok(ToneProfile {
                    chat_id: row.get(0)?,
                    instruction: row.get(1)?,
                    use_count: row.get(2)?,
                    refreshed_at: parse_rfc3339(row.get::<_, String>(3)?, 3)?,
                })
            },
        )
        .optional()
        .context("Failed to read tone profile")
    }

    pub fn save_tone_profile(&self, profile: &ToneProfile) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO tone_profiles (chat_id, instruction, use_count, refreshed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                profile.chat_id,
                profile.instruction,
                profile.use_count,
                profile.refreshed_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to write tone profile")?;
        Ok(())
    }

    pub fn count_tone_profiles(&self) -> Result<usize> {
        self.count_rows("tone_profiles")
    }

    fn count_rows(&self, table: &str) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }
}

fn parse_rfc3339(
    value: String,
    column: usize,
) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    value.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}
