//! WhatsApp bridge adapter.
//!
//! The bridge process keeps its own SQLite message store and exposes a small
//! REST API for sending. Reads go straight to the store (read-only, on the
//! blocking pool); sends go through `POST {api_base}/send`.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;

use super::{
    parse_bridge_timestamp, ChatBackend, ChatSummary, HistoryEntry, InboundMessage,
    MessageContext, SendReceipt,
};

const MESSAGE_COLUMNS: &str = "id, sender, content, timestamp, is_from_me";

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    recipient: &'a str,
    message: &'a str,
}

pub struct WhatsAppBridge {
    store_path: PathBuf,
    api_base: String,
    client: reqwest::Client,
}

impl WhatsAppBridge {
    pub fn new(store_path: impl Into<PathBuf>, api_base: String, client: reqwest::Client) -> Self {
        Self {
            store_path: store_path.into(),
            api_base: api_base.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Run a read against the bridge store on the blocking pool.
    async fn with_store<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.store_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .with_context(|| format!("Failed to open bridge store {:?}", path))?;
            f(&conn)
        })
        .await
        .context("Bridge store task panicked")?
    }
}

#[async_trait]
impl ChatBackend for WhatsAppBridge {
    async fn list_chats(&self) -> Result<Vec<ChatSummary>> {
        self.with_store(|conn| {
            let mut stmt = conn.prepare(
                "SELECT jid, name FROM chats ORDER BY last_message_time DESC",
            )?;
            let chats = stmt
                .query_map([], |row| {
                    Ok(ChatSummary {
                        id: row.get(0)?,
                        display_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(chats)
        })
        .await
    }

    async fn list_messages(
        &self,
        chat_id: &str,
        limit: usize,
        include_context: bool,
    ) -> Result<Vec<InboundMessage>> {
        let chat_id = chat_id.to_string();
        self.with_store(move |conn| {
            let now = Utc::now();
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages WHERE chat_jid = ?1 ORDER BY timestamp DESC LIMIT ?2",
                MESSAGE_COLUMNS
            ))?;
            let mut messages = stmt
                .query_map(params![chat_id, limit as i64], |row| inbound_from_row(row, now))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            if include_context {
                let mut known: HashSet<Option<String>> =
                    messages.iter().map(|m| m.id.clone()).collect();
                let anchors: Vec<String> = messages.iter().filter_map(|m| m.id.clone()).collect();
                for anchor in anchors {
                    let context = query_context(conn, &anchor, Some(chat_id.as_str()), 1, 1, now)?;
                    for msg in context.before.into_iter().chain(context.after) {
                        if known.insert(msg.id.clone()) {
                            messages.push(msg);
                        }
                    }
                }
                messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            }

            Ok(messages)
        })
        .await
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<SendReceipt> {
        let url = format!("{}/send", self.api_base);
        let request = SendRequest {
            recipient: chat_id,
            message: text,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to reach bridge send endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Ok(SendReceipt {
                success: false,
                info: format!("HTTP {} - {}", status, body),
            });
        }

        response
            .json::<SendReceipt>()
            .await
            .context("Failed to parse bridge send response")
    }

    async fn get_contact_history(&self, chat_id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let chat_id = chat_id.to_string();
        self.with_store(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT content, is_from_me FROM messages WHERE chat_jid = ?1 ORDER BY timestamp DESC LIMIT ?2",
            )?;
            let history = stmt
                .query_map(params![chat_id, limit as i64], |row| {
                    Ok(HistoryEntry {
                        text: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                        is_from_self: row.get::<_, Option<bool>>(1)?.unwrap_or(false),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(history)
        })
        .await
    }

    async fn get_message_context(
        &self,
        message_id: &str,
        before: usize,
        after: usize,
    ) -> Result<MessageContext> {
        let message_id = message_id.to_string();
        self.with_store(move |conn| query_context(conn, &message_id, None, before, after, Utc::now()))
            .await
    }
}

/// Neighbours of `message_id` in its chat. Ids are only unique per chat, so
/// without `chat_id` the most recent message carrying the id is the anchor.
fn query_context(
    conn: &Connection,
    message_id: &str,
    chat_id: Option<&str>,
    before: usize,
    after: usize,
    now: DateTime<Utc>,
) -> Result<MessageContext> {
    let anchor: Option<(String, Value)> = conn
        .query_row(
            "SELECT chat_jid, timestamp FROM messages
             WHERE id = ?1 AND (?2 IS NULL OR chat_jid = ?2)
             ORDER BY timestamp DESC LIMIT 1",
            params![message_id, chat_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((chat_id, anchor_ts)) = anchor else {
        anyhow::bail!("Message {} not found in bridge store", message_id);
    };

    let mut before_stmt = conn.prepare(&format!(
        "SELECT {} FROM messages WHERE chat_jid = ?1 AND timestamp < ?2 ORDER BY timestamp DESC LIMIT ?3",
        MESSAGE_COLUMNS
    ))?;
    let mut earlier = before_stmt
        .query_map(params![chat_id, anchor_ts, before as i64], |row| {
            inbound_from_row(row, now)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    earlier.reverse();

    let mut after_stmt = conn.prepare(&format!(
        "SELECT {} FROM messages WHERE chat_jid = ?1 AND timestamp > ?2 ORDER BY timestamp ASC LIMIT ?3",
        MESSAGE_COLUMNS
    ))?;
    let later = after_stmt
        .query_map(params![chat_id, anchor_ts, after as i64], |row| {
            inbound_from_row(row, now)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(MessageContext {
        before: earlier,
        after: later,
    })
}

fn inbound_from_row(row: &Row<'_>, now: DateTime<Utc>) -> rusqlite::Result<InboundMessage> {
    let timestamp = timestamp_from_value(row.get_ref(3)?);
    Ok(InboundMessage::from_parts(
        row.get(0)?,
        row.get(2)?,
        row.get(1)?,
        timestamp,
        row.get::<_, Option<bool>>(4)?.unwrap_or(false),
        now,
    ))
}

/// The bridge writes text timestamps; tolerate unix seconds too.
fn timestamp_from_value(value: ValueRef<'_>) -> Option<DateTime<Utc>> {
    match value {
        ValueRef::Text(bytes) => std::str::from_utf8(bytes).ok().and_then(parse_bridge_timestamp),
        ValueRef::Integer(secs) => DateTime::from_timestamp(secs, 0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn fixture_store() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("messages.db");
        let conn = Connection::open(&path).expect("open fixture");
        conn.execute_batch(
            r#"CREATE TABLE chats (
                jid TEXT PRIMARY KEY,
                name TEXT,
                last_message_time TIMESTAMP
            );
            CREATE TABLE messages (
                id TEXT,
                chat_jid TEXT,
                sender TEXT,
                content TEXT,
                timestamp TIMESTAMP,
                is_from_me BOOLEAN,
                PRIMARY KEY (id, chat_jid)
            );"#,
        )
        .expect("schema");

        conn.execute(
            "INSERT INTO chats (jid, name, last_message_time) VALUES (?1, ?2, ?3)",
            params!["120363@g.us", "SRH Forever", "2025-03-01 10:05:00+00:00"],
        )
        .expect("chat 1");
        conn.execute(
            "INSERT INTO chats (jid, name, last_message_time) VALUES (?1, NULL, ?2)",
            params!["1832200000@s.whatsapp.net", "2025-03-01 09:00:00+00:00"],
        )
        .expect("chat 2");

        let rows = [
            ("m1", "120363@g.us", "ravi", "morning all", "2025-03-01 10:00:00+00:00", false),
            ("m2", "120363@g.us", "me", "gm", "2025-03-01 10:01:00+00:00", true),
            ("m3", "120363@g.us", "kiran", "match tonight?", "2025-03-01 10:02:00+00:00", false),
            ("m4", "120363@g.us", "ravi", "obviously", "2025-03-01 10:03:00+00:00", false),
            ("d1", "1832200000@s.whatsapp.net", "1832200000", "call me", "2025-03-01 09:00:00+00:00", false),
        ];
        for (id, chat, sender, content, ts, from_me) in rows {
            conn.execute(
                "INSERT INTO messages (id, chat_jid, sender, content, timestamp, is_from_me) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, chat, sender, content, ts, from_me],
            )
            .expect("message");
        }

        (dir, path)
    }

    fn bridge(path: PathBuf) -> WhatsAppBridge {
        WhatsAppBridge::new(path, "http://localhost:8080/api/".to_string(), reqwest::Client::new())
    }

    #[tokio::test]
    async fn lists_chats_by_recency_with_blank_names() {
        let (_dir, path) = fixture_store();
        let chats = bridge(path).list_chats().await.expect("list chats");
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].id, "120363@g.us");
        assert_eq!(chats[0].display_name, "SRH Forever");
        assert_eq!(chats[1].display_name, "");
    }

    #[tokio::test]
    async fn lists_messages_newest_first() {
        let (_dir, path) = fixture_store();
        let messages = bridge(path)
            .list_messages("120363@g.us", 3, false)
            .await
            .expect("list messages");
        let ids: Vec<_> = messages.iter().filter_map(|m| m.id.as_deref()).collect();
        assert_eq!(ids, vec!["m4", "m3", "m2"]);
        assert!(messages[2].is_from_self);
        assert_eq!(messages[0].sender, "ravi");
    }

    #[tokio::test]
    async fn include_context_pulls_in_neighbours_once() {
        let (_dir, path) = fixture_store();
        let messages = bridge(path)
            .list_messages("120363@g.us", 1, true)
            .await
            .expect("list messages");
        let ids: Vec<_> = messages.iter().filter_map(|m| m.id.as_deref()).collect();
        assert_eq!(ids, vec!["m4", "m3"]);
    }

    #[tokio::test]
    async fn context_is_split_around_anchor() {
        let (_dir, path) = fixture_store();
        let context = bridge(path)
            .get_message_context("m3", 5, 5)
            .await
            .expect("context");
        let before: Vec<_> = context.before.iter().map(|m| m.text.as_str()).collect();
        let after: Vec<_> = context.after.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(before, vec!["morning all", "gm"]);
        assert_eq!(after, vec!["obviously"]);
    }

    #[tokio::test]
    async fn context_anchor_stays_in_its_own_chat() {
        let (_dir, path) = fixture_store();
        Connection::open(&path)
            .expect("open fixture")
            .execute(
                "INSERT INTO messages (id, chat_jid, sender, content, timestamp, is_from_me) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params!["m3", "1832200000@s.whatsapp.net", "1832200000", "you up?", "2025-03-01 09:30:00+00:00", false],
            )
            .expect("duplicate id");
        let bridge = bridge(path);

        let messages = bridge
            .list_messages("1832200000@s.whatsapp.net", 1, true)
            .await
            .expect("list messages");
        let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["you up?", "call me"]);

        let context = bridge.get_message_context("m3", 5, 5).await.expect("context");
        let before: Vec<_> = context.before.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(before, vec!["morning all", "gm"]);
    }

    #[tokio::test]
    async fn context_for_unknown_message_errors() {
        let (_dir, path) = fixture_store();
        let err = bridge(path)
            .get_message_context("nope", 3, 0)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn history_is_newest_first_with_direction() {
        let (_dir, path) = fixture_store();
        let history = bridge(path)
            .get_contact_history("120363@g.us", 10)
            .await
            .expect("history");
        assert_eq!(history.len(), 4);
        assert_eq!(history[0], HistoryEntry::new("obviously", false));
        assert_eq!(history[2], HistoryEntry::new("gm", true));
    }

    #[tokio::test]
    async fn missing_store_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = bridge(dir.path().join("absent.db")).list_chats().await;
        assert!(result.is_err());
    }

    #[test]
    fn integer_timestamps_are_unix_seconds() {
        let ts = timestamp_from_value(ValueRef::Integer(1_740_823_200)).expect("ts");
        assert_eq!(ts, DateTime::from_timestamp(1_740_823_200, 0).expect("valid"));
        assert!(timestamp_from_value(ValueRef::Null).is_none());
        let parsed = timestamp_from_value(ValueRef::Text(b"2025-03-01 10:00:00")).expect("text");
        assert!(Utc::now() - parsed > ChronoDuration::zero());
    }
}
