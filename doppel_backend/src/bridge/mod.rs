pub mod whatsapp;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat as listed by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: String,
    pub display_name: String,
}

/// An inbound message, normalized at the bridge boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Bridge message id; some bridges omit it.
    pub id: Option<String>,
    pub text: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    pub is_from_self: bool,
}

impl InboundMessage {
    /// Build from raw bridge fields. A missing timestamp becomes `now`,
    /// a missing sender `"Unknown"`, missing content the empty string.
    pub fn from_parts(
        id: Option<String>,
        text: Option<String>,
        sender: Option<String>,
        timestamp: Option<DateTime<Utc>>,
        is_from_self: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.filter(|id| !id.is_empty()),
            text: text.unwrap_or_default(),
            sender: sender
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
            timestamp: timestamp.unwrap_or(now),
            is_from_self,
        }
    }
}

/// One entry of a chat's history, used for memory seeding and tone samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub text: String,
    pub is_from_self: bool,
}

impl HistoryEntry {
    pub fn new(text: impl Into<String>, is_from_self: bool) -> Self {
        Self {
            text: text.into(),
            is_from_self,
        }
    }
}

/// Messages around an anchor message, both sides oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageContext {
    pub before: Vec<InboundMessage>,
    pub after: Vec<InboundMessage>,
}

/// What the bridge reported for a send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SendReceipt {
    pub success: bool,
    #[serde(default, alias = "message")]
    pub info: String,
}

/// Transport to the messaging backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Every chat the bridge knows about.
    async fn list_chats(&self) -> Result<Vec<ChatSummary>>;

    /// Most recent messages in a chat, newest first.
    async fn list_messages(
        &self,
        chat_id: &str,
        limit: usize,
        include_context: bool,
    ) -> Result<Vec<InboundMessage>>;

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<SendReceipt>;

    /// Recent history for a chat, newest first, both directions.
    async fn get_contact_history(&self, chat_id: &str, limit: usize) -> Result<Vec<HistoryEntry>>;

    async fn get_message_context(
        &self,
        message_id: &str,
        before: usize,
        after: usize,
    ) -> Result<MessageContext>;
}

/// Parse the timestamp formats bridges write: RFC 3339, or
/// `YYYY-MM-DD HH:MM:SS[.frac][+offset]`. Naive values are taken as UTC.
pub fn parse_bridge_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(ts) = DateTime::parse_from_str(raw, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    None
}
