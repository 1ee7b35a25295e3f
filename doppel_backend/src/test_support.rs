//! In-memory bridge and scripted generator for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::bridge::{
    ChatBackend, ChatSummary, HistoryEntry, InboundMessage, MessageContext, SendReceipt,
};
use crate::generator::{GenerationRequest, ReplyGenerator};

/// A message with id `id`, sent `age_secs` ago.
pub fn inbound(id: &str, text: &str, age_secs: i64, from_self: bool) -> InboundMessage {
    InboundMessage {
        id: Some(id.to_string()),
        text: text.to_string(),
        sender: if from_self { "me" } else { "friend" }.to_string(),
        timestamp: Utc::now() - Duration::seconds(age_secs),
        is_from_self: from_self,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendBehavior {
    Accept,
    Reject,
    TransportError,
}

pub struct FakeBackend {
    chats: Mutex<Vec<ChatSummary>>,
    messages: Mutex<HashMap<String, Vec<InboundMessage>>>,
    history: Mutex<HashMap<String, Vec<HistoryEntry>>>,
    contexts: Mutex<HashMap<String, MessageContext>>,
    sent: Mutex<Vec<(String, String)>>,
    send_behavior: Mutex<SendBehavior>,
    fail_history: AtomicBool,
    fail_messages: AtomicBool,
    history_calls: AtomicUsize,
    list_calls: Mutex<Vec<(String, bool)>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            chats: Mutex::new(Vec::new()),
            messages: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            contexts: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            send_behavior: Mutex::new(SendBehavior::Accept),
            fail_history: AtomicBool::new(false),
            fail_messages: AtomicBool::new(false),
            history_calls: AtomicUsize::new(0),
            list_calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeBackend {
    pub fn set_chats(&self, chats: Vec<ChatSummary>) {
        *self.chats.lock().unwrap() = chats;
    }

    /// Messages newest first, as the bridge returns them.
    pub fn set_messages(&self, chat_id: &str, messages: Vec<InboundMessage>) {
        self.messages
            .lock()
            .unwrap()
            .insert(chat_id.to_string(), messages);
    }

    pub fn set_history(&self, chat_id: &str, history: Vec<HistoryEntry>) {
        self.history
            .lock()
            .unwrap()
            .insert(chat_id.to_string(), history);
    }

    pub fn set_context(&self, message_id: &str, context: MessageContext) {
        self.contexts
            .lock()
            .unwrap()
            .insert(message_id.to_string(), context);
    }

    pub fn set_send_behavior(&self, behavior: SendBehavior) {
        *self.send_behavior.lock().unwrap() = behavior;
    }

    pub fn fail_history(&self, fail: bool) {
        self.fail_history.store(fail, Ordering::SeqCst);
    }

    pub fn fail_messages(&self, fail: bool) {
        self.fail_messages.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    /// `(chat_id, include_context)` for every `list_messages` call.
    pub fn list_calls(&self) -> Vec<(String, bool)> {
        self.list_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn list_chats(&self) -> Result<Vec<ChatSummary>> {
        Ok(self.chats.lock().unwrap().clone())
    }

    async fn list_messages(
        &self,
        chat_id: &str,
        limit: usize,
        include_context: bool,
    ) -> Result<Vec<InboundMessage>> {
        self.list_calls
            .lock()
            .unwrap()
            .push((chat_id.to_string(), include_context));
        if self.fail_messages.load(Ordering::SeqCst) {
            anyhow::bail!("bridge store locked");
        }
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(chat_id)
            .map(|m| m.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<SendReceipt> {
        let behavior = *self.send_behavior.lock().unwrap();
        if behavior == SendBehavior::TransportError {
            anyhow::bail!("connection refused");
        }
        self.sent
            .lock()
            .unwrap()
            .push((chat_id.to_string(), text.to_string()));
        Ok(SendReceipt {
            success: behavior == SendBehavior::Accept,
            info: match behavior {
                SendBehavior::Accept => "Message sent".to_string(),
                _ => "recipient not on WhatsApp".to_string(),
            },
        })
    }

    async fn get_contact_history(&self, chat_id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_history.load(Ordering::SeqCst) {
            anyhow::bail!("history unavailable");
        }
        Ok(self
            .history
            .lock()
            .unwrap()
            .get(chat_id)
            .map(|h| h.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_message_context(
        &self,
        message_id: &str,
        _before: usize,
        _after: usize,
    ) -> Result<MessageContext> {
        Ok(self
            .contexts
            .lock()
            .unwrap()
            .get(message_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Replays canned results in order; errors once the script runs out.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<std::result::Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn failing() -> Self {
        Self::new(Vec::new())
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ReplyGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(e)) => Err(anyhow::anyhow!(e)),
            None => Err(anyhow::anyhow!("rate limited")),
        }
    }
}
