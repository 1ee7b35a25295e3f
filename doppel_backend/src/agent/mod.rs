pub mod backoff;
pub mod prompt;

use anyhow::Result;
use chrono::Utc;
use flume::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::bridge::{ChatBackend, InboundMessage};
use crate::config::BotConfig;
use crate::database::StateDatabase;
use crate::eligibility::{self, Eligibility};
use crate::generator::ReplyGenerator;
use crate::memory::{ConversationMemory, Turn};
use crate::resolver::{self, ChatSelectors};
use crate::tone::ToneProfiles;

use self::backoff::BackoffPolicy;

/// How one chat ended up in one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatOutcome {
    /// Paging the bridge failed; the chat is skipped this cycle.
    FetchFailed,
    NoCandidate,
    AlreadySeen,
    /// Newest inbound message was too old; marked seen without a reply.
    Stale,
    Sent,
    /// Reply generated but the bridge did not deliver it. State still advances.
    SendFailed,
    /// Reply empty or too short; marked seen, nothing sent.
    Discarded,
    GenerationFailed,
}

impl ChatOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatOutcome::FetchFailed => "fetch_failed",
            ChatOutcome::NoCandidate => "no_candidate",
            ChatOutcome::AlreadySeen => "already_seen",
            ChatOutcome::Stale => "stale",
            ChatOutcome::Sent => "sent",
            ChatOutcome::SendFailed => "send_failed",
            ChatOutcome::Discarded => "discarded",
            ChatOutcome::GenerationFailed => "generation_failed",
        }
    }

    /// Whether the reply generator ran for this chat.
    pub fn invoked_generator(self) -> bool {
        matches!(
            self,
            ChatOutcome::Sent
                | ChatOutcome::SendFailed
                | ChatOutcome::Discarded
                | ChatOutcome::GenerationFailed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplyTiming {
    pub fetch: Duration,
    pub generation: Duration,
    pub send: Duration,
    pub total: Duration,
}

#[derive(Debug, Clone)]
pub enum AgentEvent {
    TargetsResolved(Vec<String>),
    ChatProcessed {
        chat_id: String,
        outcome: ChatOutcome,
    },
    Replied {
        chat_id: String,
        message_id: Option<String>,
        reply: String,
        delivered: bool,
        timing: ReplyTiming,
    },
    CycleFailed(String),
}

/// Polls the target chats one at a time and answers the newest inbound message.
pub struct ReplyAgent {
    config: BotConfig,
    database: StateDatabase,
    backend: Arc<dyn ChatBackend>,
    generator: Arc<dyn ReplyGenerator>,
    tone_generator: Arc<dyn ReplyGenerator>,
    memory: ConversationMemory,
    tone: ToneProfiles,
    event_tx: Sender<AgentEvent>,
}

impl ReplyAgent {
    pub fn new(
        config: BotConfig,
        database: StateDatabase,
        backend: Arc<dyn ChatBackend>,
        generator: Arc<dyn ReplyGenerator>,
        tone_generator: Arc<dyn ReplyGenerator>,
        event_tx: Sender<AgentEvent>,
    ) -> Self {
        let memory = ConversationMemory::new(config.memory_window, config.memory_seed_limit);
        let tone = ToneProfiles::new(
            config.tone_refresh_threshold,
            config.tone_history_limit,
            config.tone_sample_limit,
            config.default_persona.clone(),
        );
        Self {
            config,
            database,
            backend,
            generator,
            tone_generator,
            memory,
            tone,
            event_tx,
        }
    }

    pub fn database(&self) -> &StateDatabase {
        &self.database
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.event_tx.send(event);
    }

    fn selectors(&self) -> ChatSelectors {
        ChatSelectors {
            group_names: self.config.group_names.clone(),
            contact_numbers: self.config.contact_numbers.clone(),
            contact_domain: self.config.contact_domain.clone(),
        }
    }

    pub async fn resolve_targets(&self) -> Result<Vec<String>> {
        let targets = resolver::resolve_target_chats(self.backend.as_ref(), &self.selectors()).await?;
        self.emit(AgentEvent::TargetsResolved(targets.clone()));
        Ok(targets)
    }

    /// Resolve targets once, then sweep them forever.
    ///
    /// Only an empty target list ends the loop; every other error is logged
    /// and retried after a capped exponential backoff.
    pub async fn run_loop(self: Arc<Self>) -> Result<()> {
        tracing::info!(
            "Reply loop starting with {} generator (state: {} seen marker(s), {} conversation(s), {} tone profile(s))",
            self.generator.name(),
            self.database.count_seen_markers().unwrap_or(0),
            self.database.count_conversations().unwrap_or(0),
            self.database.count_tone_profiles().unwrap_or(0)
        );

        let mut backoff = BackoffPolicy::new(
            Duration::from_secs(self.config.error_backoff_secs),
            Duration::from_secs(self.config.error_backoff_max_secs),
        );

        let targets = loop {
            match self.resolve_targets().await {
                Ok(targets) => break targets,
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::error!(
                        "Failed to resolve target chats: {:#} (retrying in {:?})",
                        e,
                        delay
                    );
                    self.emit(AgentEvent::CycleFailed(format!("{:#}", e)));
                    sleep(delay).await;
                }
            }
        };
        if targets.is_empty() {
            anyhow::bail!("No target chats found");
        }
        backoff.reset();
        tracing::info!("Watching {} chat(s): {:?}", targets.len(), targets);

        loop {
            match self.run_cycle(&targets).await {
                Ok(_) => {
                    backoff.reset();
                    sleep(self.config.sweep_delay()).await;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::error!(
                        "Poll cycle error (failure {}): {:#} (retrying in {:?})",
                        backoff.failures(),
                        e,
                        delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// One sweep over `targets`, pausing after each chat.
    ///
    /// A chat that errors is reported and skipped so the rest of the sweep
    /// still runs; the sweep then fails as a whole.
    pub async fn run_cycle(&self, targets: &[String]) -> Result<Vec<ChatOutcome>> {
        let mut outcomes = Vec::with_capacity(targets.len());
        let mut failed = Vec::new();
        for chat_id in targets {
            let outcome = match self.process_chat(chat_id).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("Failed to process {}: {:#}", chat_id, e);
                    self.emit(AgentEvent::CycleFailed(format!("{}: {:#}", chat_id, e)));
                    failed.push(chat_id.as_str());
                    sleep(self.config.chat_delay()).await;
                    continue;
                }
            };
            self.emit(AgentEvent::ChatProcessed {
                chat_id: chat_id.clone(),
                outcome,
            });
            let pause = if outcome.invoked_generator() {
                self.config.reply_delay()
            } else {
                self.config.chat_delay()
            };
            sleep(pause).await;
            outcomes.push(outcome);
        }
        if !failed.is_empty() {
            anyhow::bail!("{} of {} chat(s) failed: {:?}", failed.len(), targets.len(), failed);
        }
        Ok(outcomes)
    }

    /// Fetch, filter and, when eligible, answer the newest inbound message.
    pub async fn process_chat(&self, chat_id: &str) -> Result<ChatOutcome> {
        let started = Instant::now();
        let messages = match self
            .backend
            .list_messages(chat_id, self.config.message_page_size, false)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!("Failed to fetch messages for {}: {:#}", chat_id, e);
                return Ok(ChatOutcome::FetchFailed);
            }
        };
        let fetch = started.elapsed();

        let marker = self.database.get_seen_marker(chat_id)?;
        match eligibility::evaluate(
            &messages,
            marker.as_ref(),
            Utc::now(),
            self.config.stale_after(),
        ) {
            Eligibility::NoCandidate => {
                tracing::debug!("No inbound messages in {}", chat_id);
                Ok(ChatOutcome::NoCandidate)
            }
            Eligibility::AlreadySeen => {
                tracing::debug!("Nothing new in {}", chat_id);
                Ok(ChatOutcome::AlreadySeen)
            }
            Eligibility::Stale { message, age } => {
                self.mark_seen(chat_id, &message)?;
                tracing::info!(
                    "Skipping stale message in {} ({}s old): {}",
                    chat_id,
                    age.num_seconds(),
                    message.text
                );
                Ok(ChatOutcome::Stale)
            }
            Eligibility::Eligible(message) => self.reply_to(chat_id, &message, started, fetch).await,
        }
    }

    async fn reply_to(
        &self,
        chat_id: &str,
        message: &InboundMessage,
        started: Instant,
        fetch: Duration,
    ) -> Result<ChatOutcome> {
        tracing::info!("New message in {} from {}: {}", chat_id, message.sender, message.text);

        let memory = self
            .memory
            .get(&self.database, self.backend.as_ref(), chat_id)
            .await?;
        let tone = self
            .tone
            .get(
                &self.database,
                self.backend.as_ref(),
                self.tone_generator.as_ref(),
                chat_id,
            )
            .await?;
        let short_term = self.short_term_context(message).await;

        let request = prompt::build_reply_request(
            prompt::system_instruction(self.config.persona_name.as_deref(), &tone),
            &short_term,
            self.config.context_turns,
            &memory,
            self.memory.window(),
            &message.text,
            self.config.max_reply_tokens,
        );

        let generation_started = Instant::now();
        let generated = self.generator.generate(&request).await;
        let generation = generation_started.elapsed();

        let reply = match generated {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::warn!("Reply generation failed for {}: {:#}", chat_id, e);
                self.mark_seen(chat_id, message)?;
                return Ok(ChatOutcome::GenerationFailed);
            }
        };
        if reply.chars().count() < self.config.min_reply_chars {
            tracing::info!("Discarding unusable reply for {}: {:?}", chat_id, reply);
            self.mark_seen(chat_id, message)?;
            return Ok(ChatOutcome::Discarded);
        }

        let send_started = Instant::now();
        let outcome = match self.backend.send_message(chat_id, &reply).await {
            Ok(receipt) if receipt.success => {
                tracing::info!("Replied in {}: {}", chat_id, reply);
                ChatOutcome::Sent
            }
            Ok(receipt) => {
                tracing::warn!("Bridge did not deliver reply to {}: {}", chat_id, receipt.info);
                ChatOutcome::SendFailed
            }
            Err(e) => {
                tracing::warn!("Failed to send reply to {}: {:#}", chat_id, e);
                ChatOutcome::SendFailed
            }
        };
        let send = send_started.elapsed();

        self.memory
            .append(&self.database, chat_id, &message.text, &reply)?;
        self.mark_seen(chat_id, message)?;

        let timing = ReplyTiming {
            fetch,
            generation,
            send,
            total: started.elapsed(),
        };
        tracing::info!(
            "Reply timing for {}: fetch {:.2}s, generation {:.2}s, send {:.2}s, total {:.2}s",
            chat_id,
            timing.fetch.as_secs_f64(),
            timing.generation.as_secs_f64(),
            timing.send.as_secs_f64(),
            timing.total.as_secs_f64()
        );
        self.emit(AgentEvent::Replied {
            chat_id: chat_id.to_string(),
            message_id: message.id.clone(),
            reply,
            delivered: outcome == ChatOutcome::Sent,
            timing,
        });
        Ok(outcome)
    }

    /// Up to `context_turns` messages just before `message`, oldest first.
    async fn short_term_context(&self, message: &InboundMessage) -> Vec<Turn> {
        let Some(message_id) = message.id.as_deref() else {
            return Vec::new();
        };
        if self.config.context_turns == 0 {
            return Vec::new();
        }
        match self
            .backend
            .get_message_context(message_id, self.config.context_turns, 0)
            .await
        {
            Ok(context) => context
                .before
                .into_iter()
                .filter(|m| !m.text.trim().is_empty())
                .map(|m| Turn::from_authored(m.text, m.is_from_self))
                .collect(),
            Err(e) => {
                tracing::debug!("No context for message {}: {:#}", message_id, e);
                Vec::new()
            }
        }
    }

    fn mark_seen(&self, chat_id: &str, message: &InboundMessage) -> Result<()> {
        self.database.set_seen_marker(chat_id, message.id.as_deref())
    }
}
