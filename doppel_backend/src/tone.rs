//! Per-chat tone profiles.
//!
//! A profile is one instruction sentence describing how the impersonated user
//! writes to a particular contact, summarized from their own messages in that
//! chat. It is regenerated when missing or after `refresh_threshold` uses.
//! Summarization failures fall back to the configured default persona.

use anyhow::Result;
use chrono::Utc;

use crate::bridge::ChatBackend;
use crate::database::{StateDatabase, ToneProfile};
use crate::generator::{GenerationRequest, ReplyGenerator};

const TONE_SYSTEM_PROMPT: &str = "You study how a person texts and describe their style so an assistant can imitate it.";
const TONE_MAX_TOKENS: u32 = 80;

pub struct ToneProfiles {
    refresh_threshold: u32,
    history_limit: usize,
    sample_limit: usize,
    default_persona: String,
}

impl ToneProfiles {
    pub fn new(
        refresh_threshold: u32,
        history_limit: usize,
        sample_limit: usize,
        default_persona: String,
    ) -> Self {
        Self {
            refresh_threshold: refresh_threshold.max(1),
            history_limit,
            sample_limit,
            default_persona,
        }
    }

    /// Tone instruction for `chat_id`, counting this call as one use.
    pub async fn get(
        &self,
        db: &StateDatabase,
        backend: &dyn ChatBackend,
        generator: &dyn ReplyGenerator,
        chat_id: &str,
    ) -> Result<String> {
        let mut profile = match db.get_tone_profile(chat_id)? {
            Some(profile) if profile.use_count < self.refresh_threshold => profile,
            existing => {
                let instruction = self.summarize(backend, generator, chat_id).await;
                tracing::info!(
                    "{} tone profile for {}: {}",
                    if existing.is_some() { "Refreshed" } else { "Created" },
                    chat_id,
                    instruction
                );
                let profile = ToneProfile {
                    chat_id: chat_id.to_string(),
                    instruction,
                    use_count: 0,
                    refreshed_at: Utc::now(),
                };
                db.save_tone_profile(&profile)?;
                profile
            }
        };

        profile.use_count += 1;
        db.save_tone_profile(&profile)?;
        Ok(profile.instruction)
    }

    /// Never fails: any problem degrades to the default persona.
    async fn summarize(
        &self,
        backend: &dyn ChatBackend,
        generator: &dyn ReplyGenerator,
        chat_id: &str,
    ) -> String {
        let history = match backend.get_contact_history(chat_id, self.history_limit).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!("Tone history for {} unavailable: {:#}", chat_id, e);
                return self.default_persona.clone();
            }
        };

        let samples: Vec<String> = history
            .into_iter()
            .filter(|entry| entry.is_from_self && !entry.text.trim().is_empty())
            .take(self.sample_limit)
            .map(|entry| entry.text.trim().to_string())
            .collect();
        if samples.is_empty() {
            tracing::debug!("No outgoing messages in {}, using default persona", chat_id);
            return self.default_persona.clone();
        }

        let request = GenerationRequest::new(TONE_SYSTEM_PROMPT, build_tone_prompt(&samples))
            .with_max_tokens(TONE_MAX_TOKENS);
        match generator.generate(&request).await {
            Ok(text) => match clean_instruction(&text) {
                Some(instruction) => instruction,
                None => {
                    tracing::warn!("Empty tone summary for {}, using default persona", chat_id);
                    self.default_persona.clone()
                }
            },
            Err(e) => {
                tracing::warn!("Tone summary for {} failed: {:#}", chat_id, e);
                self.default_persona.clone()
            }
        }
    }
}

fn build_tone_prompt(samples: &[String]) -> String {
    let mut prompt = String::from("These are messages I sent in one chat:\n\n");
    for sample in samples {
        prompt.push_str(&format!("- {}\n", sample));
    }
    prompt.push_str(
        "\nWrite exactly one sentence instructing an assistant how to reply as me in this chat: \
         my tone, formality, language mix, emoji use and message length with this contact. \
         Reply with the sentence only.",
    );
    prompt
}

fn clean_instruction(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;
    let unquoted = line.trim_matches(|c| c == '"' || c == '\'' || c == '“' || c == '”').trim();
    if unquoted.is_empty() {
        None
    } else {
        Some(unquoted.to_string())
    }
}
