use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Which reply generator backs the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorKind {
    /// OpenAI-compatible chat-completion API.
    #[default]
    Remote,
    /// Locally served fine-tuned model behind a text-completion endpoint.
    Local,
}

impl GeneratorKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "remote" | "openai" | "api" => Some(Self::Remote),
            "local" | "finetuned" | "peft" => Some(Self::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    // Chat selection
    #[serde(default)]
    pub group_names: Vec<String>,
    #[serde(default)]
    pub contact_numbers: Vec<String>,
    #[serde(default = "default_contact_domain")]
    pub contact_domain: String,

    // Messaging bridge
    #[serde(default = "default_bridge_api_url")]
    pub bridge_api_url: String,
    #[serde(default = "default_bridge_database_path")]
    pub bridge_database_path: String,

    // Local state
    #[serde(default = "default_state_database_path")]
    pub state_database_path: String,

    // Polling and pacing
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_reply_delay_secs")]
    pub reply_delay_secs: u64,
    #[serde(default = "default_chat_delay_ms")]
    pub chat_delay_ms: u64,
    #[serde(default = "default_sweep_delay_ms")]
    pub sweep_delay_ms: u64,
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    #[serde(default = "default_error_backoff_max_secs")]
    pub error_backoff_max_secs: u64,
    #[serde(default = "default_message_page_size")]
    pub message_page_size: usize,

    // Conversation memory
    #[serde(default = "default_memory_window")]
    pub memory_window: usize,
    #[serde(default = "default_memory_seed_limit")]
    pub memory_seed_limit: usize,
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,

    // Tone profiles
    #[serde(default = "default_tone_refresh_threshold")]
    pub tone_refresh_threshold: u32,
    #[serde(default = "default_tone_history_limit")]
    pub tone_history_limit: usize,
    #[serde(default = "default_tone_sample_limit")]
    pub tone_sample_limit: usize,
    #[serde(default)]
    pub persona_name: Option<String>,
    #[serde(default = "default_persona")]
    pub default_persona: String,

    // Reply generation
    #[serde(default)]
    pub generator: GeneratorKind,
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default)]
    pub tone_model: Option<String>,
    #[serde(default = "default_local_model_url")]
    pub local_model_url: String,
    #[serde(default = "default_local_model")]
    pub local_model: String,
    #[serde(default = "default_max_reply_tokens")]
    pub max_reply_tokens: u32,
    #[serde(default = "default_min_reply_chars")]
    pub min_reply_chars: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_contact_domain() -> String {
    "s.whatsapp.net".to_string()
}

fn default_bridge_api_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_bridge_database_path() -> String {
    "whatsapp-bridge/store/messages.db".to_string()
}

fn default_state_database_path() -> String {
    "doppel_state.db".to_string()
}

fn default_stale_after_secs() -> u64 {
    30
}

fn default_reply_delay_secs() -> u64 {
    3
}

fn default_chat_delay_ms() -> u64 {
    200
}

fn default_sweep_delay_ms() -> u64 {
    1000
}

fn default_error_backoff_secs() -> u64 {
    3
}

fn default_error_backoff_max_secs() -> u64 {
    60
}

fn default_message_page_size() -> usize {
    5
}

fn default_memory_window() -> usize {
    10
}

fn default_memory_seed_limit() -> usize {
    20
}

fn default_context_turns() -> usize {
    3
}

fn default_tone_refresh_threshold() -> u32 {
    100
}

fn default_tone_history_limit() -> usize {
    50
}

fn default_tone_sample_limit() -> usize {
    30
}

pub fn default_persona() -> String {
    "Reply casually and briefly, like texting a friend. Be warm, a little witty, never formal."
        .to_string()
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_local_model_url() -> String {
    "http://localhost:8000/v1".to_string()
}

fn default_local_model() -> String {
    "trained_ai_duplicate".to_string()
}

fn default_max_reply_tokens() -> u32 {
    100
}

fn default_min_reply_chars() -> usize {
    3
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            group_names: Vec::new(),
            contact_numbers: Vec::new(),
            contact_domain: default_contact_domain(),
            bridge_api_url: default_bridge_api_url(),
            bridge_database_path: default_bridge_database_path(),
            state_database_path: default_state_database_path(),
            stale_after_secs: default_stale_after_secs(),
            reply_delay_secs: default_reply_delay_secs(),
            chat_delay_ms: default_chat_delay_ms(),
            sweep_delay_ms: default_sweep_delay_ms(),
            error_backoff_secs: default_error_backoff_secs(),
            error_backoff_max_secs: default_error_backoff_max_secs(),
            message_page_size: default_message_page_size(),
            memory_window: default_memory_window(),
            memory_seed_limit: default_memory_seed_limit(),
            context_turns: default_context_turns(),
            tone_refresh_threshold: default_tone_refresh_threshold(),
            tone_history_limit: default_tone_history_limit(),
            tone_sample_limit: default_tone_sample_limit(),
            persona_name: None,
            default_persona: default_persona(),
            generator: GeneratorKind::default(),
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            tone_model: None,
            local_model_url: default_local_model_url(),
            local_model: default_local_model(),
            max_reply_tokens: default_max_reply_tokens(),
            min_reply_chars: default_min_reply_chars(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl BotConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("doppel_config.toml")
    }

    /// Load config from doppel_config.toml (next to executable), falling back to env vars
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match Self::from_toml_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {:#}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config: BotConfig = toml::from_str(contents).context("Invalid config TOML")?;
        config.group_names = clean_selectors(config.group_names);
        config.contact_numbers = clean_selectors(config.contact_numbers);
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(list) = lookup("DOPPEL_GROUP_NAMES") {
            config.group_names = split_list(&list);
        }

        if let Some(list) = lookup("DOPPEL_CONTACT_NUMBERS") {
            config.contact_numbers = split_list(&list);
        }

        if let Some(domain) = lookup("DOPPEL_CONTACT_DOMAIN") {
            if !domain.trim().is_empty() {
                config.contact_domain = domain.trim().to_string();
            }
        }

        if let Some(url) = lookup("DOPPEL_BRIDGE_URL") {
            config.bridge_api_url = url;
        }

        if let Some(path) = lookup("DOPPEL_BRIDGE_DB") {
            if !path.trim().is_empty() {
                config.bridge_database_path = path;
            }
        }

        if let Some(path) = lookup("DOPPEL_STATE_DB") {
            if !path.trim().is_empty() {
                config.state_database_path = path;
            }
        }

        if let Some(seconds) = lookup("DOPPEL_STALE_AFTER_SECS").and_then(|v| v.parse().ok()) {
            config.stale_after_secs = seconds;
        }

        if let Some(seconds) = lookup("DOPPEL_REPLY_DELAY_SECS").and_then(|v| v.parse().ok()) {
            config.reply_delay_secs = seconds;
        }

        if let Some(ms) = lookup("DOPPEL_CHAT_DELAY_MS").and_then(|v| v.parse().ok()) {
            config.chat_delay_ms = ms;
        }

        if let Some(ms) = lookup("DOPPEL_SWEEP_DELAY_MS").and_then(|v| v.parse().ok()) {
            config.sweep_delay_ms = ms;
        }

        if let Some(seconds) = lookup("DOPPEL_ERROR_BACKOFF_SECS").and_then(|v| v.parse().ok()) {
            config.error_backoff_secs = seconds;
        }

        if let Some(seconds) = lookup("DOPPEL_ERROR_BACKOFF_MAX_SECS").and_then(|v| v.parse().ok())
        {
            config.error_backoff_max_secs = seconds;
        }

        if let Some(count) = lookup("DOPPEL_TONE_REFRESH_THRESHOLD").and_then(|v| v.parse().ok()) {
            config.tone_refresh_threshold = count;
        }

        if let Some(window) = lookup("DOPPEL_MEMORY_WINDOW").and_then(|v| v.parse().ok()) {
            config.memory_window = window;
        }

        if let Some(kind) = lookup("DOPPEL_GENERATOR") {
            match GeneratorKind::parse(&kind) {
                Some(kind) => config.generator = kind,
                None => tracing::warn!("Unknown DOPPEL_GENERATOR '{}', keeping remote", kind),
            }
        }

        if let Some(url) = lookup("LLM_API_URL") {
            config.llm_api_url = url;
        }

        if let Some(model) = lookup("LLM_MODEL") {
            config.llm_model = model;
        }

        if let Some(key) = lookup("LLM_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            if !key.trim().is_empty() {
                config.llm_api_key = Some(key.trim().to_string());
            }
        }

        if let Some(model) = lookup("DOPPEL_TONE_MODEL") {
            if !model.trim().is_empty() {
                config.tone_model = Some(model);
            }
        }

        if let Some(url) = lookup("DOPPEL_LOCAL_MODEL_URL") {
            config.local_model_url = url;
        }

        if let Some(model) = lookup("DOPPEL_LOCAL_MODEL") {
            config.local_model = model;
        }

        if let Some(name) = lookup("DOPPEL_PERSONA_NAME") {
            if !name.trim().is_empty() {
                config.persona_name = Some(name.trim().to_string());
            }
        }

        if let Some(persona) = lookup("DOPPEL_DEFAULT_PERSONA") {
            if !persona.trim().is_empty() {
                config.default_persona = persona;
            }
        }

        config
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs.min(i64::MAX as u64) as i64)
    }

    pub fn reply_delay(&self) -> Duration {
        Duration::from_secs(self.reply_delay_secs)
    }

    pub fn chat_delay(&self) -> Duration {
        Duration::from_millis(self.chat_delay_ms)
    }

    pub fn sweep_delay(&self) -> Duration {
        Duration::from_millis(self.sweep_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// The model used for tone summaries; falls back to the reply model.
    pub fn tone_model(&self) -> &str {
        self.tone_model.as_deref().unwrap_or(&self.llm_model)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    clean_selectors(raw.split(',').map(str::to_string).collect())
}

/// Drops blank selectors and the literal `None` placeholder.
fn clean_selectors(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != "None")
        .collect()
}
