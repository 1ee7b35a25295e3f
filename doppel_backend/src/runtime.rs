use std::sync::Arc;

use anyhow::{Context, Result};
use flume::Sender;

use crate::agent::{AgentEvent, ReplyAgent};
use crate::bridge::whatsapp::WhatsAppBridge;
use crate::bridge::ChatBackend;
use crate::config::{BotConfig, GeneratorKind};
use crate::database::StateDatabase;
use crate::generator::local::LocalModelGenerator;
use crate::generator::ReplyGenerator;
use crate::http_client::build_http_client;
use crate::llm_client::LlmClient;

pub struct BotRuntime {
    pub config: BotConfig,
    pub agent: Arc<ReplyAgent>,
}

/// Wires the configured bridge, generators and state store into a [`ReplyAgent`].
///
/// Any collaborator can be overridden before `build`.
pub struct BotRuntimeBuilder {
    config: BotConfig,
    event_tx: Sender<AgentEvent>,
    backend: Option<Arc<dyn ChatBackend>>,
    generator: Option<Arc<dyn ReplyGenerator>>,
    tone_generator: Option<Arc<dyn ReplyGenerator>>,
    database: Option<StateDatabase>,
}

impl BotRuntimeBuilder {
    pub fn new(config: BotConfig, event_tx: Sender<AgentEvent>) -> Self {
        Self {
            config,
            event_tx,
            backend: None,
            generator: None,
            tone_generator: None,
            database: None,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn ReplyGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_tone_generator(mut self, generator: Arc<dyn ReplyGenerator>) -> Self {
        self.tone_generator = Some(generator);
        self
    }

    pub fn with_database(mut self, database: StateDatabase) -> Self {
        self.database = Some(database);
        self
    }

    pub fn build(self) -> Result<BotRuntime> {
        let config = self.config;
        let http = build_http_client(Some(config.request_timeout()))?;

        let backend = match self.backend {
            Some(backend) => backend,
            None => {
                tracing::info!(
                    "WhatsApp bridge: {} (store: {})",
                    config.bridge_api_url,
                    config.bridge_database_path
                );
                Arc::new(WhatsAppBridge::new(
                    config.bridge_database_path.clone(),
                    config.bridge_api_url.clone(),
                    http.clone(),
                ))
            }
        };

        let remote = LlmClient::new(
            config.llm_api_url.clone(),
            config.llm_api_key.clone(),
            config.llm_model.clone(),
            http.clone(),
        );
        if config.llm_api_key.is_none() {
            tracing::warn!("No LLM API key configured; remote calls are sent unauthenticated");
        }

        let generator = match self.generator {
            Some(generator) => generator,
            None => build_generator(&config, &remote, http)?,
        };
        let tone_generator = match self.tone_generator {
            Some(generator) => generator,
            None => {
                tracing::info!("Tone summaries use model {}", config.tone_model());
                Arc::new(remote.with_model(config.tone_model())) as Arc<dyn ReplyGenerator>
            }
        };

        let database = match self.database {
            Some(database) => database,
            None => StateDatabase::new(&config.state_database_path).with_context(|| {
                format!(
                    "Failed to open state database at {}",
                    config.state_database_path
                )
            })?,
        };

        let agent = Arc::new(ReplyAgent::new(
            config.clone(),
            database,
            backend,
            generator,
            tone_generator,
            self.event_tx,
        ));

        Ok(BotRuntime { config, agent })
    }
}

fn build_generator(
    config: &BotConfig,
    remote: &LlmClient,
    http: reqwest::Client,
) -> Result<Arc<dyn ReplyGenerator>> {
    match config.generator {
        GeneratorKind::Remote => {
            tracing::info!(
                "Reply generator: remote {} at {}",
                config.llm_model,
                config.llm_api_url
            );
            Ok(Arc::new(remote.clone()))
        }
        GeneratorKind::Local => {
            tracing::info!(
                "Reply generator: local {} at {}",
                config.local_model,
                config.local_model_url
            );
            let local = LocalModelGenerator::new(
                config.local_model_url.clone(),
                config.local_model.clone(),
                http,
            )?;
            Ok(Arc::new(local))
        }
    }
}

impl BotRuntime {
    pub fn bootstrap(config: BotConfig, event_tx: Sender<AgentEvent>) -> Result<Self> {
        BotRuntimeBuilder::new(config, event_tx).build()
    }
}
