//! Client for the locally hosted fine-tuned model.
//!
//! The model was trained on `<|user|>` / `<|assistant|>` turns terminated by
//! `</s>`, so requests go to a plain text-completion endpoint with the chat
//! template rendered here rather than by the server.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use super::{GenerationRequest, ReplyGenerator};
use crate::memory::TurnRole;

const ASSISTANT_TAG: &str = "<|assistant|>";
const END_OF_TURN: &str = "</s>";

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: String,
    max_tokens: u32,
    temperature: f32,
    stop: [&'a str; 2],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: String,
}

pub struct LocalModelGenerator {
    api_url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
    template_tokens: Regex,
}

impl LocalModelGenerator {
    pub fn new(api_url: String, model: String, client: reqwest::Client) -> Result<Self> {
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            model,
            temperature: 0.9,
            client,
            template_tokens: template_token_regex()?,
        })
    }

    fn clean_output(&self, raw: &str) -> String {
        let tail = raw.rsplit(ASSISTANT_TAG).next().unwrap_or(raw);
        self.template_tokens.replace_all(tail, "").trim().to_string()
    }
}

fn template_token_regex() -> Result<Regex> {
    Regex::new(r"<\|[a-z_]+\|>|</s>").context("Invalid template token pattern")
}

/// Render the request in the fine-tune's chat template, ending on an open
/// assistant turn.
pub fn render_prompt(request: &GenerationRequest) -> String {
    let mut prompt = String::new();
    if !request.system_instruction.trim().is_empty() {
        prompt.push_str(&format!(
            "<|system|>{}{}\n",
            request.system_instruction.trim(),
            END_OF_TURN
        ));
    }
    for turn in &request.context {
        let tag = match turn.role {
            TurnRole::User => "<|user|>",
            TurnRole::Assistant => ASSISTANT_TAG,
        };
        prompt.push_str(&format!("{}{}{}\n", tag, turn.text, END_OF_TURN));
    }
    prompt.push_str(&format!("<|user|>{}{}\n{}", request.prompt, END_OF_TURN, ASSISTANT_TAG));
    prompt
}

#[async_trait]
impl ReplyGenerator for LocalModelGenerator {
    fn name(&self) -> &str {
        "local"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let url = format!("{}/completions", self.api_url);
        let body = CompletionRequest {
            model: &self.model,
            prompt: render_prompt(request),
            max_tokens: request.max_tokens,
            temperature: self.temperature,
            stop: [END_OF_TURN, "<|user|>"],
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to reach local model server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Local model returned error {}: {}", status, body);
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .context("Failed to parse local model response")?;

        let text = completion
            .choices
            .first()
            .map(|c| c.text.as_str())
            .ok_or_else(|| anyhow::anyhow!("No completion from local model"))?;

        Ok(self.clean_output(text))
    }
}
