use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::generator::{GenerationRequest, ReplyGenerator};

/// OpenAI-compatible chat-completion client (OpenAI, Ollama, LM Studio, vLLM, ...).
#[derive(Clone)]
pub struct LlmClient {
    api_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl Message {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

impl LlmClient {
    pub fn new(api_url: String, api_key: Option<String>, model: String, client: reqwest::Client) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.unwrap_or_default(),
            model,
            temperature: 0.7,
            client,
        }
    }

    /// Same endpoint and key, different model (used for tone summaries).
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate a completion using the OpenAI API format
    pub async fn complete(&self, messages: Vec<Message>, max_tokens: u32) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_url);

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(self.temperature),
            max_tokens: Some(max_tokens),
        };

        let mut req = self.client.post(&url).json(&request);

        // Local OpenAI-compatible servers run without a key
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = req.send().await.context("Failed to send LLM request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("LLM API returned error {}: {}", status, body);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        let content = completion
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))?;

        Ok(content)
    }
}

/// System instruction, then context turns in order, then the new message.
pub fn chat_messages(request: &GenerationRequest) -> Vec<Message> {
    let mut messages = Vec::with_capacity(request.context.len() + 2);
    if !request.system_instruction.trim().is_empty() {
        messages.push(Message::new("system", request.system_instruction.clone()));
    }
    messages.extend(
        request
            .context
            .iter()
            .map(|turn| Message::new(turn.role.as_str(), turn.text.clone())),
    );
    messages.push(Message::new("user", request.prompt.clone()));
    messages
}

#[async_trait]
impl ReplyGenerator for LlmClient {
    fn name(&self) -> &str {
        "remote"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.complete(chat_messages(request), request.max_tokens).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Turn;

    #[test]
    fn chat_messages_keep_system_context_prompt_order() {
        let request = GenerationRequest::new("Talk like Abhi.", "hi")
            .with_context(vec![Turn::user("yo"), Turn::assistant("sup")]);

        let messages = chat_messages(&request);
        assert_eq!(
            messages,
            vec![
                Message::new("system", "Talk like Abhi."),
                Message::new("user", "yo"),
                Message::new("assistant", "sup"),
                Message::new("user", "hi"),
            ]
        );
    }

    #[test]
    fn blank_system_instruction_is_omitted() {
        let request = GenerationRequest::new("  ", "hi");
        let messages = chat_messages(&request);
        assert_eq!(messages, vec![Message::new("user", "hi")]);
    }

    #[test]
    fn request_serializes_openai_shape() {
        let request = ChatCompletionRequest {
            model: "gpt-3.5-turbo".to_string(),
            messages: vec![Message::new("user", "hi")],
            temperature: Some(0.7),
            max_tokens: None,
        };
        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(json["model"], "gpt-3.5-turbo");
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn with_model_keeps_endpoint() {
        let client = LlmClient::new(
            "https://api.openai.com/v1/".to_string(),
            Some("sk".to_string()),
            "gpt-3.5-turbo".to_string(),
            reqwest::Client::new(),
        );
        let tone = client.with_model("gpt-4o-mini");
        assert_eq!(tone.model(), "gpt-4o-mini");
        assert_eq!(tone.api_url, "https://api.openai.com/v1");
    }
}
