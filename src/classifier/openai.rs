//! Blocking client for OpenAI-compatible `chat/completions` endpoints.

use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::Deserialize;
use serde_json::json;

/// Default endpoint when none is configured.
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// A single-turn chat completion: system instruction plus user prompt in,
/// assistant text out.
pub trait ChatBackend {
    fn complete(&self, system: &str, user: &str) -> anyhow::Result<String>;
}

impl<T: ChatBackend + ?Sized> ChatBackend for Box<T> {
    fn complete(&self, system: &str, user: &str) -> anyhow::Result<String> {
        (**self).complete(system, user)
    }
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChatApiResponseOrError {
    Response { choices: Vec<ChatChoice> },
    Error { error: ChatApiError },
}

pub struct OpenAiChat {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("Could not build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

impl ChatBackend for OpenAiChat {
    fn complete(&self, system: &str, user: &str) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": &self.model,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": user }
                ]
            }))
            .send()
            .with_context(|| format!("Request to {} failed", self.endpoint))?;

        let status = resp.status();
        let body = resp.text().context("Could not read chat response body")?;
        if !status.is_success() {
            return Err(anyhow!("Chat API returned {status}: {body}"));
        }

        let parsed: ChatApiResponseOrError = serde_json::from_str(&body)
            .with_context(|| format!("Could not parse chat response: {body}"))?;

        match parsed {
            ChatApiResponseOrError::Error { error } => {
                Err(anyhow!("Chat API error: {}", error.message))
            }
            ChatApiResponseOrError::Response { choices } => {
                let content = choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .ok_or_else(|| anyhow!("Chat response has no content"))?;
                Ok(content.trim().to_string())
            }
        }
    }
}
