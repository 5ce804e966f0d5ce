//! Hosted chat-completion service (OpenAI-compatible API)
//!
//! The retrieved context travels in the system message and the question in
//! the user message. One blocking request per call; no retries.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use super::config::GenerationConfig;
use super::Generator;
use crate::error::{RagError, Result};
use crate::rag::context::strip_role_markers;
use crate::rag::context::templates::HOSTED_SYSTEM_PREFIX;

/// Where and how to reach the hosted model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostedConfig {
    /// Base URL; `/chat/completions` is appended
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the bearer token
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for HostedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gigachat.devices.sberbank.ru/api/v1".to_string(),
            model: "GigaChat".to_string(),
            api_key_env: "LEXRAG_API_KEY".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: String,
}

/// Client for a remote chat model
pub struct HostedGenerator {
    client: Client,
    config: HostedConfig,
    api_key: Option<String>,
}

impl HostedGenerator {
    pub fn new(config: HostedConfig, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::Backend(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    /// Read the API key from the configured environment variable
    pub fn from_env(config: HostedConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            tracing::warn!(
                "{} is not set; hosted requests will be sent without credentials",
                config.api_key_env
            );
        }
        Self::new(config, api_key)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

impl Generator for HostedGenerator {
    fn ask(&self, question: &str, context: &str, config: &GenerationConfig) -> Result<String> {
        config.validate()?;

        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": format!("{}{}", HOSTED_SYSTEM_PREFIX, context) },
                { "role": "user", "content": strip_role_markers(question) },
            ],
            "temperature": config.temperature,
            "top_p": config.top_p,
            "max_tokens": config.max_new_tokens,
            "repetition_penalty": config.repetition_penalty,
            "stream": false,
        });

        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        tracing::debug!("Hosted request to {} ({})", self.endpoint(), self.config.model);
        let response = request.send().map_err(RagError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(RagError::unavailable(format!(
                "hosted model returned HTTP {}: {}",
                status, detail
            )));
        }

        let reply: ChatResponse = response.json().map_err(RagError::from_transport)?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| RagError::unavailable("hosted model returned no choices"))?;

        Ok(strip_role_markers(&content).trim().to_string())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
