// src/generation.rs

use crate::config::GenerationConfig;
use crate::error::{HistorianError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_VERSION: &str = "2023-06-01";

/// One prompt-in, text-out request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
}

/// The external text-generation service.
///
/// Implementations may be slow and may return anything at all; callers must
/// never assume the text is valid JSON.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// HTTP client for a Messages-style completion endpoint
pub struct MessagesClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl MessagesClient {
    /// Builds a client from config, reading the key from the configured env var.
    pub fn from_config(cfg: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env).map_err(|_| {
            HistorianError::config(format!("{} is not set", cfg.api_key_env))
        })?;
        Self::new(cfg, api_key)
    }

    pub fn new(cfg: &GenerationConfig, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| HistorianError::config_with_source("failed to build http client", e))?;

        Ok(Self {
            http,
            endpoint: format!("{}/v1/messages", cfg.base_url.trim_end_matches('/')),
            model: cfg.model.clone(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl TextGenerator for MessagesClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
        };

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| HistorianError::generation_with_source("request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(HistorianError::generation(format!(
                "service returned {status}: {}",
                detail.chars().take(300).collect::<String>()
            )));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| HistorianError::generation_with_source("unreadable response body", e))?;

        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        tracing::debug!(model = %self.model, chars = text.len(), "generation complete");
        Ok(text)
    }
}
