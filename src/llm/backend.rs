// SPDX-License-Identifier: MIT

//! LLM backend clients.
//!
//! Every backend is an opaque prompt-in, text-out endpoint behind
//! [`LlmBackend`]. The classifier owns prompt construction, parsing
//! and validation; clients here only move strings.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{ArquivistaError, Result};

/// Transport attempts per request (first try + retries)
const MAX_TRANSPORT_ATTEMPTS: u32 = 5;
/// Backoff cap
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Contract with an external LLM backend
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Name of this backend
    fn name(&self) -> &'static str;

    /// Model identifier in use
    fn model(&self) -> &str;

    /// Probe the backend; performed once per run
    async fn health_check(&self) -> Result<()>;

    /// Generate a single text response for an opaque prompt
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Generate with exponential backoff on transient errors:
/// 1 s doubling to a 30 s cap, up to five attempts.
pub async fn generate_with_retry(backend: &dyn LlmBackend, prompt: &str) -> Result<String> {
    // One delay per retry: 1s, 2s, 4s, 8s (the cap only bites with
    // more attempts configured).
    let schedule = std::iter::successors(Some(Duration::from_secs(1)), |prev| {
        Some((*prev * 2).min(MAX_BACKOFF))
    })
    .take(MAX_TRANSPORT_ATTEMPTS as usize - 1);

    let mut outcome = backend.generate(prompt).await;

    for (nth, delay) in schedule.enumerate() {
        let Err(e) = &outcome else { break };
        warn!(
            "{} request failed ({e}), backing off {delay:?} before retry {}",
            backend.name(),
            nth + 1
        );
        tokio::time::sleep(delay).await;
        outcome = backend.generate(prompt).await;
    }

    outcome
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(ArquivistaError::Api)
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

/// Client for a local Ollama server
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

impl OllamaBackend {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        // Normalize URL: accept values with or without the API path
        let base_url = base_url
            .trim_end_matches('/')
            .replace("/api/generate", "")
            .replace("/api/chat", "");

        Ok(Self {
            client: build_client(timeout)?,
            base_url,
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);

        self.client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                ArquivistaError::BackendUnavailable(format!(
                    "cannot connect to Ollama at {}: {e}",
                    self.base_url
                ))
            })?;

        Ok(())
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaGenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: "json",
            options: OllamaOptions { temperature: 0.1 },
        };

        debug!("sending request to Ollama: model={}", self.model);

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(ArquivistaError::BackendUnavailable(format!(
                "Ollama returned status {}",
                response.status()
            )));
        }

        let result: OllamaGenerateResponse = response.json().await?;
        Ok(result.response)
    }
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

/// Client for the Google Gemini API
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiBackend {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models?key={}",
            self.api_key
        );

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                ArquivistaError::BackendUnavailable(format!("cannot reach Gemini API: {e}"))
            })?;

        if !response.status().is_success() {
            return Err(ArquivistaError::BackendUnavailable(format!(
                "Gemini API returned status {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": 0.1 }
        });

        debug!("sending request to Gemini: model={}", self.model);

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(ArquivistaError::BackendUnavailable(format!(
                "Gemini returned status {}",
                response.status()
            )));
        }

        let json: serde_json::Value = response.json().await?;
        json.pointer("/candidates/0/content/parts/0/text")
            .and_then(|t| t.as_str())
            .map(String::from)
            .ok_or_else(|| {
                ArquivistaError::Schema("Gemini response carried no text part".to_string())
            })
    }
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

/// Client for the OpenAI chat completions API
pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiBackend {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get("https://api.openai.com/v1/models")
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                ArquivistaError::BackendUnavailable(format!("cannot reach OpenAI API: {e}"))
            })?;

        if !response.status().is_success() {
            return Err(ArquivistaError::BackendUnavailable(format!(
                "OpenAI API returned status {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0.1
        });

        debug!("sending request to OpenAI: model={}", self.model);

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ArquivistaError::BackendUnavailable(format!(
                "OpenAI returned status {}",
                response.status()
            )));
        }

        let json: serde_json::Value = response.json().await?;
        json.pointer("/choices/0/message/content")
            .and_then(|t| t.as_str())
            .map(String::from)
            .ok_or_else(|| {
                ArquivistaError::Schema("OpenAI response carried no message content".to_string())
            })
    }
}
