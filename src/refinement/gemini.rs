//! Google Gemini client.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::config::ProviderSettings;
use super::provider::{check_status, GenerationError, ProviderHealth, TextGenerator};
use crate::types::Provider;

/// Default `generateContent` endpoint.
pub const GEMINI_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent";

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GeminiResponse {
    fn into_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text
    }
}

/// Gemini `generateContent` client.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
}

impl GeminiClient {
    /// Create a client from provider settings.
    pub fn new(settings: &ProviderSettings) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            api_key: settings.api_key.clone(),
            endpoint: GEMINI_ENDPOINT.to_string(),
        })
    }

    fn api_key(&self) -> Result<&str, GenerationError> {
        self.api_key
            .as_deref()
            .ok_or(GenerationError::NotConfigured("Gemini"))
    }

    async fn send(&self, body: serde_json::Value) -> Result<String, GenerationError> {
        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("key", self.api_key()?)])
            .json(&body)
            .send()
            .await?;
        let parsed: GeminiResponse = check_status(response).await?.json().await?;
        parsed
            .into_text()
            .ok_or_else(|| GenerationError::Malformed("no candidate text".to_string()))
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        tracing::debug!(prompt_chars = prompt.len(), "Calling Gemini");
        self.send(json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": 0.7,
                "maxOutputTokens": 8000,
                "topP": 0.95,
                "topK": 40
            }
        }))
        .await
    }

    async fn health_check(&self) -> ProviderHealth {
        let result = self
            .send(json!({
                "contents": [{ "role": "user", "parts": [{ "text": "Reply OK" }] }]
            }))
            .await;
        let (ok, message) = match result {
            Ok(_) => (true, "Gemini connection successful".to_string()),
            Err(e) => (false, format!("Gemini error: {e}")),
        };
        ProviderHealth {
            provider: Provider::Gemini,
            ok,
            message,
        }
    }
}
