//! Groq chat-completions client.
//!
//! The model is chosen once per client from the account's model list,
//! preferring the large Llama models.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;

use super::config::ProviderSettings;
use super::provider::{check_status, GenerationError, ProviderHealth, TextGenerator};
use crate::types::Provider;

/// Default API base.
pub const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";

/// Models in order of preference.
pub const PREFERRED_MODELS: [&str; 4] = [
    "llama-3.3-70b-versatile",
    "llama-3.1-70b-versatile",
    "llama3-70b-8192",
    "mixtral-8x7b-32768",
];

/// Model used when the model list cannot be fetched.
pub const FALLBACK_MODEL: &str = "llama-3.1-70b-versatile";

const MODEL_LIST_TIMEOUT: Duration = Duration::from_secs(10);

/// Pick a model from the available list.
pub fn select_model(available: &[String]) -> String {
    PREFERRED_MODELS
        .iter()
        .find(|preferred| available.iter().any(|m| m == *preferred))
        .map(|m| m.to_string())
        .or_else(|| available.first().cloned())
        .unwrap_or_else(|| FALLBACK_MODEL.to_string())
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

/// Groq client.
pub struct GroqClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: OnceCell<String>,
}

impl GroqClient {
    /// Create a client from provider settings.
    pub fn new(settings: &ProviderSettings) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            api_key: settings.api_key.clone(),
            base_url: GROQ_API_BASE.to_string(),
            model: OnceCell::new(),
        })
    }

    /// Override the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Pin the model instead of querying the model list.
    pub fn with_model(self, model: impl Into<String>) -> Self {
        let _ = self.model.set(model.into());
        self
    }

    fn api_key(&self) -> Result<&str, GenerationError> {
        self.api_key
            .as_deref()
            .ok_or(GenerationError::NotConfigured("Groq"))
    }

    async fn available_models(&self) -> Result<Vec<String>, GenerationError> {
        let response = self
            .http
            .get(format!("{}/models", self.base_url))
            .bearer_auth(self.api_key()?)
            .timeout(MODEL_LIST_TIMEOUT)
            .send()
            .await?;
        let list: ModelList = check_status(response).await?.json().await?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }

    /// Model used for completions, resolved on first use.
    pub async fn model(&self) -> &str {
        self.model
            .get_or_init(|| async {
                let available = match self.available_models().await {
                    Ok(models) => models,
                    Err(e) => {
                        tracing::warn!(error = %e, "Could not list Groq models");
                        Vec::new()
                    }
                };
                let model = select_model(&available);
                tracing::info!(model = %model, "Selected Groq model");
                model
            })
            .await
    }

    async fn complete(&self, prompt: &str, extra: serde_json::Value) -> Result<String, GenerationError> {
        let api_key = self.api_key()?;
        let model = self.model().await;
        let mut body = json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            body.extend(extra.clone());
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        let parsed: ChatResponse = check_status(response).await?.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::Malformed("no completion choices".to_string()))
    }
}

#[async_trait]
impl TextGenerator for GroqClient {
    fn provider(&self) -> Provider {
        Provider::Groq
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        tracing::debug!(prompt_chars = prompt.len(), "Calling Groq");
        self.complete(
            prompt,
            json!({ "temperature": 0.7, "max_tokens": 6000, "top_p": 0.95 }),
        )
        .await
    }

    async fn health_check(&self) -> ProviderHealth {
        let (ok, message) = match self.complete("Reply OK", json!({ "max_tokens": 10 })).await {
            Ok(_) => (
                true,
                format!("Groq connection successful (using {})", self.model().await),
            ),
            Err(e) => (false, format!("Groq error: {e}")),
        };
        ProviderHealth {
            provider: Provider::Groq,
            ok,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_model_prefers_list_order() {
        let available = ids(&["mixtral-8x7b-32768", "llama3-70b-8192", "gemma-7b"]);
        assert_eq!(select_model(&available), "llama3-70b-8192");
    }

    #[test]
    fn test_select_model_falls_back() {
        assert_eq!(select_model(&ids(&["gemma-7b", "whisper"])), "gemma-7b");
        assert_eq!(select_model(&[]), FALLBACK_MODEL);
    }

    #[test]
    fn test_parse_chat_response() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Q1: x"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Q1: x"));
    }

    #[tokio::test]
    async fn test_unconfigured_client_fails_fast() {
        let client = GroqClient::new(&ProviderSettings::defaults_for(Provider::Groq))
            .unwrap()
            .with_model("llama3-70b-8192");
        assert_eq!(
            client.generate("x").await.unwrap_err(),
            GenerationError::NotConfigured("Groq")
        );
        assert_eq!(client.model().await, "llama3-70b-8192");
    }
}
