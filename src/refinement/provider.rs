//! Text-generation collaborators.

use async_trait::async_trait;
use serde::Serialize;

use super::config::ProviderSettings;
use crate::error::{Classify, ErrorKind};
use crate::types::Provider;

/// Error returned by a text generator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// Provider answered with a rate-limit signal.
    #[error("Rate limit exceeded")]
    RateLimited,
    /// No API key configured.
    #[error("{0} API key not configured")]
    NotConfigured(&'static str),
    /// Request could not be sent or the connection failed.
    #[error("Network error: {0}")]
    Transport(String),
    /// Request did not complete within the timeout.
    #[error("Request timed out")]
    Timeout,
    /// Provider returned a non-success status.
    #[error("API error {0}: {1}")]
    Status(u16, String),
    /// Response body did not have the expected shape.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl Classify for GenerationError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited => ErrorKind::RateLimited,
            Self::NotConfigured(_) => ErrorKind::ConfigurationError,
            Self::Transport(_) | Self::Timeout | Self::Status(..) | Self::Malformed(_) => {
                ErrorKind::UpstreamUnavailable
            }
        }
    }
}

/// Result of a provider health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderHealth {
    /// Provider that was checked.
    pub provider: Provider,
    /// Whether the provider answered.
    pub ok: bool,
    /// Human readable detail.
    pub message: String,
}

/// A text-generation backend.
///
/// `generate` performs exactly one request; retrying is the caller's job
/// (see [`generate_with_backoff`]).
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Provider implemented by this generator.
    fn provider(&self) -> Provider;

    /// Send one prompt and return the generated text.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Check that the provider is configured and reachable.
    async fn health_check(&self) -> ProviderHealth;
}

/// Call a generator, retrying only on rate limits.
///
/// Retry `n` (zero-based) waits `base_delay * 2^n`. After `max_retries`
/// retries the rate-limit error is returned. Every other error is returned
/// immediately.
pub async fn generate_with_backoff(
    generator: &dyn TextGenerator,
    prompt: &str,
    settings: &ProviderSettings,
) -> Result<String, GenerationError> {
    let mut attempt = 0u32;
    loop {
        match generator.generate(prompt).await {
            Err(GenerationError::RateLimited) if attempt < settings.max_retries => {
                let delay = settings.backoff(attempt);
                tracing::warn!(
                    provider = %generator.provider(),
                    attempt = attempt + 1,
                    max_retries = settings.max_retries,
                    delay_secs = delay.as_secs_f64(),
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(GenerationError::RateLimited) => {
                tracing::error!(
                    provider = %generator.provider(),
                    retries = attempt,
                    "Rate limit retries exhausted"
                );
                return Err(GenerationError::RateLimited);
            }
            other => return other,
        }
    }
}

#[cfg(feature = "providers")]
impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Map a provider response status onto [`GenerationError`].
#[cfg(feature = "providers")]
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GenerationError> {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(GenerationError::RateLimited);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GenerationError::Status(status.as_u16(), body));
    }
    Ok(response)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted generators for tests.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays a fixed sequence of results, repeating the last one.
    pub struct ScriptedGenerator {
        provider: Provider,
        script: Mutex<VecDeque<Result<String, GenerationError>>>,
        last: Mutex<Option<Result<String, GenerationError>>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        pub fn new(provider: Provider, script: Vec<Result<String, GenerationError>>) -> Self {
            Self {
                provider,
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        fn provider(&self) -> Provider {
            self.provider
        }

        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            self.calls.lock().push(prompt.to_string());
            let next = self.script.lock().pop_front();
            match next {
                Some(result) => {
                    *self.last.lock() = Some(result.clone());
                    result
                }
                None => self
                    .last
                    .lock()
                    .clone()
                    .unwrap_or(Err(GenerationError::Malformed("empty script".into()))),
            }
        }

        async fn health_check(&self) -> ProviderHealth {
            ProviderHealth {
                provider: self.provider,
                ok: true,
                message: "scripted".to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedGenerator;
    use super::*;
    use std::time::Duration;

    fn settings(max_retries: u32) -> ProviderSettings {
        ProviderSettings {
            api_key: Some("k".into()),
            max_retries,
            base_delay: Duration::from_secs(3),
            timeout: Duration::from_secs(90),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_then_success() {
        let generator = ScriptedGenerator::new(
            Provider::Groq,
            vec![
                Err(GenerationError::RateLimited),
                Err(GenerationError::RateLimited),
                Ok("Q1: a".to_string()),
            ],
        );
        let start = tokio::time::Instant::now();
        let text = generate_with_backoff(&generator, "p", &settings(5)).await.unwrap();

        assert_eq!(text, "Q1: a");
        assert_eq!(generator.call_count(), 3);
        // 3s + 6s
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(9) && waited < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_exhausted() {
        let generator = ScriptedGenerator::new(Provider::Gemini, vec![Err(GenerationError::RateLimited)]);
        let err = generate_with_backoff(&generator, "p", &settings(2)).await.unwrap_err();

        assert_eq!(err, GenerationError::RateLimited);
        assert_eq!(generator.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_not_retried() {
        let generator = ScriptedGenerator::new(
            Provider::Gemini,
            vec![Err(GenerationError::Status(500, "boom".into()))],
        );
        let err = generate_with_backoff(&generator, "p", &settings(5)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
        assert_eq!(generator.call_count(), 1);
    }
}
