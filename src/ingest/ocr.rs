//! OCR engine collaborator.
//!
//! The engine exposes three endpoints:
//!
//! - `POST {base}/extract-text` with one multipart `file`
//! - `POST {base}/extract-text-batch` with parts `file1..fileN`
//! - `GET {base}/health`
//!
//! Both extraction endpoints answer `{"success": bool, ...}`; a `false`
//! success flag is a failure even with status 200.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{env_opt, env_or};
use crate::error::{Classify, ErrorKind};

/// OCR engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrConfig {
    /// Engine base URL; `None` means OCR is not configured.
    pub base_url: Option<String>,
    /// Timeout for a single image (default: 60s).
    pub timeout: Duration,
    /// Timeout for a batch (default: 120s).
    pub batch_timeout: Duration,
    /// Timeout for the health check (default: 5s).
    pub health_timeout: Duration,
}

impl OcrConfig {
    /// Configuration pointing at an engine.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into().trim_end_matches('/').to_string()),
            ..Self::default()
        }
    }

    /// Load from `OCR_ENGINE_URL`, `OCR_TIMEOUT_SECS` and `OCR_BATCH_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env_opt("OCR_ENGINE_URL").map(|u| u.trim_end_matches('/').to_string()),
            timeout: Duration::from_secs(env_or("OCR_TIMEOUT_SECS", defaults.timeout.as_secs())),
            batch_timeout: Duration::from_secs(env_or(
                "OCR_BATCH_TIMEOUT_SECS",
                defaults.batch_timeout.as_secs(),
            )),
            health_timeout: defaults.health_timeout,
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(60),
            batch_timeout: Duration::from_secs(120),
            health_timeout: Duration::from_secs(5),
        }
    }
}

/// Error type for OCR calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OcrError {
    /// No engine URL configured.
    #[error("OCR engine URL not configured")]
    NotConfigured,
    /// Engine did not answer in time.
    #[error("OCR timeout - image might be too large or connection slow")]
    Timeout,
    /// Engine could not be reached.
    #[error("Cannot connect to OCR engine: {0}")]
    Unreachable(String),
    /// Engine returned a non-success status.
    #[error("OCR API error {0}")]
    Status(u16),
    /// Engine reported `success: false`.
    #[error("OCR processing failed")]
    Failed,
    /// Response did not match the expected shape.
    #[error("Malformed OCR response: {0}")]
    Malformed(String),
    /// Local file could not be read.
    #[error("Could not read upload: {0}")]
    Io(String),
}

impl Classify for OcrError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConfigured => ErrorKind::ConfigurationError,
            Self::Io(_) => ErrorKind::Internal,
            Self::Timeout | Self::Unreachable(_) | Self::Status(_) | Self::Failed | Self::Malformed(_) => {
                ErrorKind::UpstreamUnavailable
            }
        }
    }
}

/// Text extracted from one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    /// One-based page number.
    pub page: u32,
    /// Extracted text.
    pub text: String,
    /// Engine that produced the text.
    pub engine_used: String,
    /// Confidence in percent.
    pub confidence: f64,
}

/// Result of an engine health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OcrHealth {
    /// Whether the engine answered.
    pub ok: bool,
    /// Human readable detail.
    pub detail: String,
}

/// Turns page images into text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract one image; the result is page 1.
    async fn extract(&self, image: &Path) -> Result<PageText, OcrError>;

    /// Extract several images in one call, pages numbered from 1.
    async fn extract_batch(&self, images: &[PathBuf]) -> Result<Vec<PageText>, OcrError>;

    /// Probe the engine.
    async fn health(&self) -> OcrHealth;
}

#[cfg(feature = "providers")]
pub use client::OcrClient;

#[cfg(feature = "providers")]
mod client {
    use super::*;
    use reqwest::multipart::{Form, Part};

    #[derive(Debug, Deserialize)]
    struct EngineResult {
        #[serde(default)]
        text: String,
        #[serde(default = "unknown_engine")]
        engine_used: String,
        #[serde(default)]
        confidence: f64,
    }

    #[derive(Debug, Deserialize)]
    struct SingleResponse {
        success: bool,
        #[serde(flatten)]
        result: EngineResult,
    }

    #[derive(Debug, Deserialize)]
    struct BatchResponse {
        success: bool,
        #[serde(default)]
        results: Vec<EngineResult>,
    }

    #[derive(Debug, Deserialize)]
    struct HealthResponse {
        #[serde(default)]
        batch_support: bool,
    }

    fn unknown_engine() -> String {
        "unknown".to_string()
    }

    impl From<reqwest::Error> for OcrError {
        fn from(e: reqwest::Error) -> Self {
            if e.is_timeout() {
                Self::Timeout
            } else if e.is_decode() {
                Self::Malformed(e.to_string())
            } else {
                Self::Unreachable(e.to_string())
            }
        }
    }

    async fn file_part(path: &Path) -> Result<Part, OcrError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| OcrError::Io(e.to_string()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page.jpg".to_string());
        Ok(Part::bytes(bytes).file_name(name))
    }

    fn page(page: u32, result: EngineResult) -> PageText {
        PageText {
            page,
            text: result.text,
            engine_used: result.engine_used,
            confidence: result.confidence,
        }
    }

    /// HTTP client for the OCR engine.
    pub struct OcrClient {
        http: reqwest::Client,
        config: OcrConfig,
    }

    impl OcrClient {
        /// Create a client.
        pub fn new(config: OcrConfig) -> Result<Self, OcrError> {
            let http = reqwest::Client::builder()
                .build()
                .map_err(|e| OcrError::Unreachable(e.to_string()))?;
            Ok(Self { http, config })
        }

        fn ensure_configured(&self) -> Result<(), OcrError> {
            self.config.base_url.as_ref().map(|_| ()).ok_or(OcrError::NotConfigured)
        }

        fn url(&self, path: &str) -> Result<String, OcrError> {
            let base = self.config.base_url.as_deref().ok_or(OcrError::NotConfigured)?;
            Ok(format!("{base}{path}"))
        }

        async fn post(&self, path: &str, form: Form, timeout: Duration) -> Result<reqwest::Response, OcrError> {
            let response = self
                .http
                .post(self.url(path)?)
                .multipart(form)
                .timeout(timeout)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(OcrError::Status(response.status().as_u16()));
            }
            Ok(response)
        }
    }

    #[async_trait]
    impl TextExtractor for OcrClient {
        async fn extract(&self, image: &Path) -> Result<PageText, OcrError> {
            self.ensure_configured()?;
            let form = Form::new().part("file", file_part(image).await?);
            let body: SingleResponse = self.post("/extract-text", form, self.config.timeout).await?.json().await?;
            if !body.success {
                return Err(OcrError::Failed);
            }
            Ok(page(1, body.result))
        }

        async fn extract_batch(&self, images: &[PathBuf]) -> Result<Vec<PageText>, OcrError> {
            self.ensure_configured()?;
            let mut form = Form::new();
            for (idx, image) in images.iter().enumerate() {
                form = form.part(format!("file{}", idx + 1), file_part(image).await?);
            }
            let body: BatchResponse = self
                .post("/extract-text-batch", form, self.config.batch_timeout)
                .await?
                .json()
                .await?;
            if !body.success {
                return Err(OcrError::Failed);
            }
            tracing::info!(pages = body.results.len(), "Batch OCR completed");
            Ok(body
                .results
                .into_iter()
                .zip(1u32..)
                .map(|(result, n)| page(n, result))
                .collect())
        }

        async fn health(&self) -> OcrHealth {
            let url = match self.url("/health") {
                Ok(url) => url,
                Err(e) => {
                    return OcrHealth {
                        ok: false,
                        detail: e.to_string(),
                    }
                }
            };
            let response = self.http.get(url).timeout(self.config.health_timeout).send().await;
            match response {
                Ok(r) if r.status().is_success() => {
                    let batch = r.json::<HealthResponse>().await.map(|h| h.batch_support).unwrap_or(false);
                    OcrHealth {
                        ok: true,
                        detail: if batch {
                            "OCR Engine healthy (Batch processing enabled)".to_string()
                        } else {
                            "OCR Engine healthy".to_string()
                        },
                    }
                }
                Ok(r) => OcrHealth {
                    ok: false,
                    detail: format!("Health check failed: {}", r.status().as_u16()),
                },
                Err(e) => OcrHealth {
                    ok: false,
                    detail: format!("Cannot reach OCR engine: {e}"),
                },
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_single_response_shape() {
            let body = r#"{"success":true,"text":"Hello","engine_used":"EasyOCR","confidence":85.5}"#;
            let parsed: SingleResponse = serde_json::from_str(body).unwrap();
            assert!(parsed.success);
            assert_eq!(page(1, parsed.result).engine_used, "EasyOCR");
        }

        #[test]
        fn test_batch_defaults() {
            let body = r#"{"success":true,"results":[{"text":"a"}]}"#;
            let parsed: BatchResponse = serde_json::from_str(body).unwrap();
            assert_eq!(parsed.results[0].engine_used, "unknown");
        }

        #[tokio::test]
        async fn test_unconfigured_client() {
            let client = OcrClient::new(OcrConfig::default()).unwrap();
            let health = client.health().await;
            assert!(!health.ok);
            assert_eq!(
                client.extract(Path::new("/nonexistent.jpg")).await.unwrap_err(),
                OcrError::NotConfigured
            );

            let configured = OcrClient::new(OcrConfig::with_base_url("http://127.0.0.1:9")).unwrap();
            let err = configured.extract(Path::new("/nonexistent.jpg")).await.unwrap_err();
            assert!(matches!(err, OcrError::Io(_)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_trims_trailing_slash() {
        let config = OcrConfig::with_base_url("http://ocr.local/");
        assert_eq!(config.base_url.as_deref(), Some("http://ocr.local"));
        assert_eq!(config.batch_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(OcrError::NotConfigured.kind(), ErrorKind::ConfigurationError);
        assert_eq!(OcrError::Timeout.kind(), ErrorKind::UpstreamUnavailable);
    }
}
