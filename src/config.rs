//! Process configuration.
//!
//! Every component takes an explicit configuration struct at construction.
//! The `from_env` constructors read the environment once, at startup.

use crate::identity::SessionConfig;
use crate::ingest::OcrConfig;
use crate::refinement::RefinementConfig;

/// Parse an environment variable, falling back to `default` when unset or invalid.
pub(crate) fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Non-empty environment variable.
pub(crate) fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Listen address of the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Bind host (default: 0.0.0.0).
    pub host: String,
    /// Bind port (default: 8001).
    pub port: u16,
}

impl ServerConfig {
    /// Load from `HOST` and `PORT`.
    pub fn from_env() -> Self {
        Self {
            host: env_opt("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_or("PORT", 8001),
        }
    }

    /// `host:port` string for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
        }
    }
}

/// Configuration of every kernel component except the database pool.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Listen address.
    pub server: ServerConfig,
    /// Refinement providers.
    pub refinement: RefinementConfig,
    /// OCR engine.
    pub ocr: OcrConfig,
    /// Admin sessions; `None` disables admin login.
    pub session: Option<SessionConfig>,
}

impl KernelConfig {
    /// Load every section from the environment.
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            refinement: RefinementConfig::from_env(),
            ocr: OcrConfig::from_env(),
            session: SessionConfig::from_env(),
        }
    }
}
