//! Provider credentials and retry settings.

use std::time::Duration;

use crate::config::{env_opt, env_or};
use crate::types::Provider;

/// Connection and retry settings of one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    /// API key; `None` means the provider is not configured.
    pub api_key: Option<String>,
    /// Retries after a rate-limited response before giving up.
    pub max_retries: u32,
    /// Backoff base; attempt `n` waits `base_delay * 2^n`.
    pub base_delay: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl ProviderSettings {
    /// Defaults for a provider, without credentials.
    pub fn defaults_for(provider: Provider) -> Self {
        match provider {
            Provider::Gemini => Self {
                api_key: None,
                max_retries: 8,
                base_delay: Duration::from_secs(5),
                timeout: Duration::from_secs(120),
            },
            Provider::Groq => Self {
                api_key: None,
                max_retries: 5,
                base_delay: Duration::from_secs(3),
                timeout: Duration::from_secs(90),
            },
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    fn from_env(provider: Provider, prefix: &str) -> Self {
        let defaults = Self::defaults_for(provider);
        Self {
            api_key: env_opt(&format!("{prefix}_API_KEY")),
            max_retries: env_or(&format!("{prefix}_MAX_RETRIES"), defaults.max_retries),
            base_delay: Duration::from_secs(env_or(
                &format!("{prefix}_BASE_DELAY_SECS"),
                defaults.base_delay.as_secs(),
            )),
            timeout: Duration::from_secs(env_or(
                &format!("{prefix}_TIMEOUT_SECS"),
                defaults.timeout.as_secs(),
            )),
        }
    }
}

/// Refinement configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefinementConfig {
    /// Gemini settings.
    pub gemini: ProviderSettings,
    /// Groq settings.
    pub groq: ProviderSettings,
    /// Minimum number of question items for a usable result.
    pub min_items: u32,
}

impl RefinementConfig {
    /// Load from `GEMINI_*` and `GROQ_*` variables.
    ///
    /// Recognized suffixes: `_API_KEY`, `_MAX_RETRIES`, `_BASE_DELAY_SECS`,
    /// `_TIMEOUT_SECS`. `REFINEMENT_MIN_ITEMS` overrides the item minimum.
    pub fn from_env() -> Self {
        Self {
            gemini: ProviderSettings::from_env(Provider::Gemini, "GEMINI"),
            groq: ProviderSettings::from_env(Provider::Groq, "GROQ"),
            min_items: env_or("REFINEMENT_MIN_ITEMS", crate::MIN_REFINEMENT_ITEMS),
        }
    }

    /// Settings of one provider.
    pub fn settings(&self, provider: Provider) -> &ProviderSettings {
        match provider {
            Provider::Gemini => &self.gemini,
            Provider::Groq => &self.groq,
        }
    }
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            gemini: ProviderSettings::defaults_for(Provider::Gemini),
            groq: ProviderSettings::defaults_for(Provider::Groq),
            min_items: crate::MIN_REFINEMENT_ITEMS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_defaults() {
        let config = RefinementConfig::default();
        assert_eq!(config.gemini.max_retries, 8);
        assert_eq!(config.gemini.timeout, Duration::from_secs(120));
        assert_eq!(config.settings(Provider::Groq).base_delay, Duration::from_secs(3));
        assert_eq!(config.min_items, 2);
    }

    #[test]
    fn test_backoff_doubles() {
        let settings = ProviderSettings::defaults_for(Provider::Groq);
        assert_eq!(settings.backoff(0), Duration::from_secs(3));
        assert_eq!(settings.backoff(1), Duration::from_secs(6));
        assert_eq!(settings.backoff(3), Duration::from_secs(24));
    }
}
