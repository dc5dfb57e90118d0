//! Refinement records: provider output per (topic, provider, difficulty).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{RefinementId, TopicId};
use super::topic::DifficultyLevel;

/// Text-generation provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Google Gemini.
    Gemini,
    /// Groq-hosted Llama models.
    Groq,
}

impl Provider {
    /// All providers.
    pub const ALL: [Provider; 2] = [Self::Gemini, Self::Groq];

    /// Parse provider from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Some(Self::Gemini),
            "groq" => Some(Self::Groq),
            _ => None,
        }
    }

    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Groq => "groq",
        }
    }

    /// Human readable provider name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Gemini => "Google Gemini",
            Self::Groq => "Groq Llama",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a refinement record.
///
/// ```text
/// pending → processing → completed
///                     ↘ failed
/// completed | failed → processing   (regeneration)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefinementStatus {
    /// Created, not started.
    Pending,
    /// Provider call in flight.
    Processing,
    /// Output stored.
    Completed,
    /// Attempt failed; `error_message` holds the reason.
    Failed,
}

impl RefinementStatus {
    /// Parse status from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: RefinementStatus) -> bool {
        use RefinementStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, Processing)
                | (Failed, Processing)
        )
    }
}

impl Default for RefinementStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for RefinementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique key of a refinement record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RefinementKey {
    /// Refined topic.
    pub topic_id: TopicId,
    /// Provider that generated the text.
    pub provider: Provider,
    /// Difficulty used for the prompt.
    pub difficulty: DifficultyLevel,
}

impl RefinementKey {
    /// Create a key.
    pub fn new(topic_id: TopicId, provider: Provider, difficulty: DifficultyLevel) -> Self {
        Self {
            topic_id,
            provider,
            difficulty,
        }
    }
}

impl fmt::Display for RefinementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.topic_id, self.provider, self.difficulty)
    }
}

/// Stored provider output for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementRecord {
    /// Record identifier, stable across regenerations.
    pub id: RefinementId,
    /// Record key.
    pub key: RefinementKey,
    /// Post-processed generated text (empty unless completed).
    pub refined_text: String,
    /// Current status.
    pub status: RefinementStatus,
    /// Failure reason when `status` is failed.
    pub error_message: String,
    /// Wall-clock seconds spent on the last attempt.
    pub processing_time_secs: Option<f64>,
    /// Number of generated question items.
    pub item_count: u32,
    /// Fingerprint of the prompt used for the last attempt.
    pub prompt_fingerprint: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl RefinementRecord {
    /// Whether the record holds usable output.
    pub fn is_successful(&self) -> bool {
        self.status == RefinementStatus::Completed && !self.refined_text.is_empty()
    }
}

/// Values written by an upsert on a [`RefinementKey`].
///
/// The store keeps `id` and `created_at` of an existing record and replaces
/// everything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementUpdate {
    /// Record key.
    pub key: RefinementKey,
    /// Generated text.
    pub refined_text: String,
    /// New status.
    pub status: RefinementStatus,
    /// Failure reason.
    pub error_message: String,
    /// Wall-clock seconds of the attempt.
    pub processing_time_secs: Option<f64>,
    /// Number of generated question items.
    pub item_count: u32,
    /// Prompt fingerprint.
    pub prompt_fingerprint: String,
}

impl RefinementUpdate {
    /// Mark a key as being processed, clearing previous output.
    pub fn processing(key: RefinementKey, prompt_fingerprint: String) -> Self {
        Self {
            key,
            refined_text: String::new(),
            status: RefinementStatus::Processing,
            error_message: String::new(),
            processing_time_secs: None,
            item_count: 0,
            prompt_fingerprint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use RefinementStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Processing));
        assert!(Failed.can_transition_to(Processing));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Pending));
    }

    #[test]
    fn test_provider_roundtrip_names() {
        for provider in Provider::ALL {
            assert_eq!(Provider::from_str(provider.as_str()), Some(provider));
        }
        assert_eq!(Provider::from_str("openai"), None);
    }
}
