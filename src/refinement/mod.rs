//! Refinement of raw topic text into study questions.
//!
//! One record exists per (topic, provider, difficulty). Every attempt moves
//! the record to `processing` and then to `completed` or `failed`; a new
//! attempt on the same key overwrites the previous outcome. Generated text
//! only reaches the topic through an explicit [`RefinementOrchestrator::select`].
//!
//! ## Failure handling
//!
//! | Failure                  | Retried            | Kind                  |
//! |--------------------------|--------------------|-----------------------|
//! | Topic has no raw text    | no                 | `BadRequest`          |
//! | Missing API key          | no                 | `ConfigurationError`  |
//! | HTTP 429                 | yes, with backoff  | `RateLimited`         |
//! | Too few question items   | no                 | `InsufficientContent` |
//! | Transport / bad response | no                 | `UpstreamUnavailable` |
//!
//! Every failure on an existing topic is written to the record and returned
//! to the caller. An attempt whose future is dropped before it finishes (a
//! disconnected client, a caller timeout) is recorded as failed with
//! [`RefinementError::Cancelled`].

pub mod config;
pub mod postprocess;
pub mod prompt;
pub mod provider;

#[cfg(feature = "providers")]
pub mod gemini;
#[cfg(feature = "providers")]
pub mod groq;

pub use config::{ProviderSettings, RefinementConfig};
pub use postprocess::{clean_markup, count_items};
pub use prompt::{detect_table_candidates, Prompt, TableHint};
pub use provider::{generate_with_backoff, GenerationError, ProviderHealth, TextGenerator};

#[cfg(feature = "providers")]
pub use gemini::GeminiClient;
#[cfg(feature = "providers")]
pub use groq::GroqClient;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Classify, ErrorKind};
use crate::store::ContentStore;
use crate::types::{
    DifficultyLevel, Provider, RefinementId, RefinementKey, RefinementRecord, RefinementStatus,
    RefinementUpdate, Topic, TopicId,
};

/// Error type for refinement operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RefinementError {
    /// Topic absent or soft-deleted.
    #[error("Topic not found: {0}")]
    TopicNotFound(TopicId),
    /// Topic has no raw text to refine.
    #[error("Topic {0} has no raw text to refine")]
    NoRawText(TopicId),
    /// No generator registered for the provider.
    #[error("{} is not configured", .0.display_name())]
    NotConfigured(Provider),
    /// Provider call failed.
    #[error("{provider} generation failed: {source}")]
    Generation {
        /// Provider that failed.
        provider: Provider,
        /// Underlying failure.
        source: GenerationError,
    },
    /// Output had fewer question items than required.
    #[error("Generated content has {found} question(s), at least {required} required")]
    InsufficientContent {
        /// Items found.
        found: u32,
        /// Minimum required.
        required: u32,
    },
    /// Refinement record absent.
    #[error("Refinement not found: {0}")]
    RecordNotFound(RefinementId),
    /// Only completed records can be selected.
    #[error("Refinement {id} is {status}, only completed refinements can be selected")]
    NotCompleted {
        /// Record id.
        id: RefinementId,
        /// Its current status.
        status: RefinementStatus,
    },
    /// The attempt was dropped before it finished.
    #[error("Refinement cancelled before completion")]
    Cancelled,
    /// Prompt could not be fingerprinted.
    #[error("Fingerprint error: {0}")]
    Fingerprint(String),
    /// Store error.
    #[error("Store error: {0}")]
    StoreError(String),
}

impl RefinementError {
    /// Create a store error from any error type.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::StoreError(e.to_string())
    }
}

impl Classify for RefinementError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::TopicNotFound(_) | Self::RecordNotFound(_) => ErrorKind::NotFound,
            Self::NoRawText(_) | Self::NotCompleted { .. } => ErrorKind::BadRequest,
            Self::NotConfigured(_) => ErrorKind::ConfigurationError,
            Self::Generation { source, .. } => source.kind(),
            Self::InsufficientContent { .. } => ErrorKind::InsufficientContent,
            Self::Cancelled | Self::Fingerprint(_) | Self::StoreError(_) => ErrorKind::Internal,
        }
    }
}

/// Health of every provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AiStatus {
    /// One entry per provider, in provider order.
    pub providers: Vec<ProviderHealth>,
    /// Whether at least one provider is usable.
    pub overall: bool,
}

/// Marks a `processing` record as failed if the attempt is dropped.
///
/// `Drop` cannot await, so the write is spawned on the current runtime.
struct CancelGuard<S: ContentStore + 'static> {
    store: Arc<S>,
    key: RefinementKey,
    fingerprint: String,
    started: tokio::time::Instant,
    armed: bool,
}

impl<S: ContentStore + 'static> CancelGuard<S> {
    fn new(store: Arc<S>, key: RefinementKey, fingerprint: String) -> Self {
        Self {
            store,
            key,
            fingerprint,
            started: tokio::time::Instant::now(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<S: ContentStore + 'static> Drop for CancelGuard<S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let update = RefinementUpdate {
            key: self.key,
            refined_text: String::new(),
            status: RefinementStatus::Failed,
            error_message: RefinementError::Cancelled.to_string(),
            processing_time_secs: Some(self.started.elapsed().as_secs_f64()),
            item_count: 0,
            prompt_fingerprint: std::mem::take(&mut self.fingerprint),
        };
        let key = self.key;
        tracing::warn!(
            topic_id = %key.topic_id,
            provider = %key.provider,
            difficulty = %key.difficulty,
            "Refinement dropped while processing"
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(&self.store);
                handle.spawn(async move {
                    if let Err(e) = store.upsert_refinement(update).await {
                        tracing::error!(topic_id = %key.topic_id, error = %e, "Cannot record cancelled refinement");
                    }
                });
            }
            Err(_) => {
                tracing::error!(topic_id = %key.topic_id, "No runtime to record cancelled refinement");
            }
        }
    }
}

/// Drives refinement attempts and persists their outcome.
pub struct RefinementOrchestrator<S: ContentStore> {
    store: Arc<S>,
    config: RefinementConfig,
    generators: BTreeMap<Provider, Arc<dyn TextGenerator>>,
}

impl<S: ContentStore + 'static> RefinementOrchestrator<S> {
    /// Create an orchestrator with no generators registered.
    pub fn new(store: Arc<S>, config: RefinementConfig) -> Self {
        Self {
            store,
            config,
            generators: BTreeMap::new(),
        }
    }

    /// Register the generator for its provider, replacing any previous one.
    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generators.insert(generator.provider(), generator);
        self
    }

    /// Create an orchestrator backed by the Gemini and Groq HTTP clients.
    #[cfg(feature = "providers")]
    pub fn with_http_providers(store: Arc<S>, config: RefinementConfig) -> Result<Self, GenerationError> {
        let gemini = Arc::new(GeminiClient::new(&config.gemini)?);
        let groq = Arc::new(GroqClient::new(&config.groq)?);
        Ok(Self::new(store, config).with_generator(gemini).with_generator(groq))
    }

    /// Configuration in use.
    pub fn config(&self) -> &RefinementConfig {
        &self.config
    }

    async fn live_topic(&self, id: TopicId) -> Result<Topic, RefinementError> {
        self.store
            .get_topic(id)
            .await
            .map_err(RefinementError::from_store)?
            .filter(|t| !t.is_deleted)
            .ok_or(RefinementError::TopicNotFound(id))
    }

    async fn record_failure(
        &self,
        key: RefinementKey,
        fingerprint: &str,
        error: &RefinementError,
        elapsed_secs: Option<f64>,
    ) -> Result<(), RefinementError> {
        self.store
            .upsert_refinement(RefinementUpdate {
                key,
                refined_text: String::new(),
                status: RefinementStatus::Failed,
                error_message: error.to_string(),
                processing_time_secs: elapsed_secs,
                item_count: 0,
                prompt_fingerprint: fingerprint.to_string(),
            })
            .await
            .map_err(RefinementError::from_store)?;
        Ok(())
    }

    /// Generate (or regenerate) the refinement of a topic for one provider.
    ///
    /// The outcome is persisted before returning, whether it succeeds or not.
    /// If the returned future is dropped mid-attempt the record is marked
    /// failed in the background.
    pub async fn generate(
        &self,
        topic_id: TopicId,
        provider: Provider,
        difficulty: DifficultyLevel,
    ) -> Result<RefinementRecord, RefinementError> {
        let topic = self.live_topic(topic_id).await?;

        let key = RefinementKey::new(topic_id, provider, difficulty);
        let prompt = Prompt::build(provider, difficulty, &topic.title, &topic.raw_text);
        let fingerprint = prompt
            .fingerprint()
            .map_err(|e| RefinementError::Fingerprint(e.to_string()))?;

        if topic.raw_text.trim().is_empty() {
            let error = RefinementError::NoRawText(topic_id);
            self.record_failure(key, &fingerprint, &error, None).await?;
            return Err(error);
        }

        self.store
            .upsert_refinement(RefinementUpdate::processing(key, fingerprint.clone()))
            .await
            .map_err(RefinementError::from_store)?;

        let guard = CancelGuard::new(Arc::clone(&self.store), key, fingerprint.clone());
        let outcome = self.attempt(key, &prompt, fingerprint).await;
        guard.disarm();
        outcome
    }

    /// Call the provider for a key already marked `processing` and persist
    /// the outcome.
    async fn attempt(
        &self,
        key: RefinementKey,
        prompt: &Prompt,
        fingerprint: String,
    ) -> Result<RefinementRecord, RefinementError> {
        let RefinementKey {
            topic_id,
            provider,
            difficulty,
        } = key;

        tracing::info!(
            topic_id = %topic_id,
            provider = %provider,
            difficulty = %difficulty,
            table_hint = prompt.table_hint.is_some(),
            "Refinement started"
        );

        let Some(generator) = self.generators.get(&provider) else {
            let error = RefinementError::NotConfigured(provider);
            self.record_failure(key, &fingerprint, &error, None).await?;
            return Err(error);
        };

        let settings = self.config.settings(provider);
        let started = tokio::time::Instant::now();
        let outcome = generate_with_backoff(generator.as_ref(), &prompt.text, settings).await;
        let elapsed = started.elapsed().as_secs_f64();

        let raw = match outcome {
            Ok(raw) => raw,
            Err(source) => {
                let error = match source {
                    GenerationError::NotConfigured(_) => RefinementError::NotConfigured(provider),
                    source => RefinementError::Generation { provider, source },
                };
                tracing::warn!(
                    topic_id = %topic_id,
                    provider = %provider,
                    error = %error,
                    "Refinement failed"
                );
                self.record_failure(key, &fingerprint, &error, Some(elapsed)).await?;
                return Err(error);
            }
        };

        let refined_text = clean_markup(&raw);
        let item_count = count_items(&refined_text);
        if item_count < self.config.min_items {
            let error = RefinementError::InsufficientContent {
                found: item_count,
                required: self.config.min_items,
            };
            tracing::warn!(
                topic_id = %topic_id,
                provider = %provider,
                item_count = item_count,
                "Refinement produced too few items"
            );
            self.record_failure(key, &fingerprint, &error, Some(elapsed)).await?;
            return Err(error);
        }

        let record = self
            .store
            .upsert_refinement(RefinementUpdate {
                key,
                refined_text,
                status: RefinementStatus::Completed,
                error_message: String::new(),
                processing_time_secs: Some(elapsed),
                item_count,
                prompt_fingerprint: fingerprint,
            })
            .await
            .map_err(RefinementError::from_store)?;

        tracing::info!(
            topic_id = %topic_id,
            provider = %provider,
            difficulty = %difficulty,
            item_count = item_count,
            elapsed_secs = elapsed,
            "Refinement completed"
        );
        Ok(record)
    }

    /// Generate with every requested provider, one after the other.
    pub async fn generate_many(
        &self,
        topic_id: TopicId,
        providers: &BTreeSet<Provider>,
        difficulty: DifficultyLevel,
    ) -> BTreeMap<Provider, Result<RefinementRecord, RefinementError>> {
        let mut results = BTreeMap::new();
        for &provider in providers {
            results.insert(provider, self.generate(topic_id, provider, difficulty).await);
        }
        results
    }

    /// Copy a completed refinement into its topic's refined summary.
    pub async fn select(&self, id: RefinementId) -> Result<Topic, RefinementError> {
        let record = self
            .store
            .get_refinement_by_id(id)
            .await
            .map_err(RefinementError::from_store)?
            .ok_or(RefinementError::RecordNotFound(id))?;
        if !record.is_successful() {
            return Err(RefinementError::NotCompleted {
                id,
                status: record.status,
            });
        }

        let topic_id = record.key.topic_id;
        self.live_topic(topic_id).await?;
        self.store
            .set_refined_summary(topic_id, &record.refined_text, record.key.difficulty)
            .await
            .map_err(RefinementError::from_store)?;

        tracing::info!(
            refinement_id = %id,
            topic_id = %topic_id,
            provider = %record.key.provider,
            "Refinement selected"
        );
        self.live_topic(topic_id).await
    }

    /// Records of a topic, newest first.
    pub async fn list_for_topic(&self, topic_id: TopicId) -> Result<Vec<RefinementRecord>, RefinementError> {
        self.live_topic(topic_id).await?;
        self.store
            .refinements_for_topic(topic_id)
            .await
            .map_err(RefinementError::from_store)
    }

    /// Health of every provider.
    pub async fn ai_status(&self) -> AiStatus {
        let mut providers = Vec::with_capacity(Provider::ALL.len());
        for provider in Provider::ALL {
            let health = match self.generators.get(&provider) {
                Some(generator) => generator.health_check().await,
                None => ProviderHealth {
                    provider,
                    ok: false,
                    message: format!("{} is not configured", provider.display_name()),
                },
            };
            providers.push(health);
        }
        let overall = providers.iter().any(|h| h.ok);
        AiStatus { providers, overall }
    }
}

#[cfg(test)]
mod tests {
    use super::provider::testing::ScriptedGenerator;
    use super::*;
    use crate::store::InMemoryContentStore;
    use crate::types::{NewCourse, NewTopic};

    const GOOD: &str = "### Q1: What is ATP?\n**Answer:** Energy\nExplanation: stores energy\n---\nQ2: Where?\nAnswer: Mitochondria";

    async fn setup() -> (Arc<InMemoryContentStore>, Topic) {
        let store = Arc::new(InMemoryContentStore::new());
        let course = store.create_course(NewCourse::named("BIO 202")).await.unwrap();
        let topic = store
            .create_topic(
                NewTopic::community(course.id, "Cells")
                    .with_raw_text("Cells make ATP in mitochondria."),
            )
            .await
            .unwrap();
        (store, topic)
    }

    fn orchestrator(
        store: Arc<InMemoryContentStore>,
        generator: Arc<ScriptedGenerator>,
    ) -> RefinementOrchestrator<InMemoryContentStore> {
        RefinementOrchestrator::new(store, RefinementConfig::default()).with_generator(generator)
    }

    #[tokio::test]
    async fn test_generate_completes_and_cleans() {
        let (store, topic) = setup().await;
        let gen = Arc::new(ScriptedGenerator::new(Provider::Gemini, vec![Ok(GOOD.to_string())]));
        let orch = orchestrator(store, gen.clone());

        let record = orch
            .generate(topic.id, Provider::Gemini, DifficultyLevel::Medium)
            .await
            .unwrap();

        assert_eq!(record.status, RefinementStatus::Completed);
        assert_eq!(record.item_count, 2);
        assert!(record.refined_text.starts_with("Q1: What is ATP?\nAnswer: Energy"));
        assert_eq!(record.prompt_fingerprint.len(), 16);
        assert!(gen.calls.lock()[0].contains("Cells make ATP"));
    }

    #[tokio::test]
    async fn test_single_item_marks_failed_and_keeps_summary() {
        let (store, topic) = setup().await;
        let gen = Arc::new(ScriptedGenerator::new(
            Provider::Groq,
            vec![Ok("Q1: only one\nAnswer: x".to_string())],
        ));
        let orch = orchestrator(store.clone(), gen);

        let err = orch
            .generate(topic.id, Provider::Groq, DifficultyLevel::Medium)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientContent);

        let key = RefinementKey::new(topic.id, Provider::Groq, DifficultyLevel::Medium);
        let record = store.get_refinement(&key).await.unwrap().unwrap();
        assert_eq!(record.status, RefinementStatus::Failed);
        assert!(record.error_message.contains("at least 2"));
        assert_eq!(store.get_topic(topic.id).await.unwrap().unwrap().refined_summary, "");
    }

    #[tokio::test]
    async fn test_regeneration_overwrites_same_record() {
        let (store, topic) = setup().await;
        let second = "Q1: new\nAnswer: a\nQ2: new\nAnswer: b\nQ3: new\nAnswer: c";
        let gen = Arc::new(ScriptedGenerator::new(
            Provider::Gemini,
            vec![Ok(GOOD.to_string()), Ok(second.to_string())],
        ));
        let orch = orchestrator(store.clone(), gen);

        let first = orch.generate(topic.id, Provider::Gemini, DifficultyLevel::Medium).await.unwrap();
        let again = orch.generate(topic.id, Provider::Gemini, DifficultyLevel::Medium).await.unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(again.item_count, 3);
        let records = store.refinements_for_topic(topic.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].refined_text.starts_with("Q1: new"));
    }

    #[tokio::test]
    async fn test_missing_generator_is_configuration_error() {
        let (store, topic) = setup().await;
        let orch = RefinementOrchestrator::new(store.clone(), RefinementConfig::default());

        let err = orch
            .generate(topic.id, Provider::Gemini, DifficultyLevel::Easy)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);

        let key = RefinementKey::new(topic.id, Provider::Gemini, DifficultyLevel::Easy);
        let record = store.get_refinement(&key).await.unwrap().unwrap();
        assert_eq!(record.status, RefinementStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhaustion_is_recorded() {
        let (store, topic) = setup().await;
        let gen = Arc::new(ScriptedGenerator::new(Provider::Groq, vec![Err(GenerationError::RateLimited)]));
        let orch = orchestrator(store.clone(), gen.clone());

        let err = orch
            .generate(topic.id, Provider::Groq, DifficultyLevel::Difficult)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(gen.call_count(), 6);
        let records = store.refinements_for_topic(topic.id).await.unwrap();
        assert_eq!(records[0].status, RefinementStatus::Failed);
    }

    #[tokio::test]
    async fn test_select_copies_text_and_difficulty() {
        let (store, topic) = setup().await;
        let gen = Arc::new(ScriptedGenerator::new(Provider::Gemini, vec![Ok(GOOD.to_string())]));
        let orch = orchestrator(store, gen);

        let record = orch.generate(topic.id, Provider::Gemini, DifficultyLevel::Easy).await.unwrap();
        let updated = orch.select(record.id).await.unwrap();

        assert_eq!(updated.refined_summary, record.refined_text);
        assert_eq!(updated.difficulty_level, DifficultyLevel::Easy);
    }

    #[tokio::test]
    async fn test_select_rejects_failed_record() {
        let (store, topic) = setup().await;
        let orch = RefinementOrchestrator::new(store.clone(), RefinementConfig::default());
        let _ = orch.generate(topic.id, Provider::Groq, DifficultyLevel::Easy).await;
        let records = store.refinements_for_topic(topic.id).await.unwrap();

        let err = orch.select(records[0].id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(matches!(err, RefinementError::NotCompleted { .. }));
    }

    #[tokio::test]
    async fn test_generate_many_iterates_providers() {
        let (store, topic) = setup().await;
        let gen = Arc::new(ScriptedGenerator::new(Provider::Gemini, vec![Ok(GOOD.to_string())]));
        let orch = orchestrator(store, gen);
        let providers: BTreeSet<Provider> = Provider::ALL.into_iter().collect();

        let results = orch.generate_many(topic.id, &providers, DifficultyLevel::Medium).await;

        assert!(results[&Provider::Gemini].is_ok());
        assert_eq!(
            results[&Provider::Groq].as_ref().unwrap_err().kind(),
            ErrorKind::ConfigurationError
        );
    }

    #[tokio::test]
    async fn test_unknown_and_empty_topics() {
        let (store, topic) = setup().await;
        let blank = store
            .create_topic(NewTopic::community(topic.course_id, "Blank"))
            .await
            .unwrap();
        let orch = RefinementOrchestrator::new(store, RefinementConfig::default());

        let missing = orch
            .generate(TopicId::new(999), Provider::Gemini, DifficultyLevel::Medium)
            .await
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let empty = orch
            .generate(blank.id, Provider::Gemini, DifficultyLevel::Medium)
            .await
            .unwrap_err();
        assert_eq!(empty, RefinementError::NoRawText(blank.id));

        let records = orch.list_for_topic(blank.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, RefinementStatus::Failed);
        assert_eq!(records[0].error_message, empty.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_attempt_is_recorded_as_cancelled() {
        let (store, topic) = setup().await;
        let gen = Arc::new(ScriptedGenerator::new(Provider::Gemini, vec![Err(GenerationError::RateLimited)]));
        let orch = orchestrator(store.clone(), gen);

        let timed_out = tokio::time::timeout(
            std::time::Duration::from_secs(60),
            orch.generate(topic.id, Provider::Gemini, DifficultyLevel::Easy),
        )
        .await;
        assert!(timed_out.is_err());

        let key = RefinementKey::new(topic.id, Provider::Gemini, DifficultyLevel::Easy);
        let mut record = store.get_refinement(&key).await.unwrap().unwrap();
        for _ in 0..10 {
            if record.status == RefinementStatus::Failed {
                break;
            }
            tokio::task::yield_now().await;
            record = store.get_refinement(&key).await.unwrap().unwrap();
        }
        assert_eq!(record.status, RefinementStatus::Failed);
        assert_eq!(record.error_message, RefinementError::Cancelled.to_string());
    }

    #[tokio::test]
    async fn test_finished_attempt_is_not_overwritten_on_drop() {
        let (store, topic) = setup().await;
        let gen = Arc::new(ScriptedGenerator::new(Provider::Gemini, vec![Ok(GOOD.to_string())]));
        let orch = orchestrator(store.clone(), gen);

        orch.generate(topic.id, Provider::Gemini, DifficultyLevel::Easy).await.unwrap();
        tokio::task::yield_now().await;

        let key = RefinementKey::new(topic.id, Provider::Gemini, DifficultyLevel::Easy);
        let record = store.get_refinement(&key).await.unwrap().unwrap();
        assert_eq!(record.status, RefinementStatus::Completed);
    }

    #[tokio::test]
    async fn test_ai_status_overall() {
        let (store, _) = setup().await;
        let gen = Arc::new(ScriptedGenerator::new(Provider::Groq, vec![]));
        let status = orchestrator(store, gen).ai_status().await;

        assert!(status.overall);
        assert!(!status.providers[0].ok);
        assert!(status.providers[1].ok);
    }
}
