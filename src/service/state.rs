//! Service state management.
//!
//! One [`ServiceState`] holds every component, all sharing a single store.

use std::sync::Arc;

use chrono::Utc;

use crate::assignment::AssignmentManager;
use crate::catalog::Catalog;
use crate::config::KernelConfig;
use crate::content::ContentEditor;
use crate::export::BulkOperations;
use crate::identity::{AdminAuthenticator, PremiumUserDirectory, SessionConfig, SessionError, SessionManager};
use crate::ingest::{Ingestor, OcrClient, OcrError, TextExtractor};
use crate::premium::PremiumViews;
use crate::refinement::{GenerationError, RefinementConfig, RefinementOrchestrator, TextGenerator};
use crate::store::ContentStore;
use crate::types::AdminUser;

/// Startup failure while wiring the state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// A refinement provider client could not be built.
    #[error("Refinement provider setup failed: {0}")]
    Providers(#[from] GenerationError),
    /// The OCR client could not be built.
    #[error("OCR client setup failed: {0}")]
    Ocr(#[from] OcrError),
}

/// Shared service state.
pub struct ServiceState<S: ContentStore + 'static> {
    /// Entity store.
    pub store: Arc<S>,
    /// Public read views.
    pub catalog: Catalog<S>,
    /// Department-scoped premium views.
    pub premium: PremiumViews<S>,
    /// Admin content edits.
    pub content: ContentEditor<S>,
    /// Premium topic assignments.
    pub assignments: AssignmentManager<S>,
    /// Premium user management.
    pub users: PremiumUserDirectory<S>,
    /// Refinement generation.
    pub refinement: RefinementOrchestrator<S>,
    /// Topic creation from scans or text.
    pub ingestor: Ingestor<S>,
    /// Data export and batch import.
    pub bulk: BulkOperations<S>,
    /// OCR engine.
    pub ocr: Arc<dyn TextExtractor>,
    admin: Option<AdminAuthenticator<S>>,
}

impl<S: ContentStore + 'static> ServiceState<S> {
    /// Create state with no refinement providers registered.
    ///
    /// Without a session configuration admin login is disabled and every
    /// admin endpoint answers 403.
    pub fn new(
        store: Arc<S>,
        refinement: RefinementConfig,
        session: Option<SessionConfig>,
        ocr: Arc<dyn TextExtractor>,
    ) -> Self {
        let admin = session.map(|config| {
            AdminAuthenticator::new(Arc::clone(&store), Arc::new(SessionManager::new(config)))
        });
        Self {
            catalog: Catalog::new(Arc::clone(&store)),
            premium: PremiumViews::new(Arc::clone(&store)),
            content: ContentEditor::new(Arc::clone(&store)),
            assignments: AssignmentManager::new(Arc::clone(&store)),
            users: PremiumUserDirectory::new(Arc::clone(&store)),
            refinement: RefinementOrchestrator::new(Arc::clone(&store), refinement),
            ingestor: Ingestor::new(Arc::clone(&store)),
            bulk: BulkOperations::new(Arc::clone(&store)),
            ocr,
            admin,
            store,
        }
    }

    /// Create state with the HTTP refinement providers and OCR client.
    pub fn from_config(store: Arc<S>, config: &KernelConfig) -> Result<Self, StateError> {
        let ocr: Arc<dyn TextExtractor> = Arc::new(OcrClient::new(config.ocr.clone())?);
        let mut state = Self::new(
            Arc::clone(&store),
            config.refinement.clone(),
            config.session.clone(),
            ocr,
        );
        state.refinement = RefinementOrchestrator::with_http_providers(store, config.refinement.clone())?;
        Ok(state)
    }

    /// Register a refinement generator, replacing the one for its provider.
    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.refinement = self.refinement.with_generator(generator);
        self
    }

    /// Admin authenticator, if sessions are configured.
    pub fn admin(&self) -> Option<&AdminAuthenticator<S>> {
        self.admin.as_ref()
    }

    /// Resolve an admin session token.
    pub async fn authenticate_admin(&self, token: Option<&str>) -> Result<AdminUser, SessionError> {
        let admin = self.admin.as_ref().ok_or(SessionError::Missing)?;
        let token = token.ok_or(SessionError::Missing)?;
        admin.authenticate(token, Utc::now()).await
    }
}
