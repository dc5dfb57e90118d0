//! # study-guide-kernel
//!
//! Access control and content pipeline for a study guide library.
//!
//! The kernel answers one question:
//!
//! > Given a requester and a topic, may the requester **see** it, and may
//! > they **read** it?
//!
//! ## Core Contract
//!
//! 1. Community topics are open to everyone; premium topics are readable only
//!    by active premium users explicitly assigned to them, and by admins
//! 2. Listings and detail reads use separate predicates: an unassigned
//!    premium topic may be listed to everyone while its content stays closed
//! 3. Soft-deleted content is invisible to every non-admin path
//!
//! ## Architecture
//!
//! ```text
//! Requester → resolve_viewer → Viewer ─┬→ policy (detail / listing)
//!                                      └→ filter_accessible → Catalog views
//!                    ↓
//!              ContentStore (Postgres or Memory)
//!
//! Topic.raw_text → RefinementOrchestrator → TextGenerator (Gemini / Groq)
//! Page images    → Ingestor → TextExtractor (OCR engine)
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same viewer + same topics → identical filtered listing
//! - Listings are de-duplicated and ordered newest first, ties by TopicId
//! - Prompt and export fingerprints are xxh64 over canonical JSON

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod error;
pub mod config;
pub mod canonical;
pub mod policy;
pub mod store;
pub mod assignment;
pub mod filter;
pub mod identity;
pub mod catalog;
pub mod content;
pub mod premium;
pub mod refinement;
pub mod ingest;
pub mod export;

#[cfg(feature = "service")]
pub mod service;

/// Minimum number of structured items a refinement must contain.
pub const MIN_REFINEMENT_ITEMS: u32 = 2;

// Re-exports
pub use types::{
    AccessCode, AdminId, AdminUser, Course, CourseId, Department, DepartmentId, DifficultyLevel,
    NewCourse, NewPremiumUser, NewTopic, PremiumUser, PremiumUserId, Provider, RefinementId,
    RefinementKey, RefinementRecord, RefinementStatus, Requester, Topic, TopicId, TopicTier,
    Viewer,
};
pub use error::{Classify, ErrorKind};
pub use config::{KernelConfig, ServerConfig};
pub use canonical::{canonical_hash, canonical_hash_hex, to_canonical_bytes};
pub use policy::{
    can_access, check_detail_access, is_accessible_for_detail, is_visible_in_listing,
    DetailDecision,
};
pub use store::{ContentStore, InMemoryContentStore};
#[cfg(feature = "postgres")]
pub use store::PostgresContentStore;
pub use assignment::{AssignmentError, AssignmentManager};
pub use filter::{browse_listing, count_accessible, filter_accessible};
pub use identity::{
    register_or_login, resolve_viewer, AdminAuthenticator, PremiumUserDirectory,
    RegistrationError, SessionConfig, SessionManager,
};
pub use catalog::{Catalog, CatalogError};
pub use content::{ContentEditor, ContentError};
pub use premium::{PremiumError, PremiumViews};
pub use refinement::{
    GenerationError, RefinementConfig, RefinementError, RefinementOrchestrator, TextGenerator,
};
pub use ingest::{IngestError, Ingestor, OcrConfig, TextExtractor};
pub use export::{BulkOperations, DataExport, ExportError, ImportReport};
