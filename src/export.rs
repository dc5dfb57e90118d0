//! Admin bulk operations: full data export and batch premium user import.
//!
//! The export fingerprint covers every section but not the export time, so
//! two exports of unchanged data carry the same fingerprint.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::canonical_hash_hex;
use crate::error::{Classify, ErrorKind};
use crate::identity::{PremiumUserDirectory, RegistrationError};
use crate::store::ContentStore;
use crate::types::{
    AccessCode, Course, Department, DepartmentId, PremiumUser, PremiumUserId, RefinementRecord,
    Topic, TopicId,
};

/// Export format version.
pub const EXPORT_VERSION: u32 = 1;

/// Error type for bulk operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExportError {
    /// Import payload has no rows.
    #[error("No users to import")]
    EmptyImport,
    /// Fingerprint could not be computed.
    #[error("Fingerprint error: {0}")]
    Fingerprint(String),
    /// Store error.
    #[error("Store error: {0}")]
    StoreError(String),
}

impl ExportError {
    /// Create a store error from any error type.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::StoreError(e.to_string())
    }
}

impl Classify for ExportError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyImport => ErrorKind::BadRequest,
            Self::Fingerprint(_) | Self::StoreError(_) => ErrorKind::Internal,
        }
    }
}

/// Everything the export contains apart from its own metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSections {
    /// Departments by name.
    pub departments: Vec<Department>,
    /// Courses by name, deleted ones included.
    pub courses: Vec<Course>,
    /// Topics by id, deleted ones included.
    pub topics: Vec<Topic>,
    /// Premium users by id.
    pub premium_users: Vec<PremiumUser>,
    /// Assignment sets of premium topics.
    pub assignments: BTreeMap<TopicId, Vec<PremiumUserId>>,
    /// Refinement records by id.
    pub refinements: Vec<RefinementRecord>,
}

/// A full data export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataExport {
    /// Format version.
    pub version: u32,
    /// Export time.
    pub exported_at: DateTime<Utc>,
    /// xxh64 over the canonical form of `sections`.
    pub fingerprint: String,
    /// Exported data.
    #[serde(flatten)]
    pub sections: ExportSections,
}

/// One row of a batch import.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImportRow {
    /// Name.
    pub name: String,
    /// Access code.
    pub code: String,
    /// Department id.
    #[serde(default)]
    pub department_id: Option<DepartmentId>,
}

/// A rejected import row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportFailure {
    /// Zero-based row index.
    pub row: usize,
    /// Name as submitted.
    pub name: String,
    /// Reason.
    pub error: String,
}

/// Outcome of a batch import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Users created.
    pub created: Vec<PremiumUser>,
    /// Names of rows that already existed with the same code.
    pub skipped: Vec<String>,
    /// Rejected rows.
    pub errors: Vec<ImportFailure>,
}

/// Admin bulk export and import.
pub struct BulkOperations<S: ContentStore> {
    store: Arc<S>,
    directory: PremiumUserDirectory<S>,
}

impl<S: ContentStore> BulkOperations<S> {
    /// Create bulk operations over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            directory: PremiumUserDirectory::new(store.clone()),
            store,
        }
    }

    /// Export every entity.
    pub async fn export(&self, now: DateTime<Utc>) -> Result<DataExport, ExportError> {
        let departments = self.store.list_departments().await.map_err(ExportError::from_store)?;
        let courses = self.store.list_courses().await.map_err(ExportError::from_store)?;
        let topics = self.store.list_topics().await.map_err(ExportError::from_store)?;
        let mut premium_users = self
            .store
            .list_premium_users()
            .await
            .map_err(ExportError::from_store)?;
        premium_users.sort_by_key(|u| u.id);
        let refinements = self.store.list_refinements().await.map_err(ExportError::from_store)?;

        let assignments = topics
            .iter()
            .filter(|t| t.is_premium && !t.assigned_users.is_empty())
            .map(|t| (t.id, t.assigned_users.iter().copied().collect()))
            .collect();

        let sections = ExportSections {
            departments,
            courses,
            topics,
            premium_users,
            assignments,
            refinements,
        };
        let fingerprint =
            canonical_hash_hex(&sections).map_err(|e| ExportError::Fingerprint(e.to_string()))?;

        tracing::info!(
            courses = sections.courses.len(),
            topics = sections.topics.len(),
            users = sections.premium_users.len(),
            fingerprint = %fingerprint,
            "Data export built"
        );
        Ok(DataExport {
            version: EXPORT_VERSION,
            exported_at: now,
            fingerprint,
            sections,
        })
    }

    async fn already_present(&self, row: &ImportRow) -> Result<bool, ExportError> {
        let Ok(code) = AccessCode::parse(&row.code) else {
            return Ok(false);
        };
        let holder = self
            .store
            .find_premium_user_by_code(&code)
            .await
            .map_err(ExportError::from_store)?;
        Ok(holder.is_some_and(|u| u.name_matches(&row.name)))
    }

    /// Create premium users row by row.
    ///
    /// A row whose name and code already belong to one user is skipped.
    /// Any other failing row is reported and does not stop the import.
    pub async fn import_users(&self, rows: &[ImportRow]) -> Result<ImportReport, ExportError> {
        if rows.is_empty() {
            return Err(ExportError::EmptyImport);
        }

        let mut report = ImportReport::default();
        for (row_idx, row) in rows.iter().enumerate() {
            if self.already_present(row).await? {
                report.skipped.push(row.name.trim().to_string());
                continue;
            }
            match self.directory.create(&row.name, &row.code, row.department_id).await {
                Ok(user) => report.created.push(user),
                Err(RegistrationError::StoreError(e)) => return Err(ExportError::StoreError(e)),
                Err(e) => report.errors.push(ImportFailure {
                    row: row_idx,
                    name: row.name.clone(),
                    error: e.to_string(),
                }),
            }
        }

        tracing::info!(
            created = report.created.len(),
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            "Batch user import finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::AssignmentManager;
    use crate::store::InMemoryContentStore;
    use crate::types::{NewCourse, NewTopic};
    use std::collections::BTreeSet;

    fn row(name: &str, code: &str) -> ImportRow {
        ImportRow {
            name: name.to_string(),
            code: code.to_string(),
            department_id: None,
        }
    }

    #[tokio::test]
    async fn test_import_report() {
        let store = Arc::new(InMemoryContentStore::new());
        let bulk = BulkOperations::new(store.clone());

        let report = bulk
            .import_users(&[
                row("Amina", "aa11"),
                row("amina", "AA11"),
                row("Bola", "AA11"),
                row("Chidi", "toolong"),
                row(" ", "CC33"),
                ImportRow {
                    department_id: Some(DepartmentId::new(99)),
                    ..row("Dayo", "DD44")
                },
            ])
            .await
            .unwrap();

        assert_eq!(report.created.len(), 1);
        assert_eq!(report.created[0].code.as_str(), "AA11");
        assert_eq!(report.skipped, vec!["amina".to_string()]);
        let failed_rows: Vec<usize> = report.errors.iter().map(|e| e.row).collect();
        assert_eq!(failed_rows, vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_import_rejects_empty_payload() {
        let bulk = BulkOperations::new(Arc::new(InMemoryContentStore::new()));
        let err = bulk.import_users(&[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_export_contents_and_fingerprint() {
        let store = Arc::new(InMemoryContentStore::new());
        let bulk = BulkOperations::new(store.clone());
        let course = store.create_course(NewCourse::named("BIO")).await.unwrap();
        store.create_topic(NewTopic::community(course.id, "Open")).await.unwrap();
        let premium = store.create_topic(NewTopic::premium(course.id, "Gated")).await.unwrap();
        let report = bulk.import_users(&[row("Amina", "AA11")]).await.unwrap();
        let user = report.created[0].id;
        AssignmentManager::new(store.clone())
            .assign(premium.id, &BTreeSet::from([user]))
            .await
            .unwrap();

        let first = bulk.export(Utc::now()).await.unwrap();
        assert_eq!(first.version, EXPORT_VERSION);
        assert_eq!(first.sections.topics.len(), 2);
        assert_eq!(first.sections.assignments.get(&premium.id), Some(&vec![user]));

        let second = bulk.export(Utc::now()).await.unwrap();
        assert_eq!(first.fingerprint, second.fingerprint);

        store.soft_delete_topic(premium.id).await.unwrap();
        let third = bulk.export(Utc::now()).await.unwrap();
        assert_ne!(first.fingerprint, third.fingerprint);
    }
}
