//! Admin-side content edits: course creation, refined summary edits and
//! deletion.
//!
//! Deletes are soft by default and keep rows for audit. Purges remove the
//! row and everything hanging off it, including rows already soft-deleted.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{Classify, ErrorKind};
use crate::store::ContentStore;
use crate::types::{Course, CourseId, Department, DepartmentId, NewCourse, Topic, TopicId};

/// Error type for content edits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentError {
    /// Course name is blank.
    #[error("Course name is required")]
    MissingName,
    /// Course absent or already deleted.
    #[error("Course not found: {0}")]
    CourseNotFound(CourseId),
    /// Topic absent or already deleted.
    #[error("Topic not found: {0}")]
    TopicNotFound(TopicId),
    /// Department absent.
    #[error("Department not found: {0}")]
    DepartmentNotFound(DepartmentId),
    /// Store error.
    #[error("Store error: {0}")]
    StoreError(String),
}

impl ContentError {
    /// Create a store error from any error type.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::StoreError(e.to_string())
    }
}

impl Classify for ContentError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingName => ErrorKind::BadRequest,
            Self::CourseNotFound(_) | Self::TopicNotFound(_) | Self::DepartmentNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::StoreError(_) => ErrorKind::Internal,
        }
    }
}

/// Course creation form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CourseForm {
    /// Name.
    pub name: String,
    /// Year label.
    #[serde(default)]
    pub year: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Department names, created when absent.
    #[serde(default)]
    pub departments: Vec<String>,
}

/// Applies admin edits to courses and topics.
pub struct ContentEditor<S: ContentStore> {
    store: Arc<S>,
}

impl<S: ContentStore> ContentEditor<S> {
    /// Create an editor over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn departments_named(&self, names: &[String]) -> Result<BTreeSet<DepartmentId>, ContentError> {
        let mut ids = BTreeSet::new();
        for name in names.iter().filter_map(|n| Department::normalize_name(n)) {
            let dept = self
                .store
                .get_or_create_department(&name)
                .await
                .map_err(ContentError::from_store)?;
            ids.insert(dept.id);
        }
        Ok(ids)
    }

    async fn live_course(&self, id: CourseId) -> Result<Course, ContentError> {
        self.store
            .get_course(id)
            .await
            .map_err(ContentError::from_store)?
            .filter(|c| !c.is_deleted)
            .ok_or(ContentError::CourseNotFound(id))
    }

    async fn live_topic(&self, id: TopicId) -> Result<Topic, ContentError> {
        self.store
            .get_topic(id)
            .await
            .map_err(ContentError::from_store)?
            .filter(|t| !t.is_deleted)
            .ok_or(ContentError::TopicNotFound(id))
    }

    /// Create a course linked to the named departments.
    pub async fn create_course(&self, form: &CourseForm) -> Result<Course, ContentError> {
        let name = form.name.trim();
        if name.is_empty() {
            return Err(ContentError::MissingName);
        }
        let course = NewCourse {
            name: name.to_string(),
            year: form.year.trim().to_string(),
            description: form.description.trim().to_string(),
            departments: self.departments_named(&form.departments).await?,
        };
        let course = self.store.create_course(course).await.map_err(ContentError::from_store)?;
        tracing::info!(course_id = %course.id, departments = course.departments.len(), "Course created");
        Ok(course)
    }

    /// Replace the departments a course is listed under.
    pub async fn set_departments(&self, id: CourseId, names: &[String]) -> Result<Course, ContentError> {
        self.live_course(id).await?;
        let ids = self.departments_named(names).await?;
        self.store
            .set_course_departments(id, &ids)
            .await
            .map_err(ContentError::from_store)?;
        self.live_course(id).await
    }

    /// Soft-delete a course together with its topics.
    pub async fn delete_course(&self, id: CourseId) -> Result<(), ContentError> {
        self.live_course(id).await?;
        self.store.soft_delete_course(id).await.map_err(ContentError::from_store)?;
        tracing::info!(course_id = %id, "Course soft-deleted");
        Ok(())
    }

    /// Soft-delete a topic.
    pub async fn delete_topic(&self, id: TopicId) -> Result<(), ContentError> {
        self.live_topic(id).await?;
        self.store.soft_delete_topic(id).await.map_err(ContentError::from_store)?;
        tracing::info!(topic_id = %id, "Topic soft-deleted");
        Ok(())
    }

    /// Permanently remove a course with its topics and refinement history.
    pub async fn purge_course(&self, id: CourseId) -> Result<(), ContentError> {
        if !self.store.delete_course(id).await.map_err(ContentError::from_store)? {
            return Err(ContentError::CourseNotFound(id));
        }
        tracing::info!(course_id = %id, "Course purged");
        Ok(())
    }

    /// Permanently remove a topic with its assignments and refinement history.
    pub async fn purge_topic(&self, id: TopicId) -> Result<(), ContentError> {
        if !self.store.delete_topic(id).await.map_err(ContentError::from_store)? {
            return Err(ContentError::TopicNotFound(id));
        }
        tracing::info!(topic_id = %id, "Topic purged");
        Ok(())
    }

    /// Remove a department. Courses stay, unlinked; members lose their
    /// department.
    pub async fn delete_department(&self, id: DepartmentId) -> Result<(), ContentError> {
        if !self.store.delete_department(id).await.map_err(ContentError::from_store)? {
            return Err(ContentError::DepartmentNotFound(id));
        }
        tracing::info!(department_id = %id, "Department deleted");
        Ok(())
    }

    /// Overwrite the refined summary by hand, keeping the difficulty.
    pub async fn edit_refined_summary(&self, id: TopicId, text: &str) -> Result<Topic, ContentError> {
        let topic = self.live_topic(id).await?;
        self.store
            .set_refined_summary(id, text.trim(), topic.difficulty_level)
            .await
            .map_err(ContentError::from_store)?;
        self.live_topic(id).await
    }
}
