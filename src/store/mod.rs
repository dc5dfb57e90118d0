//! Entity storage backends.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::types::{
    AccessCode, AdminId, AdminUser, Course, CourseId, Department, DepartmentId, DifficultyLevel,
    NewCourse, NewPremiumUser, NewTopic, PremiumUser, PremiumUserId, RefinementId,
    RefinementKey, RefinementRecord, RefinementUpdate, Topic, TopicId,
};

/// Trait for entity storage backends.
///
/// Getters return entities regardless of their soft-delete flag; filtering is
/// the caller's job so that admin paths can still see deleted content.
/// Every mutation is atomic on its own and visible to any read issued after
/// it returns. Collection results come back in a deterministic order.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync + 'static;

    // ── Departments ────────────────────────────────────────────────────────

    /// All departments ordered by name.
    async fn list_departments(&self) -> Result<Vec<Department>, Self::Error>;

    /// Fetch a department by ID.
    async fn get_department(&self, id: DepartmentId) -> Result<Option<Department>, Self::Error>;

    /// Find a department by case-insensitive name.
    async fn find_department_by_name(&self, name: &str) -> Result<Option<Department>, Self::Error>;

    /// Create a department. The name must already be normalized.
    async fn create_department(&self, name: &str) -> Result<Department, Self::Error>;

    /// Hard-delete a department, unlinking it from courses and users.
    async fn delete_department(&self, id: DepartmentId) -> Result<bool, Self::Error>;

    /// Find a department by case-insensitive name, creating it if absent.
    ///
    /// The name must already be normalized with [`Department::normalize_name`].
    async fn get_or_create_department(&self, name: &str) -> Result<Department, Self::Error> {
        if let Some(found) = self.find_department_by_name(name).await? {
            return Ok(found);
        }
        self.create_department(name).await
    }

    // ── Courses ────────────────────────────────────────────────────────────

    /// Create a course.
    async fn create_course(&self, course: NewCourse) -> Result<Course, Self::Error>;

    /// Fetch a course by ID.
    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, Self::Error>;

    /// All courses ordered by name then ID.
    async fn list_courses(&self) -> Result<Vec<Course>, Self::Error>;

    /// Courses linked to a department, ordered by name then ID.
    async fn courses_in_department(&self, id: DepartmentId) -> Result<Vec<Course>, Self::Error>;

    /// Replace the department links of a course.
    async fn set_course_departments(
        &self,
        id: CourseId,
        departments: &BTreeSet<DepartmentId>,
    ) -> Result<bool, Self::Error>;

    /// Soft-delete a course and all of its topics in one step.
    async fn soft_delete_course(&self, id: CourseId) -> Result<bool, Self::Error>;

    /// Hard-delete a course with its topics, assignments and refinements.
    async fn delete_course(&self, id: CourseId) -> Result<bool, Self::Error>;

    // ── Topics ─────────────────────────────────────────────────────────────

    /// Create a topic at the end of its course (order = live topic count).
    async fn create_topic(&self, topic: NewTopic) -> Result<Topic, Self::Error>;

    /// Fetch a topic by ID, including its assignment set.
    async fn get_topic(&self, id: TopicId) -> Result<Option<Topic>, Self::Error>;

    /// All topics of a course ordered by ID.
    async fn topics_for_course(&self, id: CourseId) -> Result<Vec<Topic>, Self::Error>;

    /// All topics of several courses ordered by ID.
    async fn topics_for_courses(&self, ids: &[CourseId]) -> Result<Vec<Topic>, Self::Error>;

    /// Every topic ordered by ID.
    async fn list_topics(&self) -> Result<Vec<Topic>, Self::Error>;

    /// Overwrite the refined summary and difficulty of a topic.
    async fn set_refined_summary(
        &self,
        id: TopicId,
        refined_summary: &str,
        difficulty: DifficultyLevel,
    ) -> Result<bool, Self::Error>;

    /// Soft-delete a topic.
    async fn soft_delete_topic(&self, id: TopicId) -> Result<bool, Self::Error>;

    /// Hard-delete a topic with its assignments and refinements.
    async fn delete_topic(&self, id: TopicId) -> Result<bool, Self::Error>;

    /// Atomically replace the assignment set (clear, then set).
    async fn replace_assignments(
        &self,
        id: TopicId,
        users: &BTreeSet<PremiumUserId>,
    ) -> Result<bool, Self::Error>;

    /// Add one user to the assignment set.
    async fn add_assignment(&self, id: TopicId, user: PremiumUserId) -> Result<bool, Self::Error>;

    /// Remove one user from the assignment set.
    async fn remove_assignment(&self, id: TopicId, user: PremiumUserId) -> Result<bool, Self::Error>;

    // ── Premium users ──────────────────────────────────────────────────────

    /// Create an active premium user.
    async fn create_premium_user(&self, user: NewPremiumUser) -> Result<PremiumUser, Self::Error>;

    /// Fetch a premium user by ID.
    async fn get_premium_user(&self, id: PremiumUserId) -> Result<Option<PremiumUser>, Self::Error>;

    /// All premium users, newest first.
    async fn list_premium_users(&self) -> Result<Vec<PremiumUser>, Self::Error>;

    /// Find the user holding an access code.
    async fn find_premium_user_by_code(
        &self,
        code: &AccessCode,
    ) -> Result<Option<PremiumUser>, Self::Error>;

    /// Find a user by case-insensitive name.
    async fn find_premium_user_by_name(&self, name: &str) -> Result<Option<PremiumUser>, Self::Error>;

    /// Replace name, code and department of a user.
    async fn update_premium_user(
        &self,
        id: PremiumUserId,
        user: NewPremiumUser,
    ) -> Result<Option<PremiumUser>, Self::Error>;

    /// Set the active flag of a user.
    async fn set_premium_user_active(
        &self,
        id: PremiumUserId,
        is_active: bool,
    ) -> Result<Option<PremiumUser>, Self::Error>;

    /// Hard-delete a user and drop it from every assignment set.
    async fn delete_premium_user(&self, id: PremiumUserId) -> Result<bool, Self::Error>;

    // ── Administrators ─────────────────────────────────────────────────────

    /// Create an administrator.
    async fn create_admin(
        &self,
        username: &str,
        full_name: &str,
        password_hash: &str,
        is_superuser: bool,
    ) -> Result<AdminUser, Self::Error>;

    /// Fetch an administrator by ID.
    async fn get_admin(&self, id: AdminId) -> Result<Option<AdminUser>, Self::Error>;

    /// Find an administrator by exact username.
    async fn find_admin_by_username(&self, username: &str) -> Result<Option<AdminUser>, Self::Error>;

    // ── Refinements ────────────────────────────────────────────────────────

    /// Fetch the record for a key.
    async fn get_refinement(&self, key: &RefinementKey) -> Result<Option<RefinementRecord>, Self::Error>;

    /// Fetch a record by ID.
    async fn get_refinement_by_id(&self, id: RefinementId) -> Result<Option<RefinementRecord>, Self::Error>;

    /// Records of a topic, newest first.
    async fn refinements_for_topic(&self, id: TopicId) -> Result<Vec<RefinementRecord>, Self::Error>;

    /// Every record ordered by ID.
    async fn list_refinements(&self) -> Result<Vec<RefinementRecord>, Self::Error>;

    /// Insert or overwrite the record for `update.key`.
    ///
    /// At most one record exists per key; an existing record keeps its ID.
    async fn upsert_refinement(&self, update: RefinementUpdate) -> Result<RefinementRecord, Self::Error>;

    // ── Health ─────────────────────────────────────────────────────────────

    /// Check if the backend is reachable.
    async fn is_healthy(&self) -> bool {
        true
    }
}

pub use memory::InMemoryContentStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresContentStore;
