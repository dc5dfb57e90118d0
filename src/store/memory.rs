//! In-memory entity store for testing and single-process deployments.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use super::ContentStore;
use crate::types::{
    AccessCode, AdminId, AdminUser, Course, CourseId, Department, DepartmentId, DifficultyLevel,
    NewCourse, NewPremiumUser, NewTopic, PremiumUser, PremiumUserId, RefinementId,
    RefinementKey, RefinementRecord, RefinementUpdate, Topic, TopicId,
};

/// Error type for in-memory store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InMemoryError {
    /// Unique constraint violated.
    #[error("Unique constraint violated: {0}")]
    Duplicate(String),
    /// Referenced entity does not exist.
    #[error("Missing reference: {0}")]
    MissingReference(String),
}

#[derive(Debug, Default)]
struct Tables {
    departments: BTreeMap<DepartmentId, Department>,
    courses: BTreeMap<CourseId, Course>,
    topics: BTreeMap<TopicId, Topic>,
    premium_users: BTreeMap<PremiumUserId, PremiumUser>,
    admins: BTreeMap<AdminId, AdminUser>,
    refinements: BTreeMap<RefinementId, RefinementRecord>,
    refinement_keys: BTreeMap<RefinementKey, RefinementId>,
    next_id: i64,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Wall-clock time, bumped so that it strictly increases per mutation.
    ///
    /// Keeps `created_at` ordering identical to insertion ordering even when
    /// several rows are written within the same clock tick.
    fn now(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        now
    }

    fn drop_refinements_for(&mut self, topic_ids: &BTreeSet<TopicId>) {
        self.refinements
            .retain(|_, record| !topic_ids.contains(&record.key.topic_id));
        self.refinement_keys
            .retain(|key, _| !topic_ids.contains(&key.topic_id));
    }
}

/// In-memory entity store.
///
/// Uses BTreeMaps for deterministic iteration order behind a single
/// `parking_lot::RwLock`, so each trait call is one critical section.
/// Identifiers come from one counter shared by all tables.
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    tables: RwLock<Tables>,
}

impl InMemoryContentStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of premium users.
    pub fn num_premium_users(&self) -> usize {
        self.tables.read().premium_users.len()
    }
}

fn sorted_courses<'a>(courses: impl Iterator<Item = &'a Course>) -> Vec<Course> {
    let mut result: Vec<Course> = courses.cloned().collect();
    result.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    result
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    type Error = InMemoryError;

    async fn list_departments(&self) -> Result<Vec<Department>, Self::Error> {
        let tables = self.tables.read();
        let mut result: Vec<Department> = tables.departments.values().cloned().collect();
        result.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(result)
    }

    async fn get_department(&self, id: DepartmentId) -> Result<Option<Department>, Self::Error> {
        Ok(self.tables.read().departments.get(&id).cloned())
    }

    async fn find_department_by_name(&self, name: &str) -> Result<Option<Department>, Self::Error> {
        Ok(self
            .tables
            .read()
            .departments
            .values()
            .find(|d| d.name_matches(name))
            .cloned())
    }

    async fn create_department(&self, name: &str) -> Result<Department, Self::Error> {
        let mut tables = self.tables.write();
        if tables.departments.values().any(|d| d.name_matches(name)) {
            return Err(InMemoryError::Duplicate(format!("department {}", name)));
        }
        let department = Department {
            id: DepartmentId::new(tables.next_id()),
            name: name.to_string(),
            created_at: tables.now(),
        };
        tables.departments.insert(department.id, department.clone());
        Ok(department)
    }

    async fn delete_department(&self, id: DepartmentId) -> Result<bool, Self::Error> {
        let mut tables = self.tables.write();
        if tables.departments.remove(&id).is_none() {
            return Ok(false);
        }
        for course in tables.courses.values_mut() {
            course.departments.remove(&id);
        }
        for user in tables.premium_users.values_mut() {
            if user.department_id == Some(id) {
                user.department_id = None;
            }
        }
        Ok(true)
    }

    async fn create_course(&self, course: NewCourse) -> Result<Course, Self::Error> {
        let mut tables = self.tables.write();
        if let Some(missing) = course
            .departments
            .iter()
            .find(|d| !tables.departments.contains_key(d))
        {
            return Err(InMemoryError::MissingReference(format!("department {}", missing)));
        }
        let now = tables.now();
        let course = Course {
            id: CourseId::new(tables.next_id()),
            name: course.name,
            year: course.year,
            description: course.description,
            departments: course.departments,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        tables.courses.insert(course.id, course.clone());
        Ok(course)
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, Self::Error> {
        Ok(self.tables.read().courses.get(&id).cloned())
    }

    async fn list_courses(&self) -> Result<Vec<Course>, Self::Error> {
        Ok(sorted_courses(self.tables.read().courses.values()))
    }

    async fn courses_in_department(&self, id: DepartmentId) -> Result<Vec<Course>, Self::Error> {
        let tables = self.tables.read();
        Ok(sorted_courses(
            tables.courses.values().filter(|c| c.in_department(id)),
        ))
    }

    async fn set_course_departments(
        &self,
        id: CourseId,
        departments: &BTreeSet<DepartmentId>,
    ) -> Result<bool, Self::Error> {
        let mut tables = self.tables.write();
        if let Some(missing) = departments
            .iter()
            .find(|d| !tables.departments.contains_key(d))
        {
            return Err(InMemoryError::MissingReference(format!("department {}", missing)));
        }
        let now = tables.now();
        match tables.courses.get_mut(&id) {
            Some(course) => {
                course.departments = departments.clone();
                course.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn soft_delete_course(&self, id: CourseId) -> Result<bool, Self::Error> {
        let mut tables = self.tables.write();
        let now = tables.now();
        match tables.courses.get_mut(&id) {
            Some(course) => {
                course.is_deleted = true;
                course.updated_at = now;
            }
            None => return Ok(false),
        }
        for topic in tables.topics.values_mut().filter(|t| t.course_id == id) {
            topic.is_deleted = true;
            topic.updated_at = now;
        }
        Ok(true)
    }

    async fn delete_course(&self, id: CourseId) -> Result<bool, Self::Error> {
        let mut tables = self.tables.write();
        if tables.courses.remove(&id).is_none() {
            return Ok(false);
        }
        let topic_ids: BTreeSet<TopicId> = tables
            .topics
            .values()
            .filter(|t| t.course_id == id)
            .map(|t| t.id)
            .collect();
        tables.topics.retain(|tid, _| !topic_ids.contains(tid));
        tables.drop_refinements_for(&topic_ids);
        Ok(true)
    }

    async fn create_topic(&self, topic: NewTopic) -> Result<Topic, Self::Error> {
        let mut tables = self.tables.write();
        if !tables.courses.contains_key(&topic.course_id) {
            return Err(InMemoryError::MissingReference(format!("course {}", topic.course_id)));
        }
        let order = tables
            .topics
            .values()
            .filter(|t| t.course_id == topic.course_id && !t.is_deleted)
            .count() as i32;
        let now = tables.now();
        let topic = Topic {
            id: TopicId::new(tables.next_id()),
            course_id: topic.course_id,
            title: topic.title,
            raw_text: topic.raw_text,
            refined_summary: String::new(),
            page_range: topic.page_range,
            order,
            is_premium: topic.is_premium,
            is_deleted: false,
            difficulty_level: topic.difficulty_level,
            assigned_users: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        };
        tables.topics.insert(topic.id, topic.clone());
        Ok(topic)
    }

    async fn get_topic(&self, id: TopicId) -> Result<Option<Topic>, Self::Error> {
        Ok(self.tables.read().topics.get(&id).cloned())
    }

    async fn topics_for_course(&self, id: CourseId) -> Result<Vec<Topic>, Self::Error> {
        Ok(self
            .tables
            .read()
            .topics
            .values()
            .filter(|t| t.course_id == id)
            .cloned()
            .collect())
    }

    async fn topics_for_courses(&self, ids: &[CourseId]) -> Result<Vec<Topic>, Self::Error> {
        let wanted: BTreeSet<CourseId> = ids.iter().copied().collect();
        Ok(self
            .tables
            .read()
            .topics
            .values()
            .filter(|t| wanted.contains(&t.course_id))
            .cloned()
            .collect())
    }

    async fn list_topics(&self) -> Result<Vec<Topic>, Self::Error> {
        Ok(self.tables.read().topics.values().cloned().collect())
    }

    async fn set_refined_summary(
        &self,
        id: TopicId,
        refined_summary: &str,
        difficulty: DifficultyLevel,
    ) -> Result<bool, Self::Error> {
        let mut tables = self.tables.write();
        let now = tables.now();
        match tables.topics.get_mut(&id) {
            Some(topic) => {
                topic.refined_summary = refined_summary.to_string();
                topic.difficulty_level = difficulty;
                topic.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn soft_delete_topic(&self, id: TopicId) -> Result<bool, Self::Error> {
        let mut tables = self.tables.write();
        let now = tables.now();
        match tables.topics.get_mut(&id) {
            Some(topic) => {
                topic.is_deleted = true;
                topic.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_topic(&self, id: TopicId) -> Result<bool, Self::Error> {
        let mut tables = self.tables.write();
        if tables.topics.remove(&id).is_none() {
            return Ok(false);
        }
        tables.drop_refinements_for(&BTreeSet::from([id]));
        Ok(true)
    }

    async fn replace_assignments(
        &self,
        id: TopicId,
        users: &BTreeSet<PremiumUserId>,
    ) -> Result<bool, Self::Error> {
        let mut tables = self.tables.write();
        if let Some(missing) = users.iter().find(|u| !tables.premium_users.contains_key(u)) {
            return Err(InMemoryError::MissingReference(format!("premium user {}", missing)));
        }
        let now = tables.now();
        match tables.topics.get_mut(&id) {
            Some(topic) => {
                topic.assigned_users = users.clone();
                topic.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn add_assignment(&self, id: TopicId, user: PremiumUserId) -> Result<bool, Self::Error> {
        let mut tables = self.tables.write();
        if !tables.premium_users.contains_key(&user) {
            return Err(InMemoryError::MissingReference(format!("premium user {}", user)));
        }
        match tables.topics.get_mut(&id) {
            Some(topic) => {
                topic.assigned_users.insert(user);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_assignment(&self, id: TopicId, user: PremiumUserId) -> Result<bool, Self::Error> {
        let mut tables = self.tables.write();
        match tables.topics.get_mut(&id) {
            Some(topic) => {
                topic.assigned_users.remove(&user);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_premium_user(&self, user: NewPremiumUser) -> Result<PremiumUser, Self::Error> {
        let mut tables = self.tables.write();
        if tables
            .premium_users
            .values()
            .any(|u| u.code == user.code && u.name_matches(&user.name))
        {
            return Err(InMemoryError::Duplicate(format!("premium user {} ({})", user.name, user.code)));
        }
        if let Some(department) = user.department_id {
            if !tables.departments.contains_key(&department) {
                return Err(InMemoryError::MissingReference(format!("department {}", department)));
            }
        }
        let now = tables.now();
        let user = PremiumUser {
            id: PremiumUserId::new(tables.next_id()),
            name: user.name,
            code: user.code,
            department_id: user.department_id,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        tables.premium_users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_premium_user(&self, id: PremiumUserId) -> Result<Option<PremiumUser>, Self::Error> {
        Ok(self.tables.read().premium_users.get(&id).cloned())
    }

    async fn list_premium_users(&self) -> Result<Vec<PremiumUser>, Self::Error> {
        let tables = self.tables.read();
        let mut result: Vec<PremiumUser> = tables.premium_users.values().cloned().collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(result)
    }

    async fn find_premium_user_by_code(
        &self,
        code: &AccessCode,
    ) -> Result<Option<PremiumUser>, Self::Error> {
        Ok(self
            .tables
            .read()
            .premium_users
            .values()
            .find(|u| &u.code == code)
            .cloned())
    }

    async fn find_premium_user_by_name(&self, name: &str) -> Result<Option<PremiumUser>, Self::Error> {
        Ok(self
            .tables
            .read()
            .premium_users
            .values()
            .find(|u| u.name_matches(name))
            .cloned())
    }

    async fn update_premium_user(
        &self,
        id: PremiumUserId,
        user: NewPremiumUser,
    ) -> Result<Option<PremiumUser>, Self::Error> {
        let mut tables = self.tables.write();
        if tables
            .premium_users
            .values()
            .any(|u| u.id != id && u.code == user.code && u.name_matches(&user.name))
        {
            return Err(InMemoryError::Duplicate(format!("premium user {} ({})", user.name, user.code)));
        }
        let now = tables.now();
        Ok(tables.premium_users.get_mut(&id).map(|existing| {
            existing.name = user.name;
            existing.code = user.code;
            existing.department_id = user.department_id;
            existing.updated_at = now;
            existing.clone()
        }))
    }

    async fn set_premium_user_active(
        &self,
        id: PremiumUserId,
        is_active: bool,
    ) -> Result<Option<PremiumUser>, Self::Error> {
        let mut tables = self.tables.write();
        let now = tables.now();
        Ok(tables.premium_users.get_mut(&id).map(|existing| {
            existing.is_active = is_active;
            existing.updated_at = now;
            existing.clone()
        }))
    }

    async fn delete_premium_user(&self, id: PremiumUserId) -> Result<bool, Self::Error> {
        let mut tables = self.tables.write();
        if tables.premium_users.remove(&id).is_none() {
            return Ok(false);
        }
        for topic in tables.topics.values_mut() {
            topic.assigned_users.remove(&id);
        }
        Ok(true)
    }

    async fn create_admin(
        &self,
        username: &str,
        full_name: &str,
        password_hash: &str,
        is_superuser: bool,
    ) -> Result<AdminUser, Self::Error> {
        let mut tables = self.tables.write();
        if tables.admins.values().any(|a| a.username == username) {
            return Err(InMemoryError::Duplicate(format!("admin {}", username)));
        }
        let admin = AdminUser {
            id: AdminId::new(tables.next_id()),
            username: username.to_string(),
            full_name: full_name.to_string(),
            password_hash: password_hash.to_string(),
            is_active: true,
            is_staff: true,
            is_superuser,
            date_joined: tables.now(),
        };
        tables.admins.insert(admin.id, admin.clone());
        Ok(admin)
    }

    async fn get_admin(&self, id: AdminId) -> Result<Option<AdminUser>, Self::Error> {
        Ok(self.tables.read().admins.get(&id).cloned())
    }

    async fn find_admin_by_username(&self, username: &str) -> Result<Option<AdminUser>, Self::Error> {
        Ok(self
            .tables
            .read()
            .admins
            .values()
            .find(|a| a.username == username)
            .cloned())
    }

    async fn get_refinement(&self, key: &RefinementKey) -> Result<Option<RefinementRecord>, Self::Error> {
        let tables = self.tables.read();
        Ok(tables
            .refinement_keys
            .get(key)
            .and_then(|id| tables.refinements.get(id))
            .cloned())
    }

    async fn get_refinement_by_id(&self, id: RefinementId) -> Result<Option<RefinementRecord>, Self::Error> {
        Ok(self.tables.read().refinements.get(&id).cloned())
    }

    async fn refinements_for_topic(&self, id: TopicId) -> Result<Vec<RefinementRecord>, Self::Error> {
        let tables = self.tables.read();
        let mut result: Vec<RefinementRecord> = tables
            .refinements
            .values()
            .filter(|r| r.key.topic_id == id)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(result)
    }

    async fn list_refinements(&self) -> Result<Vec<RefinementRecord>, Self::Error> {
        Ok(self.tables.read().refinements.values().cloned().collect())
    }

    async fn upsert_refinement(&self, update: RefinementUpdate) -> Result<RefinementRecord, Self::Error> {
        let mut tables = self.tables.write();
        if !tables.topics.contains_key(&update.key.topic_id) {
            return Err(InMemoryError::MissingReference(format!("topic {}", update.key.topic_id)));
        }
        let now = tables.now();
        let existing = tables
            .refinement_keys
            .get(&update.key)
            .and_then(|id| tables.refinements.get(id))
            .map(|r| (r.id, r.created_at));
        let (id, created_at) = match existing {
            Some(found) => found,
            None => (RefinementId::new(tables.next_id()), now),
        };
        let record = RefinementRecord {
            id,
            key: update.key,
            refined_text: update.refined_text,
            status: update.status,
            error_message: update.error_message,
            processing_time_secs: update.processing_time_secs,
            item_count: update.item_count,
            prompt_fingerprint: update.prompt_fingerprint,
            created_at,
            updated_at: now,
        };
        tables.refinement_keys.insert(record.key, id);
        tables.refinements.insert(id, record.clone());
        Ok(record)
    }
}
