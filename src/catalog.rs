//! Read-side views over departments, courses and topics.
//!
//! Listing views only serialize [`TopicSummary`] (title, page range, premium
//! flag, refinement status). Raw and refined text only leave through
//! [`Catalog::topic_detail`] and [`Catalog::course_full_text`], both of which
//! apply the detail predicate.
//!
//! A soft-deleted course or department lookup is `NotFound` for every
//! caller, administrators included.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Classify, ErrorKind};
use crate::filter::{browse_listing, filter_accessible, sort_course_order};
use crate::policy::{check_detail_access, DetailDecision};
use crate::store::ContentStore;
use crate::types::{Course, CourseId, Department, DepartmentId, PremiumUserId, Topic, TopicId, Viewer};

const RULE: &str = "==================================================";

/// Error type for catalog views.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    /// Department does not exist.
    #[error("Department not found: {0}")]
    DepartmentNotFound(DepartmentId),
    /// Course does not exist or is soft-deleted.
    #[error("Course not found: {0}")]
    CourseNotFound(CourseId),
    /// Topic does not exist or is soft-deleted.
    #[error("Topic not found: {0}")]
    TopicNotFound(TopicId),
    /// Topic is premium and the viewer is not assigned to it.
    #[error("Access denied. This is a premium topic.")]
    PremiumRequired {
        /// Denied topic.
        topic_id: TopicId,
        /// Number of users assigned to it.
        assigned_count: usize,
    },
    /// Store error.
    #[error("Store error: {0}")]
    StoreError(String),
}

impl CatalogError {
    /// Create a store error from any error type.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::StoreError(e.to_string())
    }
}

impl Classify for CatalogError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::DepartmentNotFound(_) | Self::CourseNotFound(_) | Self::TopicNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::PremiumRequired { .. } => ErrorKind::Forbidden,
            Self::StoreError(_) => ErrorKind::Internal,
        }
    }
}

/// Department id and name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepartmentRef {
    /// Department id.
    pub id: DepartmentId,
    /// Department name.
    pub name: String,
}

impl From<&Department> for DepartmentRef {
    fn from(d: &Department) -> Self {
        Self {
            id: d.id,
            name: d.name.clone(),
        }
    }
}

/// Department with the number of live courses listed under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepartmentSummary {
    /// Department id.
    pub id: DepartmentId,
    /// Department name.
    pub name: String,
    /// Live courses in the department.
    pub course_count: usize,
}

/// Course header without topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseRef {
    /// Course id.
    pub id: CourseId,
    /// Course name.
    pub name: String,
    /// Year label.
    pub year: String,
}

impl From<&Course> for CourseRef {
    fn from(c: &Course) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            year: c.year.clone(),
        }
    }
}

/// Course with topic counts for a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseSummary {
    /// Course id.
    pub id: CourseId,
    /// Course name.
    pub name: String,
    /// Year label.
    pub year: String,
    /// Linked departments.
    pub departments: Vec<DepartmentRef>,
    /// Topics the viewer may see.
    pub topic_count: usize,
    /// Of those, topics with a refined summary.
    pub refined_count: usize,
}

/// Listing-safe view of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicSummary {
    /// Topic id.
    pub id: TopicId,
    /// Title.
    pub title: String,
    /// Page range label.
    pub page_range: String,
    /// Last update, unix seconds.
    pub updated_at: i64,
    /// Whether a refined summary exists.
    pub is_refined: bool,
    /// Premium flag.
    pub is_premium: bool,
}

impl From<&Topic> for TopicSummary {
    fn from(t: &Topic) -> Self {
        Self {
            id: t.id,
            title: t.title.clone(),
            page_range: t.page_range.clone(),
            updated_at: t.updated_at.timestamp(),
            is_refined: t.is_refined(),
            is_premium: t.is_premium,
        }
    }
}

/// A course with the topics visible to a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseTopics {
    /// Course header.
    pub course: CourseRef,
    /// Visible topics.
    pub topics: Vec<TopicSummary>,
}

/// Full content of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicDetail {
    /// Topic id.
    pub id: TopicId,
    /// Title.
    pub title: String,
    /// Page range label.
    pub page_range: String,
    /// Refined study material.
    pub refined_summary: String,
    /// Extracted text.
    pub raw_text: String,
    /// Owning course name.
    pub course_name: String,
    /// Owning course year.
    pub course_year: String,
    /// Names of the course's departments.
    pub departments: Vec<String>,
    /// Last update, unix seconds.
    pub updated_at: i64,
    /// Creation, unix seconds.
    pub created_at: i64,
    /// Premium flag.
    pub is_premium: bool,
}

/// Library entry: a course with its browse-visible topic count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryCourse {
    /// Course header.
    #[serde(flatten)]
    pub course: CourseRef,
    /// Linked departments.
    pub departments: Vec<DepartmentRef>,
    /// Topics shown when browsing the course.
    pub visible_topic_count: usize,
}

/// Concatenated refined text of a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseFullText {
    /// Course header.
    pub course: CourseRef,
    /// Number of topics included.
    pub topic_count: usize,
    /// Rendered text.
    pub text: String,
}

/// Assigned user in the premium overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignedUser {
    /// User id.
    pub id: PremiumUserId,
    /// Display name with code.
    pub display_name: String,
}

/// One premium topic in the management overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PremiumTopicEntry {
    /// Topic id.
    pub id: TopicId,
    /// Title.
    pub title: String,
    /// Owning course name.
    pub course_name: String,
    /// Active assigned users.
    pub assigned_users: Vec<AssignedUser>,
}

/// Premium topic management overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PremiumOverview {
    /// Live premium topics, newest first.
    pub topics: Vec<PremiumTopicEntry>,
    /// Total live premium topics.
    pub total: usize,
    /// Topics with at least one active assigned user.
    pub assigned: usize,
    /// Topics with no active assigned user.
    pub unassigned: usize,
}

/// Academic years offered by a department.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableYears {
    /// Department id.
    pub department_id: DepartmentId,
    /// Department name.
    pub department_name: String,
    /// Distinct non-empty year labels, descending.
    pub years: Vec<String>,
}

/// Distinct non-empty year labels of live courses, descending.
pub fn distinct_years<'a>(courses: impl IntoIterator<Item = &'a Course>) -> Vec<String> {
    let years: BTreeSet<&str> = courses
        .into_iter()
        .filter(|c| !c.is_deleted)
        .map(|c| c.year.trim())
        .filter(|y| !y.is_empty())
        .collect();
    years.into_iter().rev().map(str::to_string).collect()
}

/// Read-side views over a store.
pub struct Catalog<S: ContentStore> {
    store: Arc<S>,
}

impl<S: ContentStore> Catalog<S> {
    /// Create a catalog over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &S {
        &self.store
    }

    async fn department_index(&self) -> Result<BTreeMap<DepartmentId, Department>, CatalogError> {
        Ok(self
            .store
            .list_departments()
            .await
            .map_err(CatalogError::from_store)?
            .into_iter()
            .map(|d| (d.id, d))
            .collect())
    }

    pub(crate) async fn live_course(&self, id: CourseId) -> Result<Course, CatalogError> {
        self.store
            .get_course(id)
            .await
            .map_err(CatalogError::from_store)?
            .filter(|c| !c.is_deleted)
            .ok_or(CatalogError::CourseNotFound(id))
    }

    pub(crate) async fn department(&self, id: DepartmentId) -> Result<Department, CatalogError> {
        self.store
            .get_department(id)
            .await
            .map_err(CatalogError::from_store)?
            .ok_or(CatalogError::DepartmentNotFound(id))
    }

    pub(crate) async fn course_topics_raw(&self, id: CourseId) -> Result<Vec<Topic>, CatalogError> {
        self.store
            .topics_for_course(id)
            .await
            .map_err(CatalogError::from_store)
    }

    pub(crate) async fn summarize_courses(
        &self,
        courses: &[Course],
        viewer: &Viewer,
    ) -> Result<Vec<CourseSummary>, CatalogError> {
        let index = self.department_index().await?;
        let ids: Vec<CourseId> = courses.iter().map(|c| c.id).collect();
        let mut by_course: BTreeMap<CourseId, Vec<Topic>> = BTreeMap::new();
        for topic in self
            .store
            .topics_for_courses(&ids)
            .await
            .map_err(CatalogError::from_store)?
        {
            by_course.entry(topic.course_id).or_default().push(topic);
        }

        Ok(courses
            .iter()
            .map(|course| {
                let visible = filter_accessible(by_course.remove(&course.id).unwrap_or_default(), viewer);
                CourseSummary {
                    id: course.id,
                    name: course.name.clone(),
                    year: course.year.clone(),
                    departments: department_refs(&index, course),
                    topic_count: visible.len(),
                    refined_count: visible.iter().filter(|t| t.is_refined()).count(),
                }
            })
            .collect())
    }

    /// All departments with their live course counts, ordered by name.
    pub async fn departments(&self) -> Result<Vec<DepartmentSummary>, CatalogError> {
        let departments = self.store.list_departments().await.map_err(CatalogError::from_store)?;
        let courses = self.store.list_courses().await.map_err(CatalogError::from_store)?;
        Ok(departments
            .into_iter()
            .map(|d| DepartmentSummary {
                course_count: courses
                    .iter()
                    .filter(|c| !c.is_deleted && c.in_department(d.id))
                    .count(),
                id: d.id,
                name: d.name,
            })
            .collect())
    }

    /// Live courses of a department with topic counts for the viewer.
    ///
    /// Courses are listed whether or not the viewer can see any of their topics.
    pub async fn department_courses(
        &self,
        id: DepartmentId,
        viewer: &Viewer,
    ) -> Result<Vec<CourseSummary>, CatalogError> {
        self.department(id).await?;
        let courses: Vec<Course> = self
            .store
            .courses_in_department(id)
            .await
            .map_err(CatalogError::from_store)?
            .into_iter()
            .filter(|c| !c.is_deleted)
            .collect();
        self.summarize_courses(&courses, viewer).await
    }

    /// Topics of a course filtered for the viewer, newest first.
    ///
    /// Uses [`filter_accessible`], the same filter behind the
    /// [`Catalog::department_courses`] counts.
    pub async fn course_topics(&self, id: CourseId, viewer: &Viewer) -> Result<CourseTopics, CatalogError> {
        let course = self.live_course(id).await?;
        let topics = filter_accessible(self.course_topics_raw(id).await?, viewer);
        Ok(CourseTopics {
            course: CourseRef::from(&course),
            topics: topics.iter().map(TopicSummary::from).collect(),
        })
    }

    /// Every live course with the number of topics shown when browsing it.
    ///
    /// Counts come from [`browse_listing`] and always equal the length of
    /// [`Catalog::browse_course`] for the same viewer. They may exceed the
    /// [`Catalog::course_topics`] count for anonymous viewers.
    pub async fn library(&self, viewer: &Viewer) -> Result<Vec<LibraryCourse>, CatalogError> {
        let index = self.department_index().await?;
        let courses: Vec<Course> = self
            .store
            .list_courses()
            .await
            .map_err(CatalogError::from_store)?
            .into_iter()
            .filter(|c| !c.is_deleted)
            .collect();
        let ids: Vec<CourseId> = courses.iter().map(|c| c.id).collect();
        let topics = self
            .store
            .topics_for_courses(&ids)
            .await
            .map_err(CatalogError::from_store)?;

        Ok(courses
            .iter()
            .map(|course| LibraryCourse {
                course: CourseRef::from(course),
                departments: department_refs(&index, course),
                visible_topic_count: browse_listing(
                    topics.iter().filter(|t| t.course_id == course.id).cloned(),
                    viewer,
                )
                .len(),
            })
            .collect())
    }

    /// Topics shown when browsing a course, in reading order.
    pub async fn browse_course(&self, id: CourseId, viewer: &Viewer) -> Result<CourseTopics, CatalogError> {
        let course = self.live_course(id).await?;
        let topics = browse_listing(self.course_topics_raw(id).await?, viewer);
        Ok(CourseTopics {
            course: CourseRef::from(&course),
            topics: topics.iter().map(TopicSummary::from).collect(),
        })
    }

    /// Full content of a topic, subject to the detail predicate.
    ///
    /// Administrators also see soft-deleted topics.
    pub async fn topic_detail(&self, id: TopicId, viewer: &Viewer) -> Result<TopicDetail, CatalogError> {
        let topic = self
            .store
            .get_topic(id)
            .await
            .map_err(CatalogError::from_store)?
            .ok_or(CatalogError::TopicNotFound(id))?;

        match check_detail_access(&topic, viewer) {
            DetailDecision::Allowed => {}
            DetailDecision::Deleted => return Err(CatalogError::TopicNotFound(id)),
            DetailDecision::PremiumDenied => {
                tracing::debug!(topic_id = %id, requester = %viewer.requester(), "Premium topic denied");
                return Err(CatalogError::PremiumRequired {
                    topic_id: id,
                    assigned_count: topic.assigned_users.len(),
                });
            }
        }

        let course = self
            .store
            .get_course(topic.course_id)
            .await
            .map_err(CatalogError::from_store)?
            .ok_or(CatalogError::CourseNotFound(topic.course_id))?;
        let index = self.department_index().await?;

        Ok(TopicDetail {
            id: topic.id,
            title: topic.title,
            page_range: topic.page_range,
            refined_summary: topic.refined_summary,
            raw_text: topic.raw_text,
            course_name: course.name.clone(),
            course_year: course.year.clone(),
            departments: department_refs(&index, &course).into_iter().map(|d| d.name).collect(),
            updated_at: topic.updated_at.timestamp(),
            created_at: topic.created_at.timestamp(),
            is_premium: topic.is_premium,
        })
    }

    /// Refined summaries of a course concatenated in reading order.
    ///
    /// Only topics the viewer may open are included.
    pub async fn course_full_text(&self, id: CourseId, viewer: &Viewer) -> Result<CourseFullText, CatalogError> {
        let course = self.live_course(id).await?;
        let index = self.department_index().await?;
        let mut topics: Vec<Topic> = self
            .course_topics_raw(id)
            .await?
            .into_iter()
            .filter(|t| !t.is_deleted && t.is_refined())
            .filter(|t| check_detail_access(t, viewer).is_allowed())
            .collect();
        sort_course_order(&mut topics);

        let departments: Vec<String> = department_refs(&index, &course).into_iter().map(|d| d.name).collect();
        let mut text = format!("{}\n", course.name);
        if !departments.is_empty() {
            text.push_str(&format!("Departments: {}\n", departments.join(", ")));
        }
        if !course.year.is_empty() {
            text.push_str(&format!("Year: {}\n", course.year));
        }
        text.push_str(RULE);
        text.push('\n');

        for topic in &topics {
            text.push_str(&format!("\n\n{RULE}\nTOPIC: {}", topic.title));
            if !topic.page_range.is_empty() {
                text.push_str(&format!(" (Pages {})", topic.page_range));
            }
            text.push_str(&format!("\n{RULE}\n\n"));
            text.push_str(topic.refined_summary.trim());
        }

        Ok(CourseFullText {
            course: CourseRef::from(&course),
            topic_count: topics.len(),
            text,
        })
    }

    /// Every live premium topic with its active assigned users.
    pub async fn premium_overview(&self) -> Result<PremiumOverview, CatalogError> {
        let users: BTreeMap<PremiumUserId, _> = self
            .store
            .list_premium_users()
            .await
            .map_err(CatalogError::from_store)?
            .into_iter()
            .filter(|u| u.is_active)
            .map(|u| (u.id, u))
            .collect();
        let courses: BTreeMap<CourseId, Course> = self
            .store
            .list_courses()
            .await
            .map_err(CatalogError::from_store)?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        let mut premium: Vec<Topic> = self
            .store
            .list_topics()
            .await
            .map_err(CatalogError::from_store)?
            .into_iter()
            .filter(|t| t.is_premium && !t.is_deleted)
            .collect();
        crate::filter::sort_newest_first(&mut premium);

        let topics: Vec<PremiumTopicEntry> = premium
            .into_iter()
            .map(|t| PremiumTopicEntry {
                assigned_users: t
                    .assigned_users
                    .iter()
                    .filter_map(|id| users.get(id))
                    .map(|u| AssignedUser {
                        id: u.id,
                        display_name: u.display_name(),
                    })
                    .collect(),
                course_name: courses.get(&t.course_id).map(|c| c.name.clone()).unwrap_or_default(),
                id: t.id,
                title: t.title,
            })
            .collect();

        let assigned = topics.iter().filter(|t| !t.assigned_users.is_empty()).count();
        Ok(PremiumOverview {
            total: topics.len(),
            unassigned: topics.len() - assigned,
            assigned,
            topics,
        })
    }

    /// Distinct year labels of a department's live courses.
    pub async fn available_years(&self, id: DepartmentId) -> Result<AvailableYears, CatalogError> {
        let department = self.department(id).await?;
        let courses = self
            .store
            .courses_in_department(id)
            .await
            .map_err(CatalogError::from_store)?;
        Ok(AvailableYears {
            department_id: department.id,
            department_name: department.name,
            years: distinct_years(&courses),
        })
    }
}

pub(crate) fn department_refs(index: &BTreeMap<DepartmentId, Department>, course: &Course) -> Vec<DepartmentRef> {
    course
        .departments
        .iter()
        .filter_map(|id| index.get(id))
        .map(DepartmentRef::from)
        .collect()
}
