//! Department-scoped views for signed-in premium users.
//!
//! Unlike the public catalog, these views need a resolved, active premium
//! user: a missing id is `BadRequest`, an unknown or inactive one is
//! `Forbidden`. Nothing here degrades to anonymous.

use std::sync::Arc;

use serde::Serialize;

use crate::catalog::{distinct_years, Catalog, CatalogError, CourseRef, CourseSummary, CourseTopics, DepartmentRef, TopicDetail, TopicSummary};
use crate::error::{Classify, ErrorKind};
use crate::filter::filter_accessible;
use crate::store::ContentStore;
use crate::types::{Course, CourseId, DepartmentId, PremiumUser, PremiumUserId, TopicId, Viewer};

/// Error type for the premium views.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PremiumError {
    /// No user id supplied.
    #[error("user_id required")]
    MissingUserId,
    /// Id does not resolve to a user.
    #[error("Unknown premium user: {0}")]
    UnknownUser(PremiumUserId),
    /// User is deactivated.
    #[error("Account is inactive")]
    Inactive,
    /// User has no department.
    #[error("User has no department assigned")]
    NoDepartment,
    /// Department is not the user's.
    #[error("Access denied to this department")]
    DepartmentDenied(DepartmentId),
    /// Course is not linked to the user's department.
    #[error("Access denied to this course")]
    CourseDenied(CourseId),
    /// Catalog lookup failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl Classify for PremiumError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingUserId | Self::NoDepartment => ErrorKind::BadRequest,
            Self::UnknownUser(_) | Self::Inactive | Self::DepartmentDenied(_) | Self::CourseDenied(_) => {
                ErrorKind::Forbidden
            }
            Self::Catalog(e) => e.kind(),
        }
    }
}

/// Public profile of a premium user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    /// User id.
    pub id: PremiumUserId,
    /// Name.
    pub name: String,
    /// Access code.
    pub code: String,
}

impl From<&PremiumUser> for UserProfile {
    fn from(u: &PremiumUser) -> Self {
        Self {
            id: u.id,
            name: u.name.clone(),
            code: u.code.to_string(),
        }
    }
}

/// A user and their department.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MyDepartment {
    /// The user.
    pub user: UserProfile,
    /// Their department.
    pub department: DepartmentRef,
}

/// Courses of a department, optionally narrowed to one year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepartmentCourses {
    /// Matching courses with counts for the user.
    pub courses: Vec<CourseSummary>,
    /// Every year offered by the department.
    pub available_years: Vec<String>,
    /// Year filter applied, if any.
    pub current_year: Option<String>,
    /// The department.
    pub department: DepartmentRef,
}

/// Topic entry across a department.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepartmentTopic {
    /// Topic fields.
    #[serde(flatten)]
    pub topic: TopicSummary,
    /// Owning course id.
    pub course_id: CourseId,
    /// Owning course name.
    pub course_name: String,
}

/// Every topic a user can see in their department.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessibleTopics {
    /// The user.
    pub user: UserProfile,
    /// The user's department, if set.
    pub department: Option<DepartmentRef>,
    /// Visible topics, newest first.
    pub topics: Vec<DepartmentTopic>,
}

/// Premium user views over a catalog.
pub struct PremiumViews<S: ContentStore> {
    catalog: Catalog<S>,
}

impl<S: ContentStore> PremiumViews<S> {
    /// Create the views over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            catalog: Catalog::new(store),
        }
    }

    async fn require_user(&self, user_id: Option<PremiumUserId>) -> Result<PremiumUser, PremiumError> {
        let id = user_id.ok_or(PremiumError::MissingUserId)?;
        let user = self
            .catalog
            .store()
            .get_premium_user(id)
            .await
            .map_err(CatalogError::from_store)?
            .ok_or(PremiumError::UnknownUser(id))?;
        if !user.is_active {
            return Err(PremiumError::Inactive);
        }
        Ok(user)
    }

    /// The user's department.
    pub async fn my_department(&self, user_id: Option<PremiumUserId>) -> Result<MyDepartment, PremiumError> {
        let user = self.require_user(user_id).await?;
        let department_id = user.department_id.ok_or(PremiumError::NoDepartment)?;
        let department = self.catalog.department(department_id).await?;
        Ok(MyDepartment {
            user: UserProfile::from(&user),
            department: DepartmentRef::from(&department),
        })
    }

    /// Courses of the user's own department, optionally for one year.
    pub async fn courses_by_department_and_year(
        &self,
        user_id: Option<PremiumUserId>,
        department_id: DepartmentId,
        year: Option<&str>,
    ) -> Result<DepartmentCourses, PremiumError> {
        let user = self.require_user(user_id).await?;
        if user.department_id != Some(department_id) {
            return Err(PremiumError::DepartmentDenied(department_id));
        }
        let department = self.catalog.department(department_id).await?;
        let year = year.map(str::trim).filter(|y| !y.is_empty());

        let live: Vec<Course> = self
            .catalog
            .store()
            .courses_in_department(department_id)
            .await
            .map_err(CatalogError::from_store)?
            .into_iter()
            .filter(|c| !c.is_deleted)
            .collect();
        let available_years = distinct_years(&live);
        let selected: Vec<Course> = live
            .into_iter()
            .filter(|c| year.map_or(true, |y| c.year == y))
            .collect();

        let viewer = Viewer::Premium(user);
        Ok(DepartmentCourses {
            courses: self.catalog.summarize_courses(&selected, &viewer).await?,
            available_years,
            current_year: year.map(str::to_string),
            department: DepartmentRef::from(&department),
        })
    }

    /// Every topic the user can see across their department's courses.
    ///
    /// A user without a department gets an empty list.
    pub async fn accessible_topics(&self, user_id: Option<PremiumUserId>) -> Result<AccessibleTopics, PremiumError> {
        let user = self.require_user(user_id).await?;
        let profile = UserProfile::from(&user);
        let Some(department_id) = user.department_id else {
            return Ok(AccessibleTopics {
                user: profile,
                department: None,
                topics: Vec::new(),
            });
        };
        let department = self.catalog.department(department_id).await?;

        let courses: Vec<Course> = self
            .catalog
            .store()
            .courses_in_department(department_id)
            .await
            .map_err(CatalogError::from_store)?
            .into_iter()
            .filter(|c| !c.is_deleted)
            .collect();
        let ids: Vec<CourseId> = courses.iter().map(|c| c.id).collect();
        let topics = self
            .catalog
            .store()
            .topics_for_courses(&ids)
            .await
            .map_err(CatalogError::from_store)?;

        let viewer = Viewer::Premium(user);
        let topics = filter_accessible(topics, &viewer)
            .iter()
            .map(|t| DepartmentTopic {
                topic: TopicSummary::from(t),
                course_id: t.course_id,
                course_name: courses
                    .iter()
                    .find(|c| c.id == t.course_id)
                    .map(|c| c.name.clone())
                    .unwrap_or_default(),
            })
            .collect();

        Ok(AccessibleTopics {
            user: profile,
            department: Some(DepartmentRef::from(&department)),
            topics,
        })
    }

    async fn require_course_in_department(&self, user: &PremiumUser, course_id: CourseId) -> Result<Course, PremiumError> {
        let course = self.catalog.live_course(course_id).await?;
        match user.department_id {
            Some(dept) if course.in_department(dept) => Ok(course),
            _ => Err(PremiumError::CourseDenied(course_id)),
        }
    }

    /// Topics of a course linked to the user's department.
    pub async fn topics_by_course(
        &self,
        user_id: Option<PremiumUserId>,
        course_id: CourseId,
    ) -> Result<CourseTopics, PremiumError> {
        let user = self.require_user(user_id).await?;
        let course = self.require_course_in_department(&user, course_id).await?;
        let topics = self.catalog.course_topics_raw(course_id).await?;
        let visible = filter_accessible(topics, &Viewer::Premium(user));
        Ok(CourseTopics {
            course: CourseRef::from(&course),
            topics: visible.iter().map(TopicSummary::from).collect(),
        })
    }

    /// Full content of a topic in a course of the user's department.
    pub async fn topic_full(
        &self,
        user_id: Option<PremiumUserId>,
        topic_id: TopicId,
    ) -> Result<TopicDetail, PremiumError> {
        let user = self.require_user(user_id).await?;
        let topic = self
            .catalog
            .store()
            .get_topic(topic_id)
            .await
            .map_err(CatalogError::from_store)?
            .filter(|t| !t.is_deleted)
            .ok_or(CatalogError::TopicNotFound(topic_id))?;
        self.require_course_in_department(&user, topic.course_id).await?;
        Ok(self.catalog.topic_detail(topic_id, &Viewer::Premium(user)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryContentStore;
    use crate::types::{AccessCode, Department, NewCourse, NewPremiumUser, NewTopic, Topic};

    struct Fixture {
        store: Arc<InMemoryContentStore>,
        views: PremiumViews<InMemoryContentStore>,
        nursing: Department,
        other: Course,
        course: Course,
        premium: Topic,
        user: PremiumUser,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryContentStore::new());
        let nursing = store.create_department("Nursing").await.unwrap();
        let law = store.create_department("Law").await.unwrap();
        let course = store
            .create_course(NewCourse::named("NUR 101").with_year("2024/2025").with_department(nursing.id))
            .await
            .unwrap();
        store
            .create_course(NewCourse::named("NUR 001").with_year("2023/2024").with_department(nursing.id))
            .await
            .unwrap();
        let other = store
            .create_course(NewCourse::named("LAW 101").with_department(law.id))
            .await
            .unwrap();
        store.create_topic(NewTopic::community(course.id, "Intro")).await.unwrap();
        let premium = store.create_topic(NewTopic::premium(course.id, "Drugs")).await.unwrap();
        store.create_topic(NewTopic::community(other.id, "Torts")).await.unwrap();

        let user = store
            .create_premium_user(NewPremiumUser {
                name: "Jane".into(),
                code: AccessCode::parse("JA01").unwrap(),
                department_id: Some(nursing.id),
            })
            .await
            .unwrap();
        Fixture {
            views: PremiumViews::new(store.clone()),
            store,
            nursing,
            other,
            course,
            premium,
            user,
        }
    }

    #[tokio::test]
    async fn test_identity_required() {
        let f = fixture().await;
        assert_eq!(f.views.my_department(None).await.unwrap_err(), PremiumError::MissingUserId);
        let unknown = f.views.my_department(Some(PremiumUserId::new(404))).await.unwrap_err();
        assert_eq!(unknown.kind(), ErrorKind::Forbidden);

        f.store.set_premium_user_active(f.user.id, false).await.unwrap();
        let inactive = f.views.my_department(Some(f.user.id)).await.unwrap_err();
        assert_eq!(inactive, PremiumError::Inactive);
    }

    #[tokio::test]
    async fn test_my_department() {
        let f = fixture().await;
        let mine = f.views.my_department(Some(f.user.id)).await.unwrap();
        assert_eq!(mine.department.name, "Nursing");
        assert_eq!(mine.user.code, "JA01");
    }

    #[tokio::test]
    async fn test_courses_by_department_and_year() {
        let f = fixture().await;
        let all = f
            .views
            .courses_by_department_and_year(Some(f.user.id), f.nursing.id, None)
            .await
            .unwrap();
        assert_eq!(all.courses.len(), 2);
        assert_eq!(all.available_years, vec!["2024/2025".to_string(), "2023/2024".to_string()]);

        let one = f
            .views
            .courses_by_department_and_year(Some(f.user.id), f.nursing.id, Some("2024/2025"))
            .await
            .unwrap();
        assert_eq!(one.courses.len(), 1);
        // Community topic plus the unassigned premium topic.
        assert_eq!(one.courses[0].topic_count, 2);
        assert_eq!(one.current_year.as_deref(), Some("2024/2025"));

        let denied = f
            .views
            .courses_by_department_and_year(Some(f.user.id), DepartmentId::new(999), None)
            .await
            .unwrap_err();
        assert_eq!(denied.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_topics_by_course_checks_department() {
        let f = fixture().await;
        let topics = f.views.topics_by_course(Some(f.user.id), f.course.id).await.unwrap();
        assert_eq!(topics.topics.len(), 2);

        let err = f.views.topics_by_course(Some(f.user.id), f.other.id).await.unwrap_err();
        assert_eq!(err, PremiumError::CourseDenied(f.other.id));
    }

    #[tokio::test]
    async fn test_accessible_topics_follow_assignments() {
        let f = fixture().await;
        let other = f
            .store
            .create_premium_user(NewPremiumUser {
                name: "Other".into(),
                code: AccessCode::parse("OT01").unwrap(),
                department_id: None,
            })
            .await
            .unwrap();
        f.store.add_assignment(f.premium.id, other.id).await.unwrap();

        let listing = f.views.accessible_topics(Some(f.user.id)).await.unwrap();
        assert_eq!(listing.topics.len(), 1);
        assert_eq!(listing.topics[0].course_name, "NUR 101");

        let no_dept = f.views.accessible_topics(Some(other.id)).await.unwrap();
        assert!(no_dept.department.is_none());
        assert!(no_dept.topics.is_empty());

        let denied = f.views.topic_full(Some(f.user.id), f.premium.id).await.unwrap_err();
        assert_eq!(denied.kind(), ErrorKind::Forbidden);
    }
}
