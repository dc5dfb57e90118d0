//! Core types for the study guide kernel.

pub mod ids;
pub mod catalog;
pub mod topic;
pub mod user;
pub mod refinement;
pub mod requester;

pub use ids::{AdminId, CourseId, DepartmentId, PremiumUserId, RefinementId, TopicId};
pub use catalog::{Course, Department, NewCourse};
pub use topic::{DifficultyLevel, NewTopic, Topic, TopicTier};
pub use user::{AccessCode, AccessCodeError, AdminUser, NewPremiumUser, PremiumUser, ACCESS_CODE_LEN};
pub use refinement::{
    Provider, RefinementKey, RefinementRecord, RefinementStatus, RefinementUpdate,
};
pub use requester::{Requester, Viewer};
