//! Departments and courses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::ids::{CourseId, DepartmentId};

/// A department or subject area (e.g. "Health Science").
///
/// Names are unique under case-insensitive comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    /// Department identifier.
    pub id: DepartmentId,
    /// Display name.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Department {
    /// Normalize a department name for lookup and creation.
    ///
    /// Returns `None` for blank names.
    pub fn normalize_name(name: &str) -> Option<String> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Case-insensitive name comparison used for uniqueness.
    pub fn name_matches(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.trim().to_lowercase()
    }
}

/// A course (e.g. "BIO 202") owning an ordered list of topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    /// Course identifier.
    pub id: CourseId,
    /// Display name.
    pub name: String,
    /// Free-text academic year label (e.g. "2024/2025"), possibly empty.
    pub year: String,
    /// Description.
    pub description: String,
    /// Departments this course is listed under.
    pub departments: BTreeSet<DepartmentId>,
    /// Soft-delete flag. Soft-deleting a course cascades to its topics.
    pub is_deleted: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Course {
    /// Check whether the course is listed under a department.
    pub fn in_department(&self, department: DepartmentId) -> bool {
        self.departments.contains(&department)
    }
}

/// Input for creating a course.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewCourse {
    /// Display name (required, non-blank).
    pub name: String,
    /// Academic year label.
    #[serde(default)]
    pub year: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Departments to link.
    #[serde(default)]
    pub departments: BTreeSet<DepartmentId>,
}

impl NewCourse {
    /// Create a course input with just a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the year label.
    pub fn with_year(mut self, year: impl Into<String>) -> Self {
        self.year = year.into();
        self
    }

    /// Link a department.
    pub fn with_department(mut self, department: DepartmentId) -> Self {
        self.departments.insert(department);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(Department::normalize_name("  Nursing "), Some("Nursing".to_string()));
        assert_eq!(Department::normalize_name("   "), None);
    }

    #[test]
    fn test_name_matches_ignores_case() {
        let dept = Department {
            id: DepartmentId::new(1),
            name: "Health Science".to_string(),
            created_at: Utc::now(),
        };
        assert!(dept.name_matches("health science"));
        assert!(dept.name_matches(" HEALTH SCIENCE "));
        assert!(!dept.name_matches("Health"));
    }
}
