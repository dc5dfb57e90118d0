//! Topics: the unit of study content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::ids::{CourseId, PremiumUserId, TopicId};

/// Depth of explanation requested from the refinement providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyLevel {
    /// Quick recognition.
    Easy,
    /// Understanding.
    Medium,
    /// Mastery.
    Difficult,
}

impl DifficultyLevel {
    /// All levels in ascending order.
    pub const ALL: [DifficultyLevel; 3] = [Self::Easy, Self::Medium, Self::Difficult];

    /// Parse difficulty from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Some(Self::Easy),
            "medium" => Some(Self::Medium),
            "difficult" => Some(Self::Difficult),
            _ => None,
        }
    }

    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Difficult => "difficult",
        }
    }
}

impl Default for DifficultyLevel {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for DifficultyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Community or premium tier of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicTier {
    /// Open to everyone.
    Community,
    /// Gated by explicit assignment.
    Premium,
}

impl TopicTier {
    /// Parse a tier from the form value used by ingestion flows.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "community" | "" => Some(Self::Community),
            "premium" => Some(Self::Premium),
            _ => None,
        }
    }

    /// Whether this tier is premium.
    pub fn is_premium(&self) -> bool {
        matches!(self, Self::Premium)
    }
}

/// A topic within a course (e.g. "Cell Structure - Pages 1-3").
///
/// `assigned_users` is only meaningful while `is_premium` is set; community
/// topics are open to everyone regardless of its contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    /// Topic identifier.
    pub id: TopicId,
    /// Owning course.
    pub course_id: CourseId,
    /// Title.
    pub title: String,
    /// Text as extracted by OCR or typed in.
    pub raw_text: String,
    /// User-facing refined study material, possibly empty.
    pub refined_summary: String,
    /// Page range label (e.g. "1-3").
    pub page_range: String,
    /// Position within the course.
    pub order: i32,
    /// Premium flag.
    pub is_premium: bool,
    /// Soft-delete flag.
    pub is_deleted: bool,
    /// Difficulty of the selected refinement.
    pub difficulty_level: DifficultyLevel,
    /// Premium users explicitly granted access.
    pub assigned_users: BTreeSet<PremiumUserId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Topic {
    /// Whether the topic has a non-blank refined summary.
    pub fn is_refined(&self) -> bool {
        !self.refined_summary.trim().is_empty()
    }

    /// Whether a premium user is in the assignment set.
    pub fn is_assigned(&self, user: PremiumUserId) -> bool {
        self.assigned_users.contains(&user)
    }

    /// Tier of this topic.
    pub fn tier(&self) -> TopicTier {
        if self.is_premium {
            TopicTier::Premium
        } else {
            TopicTier::Community
        }
    }
}

/// Input for creating a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTopic {
    /// Owning course.
    pub course_id: CourseId,
    /// Title (required, non-blank).
    pub title: String,
    /// Raw text.
    #[serde(default)]
    pub raw_text: String,
    /// Page range label.
    #[serde(default)]
    pub page_range: String,
    /// Premium flag.
    #[serde(default)]
    pub is_premium: bool,
    /// Difficulty level.
    #[serde(default)]
    pub difficulty_level: DifficultyLevel,
}

impl NewTopic {
    /// Create a community topic input.
    pub fn community(course_id: CourseId, title: impl Into<String>) -> Self {
        Self {
            course_id,
            title: title.into(),
            raw_text: String::new(),
            page_range: String::new(),
            is_premium: false,
            difficulty_level: DifficultyLevel::default(),
        }
    }

    /// Create a premium topic input.
    pub fn premium(course_id: CourseId, title: impl Into<String>) -> Self {
        Self {
            is_premium: true,
            ..Self::community(course_id, title)
        }
    }

    /// Set the raw text.
    pub fn with_raw_text(mut self, raw_text: impl Into<String>) -> Self {
        self.raw_text = raw_text.into();
        self
    }

    /// Set the page range label.
    pub fn with_page_range(mut self, page_range: impl Into<String>) -> Self {
        self.page_range = page_range.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_difficulty_parse_and_display() {
        for level in DifficultyLevel::ALL {
            assert_eq!(DifficultyLevel::from_str(&level.to_string()), Some(level));
        }
        assert_eq!(DifficultyLevel::from_str("MEDIUM"), Some(DifficultyLevel::Medium));
        assert_eq!(DifficultyLevel::from_str("hard"), None);
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!(TopicTier::from_str("premium"), Some(TopicTier::Premium));
        assert_eq!(TopicTier::from_str(""), Some(TopicTier::Community));
        assert_eq!(TopicTier::from_str("gold"), None);
    }
}
