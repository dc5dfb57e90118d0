//! Topic access predicates.
//!
//! Two predicates exist and they disagree on purpose for one case: a premium
//! topic with nobody assigned is *listed* to everyone in browse views but
//! *opens* for nobody except administrators.
//!
//! | topic                       | listing            | detail             |
//! |-----------------------------|--------------------|--------------------|
//! | deleted                     | nobody             | admin only         |
//! | community                   | everyone           | everyone           |
//! | premium, nobody assigned    | everyone           | admin only         |
//! | premium, assigned set `S`   | admin, users in S  | admin, active in S |
//!
//! Both are pure functions of a [`Topic`] and a resolved [`Viewer`].

use serde::{Deserialize, Serialize};

use crate::types::{Topic, Viewer};

/// Outcome of the detail predicate, with the reason for a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailDecision {
    /// Content may be returned.
    Allowed,
    /// Topic is soft-deleted and the viewer is not an administrator.
    Deleted,
    /// Premium topic and the viewer is not an active assigned user.
    PremiumDenied,
}

impl DetailDecision {
    /// Whether access is granted.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Evaluate the detail predicate with its denial reason.
pub fn check_detail_access(topic: &Topic, viewer: &Viewer) -> DetailDecision {
    if viewer.is_admin() {
        return DetailDecision::Allowed;
    }
    if topic.is_deleted {
        return DetailDecision::Deleted;
    }
    if !topic.is_premium {
        return DetailDecision::Allowed;
    }
    match viewer.active_premium() {
        Some(user) if topic.is_assigned(user.id) => DetailDecision::Allowed,
        _ => DetailDecision::PremiumDenied,
    }
}

/// May the viewer open this topic's content?
///
/// An empty assignment set denies every non-admin viewer.
pub fn is_accessible_for_detail(topic: &Topic, viewer: &Viewer) -> bool {
    check_detail_access(topic, viewer).is_allowed()
}

/// Alias of [`is_accessible_for_detail`].
pub fn can_access(topic: &Topic, viewer: &Viewer) -> bool {
    is_accessible_for_detail(topic, viewer)
}

/// Should the topic appear in browse/listing views for this viewer?
///
/// An empty assignment set means "listed to everyone". Soft-deleted topics
/// are never listed, not even to administrators.
pub fn is_visible_in_listing(topic: &Topic, viewer: &Viewer) -> bool {
    if topic.is_deleted {
        return false;
    }
    if viewer.is_admin() || !topic.is_premium || topic.assigned_users.is_empty() {
        return true;
    }
    match viewer.active_premium() {
        Some(user) => topic.is_assigned(user.id),
        None => false,
    }
}
