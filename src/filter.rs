//! Collection filtering over the access predicates.
//!
//! ## Set semantics
//!
//! [`filter_accessible`] drops soft-deleted topics first, then returns the
//! union of two partitions with duplicates removed:
//!
//! - community topics (`is_premium == false`)
//! - premium topics passing the listing predicate, for identified viewers
//!
//! Anonymous viewers only get the community partition. Administrators get
//! every live topic. The result is ordered by creation time descending,
//! ties broken by descending id, so applying the filter twice is a no-op.

use std::collections::BTreeMap;

use crate::policy::is_visible_in_listing;
use crate::types::{Topic, TopicId, Viewer};

/// Sort topics newest first, ties by descending id.
pub fn sort_newest_first(topics: &mut [Topic]) {
    topics.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// Sort topics in course reading order: `order`, then creation time, then id.
pub fn sort_course_order(topics: &mut [Topic]) {
    topics.sort_by(|a, b| {
        a.order
            .cmp(&b.order)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Topics the viewer may see in a collection.
pub fn filter_accessible<I>(topics: I, viewer: &Viewer) -> Vec<Topic>
where
    I: IntoIterator<Item = Topic>,
{
    let identified = viewer.is_admin() || viewer.active_premium().is_some();
    let mut union: BTreeMap<TopicId, Topic> = BTreeMap::new();

    for topic in topics.into_iter().filter(|t| !t.is_deleted) {
        let keep = if !topic.is_premium {
            true
        } else {
            identified && is_visible_in_listing(&topic, viewer)
        };
        if keep {
            union.entry(topic.id).or_insert(topic);
        }
    }

    let mut result: Vec<Topic> = union.into_values().collect();
    sort_newest_first(&mut result);
    result
}

/// Number of topics [`filter_accessible`] would return.
pub fn count_accessible<I>(topics: I, viewer: &Viewer) -> usize
where
    I: IntoIterator<Item = Topic>,
{
    filter_accessible(topics, viewer).len()
}

/// Topics shown in the library/browse views, in course reading order.
///
/// Uses the listing predicate directly, so unassigned premium topics show
/// up for anonymous viewers too (locked on open).
pub fn browse_listing<I>(topics: I, viewer: &Viewer) -> Vec<Topic>
where
    I: IntoIterator<Item = Topic>,
{
    let mut union: BTreeMap<TopicId, Topic> = BTreeMap::new();
    for topic in topics {
        if is_visible_in_listing(&topic, viewer) {
            union.entry(topic.id).or_insert(topic);
        }
    }
    let mut result: Vec<Topic> = union.into_values().collect();
    sort_course_order(&mut result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessCode, AdminId, CourseId, DifficultyLevel, PremiumUser, PremiumUserId};
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeSet;

    fn make_topic(id: i64, minutes: i64, is_premium: bool, assigned: &[i64]) -> Topic {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes);
        Topic {
            id: TopicId::new(id),
            course_id: CourseId::new(1),
            title: format!("Topic {}", id),
            raw_text: String::new(),
            refined_summary: String::new(),
            page_range: String::new(),
            order: id as i32,
            is_premium,
            is_deleted: false,
            difficulty_level: DifficultyLevel::Medium,
            assigned_users: assigned.iter().map(|u| PremiumUserId::new(*u)).collect::<BTreeSet<_>>(),
            created_at: created,
            updated_at: created,
        }
    }

    fn premium_viewer(id: i64) -> Viewer {
        let now = Utc::now();
        Viewer::Premium(PremiumUser {
            id: PremiumUserId::new(id),
            name: "Jane Doe".to_string(),
            code: AccessCode::parse("AB12").unwrap(),
            department_id: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    fn ids(topics: &[Topic]) -> Vec<i64> {
        topics.iter().map(|t| t.id.get()).collect()
    }

    #[test]
    fn test_anonymous_sees_community_only() {
        let topics = vec![
            make_topic(1, 0, false, &[]),
            make_topic(2, 1, true, &[]),
            make_topic(3, 2, true, &[7]),
        ];
        assert_eq!(ids(&filter_accessible(topics, &Viewer::Anonymous)), vec![1]);
    }

    #[test]
    fn test_premium_user_union() {
        let topics = vec![
            make_topic(1, 0, false, &[]),
            make_topic(2, 1, true, &[]),
            make_topic(3, 2, true, &[7]),
            make_topic(4, 3, true, &[8]),
        ];
        assert_eq!(ids(&filter_accessible(topics, &premium_viewer(7))), vec![3, 2, 1]);
    }

    #[test]
    fn test_duplicates_removed() {
        let topic = make_topic(1, 0, false, &[]);
        let topics = vec![topic.clone(), topic.clone(), topic];
        assert_eq!(filter_accessible(topics, &premium_viewer(7)).len(), 1);
    }

    #[test]
    fn test_deleted_excluded_even_for_admin() {
        let mut deleted = make_topic(1, 0, false, &[]);
        deleted.is_deleted = true;
        let topics = vec![deleted, make_topic(2, 1, true, &[9])];
        let admin = Viewer::Admin(AdminId::new(1));
        assert_eq!(ids(&filter_accessible(topics, &admin)), vec![2]);
    }

    #[test]
    fn test_ties_broken_by_id() {
        let topics = vec![make_topic(1, 5, false, &[]), make_topic(2, 5, false, &[])];
        assert_eq!(ids(&filter_accessible(topics, &Viewer::Anonymous)), vec![2, 1]);
    }

    #[test]
    fn test_count_matches_filter() {
        let topics = vec![
            make_topic(1, 0, false, &[]),
            make_topic(2, 1, true, &[7]),
        ];
        let viewer = premium_viewer(7);
        assert_eq!(
            count_accessible(topics.clone(), &viewer),
            filter_accessible(topics, &viewer).len()
        );
    }

    #[test]
    fn test_browse_listing_shows_unassigned_premium_to_anonymous() {
        let topics = vec![
            make_topic(2, 0, true, &[]),
            make_topic(1, 1, false, &[]),
            make_topic(3, 2, true, &[7]),
        ];
        assert_eq!(ids(&browse_listing(topics, &Viewer::Anonymous)), vec![1, 2]);
    }
}
