//! Property tests for the access predicates and the listing filter.

use std::collections::BTreeSet;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use study_guide_kernel::{
    filter_accessible, is_accessible_for_detail, AccessCode, AdminId, CourseId, DifficultyLevel,
    PremiumUser, PremiumUserId, Topic, TopicId, Viewer,
};

fn arb_topic() -> impl Strategy<Value = Topic> {
    (
        1i64..40,
        any::<bool>(),
        any::<bool>(),
        prop::collection::btree_set(1i64..6, 0..4),
        0i64..5,
    )
        .prop_map(|(id, is_premium, is_deleted, assigned, minute)| {
            let created = Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap();
            Topic {
                id: TopicId::new(id),
                course_id: CourseId::new(1),
                title: format!("Topic {id}"),
                raw_text: "text".to_string(),
                refined_summary: String::new(),
                page_range: String::new(),
                order: 0,
                is_premium,
                is_deleted,
                difficulty_level: DifficultyLevel::Medium,
                assigned_users: assigned.into_iter().map(PremiumUserId::new).collect(),
                created_at: created,
                updated_at: created,
            }
        })
}

fn arb_viewer() -> impl Strategy<Value = Viewer> {
    prop_oneof![
        Just(Viewer::Anonymous),
        (1i64..6).prop_map(|id| Viewer::UnknownPremium(PremiumUserId::new(id))),
        (1i64..6, any::<bool>()).prop_map(|(id, is_active)| {
            let now = Utc::now();
            Viewer::Premium(PremiumUser {
                id: PremiumUserId::new(id),
                name: format!("User {id}"),
                code: AccessCode::parse("AB12").unwrap(),
                department_id: None,
                is_active,
                created_at: now,
                updated_at: now,
            })
        }),
        Just(Viewer::Admin(AdminId::new(1))),
    ]
}

proptest! {
    #[test]
    fn admin_reads_every_topic(topic in arb_topic()) {
        prop_assert!(is_accessible_for_detail(&topic, &Viewer::Admin(AdminId::new(7))));
    }

    #[test]
    fn community_topics_are_open(mut topic in arb_topic(), viewer in arb_viewer()) {
        topic.is_premium = false;
        topic.is_deleted = false;
        prop_assert!(is_accessible_for_detail(&topic, &viewer));
    }

    #[test]
    fn filter_is_idempotent(topics in prop::collection::vec(arb_topic(), 0..30), viewer in arb_viewer()) {
        let once = filter_accessible(topics, &viewer);
        let twice = filter_accessible(once.clone(), &viewer);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn filter_output_is_live_and_unique(topics in prop::collection::vec(arb_topic(), 0..30), viewer in arb_viewer()) {
        let result = filter_accessible(topics, &viewer);
        let ids: BTreeSet<TopicId> = result.iter().map(|t| t.id).collect();
        prop_assert_eq!(ids.len(), result.len());
        prop_assert!(result.iter().all(|t| !t.is_deleted));
        if matches!(viewer, Viewer::Anonymous) {
            prop_assert!(result.iter().all(|t| !t.is_premium));
        }
    }
}
