//! Benchmarks for listing filters and session verification.
//!
//! Run with: `cargo bench --bench filter`
//!
//! ## Performance Targets
//!
//! | Operation | Target | Notes |
//! |-----------|--------|-------|
//! | Filter 1k topics | <1ms | Listing for one course page |
//! | Cold session verify | <50µs | Full HMAC computation |
//! | Cached session verify | <5µs | LRU cache hit |

use std::collections::BTreeSet;

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use study_guide_kernel::{
    browse_listing, filter_accessible, AccessCode, AdminId, CourseId, DifficultyLevel,
    PremiumUser, PremiumUserId, SessionConfig, SessionManager, Topic, TopicId, Viewer,
};

fn make_topics(count: i64) -> Vec<Topic> {
    let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    (1..=count)
        .map(|id| {
            let created = base + Duration::minutes(id % 97);
            let assigned: BTreeSet<PremiumUserId> = if id % 3 == 0 {
                (1..=(id % 5)).map(PremiumUserId::new).collect()
            } else {
                BTreeSet::new()
            };
            Topic {
                id: TopicId::new(id),
                course_id: CourseId::new(1 + id % 10),
                title: format!("Topic {id}"),
                raw_text: "text".to_string(),
                refined_summary: String::new(),
                page_range: String::new(),
                order: (id % 17) as i32,
                is_premium: id % 3 == 0,
                is_deleted: id % 11 == 0,
                difficulty_level: DifficultyLevel::Medium,
                assigned_users: assigned,
                created_at: created,
                updated_at: created,
            }
        })
        .collect()
}

fn premium_viewer() -> Viewer {
    let now = Utc::now();
    Viewer::Premium(PremiumUser {
        id: PremiumUserId::new(2),
        name: "Bench".to_string(),
        code: AccessCode::parse("BN01").unwrap(),
        department_id: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    })
}

fn bench_filter(c: &mut Criterion) {
    let viewers = [
        ("anonymous", Viewer::Anonymous),
        ("premium", premium_viewer()),
        ("admin", Viewer::Admin(AdminId::new(1))),
    ];

    let mut group = c.benchmark_group("filter_accessible");
    for count in [100, 1_000, 10_000] {
        let topics = make_topics(count);
        group.throughput(Throughput::Elements(count as u64));
        for (label, viewer) in &viewers {
            group.bench_with_input(BenchmarkId::new(*label, count), &topics, |b, topics| {
                b.iter(|| filter_accessible(black_box(topics.clone()), viewer))
            });
        }
    }
    group.finish();

    let mut group = c.benchmark_group("browse_listing");
    let topics = make_topics(1_000);
    let viewer = premium_viewer();
    group.throughput(Throughput::Elements(1_000));
    group.bench_function("premium_1000", |b| {
        b.iter(|| browse_listing(black_box(topics.clone()), &viewer))
    });
    group.finish();
}

fn bench_sessions(c: &mut Criterion) {
    let secret = b"benchmark_secret_32_bytes_min___".to_vec();
    let now = Utc::now();

    let mut uncached = SessionConfig::new(secret.clone());
    uncached.cache_size = 0;
    let cold = SessionManager::new(uncached);
    let cold_token = cold.issue(AdminId::new(1), now).unwrap().token;

    let warm = SessionManager::new(SessionConfig::new(secret));
    let warm_token = warm.issue(AdminId::new(1), now).unwrap().token;
    warm.verify(&warm_token, now).unwrap();

    let mut group = c.benchmark_group("session_verify");
    group.bench_function("cold", |b| {
        b.iter(|| cold.verify(black_box(&cold_token), now).unwrap())
    });
    group.bench_function("cached", |b| {
        b.iter(|| warm.verify(black_box(&warm_token), now).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_filter, bench_sessions);
criterion_main!(benches);
