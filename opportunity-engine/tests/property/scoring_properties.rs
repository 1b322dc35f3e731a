use adkuu_core::{ExpiryTable, RedditPost, SizeCategory, UrgencyLevel};
use chrono::{Duration, TimeZone, Utc};
use opportunity_engine::{
    classify_urgency, rank_opportunities, score_velocity, ProjectFilters, ScoredPost,
};
use proptest::prelude::*;
use uuid::Uuid;

fn size_category() -> impl Strategy<Value = SizeCategory> {
    prop_oneof![
        Just(SizeCategory::Small),
        Just(SizeCategory::Medium),
        Just(SizeCategory::Large),
        Just(SizeCategory::Massive),
    ]
}

fn urgency() -> impl Strategy<Value = UrgencyLevel> {
    prop_oneof![
        Just(UrgencyLevel::Critical),
        Just(UrgencyLevel::High),
        Just(UrgencyLevel::Medium),
        Just(UrgencyLevel::Low),
    ]
}

fn candidate(
    index: usize,
    velocity: f64,
    urgency_level: UrgencyLevel,
    relevance_score: f64,
    discovered_offset_minutes: i64,
) -> ScoredPost {
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let discovered_at = base + Duration::minutes(discovered_offset_minutes);
    ScoredPost {
        post: RedditPost {
            id: format!("t3_{index:04}"),
            subreddit: "rust".to_string(),
            title: format!("question {index}"),
            content: None,
            author: "author".to_string(),
            url: format!("https://reddit.com/t3_{index:04}"),
            score: 1,
            num_comments: 0,
            created_utc: discovered_at - Duration::minutes(10),
            language: None,
        },
        velocity,
        velocity_threshold: 5.0,
        urgency_level,
        relevance_score,
        discovered_at,
    }
}

fn candidates() -> impl Strategy<Value = Vec<ScoredPost>> {
    prop::collection::vec(
        (0.0f64..1000.0, urgency(), 0.0f64..=100.0, 0i64..5),
        1..20,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (v, u, r, offset))| candidate(i, v, u, r, offset))
            .collect()
    })
}

proptest! {
    #[test]
    fn velocity_non_decreasing_in_score(
        score in -10_000i64..10_000,
        bump in 0i64..10_000,
        comments in 0i64..5_000,
        age in 0.001f64..200.0,
    ) {
        let lower = score_velocity(score, comments, age).unwrap();
        let higher = score_velocity(score + bump, comments, age).unwrap();
        prop_assert!(higher >= lower, "{} < {}", higher, lower);
    }

    #[test]
    fn velocity_non_decreasing_in_comments(
        score in -10_000i64..10_000,
        comments in 0i64..5_000,
        bump in 0i64..5_000,
        age in 0.001f64..200.0,
    ) {
        let lower = score_velocity(score, comments, age).unwrap();
        let higher = score_velocity(score, comments + bump, age).unwrap();
        prop_assert!(higher >= lower);
    }

    #[test]
    fn scoring_is_idempotent(
        score in -10_000i64..10_000,
        comments in 0i64..5_000,
        age in 0.001f64..200.0,
        size in size_category(),
    ) {
        let first = score_velocity(score, comments, age).unwrap();
        let second = score_velocity(score, comments, age).unwrap();
        prop_assert_eq!(first.to_bits(), second.to_bits());
        prop_assert_eq!(
            classify_urgency(first, age, size),
            classify_urgency(second, age, size)
        );
    }

    #[test]
    fn urgency_non_decreasing_in_velocity(
        velocity in 0.0f64..2_000.0,
        bump in 0.0f64..2_000.0,
        age in 0.0f64..10.0,
        size in size_category(),
    ) {
        prop_assert!(
            classify_urgency(velocity + bump, age, size) >= classify_urgency(velocity, age, size)
        );
    }

    #[test]
    fn ranking_is_sorted(pool in candidates()) {
        let ranked = rank_opportunities(pool, &ProjectFilters::default(), &ExpiryTable::default());
        for pair in ranked.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert!(a.urgency_level >= b.urgency_level);
            if a.urgency_level == b.urgency_level {
                prop_assert!(a.composite_score >= b.composite_score);
                if a.composite_score == b.composite_score {
                    prop_assert!(a.discovered_at <= b.discovered_at);
                }
            }
        }
    }

    #[test]
    fn ranking_ignores_input_order(
        (pool, shuffled) in candidates().prop_flat_map(|pool| {
            let shuffled = Just(pool.clone()).prop_shuffle();
            (Just(pool), shuffled)
        })
    ) {
        let filters = ProjectFilters::new(Uuid::nil(), Vec::<String>::new(), Vec::<String>::new());
        let expiry = ExpiryTable::default();
        let reference: Vec<String> = rank_opportunities(pool, &filters, &expiry)
            .into_iter()
            .map(|o| o.post_id)
            .collect();
        let permuted: Vec<String> = rank_opportunities(shuffled, &filters, &expiry)
            .into_iter()
            .map(|o| o.post_id)
            .collect();
        prop_assert_eq!(reference, permuted);
    }
}
