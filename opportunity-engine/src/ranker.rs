//! Relevance-aware ordering of scored posts into opportunities.

use crate::filters::ProjectFilters;
use crate::urgency::classify_with_threshold;
use crate::velocity::VelocityScorer;
use adkuu_core::{
    CoreError, ExpiryTable, Opportunity, OpportunityStatus, RedditPost, UrgencyLevel,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, warn};
use uuid::Uuid;

const RELEVANCE_WEIGHT: f64 = 0.5;
const VELOCITY_WEIGHT: f64 = 0.5;

/// A post that has been through velocity scoring, urgency classification and
/// relevance scoring, waiting to be ranked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPost {
    pub post: RedditPost,
    pub velocity: f64,
    pub velocity_threshold: f64,
    pub urgency_level: UrgencyLevel,
    /// 0-100, supplied by a relevance scorer.
    pub relevance_score: f64,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct OpportunityRanker {
    expiry: ExpiryTable,
}

impl OpportunityRanker {
    pub fn new(expiry: ExpiryTable) -> Self {
        Self { expiry }
    }

    pub fn rank(&self, candidates: Vec<ScoredPost>, filters: &ProjectFilters) -> Vec<Opportunity> {
        rank_opportunities(candidates, filters, &self.expiry)
    }
}

fn is_rankable(candidate: &ScoredPost) -> bool {
    if !(0.0..=100.0).contains(&candidate.relevance_score) {
        warn!(
            "Skipping post {}: relevance {} outside 0-100",
            candidate.post.id, candidate.relevance_score
        );
        return false;
    }
    if !candidate.velocity.is_finite() || candidate.velocity < 0.0 {
        warn!(
            "Skipping post {}: invalid velocity {}",
            candidate.post.id, candidate.velocity
        );
        return false;
    }
    true
}

/// Full ordering: urgency desc, composite desc, discovered_at asc, post id asc.
fn compare(a: &Opportunity, b: &Opportunity) -> Ordering {
    b.urgency_level
        .cmp(&a.urgency_level)
        .then_with(|| b.composite_score.total_cmp(&a.composite_score))
        .then_with(|| a.discovered_at.cmp(&b.discovered_at))
        .then_with(|| a.post_id.cmp(&b.post_id))
}

/// Filters, scores and orders candidates.
///
/// Filtering is a hard precondition: excluded posts never influence the
/// velocity normalization of the ones that remain.
pub fn rank_opportunities(
    candidates: Vec<ScoredPost>,
    filters: &ProjectFilters,
    expiry: &ExpiryTable,
) -> Vec<Opportunity> {
    let survivors: Vec<ScoredPost> = candidates
        .into_iter()
        .filter(|candidate| match filters.admits(&candidate.post) {
            Ok(()) => true,
            Err(rejection) => {
                debug!("Filtered post {}: {}", candidate.post.id, rejection);
                false
            }
        })
        .filter(is_rankable)
        .collect();

    let max_velocity = survivors
        .iter()
        .map(|c| c.velocity)
        .fold(0.0_f64, f64::max);

    let mut opportunities: Vec<Opportunity> = survivors
        .into_iter()
        .map(|candidate| {
            let normalized_velocity = if max_velocity > 0.0 {
                candidate.velocity / max_velocity * 100.0
            } else {
                0.0
            };
            let composite_score = candidate.relevance_score * RELEVANCE_WEIGHT
                + normalized_velocity * VELOCITY_WEIGHT;

            Opportunity {
                id: Uuid::new_v4(),
                project_id: filters.project_id,
                post_id: candidate.post.id,
                subreddit: candidate.post.subreddit,
                title: candidate.post.title,
                velocity: candidate.velocity,
                velocity_threshold: candidate.velocity_threshold,
                urgency_level: candidate.urgency_level,
                relevance_score: candidate.relevance_score,
                composite_score,
                status: OpportunityStatus::New,
                discovered_at: candidate.discovered_at,
                expires_at: candidate.discovered_at + expiry.ttl(candidate.urgency_level),
                suggested_style: None,
            }
        })
        .collect();

    opportunities.sort_by(compare);
    opportunities
}

/// Re-scores an opportunity from a re-fetched copy of its post.
///
/// `expires_at` stays as assigned at discovery. Open opportunities past their
/// expiry are moved to `Expired`.
pub fn refresh_opportunity(
    opportunity: &mut Opportunity,
    post: &RedditPost,
    scorer: &VelocityScorer,
    now: DateTime<Utc>,
) -> Result<(), CoreError> {
    if post.id != opportunity.post_id {
        return Err(CoreError::invalid_input(format!(
            "post {} does not belong to opportunity {}",
            post.id, opportunity.id
        )));
    }

    let age_hours = post.age_hours(now);
    let velocity = scorer.score(post.score, post.num_comments, age_hours)?;
    opportunity.velocity = velocity;
    opportunity.urgency_level =
        classify_with_threshold(velocity, age_hours, opportunity.velocity_threshold);

    if opportunity.is_expired_at(now)
        && matches!(
            opportunity.status,
            OpportunityStatus::New | OpportunityStatus::Queued
        )
    {
        opportunity.transition(OpportunityStatus::Expired)?;
        debug!("Opportunity {} expired", opportunity.id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn candidate(
        id: &str,
        velocity: f64,
        urgency: UrgencyLevel,
        relevance: f64,
        discovered_at: DateTime<Utc>,
    ) -> ScoredPost {
        ScoredPost {
            post: RedditPost {
                id: id.to_string(),
                subreddit: "rust".to_string(),
                title: format!("post {id}"),
                content: None,
                author: "author".to_string(),
                url: format!("https://reddit.com/{id}"),
                score: 10,
                num_comments: 1,
                created_utc: discovered_at - Duration::minutes(30),
                language: None,
            },
            velocity,
            velocity_threshold: 5.0,
            urgency_level: urgency,
            relevance_score: relevance,
            discovered_at,
        }
    }

    fn filters() -> ProjectFilters {
        ProjectFilters::new(Uuid::new_v4(), ["giveaway"], ["en"])
    }

    fn post_ids(opportunities: &[Opportunity]) -> Vec<String> {
        opportunities.iter().map(|o| o.post_id.clone()).collect()
    }

    #[test]
    fn test_urgency_dominates_composite() {
        let now = Utc::now();
        let ranked = rank_opportunities(
            vec![
                candidate("a", 100.0, UrgencyLevel::Low, 100.0, now),
                candidate("b", 1.0, UrgencyLevel::Critical, 0.0, now),
            ],
            &filters(),
            &ExpiryTable::default(),
        );
        assert_eq!(post_ids(&ranked), vec!["b", "a"]);
    }

    #[test]
    fn test_composite_score_and_expiry() {
        let now = Utc::now();
        let ranked = rank_opportunities(
            vec![
                candidate("a", 50.0, UrgencyLevel::High, 80.0, now),
                candidate("b", 100.0, UrgencyLevel::High, 20.0, now),
            ],
            &filters(),
            &ExpiryTable::default(),
        );
        // a: 80*0.5 + 50*0.5 = 65; b: 20*0.5 + 100*0.5 = 60
        assert_eq!(post_ids(&ranked), vec!["a", "b"]);
        assert!((ranked[0].composite_score - 65.0).abs() < 1e-9);
        assert!((ranked[1].composite_score - 60.0).abs() < 1e-9);
        assert_eq!(ranked[0].expires_at, now + Duration::hours(6));
        assert_eq!(ranked[0].status, OpportunityStatus::New);
    }

    #[test]
    fn test_fifo_tie_break() {
        let now = Utc::now();
        let ranked = rank_opportunities(
            vec![
                candidate("late", 10.0, UrgencyLevel::Medium, 50.0, now),
                candidate("early", 10.0, UrgencyLevel::Medium, 50.0, now - Duration::minutes(5)),
            ],
            &filters(),
            &ExpiryTable::default(),
        );
        assert_eq!(post_ids(&ranked), vec!["early", "late"]);
    }

    #[test]
    fn test_order_is_permutation_independent() {
        let now = Utc::now();
        let pool = vec![
            candidate("p1", 12.0, UrgencyLevel::High, 40.0, now),
            candidate("p2", 12.0, UrgencyLevel::High, 40.0, now),
            candidate("p3", 300.0, UrgencyLevel::Critical, 90.0, now),
            candidate("p4", 0.0, UrgencyLevel::Low, 10.0, now - Duration::hours(1)),
            candidate("p5", 80.0, UrgencyLevel::Medium, 75.0, now - Duration::minutes(3)),
            candidate("p6", 80.0, UrgencyLevel::Medium, 75.0, now - Duration::minutes(9)),
        ];
        let reference = post_ids(&rank_opportunities(
            pool.clone(),
            &filters(),
            &ExpiryTable::default(),
        ));

        // Deterministic rotations and reversal stand in for a shuffle.
        for shift in 0..pool.len() {
            let mut permuted = pool.clone();
            permuted.rotate_left(shift);
            let ids = post_ids(&rank_opportunities(
                permuted.clone(),
                &filters(),
                &ExpiryTable::default(),
            ));
            assert_eq!(ids, reference);

            permuted.reverse();
            let ids = post_ids(&rank_opportunities(
                permuted,
                &filters(),
                &ExpiryTable::default(),
            ));
            assert_eq!(ids, reference);
        }
        assert_eq!(reference, vec!["p3", "p1", "p2", "p6", "p5", "p4"]);
    }

    #[test]
    fn test_filtered_posts_are_excluded_before_normalization() {
        let now = Utc::now();
        let mut spam = candidate("spam", 1000.0, UrgencyLevel::Critical, 100.0, now);
        spam.post.title = "Huge GIVEAWAY today".to_string();
        let mut foreign = candidate("foreign", 500.0, UrgencyLevel::Critical, 100.0, now);
        foreign.post.language = Some("fr".to_string());

        let ranked = rank_opportunities(
            vec![
                spam,
                foreign,
                candidate("kept", 40.0, UrgencyLevel::High, 60.0, now),
            ],
            &filters(),
            &ExpiryTable::default(),
        );
        assert_eq!(post_ids(&ranked), vec!["kept"]);
        // Sole survivor normalizes to 100.
        assert!((ranked[0].composite_score - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_candidates_are_skipped() {
        let now = Utc::now();
        let ranked = rank_opportunities(
            vec![
                candidate("bad_relevance", 10.0, UrgencyLevel::High, 140.0, now),
                candidate("bad_velocity", f64::NAN, UrgencyLevel::High, 50.0, now),
                candidate("ok", 10.0, UrgencyLevel::High, 50.0, now),
            ],
            &filters(),
            &ExpiryTable::default(),
        );
        assert_eq!(post_ids(&ranked), vec!["ok"]);
    }

    #[test]
    fn test_zero_velocity_batch() {
        let now = Utc::now();
        let ranked = rank_opportunities(
            vec![candidate("z", 0.0, UrgencyLevel::Low, 30.0, now)],
            &filters(),
            &ExpiryTable::default(),
        );
        assert!((ranked[0].composite_score - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_refresh_decays_urgency_and_expires() {
        let discovered = Utc::now();
        let scored = candidate("r", 580.0, UrgencyLevel::Critical, 70.0, discovered);
        let mut post = scored.post.clone();
        let mut opportunity = rank_opportunities(
            vec![scored],
            &filters(),
            &ExpiryTable::default(),
        )
        .remove(0);

        // Five hours later the same totals are much slower.
        post.score = 200;
        post.num_comments = 50;
        let later = discovered + Duration::hours(5);
        refresh_opportunity(&mut opportunity, &post, &VelocityScorer::default(), later).unwrap();
        assert_eq!(opportunity.urgency_level, UrgencyLevel::Low);
        // Critical TTL is 2h, so it has expired.
        assert_eq!(opportunity.status, OpportunityStatus::Expired);
    }

    #[test]
    fn test_refresh_rejects_foreign_post() {
        let now = Utc::now();
        let scored = candidate("mine", 10.0, UrgencyLevel::High, 70.0, now);
        let mut other = scored.post.clone();
        other.id = "theirs".to_string();
        let mut opportunity =
            rank_opportunities(vec![scored], &filters(), &ExpiryTable::default()).remove(0);
        let err = refresh_opportunity(&mut opportunity, &other, &VelocityScorer::default(), now)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { .. }));
    }
}
