//! Opportunity discovery: velocity, urgency, filtering and ranking.
//!
//! Every function here is pure and safe to call concurrently.

pub mod filters;
pub mod ranker;
pub mod urgency;
pub mod velocity;

pub use filters::{FilterRejection, ProjectFilters};
pub use ranker::{rank_opportunities, refresh_opportunity, OpportunityRanker, ScoredPost};
pub use urgency::{classify_urgency, classify_with_threshold, UrgencyClassifier};
pub use velocity::{score_velocity, VelocityScorer, MIN_AGE_HOURS};

use adkuu_core::{CoreError, EngineConfig, Opportunity, RedditPost, SubredditProfile};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Bundles the configured scorers for one mining pass.
#[derive(Debug, Clone, Default)]
pub struct OpportunityEngine {
    velocity: VelocityScorer,
    urgency: UrgencyClassifier,
    ranker: OpportunityRanker,
}

impl OpportunityEngine {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            velocity: VelocityScorer::from_config(&config.velocity),
            urgency: UrgencyClassifier::new(config.thresholds.clone()),
            ranker: OpportunityRanker::new(config.expiry.clone()),
        }
    }

    pub fn velocity_scorer(&self) -> &VelocityScorer {
        &self.velocity
    }

    pub fn classifier(&self) -> &UrgencyClassifier {
        &self.urgency
    }

    /// Scores one post against its subreddit profile.
    ///
    /// Fails only for malformed numeric input; callers skip that post and go on.
    pub fn score_post(
        &self,
        post: RedditPost,
        profile: &SubredditProfile,
        relevance_score: f64,
        now: DateTime<Utc>,
    ) -> Result<ScoredPost, CoreError> {
        let age_hours = post.age_hours(now);
        let velocity = self.velocity.score(post.score, post.num_comments, age_hours)?;
        let urgency_level = classify_with_threshold(velocity, age_hours, profile.velocity_threshold);
        debug!(
            "Post {} in r/{}: velocity {:.2}, urgency {}",
            post.id, profile.name, velocity, urgency_level
        );

        Ok(ScoredPost {
            post,
            velocity,
            velocity_threshold: profile.velocity_threshold,
            urgency_level,
            relevance_score,
            discovered_at: now,
        })
    }

    pub fn rank(&self, candidates: Vec<ScoredPost>, filters: &ProjectFilters) -> Vec<Opportunity> {
        self.ranker.rank(candidates, filters)
    }
}
