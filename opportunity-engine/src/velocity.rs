//! Rising-post "heat" score.
//!
//! `velocity = (score / age) * 0.7 + (comments / age) * 0.3 * 10`
//!
//! Age is clamped to a floor (one minute by default) so a post fetched seconds
//! after creation does not produce an unbounded score.

use adkuu_core::{CoreError, RedditPost, VelocityConfig};
use chrono::{DateTime, Utc};

/// Default age floor: one minute, in hours.
pub const MIN_AGE_HOURS: f64 = 1.0 / 60.0;

const SCORE_WEIGHT: f64 = 0.7;
const COMMENT_WEIGHT: f64 = 0.3;
// Comments are rarer than votes; scale them up before weighting.
const COMMENT_MULTIPLIER: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityScorer {
    min_age_hours: f64,
}

impl Default for VelocityScorer {
    fn default() -> Self {
        Self {
            min_age_hours: MIN_AGE_HOURS,
        }
    }
}

impl VelocityScorer {
    pub fn new(min_age_hours: f64) -> Self {
        Self { min_age_hours }
    }

    pub fn from_config(config: &VelocityConfig) -> Self {
        Self::new(config.min_age_minutes / 60.0)
    }

    pub fn min_age_hours(&self) -> f64 {
        self.min_age_hours
    }

    pub fn score(&self, post_score: i64, num_comments: i64, age_hours: f64) -> Result<f64, CoreError> {
        if !age_hours.is_finite() || age_hours <= 0.0 {
            return Err(CoreError::invalid_input(format!(
                "age_hours must be a positive number, got {age_hours}"
            )));
        }
        if num_comments < 0 {
            return Err(CoreError::invalid_input(format!(
                "num_comments must not be negative, got {num_comments}"
            )));
        }

        let age = age_hours.max(self.min_age_hours);
        let score_rate = post_score as f64 / age;
        let comment_rate = num_comments as f64 / age;
        let velocity = score_rate * SCORE_WEIGHT + comment_rate * COMMENT_WEIGHT * COMMENT_MULTIPLIER;

        // Downvoted posts are not rising.
        Ok(velocity.max(0.0))
    }

    pub fn score_post(&self, post: &RedditPost, now: DateTime<Utc>) -> Result<f64, CoreError> {
        self.score(post.score, post.num_comments, post.age_hours(now))
    }
}

/// Scores with the default one-minute age floor.
pub fn score_velocity(post_score: i64, num_comments: i64, age_hours: f64) -> Result<f64, CoreError> {
    VelocityScorer::default().score(post_score, num_comments, age_hours)
}
