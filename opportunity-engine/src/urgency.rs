//! Urgency decision table.
//!
//! Urgency is recomputed on every scoring pass and can decay as a post ages
//! even when its velocity holds steady. Callers must not cache it across
//! refreshes.

use adkuu_core::{SizeCategory, SubredditProfile, ThresholdTable, UrgencyLevel};

#[derive(Debug, Clone, Default)]
pub struct UrgencyClassifier {
    thresholds: ThresholdTable,
}

impl UrgencyClassifier {
    pub fn new(thresholds: ThresholdTable) -> Self {
        Self { thresholds }
    }

    pub fn threshold(&self, size_category: SizeCategory) -> f64 {
        self.thresholds.threshold(size_category)
    }

    pub fn classify(&self, velocity: f64, age_hours: f64, size_category: SizeCategory) -> UrgencyLevel {
        classify_with_threshold(velocity, age_hours, self.threshold(size_category))
    }

    /// Builds a profile with the table threshold unless the subreddit has an override.
    pub fn profile(
        &self,
        name: impl Into<String>,
        subscriber_count: u64,
        threshold_override: Option<f64>,
    ) -> SubredditProfile {
        let size_category = SizeCategory::from_subscribers(subscriber_count);
        SubredditProfile {
            name: name.into(),
            subscriber_count,
            size_category,
            velocity_threshold: threshold_override
                .filter(|t| t.is_finite() && *t > 0.0)
                .unwrap_or_else(|| self.threshold(size_category)),
        }
    }
}

/// First match wins.
pub fn classify_with_threshold(velocity: f64, age_hours: f64, threshold: f64) -> UrgencyLevel {
    if velocity > 2.0 * threshold && age_hours < 1.0 {
        UrgencyLevel::Critical
    } else if velocity > threshold && age_hours < 2.0 {
        UrgencyLevel::High
    } else if velocity > 0.5 * threshold && age_hours < 4.0 {
        UrgencyLevel::Medium
    } else {
        UrgencyLevel::Low
    }
}

/// Classifies against the default threshold table.
pub fn classify_urgency(velocity: f64, age_hours: f64, size_category: SizeCategory) -> UrgencyLevel {
    classify_with_threshold(
        velocity,
        age_hours,
        ThresholdTable::default().threshold(size_category),
    )
}
