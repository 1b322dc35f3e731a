//! Engine configuration loaded from TOML.
//!
//! Every section has defaults, so an empty file is a valid configuration.
//! Values are validated once at load time; scorers receive typed tables and
//! never re-check them.

use crate::error::{ConfigError, CoreError};
use crate::types::{QualityThresholds, SizeCategory, UrgencyLevel};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub velocity: VelocityConfig,
    pub thresholds: ThresholdTable,
    pub expiry: ExpiryTable,
    pub selection: SelectionConfig,
    pub quality: QualityThresholds,
    pub learning: LearningConfig,
    pub mining: MiningConfig,
    pub scheduler: SchedulerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CoreError::Config(ConfigError::FileNotFound {
                path: path.display().to_string(),
            }),
            _ => CoreError::Io(e),
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, CoreError> {
        let config: EngineConfig = toml::from_str(text).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.velocity.min_age_minutes > 0.0) {
            return Err(invalid("velocity.min_age_minutes", self.velocity.min_age_minutes));
        }
        self.thresholds.validate()?;
        self.expiry.validate()?;

        if self.selection.max_daily_actions == 0 {
            return Err(invalid("selection.max_daily_actions", 0));
        }
        if self.selection.reservation_attempts == 0 {
            return Err(invalid("selection.reservation_attempts", 0));
        }

        let q = &self.quality;
        for (field, value) in [
            ("quality.max_spam_score", q.max_spam_score),
            ("quality.max_promotional_score", q.max_promotional_score),
            ("quality.min_authenticity", q.min_authenticity),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(field, value));
            }
        }
        if !(0.0..=100.0).contains(&q.min_relevance) {
            return Err(invalid("quality.min_relevance", q.min_relevance));
        }
        if q.min_words > q.max_words {
            return Err(ConfigError::ValidationFailed {
                reason: format!(
                    "quality.min_words ({}) exceeds quality.max_words ({})",
                    q.min_words, q.max_words
                ),
            });
        }

        if self.learning.window_days == 0 {
            return Err(invalid("learning.window_days", 0));
        }
        if !(0.0..=1.0).contains(&self.learning.epsilon) {
            return Err(invalid("learning.epsilon", self.learning.epsilon));
        }
        if !(0.0..=1.0).contains(&self.learning.prior_weight) {
            return Err(invalid("learning.prior_weight", self.learning.prior_weight));
        }
        if self.mining.relevance_concurrency == 0 {
            return Err(invalid("mining.relevance_concurrency", 0));
        }
        Ok(())
    }
}

fn invalid(field: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityConfig {
    /// Post ages below this are clamped before dividing.
    pub min_age_minutes: f64,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            min_age_minutes: 1.0,
        }
    }
}

/// Velocity thresholds keyed by subreddit size. `version` bumps when tuned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdTable {
    pub version: u32,
    pub small: f64,
    pub medium: f64,
    pub large: f64,
    pub massive: f64,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            version: 1,
            small: 5.0,
            medium: 15.0,
            large: 50.0,
            massive: 200.0,
        }
    }
}

impl ThresholdTable {
    pub fn threshold(&self, category: SizeCategory) -> f64 {
        match category {
            SizeCategory::Small => self.small,
            SizeCategory::Medium => self.medium,
            SizeCategory::Large => self.large,
            SizeCategory::Massive => self.massive,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let ordered = [self.small, self.medium, self.large, self.massive];
        if ordered.iter().any(|t| !(t.is_finite() && *t > 0.0)) {
            return Err(ConfigError::ValidationFailed {
                reason: format!("thresholds v{} must all be positive", self.version),
            });
        }
        if ordered.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(ConfigError::ValidationFailed {
                reason: format!(
                    "thresholds v{} must not decrease with subreddit size",
                    self.version
                ),
            });
        }
        Ok(())
    }
}

/// Opportunity time-to-live per urgency tier, in hours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryTable {
    pub critical_hours: u32,
    pub high_hours: u32,
    pub medium_hours: u32,
    pub low_hours: u32,
}

impl Default for ExpiryTable {
    fn default() -> Self {
        Self {
            critical_hours: 2,
            high_hours: 6,
            medium_hours: 24,
            low_hours: 72,
        }
    }
}

impl ExpiryTable {
    pub fn ttl(&self, urgency: UrgencyLevel) -> Duration {
        let hours = match urgency {
            UrgencyLevel::Critical => self.critical_hours,
            UrgencyLevel::High => self.high_hours,
            UrgencyLevel::Medium => self.medium_hours,
            UrgencyLevel::Low => self.low_hours,
        };
        Duration::hours(i64::from(hours))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for urgency in UrgencyLevel::ALL {
            if self.ttl(urgency) <= Duration::zero() {
                return Err(invalid(&format!("expiry.{}_hours", urgency.as_str()), 0));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub max_daily_actions: u32,
    /// Cooldown applied to an account after each reservation.
    pub min_action_interval_secs: u64,
    /// Compare-and-swap retries before giving up on a contended pool.
    pub reservation_attempts: u32,
    pub publish_timeout_secs: u64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            max_daily_actions: 10,
            min_action_interval_secs: 60,
            reservation_attempts: 3,
            publish_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub window_days: u32,
    /// Minimum post score for a published item to count as a success.
    pub success_score_threshold: i64,
    pub min_samples: u32,
    pub max_snapshot_age_hours: u64,
    pub epsilon: f64,
    /// How far a subreddit's success prior moves relevance: a prior of 1.0
    /// scales it by `1 + prior_weight`, 0.0 by `1 - prior_weight`.
    pub prior_weight: f64,
    /// Advisory lock lifetime; a crashed run frees the job after this.
    pub lock_ttl_minutes: u32,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            success_score_threshold: 5,
            min_samples: 3,
            max_snapshot_age_hours: 48,
            epsilon: 0.1,
            prior_weight: 0.2,
            lock_ttl_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    pub max_post_age_hours: f64,
    pub max_posts_per_run: usize,
    pub relevance_concurrency: usize,
    pub relevance_timeout_secs: u64,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            max_post_age_hours: 24.0,
            max_posts_per_run: 100,
            relevance_concurrency: 4,
            relevance_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub mining_interval_minutes: u64,
    pub learning_interval_hours: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mining_interval_minutes: 15,
            learning_interval_hours: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://adkuu.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 20,
        }
    }
}

impl LlmConfig {
    pub fn api_key(&self) -> Result<String, ConfigError> {
        std::env::var(&self.api_key_env).map_err(|_| ConfigError::MissingEnvironmentVariable {
            var_name: self.api_key_env.clone(),
        })
    }
}
