use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedditPost {
    pub id: String,
    pub subreddit: String,
    pub title: String,
    pub content: Option<String>,
    pub author: String,
    pub url: String,
    /// Net upvotes, may be negative.
    pub score: i64,
    pub num_comments: i64,
    pub created_utc: DateTime<Utc>,
    /// ISO language code when the fetch layer detected one.
    #[serde(default)]
    pub language: Option<String>,
}

impl RedditPost {
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_utc).num_milliseconds() as f64 / 3_600_000.0
    }

    /// Title and body, lowercased, for keyword matching.
    pub fn searchable_text(&self) -> String {
        match &self.content {
            Some(body) => format!("{} {}", self.title, body).to_lowercase(),
            None => self.title.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeCategory {
    Small,
    Medium,
    Large,
    Massive,
}

impl SizeCategory {
    pub fn from_subscribers(subscribers: u64) -> Self {
        match subscribers {
            0..=49_999 => SizeCategory::Small,
            50_000..=499_999 => SizeCategory::Medium,
            500_000..=1_999_999 => SizeCategory::Large,
            _ => SizeCategory::Massive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeCategory::Small => "small",
            SizeCategory::Medium => "medium",
            SizeCategory::Large => "large",
            SizeCategory::Massive => "massive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubredditProfile {
    pub name: String,
    pub subscriber_count: u64,
    pub size_category: SizeCategory,
    pub velocity_threshold: f64,
}

/// Time sensitivity of an opportunity. Ordered so that `Critical` is greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    Critical,
    High,
    Medium,
    Low,
}

impl UrgencyLevel {
    pub const ALL: [UrgencyLevel; 4] = [
        UrgencyLevel::Critical,
        UrgencyLevel::High,
        UrgencyLevel::Medium,
        UrgencyLevel::Low,
    ];

    pub fn time_sensitivity(&self) -> u8 {
        match self {
            UrgencyLevel::Critical => 3,
            UrgencyLevel::High => 2,
            UrgencyLevel::Medium => 1,
            UrgencyLevel::Low => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UrgencyLevel::Critical => "critical",
            UrgencyLevel::High => "high",
            UrgencyLevel::Medium => "medium",
            UrgencyLevel::Low => "low",
        }
    }
}

impl Ord for UrgencyLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time_sensitivity().cmp(&other.time_sensitivity())
    }
}

impl PartialOrd for UrgencyLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    New,
    Queued,
    InProgress,
    Completed,
    Skipped,
    Expired,
}

impl OpportunityStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OpportunityStatus::Completed | OpportunityStatus::Skipped | OpportunityStatus::Expired
        )
    }

    /// Forward steps only; skip and expire are reachable from any open state.
    pub fn can_transition_to(&self, next: OpportunityStatus) -> bool {
        use OpportunityStatus::*;
        match (self, next) {
            (New, Queued) | (Queued, InProgress) | (InProgress, Completed) => true,
            (from, Skipped | Expired) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OpportunityStatus::New => "new",
            OpportunityStatus::Queued => "queued",
            OpportunityStatus::InProgress => "in_progress",
            OpportunityStatus::Completed => "completed",
            OpportunityStatus::Skipped => "skipped",
            OpportunityStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub project_id: Uuid,
    pub post_id: String,
    pub subreddit: String,
    pub title: String,
    pub velocity: f64,
    pub velocity_threshold: f64,
    pub urgency_level: UrgencyLevel,
    /// 0-100
    pub relevance_score: f64,
    pub composite_score: f64,
    pub status: OpportunityStatus,
    pub discovered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Style to draft the reply in, picked from the learning priors when mined.
    #[serde(default)]
    pub suggested_style: Option<ContentStyle>,
}

impl Opportunity {
    pub fn transition(&mut self, next: OpportunityStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                entity: "opportunity".to_string(),
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    RateLimited,
    Suspended,
    OauthExpired,
    Inactive,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::RateLimited => "rate_limited",
            AccountStatus::Suspended => "suspended",
            AccountStatus::OauthExpired => "oauth_expired",
            AccountStatus::Inactive => "inactive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(AccountStatus::Active),
            "rate_limited" => Some(AccountStatus::RateLimited),
            "suspended" => Some(AccountStatus::Suspended),
            "oauth_expired" => Some(AccountStatus::OauthExpired),
            "inactive" => Some(AccountStatus::Inactive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubredditActivity {
    pub posts: u32,
    pub successful_posts: u32,
    pub karma: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedditAccount {
    pub id: Uuid,
    pub project_id: Uuid,
    pub username: String,
    pub karma_total: i64,
    pub karma_comment: i64,
    pub karma_post: i64,
    pub account_age_days: u32,
    pub daily_actions_count: u32,
    pub daily_actions_reset_at: Option<DateTime<Utc>>,
    /// 0.0 (unusable) to 1.0 (healthy)
    pub health_score: f64,
    pub removal_rate: f64,
    pub status: AccountStatus,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    #[serde(default)]
    pub subreddit_history: HashMap<String, SubredditActivity>,
}

impl RedditAccount {
    pub fn new(project_id: Uuid, username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            username: username.into(),
            karma_total: 0,
            karma_comment: 0,
            karma_post: 0,
            account_age_days: 0,
            daily_actions_count: 0,
            daily_actions_reset_at: None,
            health_score: 1.0,
            removal_rate: 0.0,
            status: AccountStatus::Active,
            cooldown_until: None,
            last_used_at: None,
            consecutive_failures: 0,
            subreddit_history: HashMap::new(),
        }
    }

    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.map(|until| until > now).unwrap_or(false)
    }

    pub fn has_success_in(&self, subreddit: &str) -> bool {
        self.subreddit_history
            .get(&subreddit.to_lowercase())
            .map(|activity| activity.successful_posts > 0)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Draft,
    PendingReview,
    Approved,
    Published,
    Rejected,
    Failed,
}

impl ContentStatus {
    pub fn can_transition_to(&self, next: ContentStatus) -> bool {
        use ContentStatus::*;
        matches!(
            (self, next),
            (Draft, PendingReview)
                | (PendingReview, Approved)
                | (Approved, Published)
                | (Approved, Failed)
                | (Draft | PendingReview | Approved, Rejected)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Draft => "draft",
            ContentStatus::PendingReview => "pending_review",
            ContentStatus::Approved => "approved",
            ContentStatus::Published => "published",
            ContentStatus::Rejected => "rejected",
            ContentStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStyle {
    HelpfulExpert,
    Casual,
    Technical,
    Storytelling,
}

impl ContentStyle {
    pub const ALL: [ContentStyle; 4] = [
        ContentStyle::HelpfulExpert,
        ContentStyle::Casual,
        ContentStyle::Technical,
        ContentStyle::Storytelling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStyle::HelpfulExpert => "helpful_expert",
            ContentStyle::Casual => "casual",
            ContentStyle::Technical => "technical",
            ContentStyle::Storytelling => "storytelling",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub content_text: String,
    pub style: ContentStyle,
    pub quality_score: Option<f64>,
    pub authenticity_score: Option<f64>,
    pub relevance_score: Option<f64>,
    pub status: ContentStatus,
    /// Names of quality checks that failed on the last gate run.
    #[serde(default)]
    pub gate_failures: Vec<String>,
    pub reddit_account_id: Option<Uuid>,
    pub published_at: Option<DateTime<Utc>>,
}

impl GeneratedContent {
    pub fn draft(opportunity_id: Uuid, content_text: impl Into<String>, style: ContentStyle) -> Self {
        Self {
            id: Uuid::new_v4(),
            opportunity_id,
            content_text: content_text.into(),
            style,
            quality_score: None,
            authenticity_score: None,
            relevance_score: None,
            status: ContentStatus::Draft,
            gate_failures: Vec::new(),
            reddit_account_id: None,
            published_at: None,
        }
    }

    pub fn transition(&mut self, next: ContentStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                entity: "content".to_string(),
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Binds the publishing account. Only approved content can be published.
    pub fn mark_published(&mut self, account_id: Uuid, at: DateTime<Utc>) -> Result<(), CoreError> {
        self.transition(ContentStatus::Published)?;
        self.reddit_account_id = Some(account_id);
        self.published_at = Some(at);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum AutomationLevel {
    Manual = 1,
    Assisted = 2,
    SemiAuto = 3,
    FullAuto = 4,
}

impl AutomationLevel {
    /// Levels at which passing content may skip human review.
    pub fn allows_auto_approval(&self) -> bool {
        *self >= AutomationLevel::SemiAuto
    }
}

impl From<AutomationLevel> for u8 {
    fn from(level: AutomationLevel) -> Self {
        level as u8
    }
}

impl TryFrom<u8> for AutomationLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AutomationLevel::Manual),
            2 => Ok(AutomationLevel::Assisted),
            3 => Ok(AutomationLevel::SemiAuto),
            4 => Ok(AutomationLevel::FullAuto),
            other => Err(format!("automation level must be 1-4, got {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PostingMode {
    Rotate,
    Specific { account_id: Uuid },
}

/// Per-project gate limits. Defaults come from `[quality]` in the engine config.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub max_spam_score: f64,
    pub max_promotional_score: f64,
    pub min_words: usize,
    pub max_words: usize,
    pub min_authenticity: f64,
    pub min_relevance: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            max_spam_score: 0.3,
            max_promotional_score: 0.4,
            min_words: 10,
            max_words: 400,
            min_authenticity: 0.6,
            min_relevance: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub negative_keywords: Vec<String>,
    /// Empty means any language.
    #[serde(default)]
    pub allowed_languages: Vec<String>,
    #[serde(default)]
    pub target_subreddits: Vec<String>,
    pub automation_level: AutomationLevel,
    pub posting_mode: PostingMode,
    #[serde(default)]
    pub quality_thresholds: QualityThresholds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    Subreddit,
    ContentStyle,
    Timing,
}

impl FeatureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureType::Subreddit => "subreddit",
            FeatureType::ContentStyle => "content_style",
            FeatureType::Timing => "timing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningFeature {
    pub project_id: Uuid,
    pub feature_type: FeatureType,
    pub key: String,
    pub sample_count: u32,
    pub success_count: u32,
    pub success_rate: f64,
    pub avg_score: f64,
    pub avg_engagement: f64,
    pub removal_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningFeatureSnapshot {
    pub version: u64,
    pub computed_at: DateTime<Utc>,
    pub window_days: u32,
    pub features: Vec<LearningFeature>,
}

impl LearningFeatureSnapshot {
    pub fn feature(
        &self,
        project_id: Uuid,
        feature_type: FeatureType,
        key: &str,
    ) -> Option<&LearningFeature> {
        self.features
            .iter()
            .find(|f| f.project_id == project_id && f.feature_type == feature_type && f.key == key)
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.computed_at).num_minutes() as f64 / 60.0
    }
}

/// Observed outcome of one published piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub content_id: Uuid,
    pub project_id: Uuid,
    /// Account that published the content, when known.
    #[serde(default)]
    pub account_id: Option<Uuid>,
    pub subreddit: String,
    pub style: ContentStyle,
    pub published_at: DateTime<Utc>,
    pub score: i64,
    /// Replies received.
    pub engagement: u32,
    pub removed: bool,
}
