//! Account eligibility and scoring.

use adkuu_core::{AccountStatus, CoreError, PostingMode, RedditAccount, SelectionConfig};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

const BASE_SCORE: f64 = 100.0;
const MAX_KARMA_BONUS: f64 = 20.0;
const MAX_AGE_BONUS: f64 = 10.0;
const SUBREDDIT_HISTORY_BONUS: f64 = 15.0;
const LOW_REMOVAL_BONUS: f64 = 10.0;
const HIGH_REMOVAL_PENALTY: f64 = 20.0;

#[derive(Debug, Clone, PartialEq)]
pub enum Ineligibility {
    Status(AccountStatus),
    Cooldown(DateTime<Utc>),
    Unhealthy,
    DailyLimit(u32),
}

impl fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ineligibility::Status(status) => write!(f, "account is {}", status.as_str()),
            Ineligibility::Cooldown(until) => write!(f, "in cooldown until {until}"),
            Ineligibility::Unhealthy => f.write_str("health score is zero"),
            Ineligibility::DailyLimit(limit) => write!(f, "daily limit of {limit} actions reached"),
        }
    }
}

pub fn check_eligibility(
    account: &RedditAccount,
    now: DateTime<Utc>,
    max_daily_actions: u32,
) -> Result<(), Ineligibility> {
    if account.status != AccountStatus::Active {
        return Err(Ineligibility::Status(account.status));
    }
    if let Some(until) = account.cooldown_until.filter(|until| *until > now) {
        return Err(Ineligibility::Cooldown(until));
    }
    if account.health_score <= 0.0 {
        return Err(Ineligibility::Unhealthy);
    }
    if account.daily_actions_count >= max_daily_actions {
        return Err(Ineligibility::DailyLimit(max_daily_actions));
    }
    Ok(())
}

/// Fitness of `account` for posting in `target_subreddit`, scaled by health.
pub fn selection_score(account: &RedditAccount, target_subreddit: &str) -> f64 {
    let mut score = BASE_SCORE;
    score += (account.karma_total as f64 / 1000.0).min(MAX_KARMA_BONUS);
    score += (f64::from(account.account_age_days) / 30.0).min(MAX_AGE_BONUS);

    if account.has_success_in(target_subreddit) {
        score += SUBREDDIT_HISTORY_BONUS;
    }
    if account.removal_rate < 0.05 {
        score += LOW_REMOVAL_BONUS;
    }
    if account.removal_rate > 0.20 {
        score -= HIGH_REMOVAL_PENALTY;
    }

    score * account.health_score
}

/// Best first: score desc, then least recently used, then id.
fn compare_ranked(a: &(f64, &RedditAccount), b: &(f64, &RedditAccount)) -> Ordering {
    b.0.total_cmp(&a.0)
        .then_with(|| a.1.last_used_at.cmp(&b.1.last_used_at))
        .then_with(|| a.1.id.cmp(&b.1.id))
}

#[derive(Debug, Clone)]
pub struct AccountSelector {
    max_daily_actions: u32,
}

impl Default for AccountSelector {
    fn default() -> Self {
        Self::from_config(&SelectionConfig::default())
    }
}

impl AccountSelector {
    pub fn new(max_daily_actions: u32) -> Self {
        Self { max_daily_actions }
    }

    pub fn from_config(config: &SelectionConfig) -> Self {
        Self::new(config.max_daily_actions)
    }

    pub fn max_daily_actions(&self) -> u32 {
        self.max_daily_actions
    }

    pub fn select<'a>(
        &self,
        project_id: Uuid,
        candidates: &'a [RedditAccount],
        target_subreddit: &str,
        posting_mode: &PostingMode,
        now: DateTime<Utc>,
    ) -> Result<&'a RedditAccount, CoreError> {
        if let PostingMode::Specific { account_id } = posting_mode {
            let account = candidates
                .iter()
                .find(|a| a.id == *account_id)
                .ok_or_else(|| CoreError::PreferredAccountUnavailable {
                    account_id: *account_id,
                    reason: "account is not connected to this project".to_string(),
                })?;
            check_eligibility(account, now, self.max_daily_actions).map_err(|reason| {
                CoreError::PreferredAccountUnavailable {
                    account_id: *account_id,
                    reason: reason.to_string(),
                }
            })?;
            return Ok(account);
        }

        let mut ranked: Vec<(f64, &RedditAccount)> = candidates
            .iter()
            .filter(|account| match check_eligibility(account, now, self.max_daily_actions) {
                Ok(()) => true,
                Err(reason) => {
                    debug!("Account {} skipped: {}", account.username, reason);
                    false
                }
            })
            .map(|account| (selection_score(account, target_subreddit), account))
            .collect();
        ranked.sort_by(compare_ranked);

        match ranked.first() {
            Some((score, account)) => {
                debug!(
                    "Selected account {} for r/{} with score {:.1}",
                    account.username, target_subreddit, score
                );
                Ok(*account)
            }
            None => Err(CoreError::NoEligibleAccount {
                project_id,
                subreddit: target_subreddit.to_string(),
            }),
        }
    }
}

/// Picks an account of `project_id` for one publish action. Pure: it
/// reserves nothing.
pub fn select_account<'a>(
    project_id: Uuid,
    candidates: &'a [RedditAccount],
    target_subreddit: &str,
    posting_mode: &PostingMode,
    now: DateTime<Utc>,
    policy: &SelectionConfig,
) -> Result<&'a RedditAccount, CoreError> {
    AccountSelector::from_config(policy).select(
        project_id,
        candidates,
        target_subreddit,
        posting_mode,
        now,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use adkuu_core::{ErrorExt, SubredditActivity};
    use chrono::Duration;

    fn account(name: &str) -> RedditAccount {
        RedditAccount::new(Uuid::nil(), name)
    }

    fn select<'a>(
        candidates: &'a [RedditAccount],
        mode: &PostingMode,
        now: DateTime<Utc>,
    ) -> Result<&'a RedditAccount, CoreError> {
        select_account(
            Uuid::nil(),
            candidates,
            "rust",
            mode,
            now,
            &SelectionConfig::default(),
        )
    }

    #[test]
    fn test_selection_score_formula() {
        let mut veteran = account("veteran");
        veteran.karma_total = 50_000;
        veteran.account_age_days = 900;
        veteran.removal_rate = 0.01;
        veteran.subreddit_history.insert(
            "rust".to_string(),
            SubredditActivity {
                posts: 4,
                successful_posts: 2,
                karma: 120,
            },
        );
        // 100 + 20 + 10 + 15 + 10
        assert_eq!(selection_score(&veteran, "Rust"), 155.0);

        let mut risky = account("risky");
        risky.karma_total = 5_000;
        risky.account_age_days = 60;
        risky.removal_rate = 0.5;
        risky.health_score = 0.5;
        // (100 + 5 + 2 - 20) * 0.5
        assert_eq!(selection_score(&risky, "rust"), 43.5);
    }

    #[test]
    fn test_eligibility() {
        let now = Utc::now();
        let mut a = account("a");
        assert!(check_eligibility(&a, now, 10).is_ok());

        a.cooldown_until = Some(now + Duration::seconds(30));
        assert!(matches!(
            check_eligibility(&a, now, 10),
            Err(Ineligibility::Cooldown(_))
        ));
        a.cooldown_until = Some(now);
        assert!(check_eligibility(&a, now, 10).is_ok());

        a.daily_actions_count = 10;
        assert_eq!(
            check_eligibility(&a, now, 10),
            Err(Ineligibility::DailyLimit(10))
        );

        let mut b = account("b");
        b.health_score = 0.0;
        assert_eq!(check_eligibility(&b, now, 10), Err(Ineligibility::Unhealthy));
        b.status = AccountStatus::RateLimited;
        assert_eq!(
            check_eligibility(&b, now, 10),
            Err(Ineligibility::Status(AccountStatus::RateLimited))
        );
    }

    #[test]
    fn test_highest_score_wins() {
        let now = Utc::now();
        let plain = account("plain");
        let mut seasoned = account("seasoned");
        seasoned.karma_total = 3_000;
        let pool = vec![plain, seasoned.clone()];
        assert_eq!(select(&pool, &PostingMode::Rotate, now).unwrap().id, seasoned.id);
    }

    #[test]
    fn test_tie_goes_to_least_recently_used() {
        let now = Utc::now();
        let mut recent = account("recent");
        recent.last_used_at = Some(now - Duration::minutes(5));
        let mut older = account("older");
        older.last_used_at = Some(now - Duration::hours(3));
        let pool = vec![recent, older.clone()];
        assert_eq!(select(&pool, &PostingMode::Rotate, now).unwrap().id, older.id);

        let mut never = account("never");
        never.last_used_at = None;
        let pool = vec![pool[0].clone(), pool[1].clone(), never.clone()];
        assert_eq!(select(&pool, &PostingMode::Rotate, now).unwrap().id, never.id);
    }

    #[test]
    fn test_empty_pool_is_blocking() {
        let now = Utc::now();
        let mut suspended = account("suspended");
        suspended.status = AccountStatus::Suspended;
        let err = select(&[suspended], &PostingMode::Rotate, now).unwrap_err();
        assert!(matches!(err, CoreError::NoEligibleAccount { .. }));
        assert!(err.is_blocking());

        let project_id = Uuid::new_v4();
        let err = select_account(
            project_id,
            &[],
            "rust",
            &PostingMode::Rotate,
            now,
            &SelectionConfig::default(),
        )
        .unwrap_err();
        match err {
            CoreError::NoEligibleAccount {
                project_id: reported,
                subreddit,
            } => {
                assert_eq!(reported, project_id);
                assert_eq!(subreddit, "rust");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_specific_mode_bypasses_scoring() {
        let now = Utc::now();
        let mut strong = account("strong");
        strong.karma_total = 100_000;
        let weak = account("weak");
        let pool = vec![strong, weak.clone()];

        let mode = PostingMode::Specific { account_id: weak.id };
        assert_eq!(select(&pool, &mode, now).unwrap().id, weak.id);
    }

    #[test]
    fn test_specific_mode_ineligible_account() {
        let now = Utc::now();
        let mut preferred = account("preferred");
        preferred.cooldown_until = Some(now + Duration::minutes(1));
        let fallback = account("fallback");
        let pool = vec![preferred.clone(), fallback];

        let mode = PostingMode::Specific {
            account_id: preferred.id,
        };
        let err = select(&pool, &mode, now).unwrap_err();
        match err {
            CoreError::PreferredAccountUnavailable { account_id, reason } => {
                assert_eq!(account_id, preferred.id);
                assert!(reason.contains("cooldown"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let missing = PostingMode::Specific {
            account_id: Uuid::new_v4(),
        };
        assert!(matches!(
            select(&pool, &missing, now),
            Err(CoreError::PreferredAccountUnavailable { .. })
        ));
    }
}
