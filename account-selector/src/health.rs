//! Account health bookkeeping driven by publish outcomes and health checks.

use adkuu_core::store::{AccountStore, DailyReset, HealthUpdate};
use adkuu_core::{AccountStatus, CoreError, RedditAccount, RedditApiError};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

const RATE_LIMITED_HEALTH: f64 = 0.5;
const AUTH_EXPIRED_HEALTH: f64 = 0.3;
const HEALTH_WITH_ISSUES: f64 = 0.7;
const FAILURE_STREAK: u32 = 3;
const FAILURE_STREAK_PENALTY: f64 = 0.2;
const DEFAULT_RATE_LIMIT_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub enum HealthSignal {
    RateLimited { retry_after: Option<Duration> },
    Suspended,
    AuthExpired,
    PublishFailed,
    PublishSucceeded,
    HealthCheckPassed { issues: Vec<String> },
}

impl HealthSignal {
    /// Classifies a publish error into the signal it implies for the account.
    pub fn from_error(error: &CoreError) -> Self {
        match error {
            CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after }) => {
                HealthSignal::RateLimited {
                    retry_after: Some(Duration::seconds(*retry_after as i64)),
                }
            }
            CoreError::RateLimited { retry_after, .. } => HealthSignal::RateLimited {
                retry_after: retry_after.and_then(|d| Duration::from_std(d).ok()),
            },
            CoreError::RedditApi(RedditApiError::AccountSuspended { .. }) => HealthSignal::Suspended,
            CoreError::RedditApi(
                RedditApiError::AuthenticationFailed { .. } | RedditApiError::InvalidToken,
            ) => HealthSignal::AuthExpired,
            _ => HealthSignal::PublishFailed,
        }
    }
}

/// Applies `signal` to `account`. Every failure signal extends the failure
/// streak; a streak of three decays health.
pub fn apply_health_signal(account: &mut RedditAccount, signal: &HealthSignal, now: DateTime<Utc>) {
    match signal {
        HealthSignal::RateLimited { retry_after } => {
            let wait = retry_after.unwrap_or_else(|| Duration::seconds(DEFAULT_RATE_LIMIT_SECS));
            account.status = AccountStatus::RateLimited;
            account.health_score = RATE_LIMITED_HEALTH;
            account.cooldown_until = Some(now + wait);
            record_failure(account);
        }
        HealthSignal::Suspended => {
            account.status = AccountStatus::Suspended;
            account.health_score = 0.0;
            record_failure(account);
        }
        HealthSignal::AuthExpired => {
            account.status = AccountStatus::OauthExpired;
            account.health_score = AUTH_EXPIRED_HEALTH;
            record_failure(account);
        }
        HealthSignal::PublishFailed => record_failure(account),
        HealthSignal::PublishSucceeded => account.consecutive_failures = 0,
        HealthSignal::HealthCheckPassed { issues } => {
            account.status = AccountStatus::Active;
            account.health_score = if issues.is_empty() {
                1.0
            } else {
                HEALTH_WITH_ISSUES
            };
        }
    }
    if account.status != AccountStatus::Active {
        warn!(
            "Account {} is now {} (health {:.1})",
            account.username,
            account.status.as_str(),
            account.health_score
        );
    }
}

fn record_failure(account: &mut RedditAccount) {
    account.consecutive_failures += 1;
    if account.consecutive_failures >= FAILURE_STREAK {
        account.health_score = (account.health_score - FAILURE_STREAK_PENALTY).max(0.0);
    }
}

/// Warnings a health check reports without taking the account offline.
pub fn health_issues(account: &RedditAccount) -> Vec<String> {
    let mut issues = Vec::new();
    if account.karma_comment < 100 {
        issues.push("Low comment karma".to_string());
    }
    if account.account_age_days < 30 {
        issues.push("Account too new".to_string());
    }
    if account.removal_rate > 0.2 {
        issues.push("High removal rate".to_string());
    }
    issues
}

/// Resets the daily action counter once a day has passed and lifts expired
/// rate limits. Returns whether anything changed.
pub fn refresh_account(account: &mut RedditAccount, now: DateTime<Utc>) -> bool {
    let mut changed = false;

    match account.daily_actions_reset_at {
        Some(reset_at) if now - reset_at < Duration::days(1) => {}
        Some(_) => {
            account.daily_actions_count = 0;
            account.daily_actions_reset_at = Some(now);
            changed = true;
        }
        None => {
            account.daily_actions_reset_at = Some(now);
            changed = true;
        }
    }

    if account.status == AccountStatus::RateLimited && !account.in_cooldown(now) {
        account.status = AccountStatus::Active;
        info!("Account {} rate limit lifted", account.username);
        changed = true;
    }
    changed
}

fn contended(account_id: Uuid) -> CoreError {
    CoreError::RateLimited {
        message: format!("account {account_id} is being updated concurrently"),
        retry_after: Some(std::time::Duration::from_secs(1)),
    }
}

/// Applies `signal` to the stored account through the health compare-and-swap,
/// re-reading the account after each lost race. Reservation counters are
/// never written.
pub async fn record_health_signal<S: AccountStore>(
    store: &S,
    account_id: Uuid,
    signal: &HealthSignal,
    now: DateTime<Utc>,
    attempts: u32,
) -> Result<(), CoreError> {
    for attempt in 1..=attempts.max(1) {
        let current = store
            .get_account(account_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                resource: format!("account {account_id}"),
            })?;
        let mut next = current.clone();
        apply_health_signal(&mut next, signal, now);
        let Some(update) = HealthUpdate::between(&current, &next) else {
            return Ok(());
        };
        if store.apply_health(&update).await? {
            return Ok(());
        }
        debug!(
            "Health update for {} lost a race (attempt {}/{})",
            current.username, attempt, attempts
        );
    }
    Err(contended(account_id))
}

/// Runs `refresh_account` against the stored account. The daily reset and the
/// rate-limit lift are written with guarded updates, so a reservation landing
/// in between is kept. Returns whether anything was written.
pub async fn refresh_stored_account<S: AccountStore>(
    store: &S,
    account: &RedditAccount,
    now: DateTime<Utc>,
) -> Result<bool, CoreError> {
    let mut refreshed = account.clone();
    if !refresh_account(&mut refreshed, now) {
        return Ok(false);
    }

    let mut written = false;
    if let Some(reset) = DailyReset::between(account, &refreshed) {
        if store.reset_daily_actions(&reset).await? {
            written = true;
        } else {
            debug!(
                "Daily reset of {} skipped, the account was booked meanwhile",
                account.username
            );
        }
    }
    if let Some(update) = HealthUpdate::between(account, &refreshed) {
        if store.apply_health(&update).await? {
            written = true;
        } else {
            debug!("Rate-limit lift of {} skipped, health changed meanwhile", account.username);
        }
    }
    Ok(written)
}
