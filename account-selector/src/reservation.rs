use crate::selector::AccountSelector;
use adkuu_core::store::{AccountStore, Reservation};
use adkuu_core::{CoreError, PostingMode, RedditAccount, SelectionConfig};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Selects and books an account in one step.
///
/// Candidates are read from the store on every attempt; nothing about account
/// eligibility is cached between calls.
pub struct AccountReserver<S> {
    store: Arc<S>,
    selector: AccountSelector,
    min_action_interval: Duration,
    attempts: u32,
}

impl<S: AccountStore> AccountReserver<S> {
    pub fn new(store: Arc<S>, config: &SelectionConfig) -> Self {
        Self {
            store,
            selector: AccountSelector::from_config(config),
            min_action_interval: Duration::seconds(config.min_action_interval_secs as i64),
            attempts: config.reservation_attempts.max(1),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the reserved account as stored after the reservation.
    pub async fn select_and_reserve(
        &self,
        project_id: Uuid,
        target_subreddit: &str,
        posting_mode: &PostingMode,
        now: DateTime<Utc>,
    ) -> Result<RedditAccount, CoreError> {
        for attempt in 1..=self.attempts {
            let candidates = self.store.list_accounts(project_id).await?;
            let chosen = self
                .selector
                .select(project_id, &candidates, target_subreddit, posting_mode, now)?;

            let reservation = Reservation {
                account_id: chosen.id,
                expected_daily_actions: chosen.daily_actions_count,
                max_daily_actions: self.selector.max_daily_actions(),
                now,
                cooldown_until: now + self.min_action_interval,
            };

            if self.store.try_reserve(&reservation).await? {
                info!(
                    "Reserved account {} for r/{} ({} actions today)",
                    chosen.username,
                    target_subreddit,
                    chosen.daily_actions_count + 1
                );
                let mut reserved = chosen.clone();
                reservation.book(&mut reserved);
                return Ok(reserved);
            }

            debug!(
                "Reservation of {} lost a race (attempt {}/{})",
                chosen.username, attempt, self.attempts
            );
        }

        warn!(
            "Gave up reserving an account for r/{} after {} attempts",
            target_subreddit, self.attempts
        );
        Err(CoreError::RateLimited {
            message: format!("account pool for r/{target_subreddit} is contended"),
            retry_after: Some(std::time::Duration::from_secs(1)),
        })
    }
}
