//! Performance feedback: observed outcomes are stored for learning and
//! credited to the publishing account's subreddit history.

use crate::learning::is_success;
use adkuu_core::store::{AccountStore, PerformanceStore};
use adkuu_core::{CoreError, LearningConfig, PerformanceRecord, SubredditActivity};
use std::sync::Arc;
use tracing::debug;

/// Activity owed to the account when a record moves from `previous` to
/// `current`.
///
/// A record is counted as a successful post the first time it qualifies.
/// Later observations of a successful record credit only the score change.
/// Records that stop qualifying keep what they were credited.
pub fn credit_between(
    previous: Option<&PerformanceRecord>,
    current: &PerformanceRecord,
    config: &LearningConfig,
) -> Option<SubredditActivity> {
    if !is_success(current, config) {
        return None;
    }

    let credit = match previous.filter(|p| is_success(p, config)) {
        None => SubredditActivity {
            posts: 0,
            successful_posts: 1,
            karma: current.score,
        },
        Some(previous) => SubredditActivity {
            karma: current.score - previous.score,
            ..SubredditActivity::default()
        },
    };
    (credit != SubredditActivity::default()).then_some(credit)
}

pub struct PerformanceFeedback<S> {
    store: Arc<S>,
    config: LearningConfig,
}

impl<S> PerformanceFeedback<S>
where
    S: AccountStore + PerformanceStore,
{
    pub fn new(store: Arc<S>, config: LearningConfig) -> Self {
        Self { store, config }
    }

    /// Stores `record`, replacing any earlier observation of the same
    /// content, and returns what was credited to the publishing account.
    ///
    /// The credit is derived from the record the store replaced, so
    /// re-submitting an observation never credits it twice.
    pub async fn record(
        &self,
        record: &PerformanceRecord,
    ) -> Result<Option<SubredditActivity>, CoreError> {
        let previous = self.store.record_performance(record).await?;
        let Some(account_id) = record.account_id else {
            return Ok(None);
        };
        let Some(credit) = credit_between(previous.as_ref(), record, &self.config) else {
            return Ok(None);
        };

        self.store
            .record_activity(account_id, &record.subreddit, &credit)
            .await?;
        debug!(
            "Credited account {} in r/{}: {} successful, {:+} karma",
            account_id, record.subreddit, credit.successful_posts, credit.karma
        );
        Ok(Some(credit))
    }

    /// Records a batch, continuing past failures. Returns how many records
    /// credited their account.
    pub async fn record_all(
        &self,
        records: &[PerformanceRecord],
    ) -> (usize, Vec<(String, CoreError)>) {
        let mut credited = 0;
        let mut failed = Vec::new();
        for record in records {
            match self.record(record).await {
                Ok(Some(_)) => credited += 1,
                Ok(None) => {}
                Err(error) => failed.push((record.content_id.to_string(), error)),
            }
        }
        (credited, failed)
    }
}
