//! Coordinates one publish action: reserve an account, post, record the outcome.

use crate::health::{record_health_signal, HealthSignal};
use crate::reservation::AccountReserver;
use adkuu_core::store::AccountStore;
use adkuu_core::{
    ContentStatus, CoreError, ErrorExt, ErrorReporter, GeneratedContent, Opportunity,
    OpportunityStatus, PostingMode, RedditAccount, SelectionConfig, SubredditActivity,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct PublishReceipt {
    pub reddit_id: String,
    pub url: Option<String>,
}

/// The Reddit side of publishing. Implemented by the API client.
pub trait PublishCapability: Send + Sync {
    fn publish_comment(
        &self,
        account: &RedditAccount,
        post_id: &str,
        text: &str,
    ) -> impl Future<Output = Result<PublishReceipt, CoreError>> + Send;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishOutcome {
    pub account_id: Uuid,
    pub receipt: PublishReceipt,
}

pub struct Publisher<S, P> {
    reserver: AccountReserver<S>,
    capability: P,
    timeout: Duration,
    reporter: ErrorReporter,
}

impl<S: AccountStore, P: PublishCapability> Publisher<S, P> {
    pub fn new(store: Arc<S>, capability: P, config: &SelectionConfig) -> Self {
        Self {
            reserver: AccountReserver::new(store, config),
            capability,
            timeout: Duration::from_secs(config.publish_timeout_secs),
            reporter: ErrorReporter::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn capability(&self) -> &P {
        &self.capability
    }

    /// Publishes approved `content` as a reply to the opportunity's post.
    ///
    /// On failure the content is marked failed, the account receives a health
    /// signal, and the error is returned for the caller to retry or surface.
    /// Once the comment is live the call returns `Ok`: failures writing the
    /// account bookkeeping afterwards are reported, not returned, so a retrying
    /// caller never posts twice.
    pub async fn publish(
        &self,
        content: &mut GeneratedContent,
        opportunity: &mut Opportunity,
        posting_mode: &PostingMode,
        now: DateTime<Utc>,
    ) -> Result<PublishOutcome, CoreError> {
        if content.status != ContentStatus::Approved {
            return Err(CoreError::InvalidTransition {
                entity: "content".to_string(),
                from: content.status.as_str().to_string(),
                to: ContentStatus::Published.as_str().to_string(),
            });
        }
        if content.opportunity_id != opportunity.id {
            return Err(CoreError::invalid_input(format!(
                "content {} belongs to opportunity {}, not {}",
                content.id, content.opportunity_id, opportunity.id
            )));
        }
        if opportunity.status == OpportunityStatus::New {
            opportunity.transition(OpportunityStatus::Queued)?;
        }
        if opportunity.status == OpportunityStatus::Queued {
            opportunity.transition(OpportunityStatus::InProgress)?;
        }
        if opportunity.status != OpportunityStatus::InProgress {
            return Err(CoreError::InvalidTransition {
                entity: "opportunity".to_string(),
                from: opportunity.status.as_str().to_string(),
                to: OpportunityStatus::Completed.as_str().to_string(),
            });
        }

        let account = self
            .reserver
            .select_and_reserve(
                opportunity.project_id,
                &opportunity.subreddit,
                posting_mode,
                now,
            )
            .await?;

        let attempt = tokio::time::timeout(
            self.timeout,
            self.capability
                .publish_comment(&account, &opportunity.post_id, &content.content_text),
        )
        .await
        .unwrap_or_else(|_| {
            Err(CoreError::Timeout {
                seconds: self.timeout.as_secs(),
            })
        });

        match attempt {
            Ok(receipt) => {
                content.mark_published(account.id, now)?;
                opportunity.transition(OpportunityStatus::Completed)?;
                info!(
                    "Published content {} to r/{} via {}",
                    content.id, opportunity.subreddit, account.username
                );

                if let Err(bookkeeping) = self
                    .record_success(account.id, &opportunity.subreddit, now)
                    .await
                {
                    warn!(
                        "Content {} is live but account {} was not updated",
                        content.id, account.username
                    );
                    self.reporter.report(&bookkeeping);
                }
                Ok(PublishOutcome {
                    account_id: account.id,
                    receipt,
                })
            }
            Err(publish_error) => {
                error!(
                    "Publishing content {} via {} failed: {}",
                    content.id,
                    account.username,
                    publish_error.user_friendly_message()
                );
                content.transition(ContentStatus::Failed)?;
                let signal = HealthSignal::from_error(&publish_error);
                if let Err(bookkeeping) = self.record_signal(account.id, &signal, now).await {
                    self.reporter.report(&bookkeeping);
                }
                Err(publish_error)
            }
        }
    }

    async fn record_success(
        &self,
        account_id: Uuid,
        subreddit: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let posted = SubredditActivity {
            posts: 1,
            ..SubredditActivity::default()
        };
        self.reserver
            .store()
            .record_activity(account_id, subreddit, &posted)
            .await?;
        self.record_signal(account_id, &HealthSignal::PublishSucceeded, now)
            .await
    }

    async fn record_signal(
        &self,
        account_id: Uuid,
        signal: &HealthSignal,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        record_health_signal(
            self.reserver.store().as_ref(),
            account_id,
            signal,
            now,
            self.reserver.attempts(),
        )
        .await
    }
}
