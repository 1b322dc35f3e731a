//! Error recovery strategies for scoring batches and external capability calls.
//!
//! Scoring errors are fatal to a single item only: a mining run records the
//! failure and moves on. Calls to external capabilities (relevance scoring,
//! publishing) are retried here with exponential backoff, since the engine
//! treats those services as fallible collaborators.

use crate::{CoreError, ErrorExt};
use std::time::Duration;
use tracing::{info, warn};

/// Recovery strategy for handling errors
#[derive(Debug, Clone)]
pub enum RecoveryStrategy {
    /// Retry the operation with exponential backoff
    RetryWithBackoff {
        max_attempts: usize,
        initial_delay: Duration,
        max_delay: Duration,
    },
    /// Skip the item and continue the batch
    Skip,
    /// Continue with degraded inputs (e.g. a stale learning snapshot)
    Degrade,
    /// Surface to the caller
    Fail,
}

/// Result of an error recovery attempt
#[derive(Debug)]
pub enum RecoveryResult<T> {
    /// Recovery was successful, operation can continue
    Recovered(T),
    /// Operation failed but the caller may continue with a fallback value
    Degraded(T),
    /// Recovery failed, operation should be skipped
    Skipped(CoreError),
    /// Recovery failed, error should be propagated
    Failed(CoreError),
}

impl<T> RecoveryResult<T> {
    pub fn is_recovered(&self) -> bool {
        matches!(self, RecoveryResult::Recovered(_))
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, RecoveryResult::Degraded(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, RecoveryResult::Skipped(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RecoveryResult::Failed(_))
    }

    /// Collapses to a plain result; skipped items become errors.
    pub fn into_result(self) -> Result<T, CoreError> {
        match self {
            RecoveryResult::Recovered(value) | RecoveryResult::Degraded(value) => Ok(value),
            RecoveryResult::Skipped(error) | RecoveryResult::Failed(error) => Err(error),
        }
    }
}

/// Error recovery handler that provides strategies for different error types
pub struct ErrorRecovery;

impl ErrorRecovery {
    /// Determine the appropriate recovery strategy for a given error
    pub fn determine_strategy(error: &CoreError) -> RecoveryStrategy {
        match error {
            // External services - retry with backoff
            CoreError::Network(_) | CoreError::RedditApi(_) | CoreError::Llm(_) => {
                if error.is_retryable() {
                    RecoveryStrategy::RetryWithBackoff {
                        max_attempts: 3,
                        initial_delay: Duration::from_secs(1),
                        max_delay: Duration::from_secs(30),
                    }
                } else {
                    RecoveryStrategy::Fail
                }
            }

            CoreError::Database(db_error) => match db_error {
                crate::DatabaseError::DatabaseLocked => RecoveryStrategy::RetryWithBackoff {
                    max_attempts: 5,
                    initial_delay: Duration::from_millis(100),
                    max_delay: Duration::from_secs(5),
                },
                _ => RecoveryStrategy::Fail,
            },

            CoreError::Timeout { .. } => RecoveryStrategy::RetryWithBackoff {
                max_attempts: 2,
                initial_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(10),
            },

            CoreError::RateLimited { retry_after, .. } => {
                let delay = retry_after.unwrap_or_else(|| Duration::from_secs(60));
                RecoveryStrategy::RetryWithBackoff {
                    max_attempts: 2,
                    initial_delay: delay,
                    max_delay: Duration::from_secs(300),
                }
            }

            // Bad data for one post never aborts the run
            CoreError::InvalidInput { .. } | CoreError::NotFound { .. } => RecoveryStrategy::Skip,

            CoreError::StaleSnapshot { .. } | CoreError::GateCheckFailed { .. } => {
                RecoveryStrategy::Degrade
            }

            // Account pool problems need an operator
            CoreError::NoEligibleAccount { .. }
            | CoreError::PreferredAccountUnavailable { .. }
            | CoreError::JobAlreadyRunning { .. }
            | CoreError::InvalidTransition { .. }
            | CoreError::Config(_) => RecoveryStrategy::Fail,

            CoreError::Io(_) | CoreError::Serialization(_) | CoreError::Internal { .. } => {
                RecoveryStrategy::Fail
            }
        }
    }

    /// Runs `operation`, recovering from its errors according to their strategy.
    ///
    /// `fallback` is used when the strategy is `Degrade`.
    pub async fn run<F, T, Fut>(mut operation: F, fallback: Option<T>) -> RecoveryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let error = match operation().await {
            Ok(value) => return RecoveryResult::Recovered(value),
            Err(error) => error,
        };

        match Self::determine_strategy(&error) {
            RecoveryStrategy::RetryWithBackoff {
                max_attempts,
                initial_delay,
                max_delay,
            } => {
                // The first attempt already happened above.
                Self::retry_with_backoff(
                    operation,
                    error,
                    max_attempts.saturating_sub(1),
                    initial_delay,
                    max_delay,
                )
                .await
            }
            RecoveryStrategy::Skip => RecoveryResult::Skipped(error),
            RecoveryStrategy::Degrade => match fallback {
                Some(value) => {
                    warn!("Continuing in degraded mode: {}", error);
                    RecoveryResult::Degraded(value)
                }
                None => RecoveryResult::Failed(error),
            },
            RecoveryStrategy::Fail => RecoveryResult::Failed(error),
        }
    }

    async fn retry_with_backoff<F, T, Fut>(
        mut operation: F,
        first_error: CoreError,
        retries: usize,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> RecoveryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut attempt = 0;
        let mut delay = initial_delay;
        let mut last_error = first_error;

        loop {
            if attempt >= retries || !last_error.is_retryable() {
                return RecoveryResult::Failed(last_error);
            }

            // Use the error's suggested retry delay if available
            if let Some(retry_delay) = last_error.retry_after() {
                delay = retry_delay;
            }
            if delay > max_delay {
                delay = max_delay;
            }

            info!(
                "Recovery attempt {}/{} failed. Retrying after {:?}: {}",
                attempt + 1,
                retries + 1,
                delay,
                last_error.user_friendly_message()
            );
            tokio::time::sleep(delay).await;

            match operation().await {
                Ok(result) => return RecoveryResult::Recovered(result),
                Err(error) => last_error = error,
            }

            attempt += 1;
            delay = std::cmp::min(delay * 2, max_delay);
        }
    }
}

/// Per-item results of a batch where failures are isolated.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub succeeded: Vec<T>,
    pub skipped: Vec<(String, CoreError)>,
}

impl<T> BatchOutcome<T> {
    pub fn new() -> Self {
        Self {
            succeeded: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Records one item's result under `key`. Errors are logged and kept, never raised.
    pub fn record(&mut self, key: impl Into<String>, result: Result<T, CoreError>) {
        match result {
            Ok(value) => self.succeeded.push(value),
            Err(error) => {
                let key = key.into();
                warn!("Skipping {}: {}", key, error);
                self.skipped.push((key, error));
            }
        }
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self::new()
    }
}
