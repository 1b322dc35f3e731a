//! Persistence capabilities consumed by the engine, plus an in-memory implementation.
//!
//! The SQLite adapter in the `database` crate implements the same traits.

use crate::error::{CoreError, DatabaseError};
use crate::types::{
    AccountStatus, LearningFeatureSnapshot, Opportunity, PerformanceRecord, Project, RedditAccount,
    SubredditActivity,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Compare-and-swap request for booking one publish action on an account.
///
/// Succeeds only if the stored `daily_actions_count` still equals
/// `expected_daily_actions` and the account is still eligible at `now`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub account_id: Uuid,
    pub expected_daily_actions: u32,
    pub max_daily_actions: u32,
    pub now: DateTime<Utc>,
    pub cooldown_until: DateTime<Utc>,
}

impl Reservation {
    pub fn guard_holds(&self, account: &RedditAccount) -> bool {
        account.daily_actions_count == self.expected_daily_actions
            && account.daily_actions_count < self.max_daily_actions
            && account.status == AccountStatus::Active
            && account.health_score > 0.0
            && !account.in_cooldown(self.now)
    }

    /// Books the action without checking the guard.
    pub fn book(&self, account: &mut RedditAccount) {
        account.daily_actions_count += 1;
        account.last_used_at = Some(self.now);
        account.cooldown_until = Some(self.cooldown_until);
    }

    /// Applies the reservation to an in-memory account if the guard holds.
    pub fn apply(&self, account: &mut RedditAccount) -> bool {
        let guard_holds = self.guard_holds(account);
        if guard_holds {
            self.book(account);
        }
        guard_holds
    }
}

/// The health fields written back after publish attempts and health checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountHealth {
    pub status: AccountStatus,
    pub health_score: f64,
    pub consecutive_failures: u32,
}

impl AccountHealth {
    pub fn of(account: &RedditAccount) -> Self {
        Self {
            status: account.status,
            health_score: account.health_score,
            consecutive_failures: account.consecutive_failures,
        }
    }
}

/// Compare-and-swap of an account's health fields.
///
/// Never writes `daily_actions_count` or `last_used_at`. `cooldown_until` can
/// only be pushed later, so a cooldown booked by a reservation survives.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthUpdate {
    pub account_id: Uuid,
    pub expected: AccountHealth,
    pub next: AccountHealth,
    pub extend_cooldown_to: Option<DateTime<Utc>>,
}

impl HealthUpdate {
    /// The update turning `before` into `after`, or `None` when none of the
    /// fields it covers changed.
    pub fn between(before: &RedditAccount, after: &RedditAccount) -> Option<Self> {
        let expected = AccountHealth::of(before);
        let next = AccountHealth::of(after);
        let extend_cooldown_to = after
            .cooldown_until
            .filter(|until| Some(*until) > before.cooldown_until);
        if expected == next && extend_cooldown_to.is_none() {
            return None;
        }
        Some(Self {
            account_id: before.id,
            expected,
            next,
            extend_cooldown_to,
        })
    }

    pub fn apply(&self, account: &mut RedditAccount) -> bool {
        if AccountHealth::of(account) != self.expected {
            return false;
        }
        account.status = self.next.status;
        account.health_score = self.next.health_score;
        account.consecutive_failures = self.next.consecutive_failures;
        if let Some(until) = self.extend_cooldown_to {
            if account.cooldown_until.map_or(true, |current| current < until) {
                account.cooldown_until = Some(until);
            }
        }
        true
    }
}

/// Guarded start of a new daily action window.
///
/// Fails if a reservation booked an action since the account was read, so
/// that booking is never wiped by the reset.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyReset {
    pub account_id: Uuid,
    pub expected_daily_actions: u32,
    pub expected_reset_at: Option<DateTime<Utc>>,
    pub daily_actions: u32,
    pub reset_at: DateTime<Utc>,
}

impl DailyReset {
    pub fn between(before: &RedditAccount, after: &RedditAccount) -> Option<Self> {
        let reset_at = after.daily_actions_reset_at?;
        if before.daily_actions_reset_at == Some(reset_at)
            && before.daily_actions_count == after.daily_actions_count
        {
            return None;
        }
        Some(Self {
            account_id: before.id,
            expected_daily_actions: before.daily_actions_count,
            expected_reset_at: before.daily_actions_reset_at,
            daily_actions: after.daily_actions_count,
            reset_at,
        })
    }

    pub fn apply(&self, account: &mut RedditAccount) -> bool {
        if account.daily_actions_count != self.expected_daily_actions
            || account.daily_actions_reset_at != self.expected_reset_at
        {
            return false;
        }
        account.daily_actions_count = self.daily_actions;
        account.daily_actions_reset_at = Some(self.reset_at);
        true
    }
}

pub trait AccountStore: Send + Sync {
    fn list_accounts(
        &self,
        project_id: Uuid,
    ) -> impl Future<Output = Result<Vec<RedditAccount>, CoreError>> + Send;

    fn get_account(
        &self,
        account_id: Uuid,
    ) -> impl Future<Output = Result<Option<RedditAccount>, CoreError>> + Send;

    /// Atomically applies `reservation`; `Ok(false)` means the guard lost a race.
    fn try_reserve(
        &self,
        reservation: &Reservation,
    ) -> impl Future<Output = Result<bool, CoreError>> + Send;

    /// `Ok(false)` means the health fields changed since they were read.
    fn apply_health(
        &self,
        update: &HealthUpdate,
    ) -> impl Future<Output = Result<bool, CoreError>> + Send;

    /// `Ok(false)` means the daily counters changed since they were read.
    fn reset_daily_actions(
        &self,
        reset: &DailyReset,
    ) -> impl Future<Output = Result<bool, CoreError>> + Send;

    /// Adds `delta` to the account's activity in `subreddit`.
    fn record_activity(
        &self,
        account_id: Uuid,
        subreddit: &str,
        delta: &SubredditActivity,
    ) -> impl Future<Output = Result<(), CoreError>> + Send;

    /// Writes the whole account. Used to register or import accounts, never
    /// for bookkeeping on accounts that may be reserved concurrently.
    fn save_account(
        &self,
        account: &RedditAccount,
    ) -> impl Future<Output = Result<(), CoreError>> + Send;
}

/// Append-only, versioned learning snapshots.
pub trait SnapshotStore: Send + Sync {
    fn latest_snapshot(
        &self,
    ) -> impl Future<Output = Result<Option<LearningFeatureSnapshot>, CoreError>> + Send;

    /// Rejects a snapshot whose version does not exceed the latest one.
    fn append_snapshot(
        &self,
        snapshot: &LearningFeatureSnapshot,
    ) -> impl Future<Output = Result<(), CoreError>> + Send;
}

/// Advisory lock for exclusive batch jobs.
pub trait JobLock: Send + Sync {
    fn try_acquire(
        &self,
        job: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, CoreError>> + Send;

    fn release(&self, job: &str, holder: &str) -> impl Future<Output = Result<(), CoreError>> + Send;
}

pub trait OpportunityStore: Send + Sync {
    fn known_post_ids(
        &self,
        project_id: Uuid,
    ) -> impl Future<Output = Result<HashSet<String>, CoreError>> + Send;

    fn save_opportunities(
        &self,
        opportunities: &[Opportunity],
    ) -> impl Future<Output = Result<(), CoreError>> + Send;
}

pub trait PerformanceStore: Send + Sync {
    /// Stores `record`, replacing any earlier record for the same content,
    /// and returns the record it replaced.
    fn record_performance(
        &self,
        record: &PerformanceRecord,
    ) -> impl Future<Output = Result<Option<PerformanceRecord>, CoreError>> + Send;

    fn performance_since(
        &self,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<PerformanceRecord>, CoreError>> + Send;
}

pub trait ProjectSource: Send + Sync {
    fn active_projects(&self) -> impl Future<Output = Result<Vec<Project>, CoreError>> + Send;
}

#[derive(Debug, Default)]
struct MemoryState {
    accounts: HashMap<Uuid, RedditAccount>,
    snapshots: Vec<LearningFeatureSnapshot>,
    locks: HashMap<String, (String, DateTime<Utc>)>,
    opportunities: Vec<Opportunity>,
    performance: HashMap<Uuid, PerformanceRecord>,
    projects: Vec<Project>,
}

/// Single-process store. Every operation runs under one mutex, which makes
/// reservation and lock acquisition atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_account(&self, account: RedditAccount) {
        self.state.lock().await.accounts.insert(account.id, account);
    }

    pub async fn insert_project(&self, project: Project) {
        self.state.lock().await.projects.push(project);
    }

    pub async fn opportunities(&self) -> Vec<Opportunity> {
        self.state.lock().await.opportunities.clone()
    }

    pub async fn snapshot_count(&self) -> usize {
        self.state.lock().await.snapshots.len()
    }
}

fn account_mut(state: &mut MemoryState, account_id: Uuid) -> Result<&mut RedditAccount, CoreError> {
    state
        .accounts
        .get_mut(&account_id)
        .ok_or_else(|| CoreError::NotFound {
            resource: format!("account {account_id}"),
        })
}

impl AccountStore for MemoryStore {
    async fn list_accounts(&self, project_id: Uuid) -> Result<Vec<RedditAccount>, CoreError> {
        let state = self.state.lock().await;
        let mut accounts: Vec<RedditAccount> = state
            .accounts
            .values()
            .filter(|a| a.project_id == project_id)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    async fn get_account(&self, account_id: Uuid) -> Result<Option<RedditAccount>, CoreError> {
        Ok(self.state.lock().await.accounts.get(&account_id).cloned())
    }

    async fn try_reserve(&self, reservation: &Reservation) -> Result<bool, CoreError> {
        let mut state = self.state.lock().await;
        let account = account_mut(&mut state, reservation.account_id)?;
        Ok(reservation.apply(account))
    }

    async fn apply_health(&self, update: &HealthUpdate) -> Result<bool, CoreError> {
        let mut state = self.state.lock().await;
        let account = account_mut(&mut state, update.account_id)?;
        Ok(update.apply(account))
    }

    async fn reset_daily_actions(&self, reset: &DailyReset) -> Result<bool, CoreError> {
        let mut state = self.state.lock().await;
        let account = account_mut(&mut state, reset.account_id)?;
        Ok(reset.apply(account))
    }

    async fn record_activity(
        &self,
        account_id: Uuid,
        subreddit: &str,
        delta: &SubredditActivity,
    ) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        let account = account_mut(&mut state, account_id)?;
        let activity = account
            .subreddit_history
            .entry(subreddit.to_lowercase())
            .or_default();
        activity.posts += delta.posts;
        activity.successful_posts += delta.successful_posts;
        activity.karma += delta.karma;
        Ok(())
    }

    async fn save_account(&self, account: &RedditAccount) -> Result<(), CoreError> {
        self.state
            .lock()
            .await
            .accounts
            .insert(account.id, account.clone());
        Ok(())
    }
}

impl SnapshotStore for MemoryStore {
    async fn latest_snapshot(&self) -> Result<Option<LearningFeatureSnapshot>, CoreError> {
        Ok(self.state.lock().await.snapshots.last().cloned())
    }

    async fn append_snapshot(&self, snapshot: &LearningFeatureSnapshot) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        if let Some(latest) = state.snapshots.last() {
            if snapshot.version <= latest.version {
                return Err(DatabaseError::ConstraintViolation {
                    constraint: format!(
                        "snapshot version {} must exceed {}",
                        snapshot.version, latest.version
                    ),
                }
                .into());
            }
        }
        state.snapshots.push(snapshot.clone());
        Ok(())
    }
}

impl JobLock for MemoryStore {
    async fn try_acquire(
        &self,
        job: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let mut state = self.state.lock().await;
        if let Some((current, expires_at)) = state.locks.get(job) {
            if current != holder && *expires_at > now {
                return Ok(false);
            }
        }
        state
            .locks
            .insert(job.to_string(), (holder.to_string(), now + ttl));
        Ok(true)
    }

    async fn release(&self, job: &str, holder: &str) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        if state.locks.get(job).map(|(h, _)| h == holder).unwrap_or(false) {
            state.locks.remove(job);
        }
        Ok(())
    }
}

impl OpportunityStore for MemoryStore {
    async fn known_post_ids(&self, project_id: Uuid) -> Result<HashSet<String>, CoreError> {
        Ok(self
            .state
            .lock()
            .await
            .opportunities
            .iter()
            .filter(|o| o.project_id == project_id)
            .map(|o| o.post_id.clone())
            .collect())
    }

    async fn save_opportunities(&self, opportunities: &[Opportunity]) -> Result<(), CoreError> {
        self.state
            .lock()
            .await
            .opportunities
            .extend_from_slice(opportunities);
        Ok(())
    }
}

impl PerformanceStore for MemoryStore {
    async fn record_performance(
        &self,
        record: &PerformanceRecord,
    ) -> Result<Option<PerformanceRecord>, CoreError> {
        Ok(self
            .state
            .lock()
            .await
            .performance
            .insert(record.content_id, record.clone()))
    }

    async fn performance_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerformanceRecord>, CoreError> {
        let state = self.state.lock().await;
        let mut records: Vec<PerformanceRecord> = state
            .performance
            .values()
            .filter(|r| r.published_at >= since)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.published_at, r.content_id));
        Ok(records)
    }
}

impl ProjectSource for MemoryStore {
    async fn active_projects(&self) -> Result<Vec<Project>, CoreError> {
        Ok(self.state.lock().await.projects.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation_for(account: &RedditAccount, now: DateTime<Utc>) -> Reservation {
        Reservation {
            account_id: account.id,
            expected_daily_actions: account.daily_actions_count,
            max_daily_actions: 10,
            now,
            cooldown_until: now + Duration::seconds(60),
        }
    }

    #[tokio::test]
    async fn test_reservation_is_compare_and_swap() {
        let store = MemoryStore::new();
        let account = RedditAccount::new(Uuid::new_v4(), "alpha");
        store.insert_account(account.clone()).await;
        let now = Utc::now();

        let reservation = reservation_for(&account, now);
        assert!(store.try_reserve(&reservation).await.unwrap());

        // Same expected count again: the guard must fail.
        assert!(!store.try_reserve(&reservation).await.unwrap());

        let stored = store.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.daily_actions_count, 1);
        assert_eq!(stored.last_used_at, Some(now));
        assert!(stored.in_cooldown(now));
    }

    #[tokio::test]
    async fn test_reservation_respects_status_and_limit() {
        let store = MemoryStore::new();
        let mut suspended = RedditAccount::new(Uuid::new_v4(), "beta");
        suspended.status = AccountStatus::Suspended;
        let mut exhausted = RedditAccount::new(Uuid::new_v4(), "gamma");
        exhausted.daily_actions_count = 10;
        store.insert_account(suspended.clone()).await;
        store.insert_account(exhausted.clone()).await;

        let now = Utc::now();
        assert!(!store.try_reserve(&reservation_for(&suspended, now)).await.unwrap());
        assert!(!store.try_reserve(&reservation_for(&exhausted, now)).await.unwrap());
    }

    #[tokio::test]
    async fn test_health_update_keeps_concurrent_booking() {
        let store = MemoryStore::new();
        let account = RedditAccount::new(Uuid::new_v4(), "delta");
        store.insert_account(account.clone()).await;
        let now = Utc::now();

        let mut failed = account.clone();
        failed.status = AccountStatus::RateLimited;
        failed.health_score = 0.5;
        failed.cooldown_until = Some(now + Duration::seconds(30));
        let update = HealthUpdate::between(&account, &failed).unwrap();

        // A reservation books an action between the read and the write.
        assert!(store.try_reserve(&reservation_for(&account, now)).await.unwrap());
        assert!(store.apply_health(&update).await.unwrap());

        let stored = store.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.daily_actions_count, 1);
        assert_eq!(stored.last_used_at, Some(now));
        assert_eq!(stored.status, AccountStatus::RateLimited);
        // The reservation's longer cooldown wins over the shorter one.
        assert_eq!(stored.cooldown_until, Some(now + Duration::seconds(60)));

        // A second writer working from the same stale read loses.
        assert!(!store.apply_health(&update).await.unwrap());
        assert!(HealthUpdate::between(&account, &account).is_none());
    }

    #[tokio::test]
    async fn test_daily_reset_is_guarded() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut account = RedditAccount::new(Uuid::new_v4(), "epsilon");
        account.daily_actions_count = 4;
        account.daily_actions_reset_at = Some(now - Duration::days(2));
        store.insert_account(account.clone()).await;

        let mut reset = account.clone();
        reset.daily_actions_count = 0;
        reset.daily_actions_reset_at = Some(now);
        let reset = DailyReset::between(&account, &reset).unwrap();

        assert!(store.try_reserve(&reservation_for(&account, now)).await.unwrap());
        assert!(!store.reset_daily_actions(&reset).await.unwrap());
        assert_eq!(
            store.get_account(account.id).await.unwrap().unwrap().daily_actions_count,
            5
        );

        let fresh = store.get_account(account.id).await.unwrap().unwrap();
        let mut next = fresh.clone();
        next.daily_actions_count = 0;
        next.daily_actions_reset_at = Some(now);
        let reset = DailyReset::between(&fresh, &next).unwrap();
        assert!(store.reset_daily_actions(&reset).await.unwrap());
        let stored = store.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.daily_actions_count, 0);
        assert_eq!(stored.daily_actions_reset_at, Some(now));
    }

    #[tokio::test]
    async fn test_activity_accumulates() {
        let store = MemoryStore::new();
        let account = RedditAccount::new(Uuid::new_v4(), "zeta");
        store.insert_account(account.clone()).await;
        let post = SubredditActivity {
            posts: 1,
            ..SubredditActivity::default()
        };
        store.record_activity(account.id, "Rust", &post).await.unwrap();
        store.record_activity(account.id, "rust", &post).await.unwrap();

        let stored = store.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.subreddit_history["rust"].posts, 2);
        assert!(store
            .record_activity(Uuid::new_v4(), "rust", &post)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_snapshots_are_append_only() {
        let store = MemoryStore::new();
        let snapshot = LearningFeatureSnapshot {
            version: 1,
            computed_at: Utc::now(),
            window_days: 7,
            features: Vec::new(),
        };
        store.append_snapshot(&snapshot).await.unwrap();
        assert!(store.append_snapshot(&snapshot).await.is_err());

        let next = LearningFeatureSnapshot {
            version: 2,
            ..snapshot
        };
        store.append_snapshot(&next).await.unwrap();
        assert_eq!(store.latest_snapshot().await.unwrap().unwrap().version, 2);
        assert_eq!(store.snapshot_count().await, 2);
    }

    #[tokio::test]
    async fn test_job_lock_exclusive_until_expiry() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let ttl = Duration::minutes(30);

        assert!(store.try_acquire("learning", "a", ttl, now).await.unwrap());
        assert!(!store.try_acquire("learning", "b", ttl, now).await.unwrap());
        // Expired holders no longer block.
        assert!(store
            .try_acquire("learning", "b", ttl, now + Duration::minutes(31))
            .await
            .unwrap());

        store.release("learning", "b").await.unwrap();
        assert!(store.try_acquire("learning", "c", ttl, now).await.unwrap());
    }
}
