//! SQLite persistence for accounts, opportunities, performance records,
//! learning snapshots and job locks.
//!
//! Timestamps are stored as Unix milliseconds so guards can compare them in SQL.

use adkuu_core::store::{
    AccountStore, DailyReset, HealthUpdate, JobLock, OpportunityStore, PerformanceStore,
    ProjectSource, Reservation, SnapshotStore,
};
use adkuu_core::{
    AccountStatus, CoreError, DatabaseConfig, DatabaseError, LearningFeature,
    LearningFeatureSnapshot, Opportunity, PerformanceRecord, Project, RedditAccount,
    SubredditActivity,
};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteQueryResult,
    SqliteRow,
};
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tracing::{debug, info, warn};
use uuid::Uuid;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, CoreError> {
        Self::connect(&DatabaseConfig {
            url: database_url.to_string(),
            ..DatabaseConfig::default()
        })
        .await
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            // Concurrent guarded writes wait for the lock instead of failing.
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        info!("Connected to database at {}", config.url);
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::MigrationFailed {
                migration: e.to_string(),
            })?;
        debug!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert_project(&self, project: &Project, active: bool) -> Result<(), CoreError> {
        let definition = serde_json::to_string(project)?;
        sqlx::query(
            "INSERT INTO projects (id, active, definition) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET active = excluded.active, definition = excluded.definition",
        )
        .bind(project.id.to_string())
        .bind(active)
        .bind(definition)
        .execute(&self.pool)
        .await
        .map_err(sql_error)?;
        Ok(())
    }

    pub async fn insert_account(&self, account: &RedditAccount) -> Result<(), CoreError> {
        self.save_account(account).await
    }

    /// Resolves a guarded account update that matched no row: `Ok(false)` when
    /// the guard failed, `NotFound` when the account does not exist.
    async fn guard_outcome(
        &self,
        result: SqliteQueryResult,
        account_id: Uuid,
    ) -> Result<bool, CoreError> {
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        let exists = sqlx::query("SELECT 1 FROM reddit_accounts WHERE id = ?")
            .bind(account_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_error)?;
        match exists {
            Some(_) => {
                debug!("Guarded update missed for account {}", account_id);
                Ok(false)
            }
            None => Err(CoreError::NotFound {
                resource: format!("account {account_id}"),
            }),
        }
    }

    pub async fn opportunities(&self, project_id: Uuid) -> Result<Vec<Opportunity>, CoreError> {
        let rows = sqlx::query(
            "SELECT body FROM opportunities WHERE project_id = ? ORDER BY discovered_at, post_id",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(sql_error)?;

        rows.iter()
            .map(|row| json_column(row, "opportunities", "body"))
            .collect()
    }
}

/// Maps driver errors onto the engine's database taxonomy.
fn sql_error(error: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db) = &error {
        let message = db.message();
        if message.contains("database is locked") || message.contains("database table is locked") {
            return DatabaseError::DatabaseLocked.into();
        }
        if message.contains("UNIQUE constraint failed") {
            return DatabaseError::ConstraintViolation {
                constraint: message.to_string(),
            }
            .into();
        }
    }
    DatabaseError::Sql(error).into()
}

/// Failures to open or commit a transaction.
fn transaction_error(error: sqlx::Error) -> CoreError {
    match sql_error(error) {
        CoreError::Database(DatabaseError::Sql(error)) => DatabaseError::TransactionFailed {
            reason: error.to_string(),
        }
        .into(),
        other => other,
    }
}

fn corrupt(table: &str, details: impl Into<String>) -> CoreError {
    DatabaseError::CorruptRow {
        table: table.to_string(),
        details: details.into(),
    }
    .into()
}

fn millis(value: Option<DateTime<Utc>>) -> Option<i64> {
    value.map(|at| at.timestamp_millis())
}

fn from_millis(table: &str, value: i64) -> Result<DateTime<Utc>, CoreError> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| corrupt(table, format!("timestamp {value} out of range")))
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &SqliteRow,
    table: &str,
    column: &str,
) -> Result<T, CoreError> {
    let text: String = row.try_get(column).map_err(sql_error)?;
    serde_json::from_str(&text).map_err(|e| corrupt(table, format!("{column}: {e}")))
}

fn account_from_row(row: &SqliteRow) -> Result<RedditAccount, CoreError> {
    const TABLE: &str = "reddit_accounts";
    let get_i64 = |column: &str| row.try_get::<i64, _>(column).map_err(sql_error);
    let get_opt = |column: &str| row.try_get::<Option<i64>, _>(column).map_err(sql_error);
    let get_u32 = |column: &str| -> Result<u32, CoreError> {
        let value = get_i64(column)?;
        u32::try_from(value).map_err(|_| corrupt(TABLE, format!("{column} = {value}")))
    };
    let optional_time = |column: &str| -> Result<Option<DateTime<Utc>>, CoreError> {
        get_opt(column)?.map(|ms| from_millis(TABLE, ms)).transpose()
    };
    let uuid = |column: &str| -> Result<Uuid, CoreError> {
        let text: String = row.try_get(column).map_err(sql_error)?;
        Uuid::parse_str(&text).map_err(|e| corrupt(TABLE, format!("{column}: {e}")))
    };

    let status: String = row.try_get("status").map_err(sql_error)?;
    Ok(RedditAccount {
        id: uuid("id")?,
        project_id: uuid("project_id")?,
        username: row.try_get("username").map_err(sql_error)?,
        karma_total: get_i64("karma_total")?,
        karma_comment: get_i64("karma_comment")?,
        karma_post: get_i64("karma_post")?,
        account_age_days: get_u32("account_age_days")?,
        daily_actions_count: get_u32("daily_actions_count")?,
        daily_actions_reset_at: optional_time("daily_actions_reset_at")?,
        health_score: row.try_get("health_score").map_err(sql_error)?,
        removal_rate: row.try_get("removal_rate").map_err(sql_error)?,
        status: AccountStatus::parse(&status)
            .ok_or_else(|| corrupt(TABLE, format!("unknown status {status}")))?,
        cooldown_until: optional_time("cooldown_until")?,
        last_used_at: optional_time("last_used_at")?,
        consecutive_failures: get_u32("consecutive_failures")?,
        subreddit_history: HashMap::new(),
    })
}

fn attach_activity(accounts: &mut [RedditAccount], rows: &[SqliteRow]) -> Result<(), CoreError> {
    const TABLE: &str = "account_subreddit_activity";
    for row in rows {
        let count = |column: &str| -> Result<u32, CoreError> {
            let value: i64 = row.try_get(column).map_err(sql_error)?;
            u32::try_from(value).map_err(|_| corrupt(TABLE, format!("{column} = {value}")))
        };
        let account_id: String = row.try_get("account_id").map_err(sql_error)?;
        let account_id = Uuid::parse_str(&account_id)
            .map_err(|e| corrupt(TABLE, format!("account_id: {e}")))?;
        let activity = SubredditActivity {
            posts: count("posts")?,
            successful_posts: count("successful_posts")?,
            karma: row.try_get("karma").map_err(sql_error)?,
        };
        if let Some(account) = accounts.iter_mut().find(|a| a.id == account_id) {
            let subreddit: String = row.try_get("subreddit").map_err(sql_error)?;
            account.subreddit_history.insert(subreddit, activity);
        }
    }
    Ok(())
}

impl AccountStore for Database {
    async fn list_accounts(&self, project_id: Uuid) -> Result<Vec<RedditAccount>, CoreError> {
        let rows = sqlx::query("SELECT * FROM reddit_accounts WHERE project_id = ? ORDER BY id")
            .bind(project_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(sql_error)?;
        let mut accounts = rows
            .iter()
            .map(account_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let activity = sqlx::query(
            "SELECT a.* FROM account_subreddit_activity a
             JOIN reddit_accounts r ON r.id = a.account_id
             WHERE r.project_id = ?",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(sql_error)?;
        attach_activity(&mut accounts, &activity)?;
        Ok(accounts)
    }

    async fn get_account(&self, account_id: Uuid) -> Result<Option<RedditAccount>, CoreError> {
        let row = sqlx::query("SELECT * FROM reddit_accounts WHERE id = ?")
            .bind(account_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_error)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut account = [account_from_row(&row)?];

        let activity = sqlx::query("SELECT * FROM account_subreddit_activity WHERE account_id = ?")
            .bind(account_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(sql_error)?;
        attach_activity(&mut account, &activity)?;
        let [account] = account;
        Ok(Some(account))
    }

    async fn try_reserve(&self, reservation: &Reservation) -> Result<bool, CoreError> {
        let now = reservation.now.timestamp_millis();
        let result = sqlx::query(
            "UPDATE reddit_accounts
             SET daily_actions_count = daily_actions_count + 1,
                 last_used_at = ?,
                 cooldown_until = ?
             WHERE id = ?
               AND daily_actions_count = ?
               AND daily_actions_count < ?
               AND status = 'active'
               AND health_score > 0
               AND (cooldown_until IS NULL OR cooldown_until <= ?)",
        )
        .bind(now)
        .bind(reservation.cooldown_until.timestamp_millis())
        .bind(reservation.account_id.to_string())
        .bind(i64::from(reservation.expected_daily_actions))
        .bind(i64::from(reservation.max_daily_actions))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(sql_error)?;
        self.guard_outcome(result, reservation.account_id).await
    }

    async fn apply_health(&self, update: &HealthUpdate) -> Result<bool, CoreError> {
        let extend = millis(update.extend_cooldown_to);
        let result = sqlx::query(
            "UPDATE reddit_accounts
             SET status = ?,
                 health_score = ?,
                 consecutive_failures = ?,
                 cooldown_until = CASE
                     WHEN ? IS NULL THEN cooldown_until
                     WHEN cooldown_until IS NULL OR cooldown_until < ? THEN ?
                     ELSE cooldown_until
                 END
             WHERE id = ?
               AND status = ?
               AND health_score = ?
               AND consecutive_failures = ?",
        )
        .bind(update.next.status.as_str())
        .bind(update.next.health_score)
        .bind(i64::from(update.next.consecutive_failures))
        .bind(extend)
        .bind(extend)
        .bind(extend)
        .bind(update.account_id.to_string())
        .bind(update.expected.status.as_str())
        .bind(update.expected.health_score)
        .bind(i64::from(update.expected.consecutive_failures))
        .execute(&self.pool)
        .await
        .map_err(sql_error)?;
        self.guard_outcome(result, update.account_id).await
    }

    async fn reset_daily_actions(&self, reset: &DailyReset) -> Result<bool, CoreError> {
        let result = sqlx::query(
            "UPDATE reddit_accounts
             SET daily_actions_count = ?, daily_actions_reset_at = ?
             WHERE id = ?
               AND daily_actions_count = ?
               AND daily_actions_reset_at IS ?",
        )
        .bind(i64::from(reset.daily_actions))
        .bind(reset.reset_at.timestamp_millis())
        .bind(reset.account_id.to_string())
        .bind(i64::from(reset.expected_daily_actions))
        .bind(millis(reset.expected_reset_at))
        .execute(&self.pool)
        .await
        .map_err(sql_error)?;
        self.guard_outcome(result, reset.account_id).await
    }

    async fn record_activity(
        &self,
        account_id: Uuid,
        subreddit: &str,
        delta: &SubredditActivity,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            "INSERT INTO account_subreddit_activity
                 (account_id, subreddit, posts, successful_posts, karma)
             SELECT ?, ?, ?, ?, ? WHERE EXISTS (SELECT 1 FROM reddit_accounts WHERE id = ?)
             ON CONFLICT(account_id, subreddit) DO UPDATE SET
                 posts = posts + excluded.posts,
                 successful_posts = successful_posts + excluded.successful_posts,
                 karma = karma + excluded.karma",
        )
        .bind(account_id.to_string())
        .bind(subreddit.to_lowercase())
        .bind(i64::from(delta.posts))
        .bind(i64::from(delta.successful_posts))
        .bind(delta.karma)
        .bind(account_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(sql_error)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound {
                resource: format!("account {account_id}"),
            });
        }
        Ok(())
    }

    async fn save_account(&self, account: &RedditAccount) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await.map_err(transaction_error)?;
        sqlx::query(
            "INSERT INTO reddit_accounts (
                 id, project_id, username, karma_total, karma_comment, karma_post,
                 account_age_days, daily_actions_count, daily_actions_reset_at, health_score,
                 removal_rate, status, cooldown_until, last_used_at, consecutive_failures
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 project_id = excluded.project_id,
                 username = excluded.username,
                 karma_total = excluded.karma_total,
                 karma_comment = excluded.karma_comment,
                 karma_post = excluded.karma_post,
                 account_age_days = excluded.account_age_days,
                 daily_actions_count = excluded.daily_actions_count,
                 daily_actions_reset_at = excluded.daily_actions_reset_at,
                 health_score = excluded.health_score,
                 removal_rate = excluded.removal_rate,
                 status = excluded.status,
                 cooldown_until = excluded.cooldown_until,
                 last_used_at = excluded.last_used_at,
                 consecutive_failures = excluded.consecutive_failures",
        )
        .bind(account.id.to_string())
        .bind(account.project_id.to_string())
        .bind(account.username.as_str())
        .bind(account.karma_total)
        .bind(account.karma_comment)
        .bind(account.karma_post)
        .bind(i64::from(account.account_age_days))
        .bind(i64::from(account.daily_actions_count))
        .bind(millis(account.daily_actions_reset_at))
        .bind(account.health_score)
        .bind(account.removal_rate)
        .bind(account.status.as_str())
        .bind(millis(account.cooldown_until))
        .bind(millis(account.last_used_at))
        .bind(i64::from(account.consecutive_failures))
        .execute(&mut *tx)
        .await
        .map_err(sql_error)?;

        sqlx::query("DELETE FROM account_subreddit_activity WHERE account_id = ?")
            .bind(account.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(sql_error)?;
        for (subreddit, activity) in &account.subreddit_history {
            sqlx::query(
                "INSERT INTO account_subreddit_activity
                     (account_id, subreddit, posts, successful_posts, karma)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(account.id.to_string())
            .bind(subreddit.to_lowercase())
            .bind(i64::from(activity.posts))
            .bind(i64::from(activity.successful_posts))
            .bind(activity.karma)
            .execute(&mut *tx)
            .await
            .map_err(sql_error)?;
        }
        tx.commit().await.map_err(transaction_error)?;
        Ok(())
    }
}

impl SnapshotStore for Database {
    async fn latest_snapshot(&self) -> Result<Option<LearningFeatureSnapshot>, CoreError> {
        const TABLE: &str = "learning_snapshots";
        let row = sqlx::query(
            "SELECT version, computed_at, window_days, features
             FROM learning_snapshots ORDER BY version DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let version: i64 = row.try_get("version").map_err(sql_error)?;
        let window_days: i64 = row.try_get("window_days").map_err(sql_error)?;
        let computed_at: i64 = row.try_get("computed_at").map_err(sql_error)?;
        let features: Vec<LearningFeature> = json_column(&row, TABLE, "features")?;

        Ok(Some(LearningFeatureSnapshot {
            version: u64::try_from(version)
                .map_err(|_| corrupt(TABLE, format!("version {version}")))?,
            computed_at: from_millis(TABLE, computed_at)?,
            window_days: u32::try_from(window_days)
                .map_err(|_| corrupt(TABLE, format!("window_days {window_days}")))?,
            features,
        }))
    }

    async fn append_snapshot(&self, snapshot: &LearningFeatureSnapshot) -> Result<(), CoreError> {
        let version = i64::try_from(snapshot.version).map_err(|_| {
            CoreError::invalid_input(format!("snapshot version {} too large", snapshot.version))
        })?;

        let mut tx = self.pool.begin().await.map_err(transaction_error)?;
        let latest: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM learning_snapshots")
            .fetch_one(&mut *tx)
            .await
            .map_err(sql_error)?;
        if let Some(latest) = latest {
            if version <= latest {
                return Err(DatabaseError::ConstraintViolation {
                    constraint: format!("snapshot version {version} must exceed {latest}"),
                }
                .into());
            }
        }

        sqlx::query(
            "INSERT INTO learning_snapshots (version, computed_at, window_days, features)
             VALUES (?, ?, ?, ?)",
        )
        .bind(version)
        .bind(snapshot.computed_at.timestamp_millis())
        .bind(i64::from(snapshot.window_days))
        .bind(serde_json::to_string(&snapshot.features)?)
        .execute(&mut *tx)
        .await
        .map_err(sql_error)?;
        tx.commit().await.map_err(transaction_error)?;

        info!(
            "Stored learning snapshot v{} with {} features",
            snapshot.version,
            snapshot.features.len()
        );
        Ok(())
    }
}

impl JobLock for Database {
    async fn try_acquire(
        &self,
        job: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            "INSERT INTO job_locks (job, holder, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(job) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at
             WHERE job_locks.holder = excluded.holder OR job_locks.expires_at <= ?",
        )
        .bind(job)
        .bind(holder)
        .bind((now + ttl).timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(sql_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, job: &str, holder: &str) -> Result<(), CoreError> {
        let result = sqlx::query("DELETE FROM job_locks WHERE job = ? AND holder = ?")
            .bind(job)
            .bind(holder)
            .execute(&self.pool)
            .await
            .map_err(sql_error)?;
        if result.rows_affected() == 0 {
            warn!("Lock {} was not held by {} at release", job, holder);
        }
        Ok(())
    }
}

impl OpportunityStore for Database {
    async fn known_post_ids(&self, project_id: Uuid) -> Result<HashSet<String>, CoreError> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT post_id FROM opportunities WHERE project_id = ?")
                .bind(project_id.to_string())
                .fetch_all(&self.pool)
                .await
                .map_err(sql_error)?;
        Ok(ids.into_iter().collect())
    }

    async fn save_opportunities(&self, opportunities: &[Opportunity]) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await.map_err(transaction_error)?;
        for opportunity in opportunities {
            sqlx::query(
                "INSERT INTO opportunities
                     (id, project_id, post_id, urgency_level, status, discovered_at, expires_at, body)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     urgency_level = excluded.urgency_level,
                     status = excluded.status,
                     expires_at = excluded.expires_at,
                     body = excluded.body",
            )
            .bind(opportunity.id.to_string())
            .bind(opportunity.project_id.to_string())
            .bind(opportunity.post_id.as_str())
            .bind(opportunity.urgency_level.as_str())
            .bind(opportunity.status.as_str())
            .bind(opportunity.discovered_at.timestamp_millis())
            .bind(opportunity.expires_at.timestamp_millis())
            .bind(serde_json::to_string(opportunity)?)
            .execute(&mut *tx)
            .await
            .map_err(sql_error)?;
        }
        tx.commit().await.map_err(transaction_error)?;
        Ok(())
    }
}

impl PerformanceStore for Database {
    async fn record_performance(
        &self,
        record: &PerformanceRecord,
    ) -> Result<Option<PerformanceRecord>, CoreError> {
        let mut tx = self.pool.begin().await.map_err(transaction_error)?;
        let previous: Option<PerformanceRecord> =
            sqlx::query("SELECT body FROM performance_records WHERE content_id = ?")
                .bind(record.content_id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(sql_error)?
                .map(|row| json_column(&row, "performance_records", "body"))
                .transpose()?;

        sqlx::query(
            "INSERT INTO performance_records (content_id, published_at, body) VALUES (?, ?, ?)
             ON CONFLICT(content_id) DO UPDATE SET
                 published_at = excluded.published_at,
                 body = excluded.body",
        )
        .bind(record.content_id.to_string())
        .bind(record.published_at.timestamp_millis())
        .bind(serde_json::to_string(record)?)
        .execute(&mut *tx)
        .await
        .map_err(sql_error)?;
        tx.commit().await.map_err(transaction_error)?;
        Ok(previous)
    }

    async fn performance_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerformanceRecord>, CoreError> {
        let rows = sqlx::query(
            "SELECT body FROM performance_records WHERE published_at >= ? ORDER BY published_at",
        )
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(sql_error)?;
        rows.iter()
            .map(|row| json_column(row, "performance_records", "body"))
            .collect()
    }
}

impl ProjectSource for Database {
    async fn active_projects(&self) -> Result<Vec<Project>, CoreError> {
        let rows = sqlx::query("SELECT definition FROM projects WHERE active = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(sql_error)?;
        rows.iter()
            .map(|row| json_column(row, "projects", "definition"))
            .collect()
    }
}
