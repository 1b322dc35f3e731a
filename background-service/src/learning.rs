//! Learning feature recomputation and the priors read back by scoring.

use adkuu_core::store::{JobLock, PerformanceStore, SnapshotStore};
use adkuu_core::{
    ContentStyle, CoreError, ErrorReporter, FeatureType, LearningConfig, LearningFeature,
    LearningFeatureSnapshot, PerformanceRecord,
};
use chrono::{DateTime, Duration, Timelike, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const LEARNING_JOB: &str = "update_learning_features";

/// Prior used for any arm without enough history.
pub const NEUTRAL_PRIOR: f64 = 0.5;

#[derive(Debug, Default)]
struct Tally {
    samples: u32,
    successes: u32,
    removed: u32,
    score_sum: f64,
    engagement_sum: f64,
}

impl Tally {
    fn add(&mut self, record: &PerformanceRecord, success: bool) {
        self.samples += 1;
        if success {
            self.successes += 1;
        }
        if record.removed {
            self.removed += 1;
        }
        self.score_sum += record.score as f64;
        self.engagement_sum += f64::from(record.engagement);
    }

    fn into_feature(
        self,
        project_id: Uuid,
        feature_type: FeatureType,
        key: String,
    ) -> LearningFeature {
        let n = f64::from(self.samples);
        LearningFeature {
            project_id,
            feature_type,
            key,
            sample_count: self.samples,
            success_count: self.successes,
            success_rate: f64::from(self.successes) / n,
            avg_score: self.score_sum / n,
            avg_engagement: self.engagement_sum / n,
            removal_rate: f64::from(self.removed) / n,
        }
    }
}

pub fn is_success(record: &PerformanceRecord, config: &LearningConfig) -> bool {
    record.score >= config.success_score_threshold && !record.removed
}

/// Aggregates the records published in `[now - window_days, now]` into a
/// snapshot. Features are tallied per project and ordered by project, type,
/// then key.
pub fn compute_snapshot(
    records: &[PerformanceRecord],
    window_days: u32,
    now: DateTime<Utc>,
    version: u64,
    config: &LearningConfig,
) -> LearningFeatureSnapshot {
    let since = now - Duration::days(i64::from(window_days));
    let mut tallies: BTreeMap<(Uuid, FeatureType, String), Tally> = BTreeMap::new();

    for record in records
        .iter()
        .filter(|r| r.published_at >= since && r.published_at <= now)
    {
        let success = is_success(record, config);
        let project = record.project_id;
        let keys = [
            (project, FeatureType::Subreddit, record.subreddit.to_lowercase()),
            (project, FeatureType::ContentStyle, record.style.as_str().to_string()),
            (project, FeatureType::Timing, record.published_at.hour().to_string()),
        ];
        for key in keys {
            tallies.entry(key).or_default().add(record, success);
        }
    }

    let features: Vec<LearningFeature> = tallies
        .into_iter()
        .filter(|(_, tally)| tally.samples >= config.min_samples.max(1))
        .map(|((project_id, feature_type, key), tally)| {
            tally.into_feature(project_id, feature_type, key)
        })
        .collect();

    LearningFeatureSnapshot {
        version,
        computed_at: now,
        window_days,
        features,
    }
}

/// Recomputes learning features as an exclusive batch job.
pub struct LearningFeatureUpdater<S> {
    store: Arc<S>,
    config: LearningConfig,
    holder: String,
}

impl<S> LearningFeatureUpdater<S>
where
    S: SnapshotStore + JobLock + PerformanceStore,
{
    pub fn new(store: Arc<S>, config: LearningConfig) -> Self {
        Self {
            store,
            config,
            holder: format!("learning-{}", Uuid::new_v4()),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Appends a new snapshot computed over the trailing `window_days`.
    ///
    /// Fails with `JobAlreadyRunning` while another holder owns the job lock.
    pub async fn update_learning_features(
        &self,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> Result<LearningFeatureSnapshot, CoreError> {
        if window_days == 0 {
            return Err(CoreError::invalid_input("learning window must be at least one day"));
        }

        let ttl = Duration::minutes(i64::from(self.config.lock_ttl_minutes.max(1)));
        if !self
            .store
            .try_acquire(LEARNING_JOB, &self.holder, ttl, now)
            .await?
        {
            return Err(CoreError::JobAlreadyRunning {
                job: LEARNING_JOB.to_string(),
            });
        }

        let result = self.compute_and_append(window_days, now).await;

        if let Err(release_error) = self.store.release(LEARNING_JOB, &self.holder).await {
            warn!(
                "Failed to release {} lock, it expires on its own: {}",
                LEARNING_JOB, release_error
            );
        }
        result
    }

    async fn compute_and_append(
        &self,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> Result<LearningFeatureSnapshot, CoreError> {
        let since = now - Duration::days(i64::from(window_days));
        let records = self.store.performance_since(since).await?;
        let version = self
            .store
            .latest_snapshot()
            .await?
            .map(|s| s.version + 1)
            .unwrap_or(1);

        let snapshot = compute_snapshot(&records, window_days, now, version, &self.config);
        self.store.append_snapshot(&snapshot).await?;

        info!(
            "Learning snapshot v{}: {} features from {} records over {} days",
            snapshot.version,
            snapshot.features.len(),
            records.len(),
            window_days
        );
        Ok(snapshot)
    }
}

/// One project's success-rate priors from the latest snapshot, neutral where
/// unknown.
#[derive(Debug, Clone, Default)]
pub struct LearningPriors {
    project_id: Uuid,
    snapshot: Option<Arc<LearningFeatureSnapshot>>,
}

impl LearningPriors {
    pub fn neutral() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: LearningFeatureSnapshot, project_id: Uuid) -> Self {
        Self {
            project_id,
            snapshot: Some(Arc::new(snapshot)),
        }
    }

    /// The same snapshot read for another project.
    pub fn for_project(&self, project_id: Uuid) -> Self {
        Self {
            project_id,
            snapshot: self.snapshot.clone(),
        }
    }

    /// Loads the latest snapshot. Staleness and read failures are reported,
    /// never raised: scoring continues with what is available.
    pub async fn from_latest<S: SnapshotStore>(
        store: &S,
        project_id: Uuid,
        config: &LearningConfig,
        now: DateTime<Utc>,
        reporter: &ErrorReporter,
    ) -> Self {
        let snapshot = match store.latest_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                reporter.report(&error);
                return Self::neutral().for_project(project_id);
            }
        };

        match snapshot {
            Some(snapshot) => {
                let age_hours = snapshot.age_hours(now);
                if age_hours > config.max_snapshot_age_hours as f64 {
                    reporter.report(&CoreError::StaleSnapshot {
                        version: snapshot.version,
                        age_hours,
                        max_age_hours: config.max_snapshot_age_hours,
                    });
                }
                Self::from_snapshot(snapshot, project_id)
            }
            None => {
                debug!("No learning snapshot yet, using neutral priors");
                Self::neutral().for_project(project_id)
            }
        }
    }

    pub fn version(&self) -> Option<u64> {
        self.snapshot.as_ref().map(|s| s.version)
    }

    pub fn prior(&self, feature_type: FeatureType, key: &str) -> f64 {
        self.snapshot
            .as_ref()
            .and_then(|s| s.feature(self.project_id, feature_type, key))
            .map(|f| f.success_rate)
            .unwrap_or(NEUTRAL_PRIOR)
    }

    pub fn subreddit_prior(&self, subreddit: &str) -> f64 {
        self.prior(FeatureType::Subreddit, &subreddit.to_lowercase())
    }

    pub fn style_prior(&self, style: ContentStyle) -> f64 {
        self.prior(FeatureType::ContentStyle, style.as_str())
    }

    pub fn timing_prior(&self, hour: u32) -> f64 {
        self.prior(FeatureType::Timing, &hour.to_string())
    }

    /// Scales `relevance` by the subreddit prior. A prior of 1.0 multiplies
    /// it by `1 + weight`, 0.0 by `1 - weight`; neutral leaves it unchanged.
    pub fn weigh_relevance(&self, subreddit: &str, relevance: f64, weight: f64) -> f64 {
        let lean = (self.subreddit_prior(subreddit) - NEUTRAL_PRIOR) * 2.0;
        (relevance * (1.0 + weight * lean)).clamp(0.0, 100.0)
    }
}

/// Epsilon-greedy choice between arms scored by success rate.
pub struct ExplorationPolicy {
    epsilon: f64,
    rng: fastrand::Rng,
}

impl ExplorationPolicy {
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon: epsilon.clamp(0.0, 1.0),
            rng: fastrand::Rng::new(),
        }
    }

    pub fn with_seed(epsilon: f64, seed: u64) -> Self {
        Self {
            epsilon: epsilon.clamp(0.0, 1.0),
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Index of the chosen arm; greedy ties go to the lowest index.
    pub fn choose(&mut self, rates: &[f64]) -> Option<usize> {
        if rates.is_empty() {
            return None;
        }
        if self.rng.f64() < self.epsilon {
            return Some(self.rng.usize(..rates.len()));
        }

        let mut best = 0;
        for (index, rate) in rates.iter().enumerate().skip(1) {
            if rate.total_cmp(&rates[best]).is_gt() {
                best = index;
            }
        }
        Some(best)
    }

    pub fn choose_style(&mut self, priors: &LearningPriors) -> ContentStyle {
        let rates: Vec<f64> = ContentStyle::ALL
            .iter()
            .map(|style| priors.style_prior(*style))
            .collect();
        self.choose(&rates)
            .map(|index| ContentStyle::ALL[index])
            .unwrap_or(ContentStyle::HelpfulExpert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adkuu_core::store::MemoryStore;
    use chrono::TimeZone;

    const PROJECT: Uuid = Uuid::from_u128(0xadc0);

    fn record(
        subreddit: &str,
        style: ContentStyle,
        published_at: DateTime<Utc>,
        score: i64,
        removed: bool,
    ) -> PerformanceRecord {
        PerformanceRecord {
            content_id: Uuid::new_v4(),
            project_id: PROJECT,
            account_id: None,
            subreddit: subreddit.to_string(),
            style,
            published_at,
            score,
            engagement: 4,
            removed,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_compute_snapshot_aggregates_by_feature() {
        let at_nine = Utc.with_ymd_and_hms(2024, 6, 9, 9, 30, 0).unwrap();
        let records = vec![
            record("Rust", ContentStyle::Technical, at_nine, 10, false),
            record("rust", ContentStyle::Technical, at_nine, 2, false),
            record("rust", ContentStyle::Casual, at_nine, 50, true),
            // Outside the window.
            record("rust", ContentStyle::Technical, now() - Duration::days(8), 99, false),
        ];

        let snapshot = compute_snapshot(&records, 7, now(), 3, &LearningConfig::default());
        assert_eq!(snapshot.version, 3);
        assert_eq!(snapshot.computed_at, now());

        let rust = snapshot.feature(PROJECT, FeatureType::Subreddit, "rust").unwrap();
        assert_eq!(rust.sample_count, 3);
        assert_eq!(rust.success_count, 1);
        assert!((rust.success_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((rust.avg_score - 62.0 / 3.0).abs() < 1e-9);
        assert!((rust.removal_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(rust.avg_engagement, 4.0);

        let nine = snapshot.feature(PROJECT, FeatureType::Timing, "9").unwrap();
        assert_eq!(nine.sample_count, 3);

        // Two technical and one casual sample: below min_samples of 3.
        assert!(snapshot.feature(PROJECT, FeatureType::ContentStyle, "technical").is_none());
        assert!(snapshot.feature(PROJECT, FeatureType::ContentStyle, "casual").is_none());
    }

    #[test]
    fn test_success_threshold_is_inclusive() {
        let config = LearningConfig::default();
        assert!(is_success(&record("a", ContentStyle::Casual, now(), 5, false), &config));
        assert!(!is_success(&record("a", ContentStyle::Casual, now(), 4, false), &config));
        assert!(!is_success(&record("a", ContentStyle::Casual, now(), 500, true), &config));
    }

    #[tokio::test]
    async fn test_update_appends_increasing_versions() {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..3 {
            store
                .record_performance(&record(
                    "rust",
                    ContentStyle::HelpfulExpert,
                    now() - Duration::hours(5),
                    8,
                    false,
                ))
                .await
                .unwrap();
        }
        let updater = LearningFeatureUpdater::new(store.clone(), LearningConfig::default());

        let first = updater.update_learning_features(7, now()).await.unwrap();
        let second = updater
            .update_learning_features(7, now() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(store.snapshot_count().await, 2);
        assert_eq!(
            first
                .feature(PROJECT, FeatureType::ContentStyle, "helpful_expert")
                .unwrap()
                .success_rate,
            1.0
        );
    }

    #[tokio::test]
    async fn test_update_refuses_while_lock_held() {
        let store = Arc::new(MemoryStore::new());
        store
            .try_acquire(LEARNING_JOB, "someone-else", Duration::minutes(30), now())
            .await
            .unwrap();
        let updater = LearningFeatureUpdater::new(store.clone(), LearningConfig::default());

        let err = updater.update_learning_features(7, now()).await.unwrap_err();
        assert!(matches!(err, CoreError::JobAlreadyRunning { .. }));
        assert_eq!(store.snapshot_count().await, 0);

        // Once the other holder's lease lapses the job proceeds.
        let later = now() + Duration::minutes(45);
        assert!(updater.update_learning_features(7, later).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_releases_lock_after_run() {
        let store = Arc::new(MemoryStore::new());
        let updater = LearningFeatureUpdater::new(store.clone(), LearningConfig::default());
        updater.update_learning_features(7, now()).await.unwrap();

        assert!(store
            .try_acquire(LEARNING_JOB, "next", Duration::minutes(30), now())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_update_rejects_empty_window() {
        let store = Arc::new(MemoryStore::new());
        let updater = LearningFeatureUpdater::new(store, LearningConfig::default());
        let err = updater.update_learning_features(0, now()).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_priors_from_latest() {
        let store = MemoryStore::new();
        let config = LearningConfig::default();
        let reporter = ErrorReporter::new();

        let priors = LearningPriors::from_latest(&store, PROJECT, &config, now(), &reporter).await;
        assert_eq!(priors.version(), None);
        assert_eq!(priors.subreddit_prior("rust"), NEUTRAL_PRIOR);

        let records: Vec<PerformanceRecord> = (0..4)
            .map(|i| record("rust", ContentStyle::Casual, now(), if i == 0 { 0 } else { 10 }, false))
            .collect();
        let snapshot = compute_snapshot(&records, 7, now(), 1, &config);
        store.append_snapshot(&snapshot).await.unwrap();

        // A week-old snapshot is stale but still used.
        let later = now() + Duration::days(7);
        let priors = LearningPriors::from_latest(&store, PROJECT, &config, later, &reporter).await;
        assert_eq!(priors.version(), Some(1));
        assert_eq!(priors.subreddit_prior("Rust"), 0.75);
        assert_eq!(priors.style_prior(ContentStyle::Casual), 0.75);
        assert_eq!(priors.style_prior(ContentStyle::Technical), NEUTRAL_PRIOR);
        assert_eq!(priors.timing_prior(12), 0.75);

        let other = priors.for_project(Uuid::new_v4());
        assert_eq!(other.version(), Some(1));
        assert_eq!(other.subreddit_prior("rust"), NEUTRAL_PRIOR);
    }

    #[test]
    fn test_weigh_relevance() {
        let records: Vec<PerformanceRecord> = (0..3)
            .map(|_| record("rust", ContentStyle::Casual, now(), 10, false))
            .chain((0..3).map(|_| record("golang", ContentStyle::Casual, now(), 0, false)))
            .collect();
        let snapshot = compute_snapshot(&records, 7, now(), 1, &LearningConfig::default());
        let priors = LearningPriors::from_snapshot(snapshot, PROJECT);

        assert!((priors.weigh_relevance("rust", 50.0, 0.2) - 60.0).abs() < 1e-9);
        assert!((priors.weigh_relevance("golang", 50.0, 0.2) - 40.0).abs() < 1e-9);
        assert_eq!(priors.weigh_relevance("python", 50.0, 0.2), 50.0);
        assert_eq!(priors.weigh_relevance("rust", 95.0, 0.2), 100.0);
        assert_eq!(priors.weigh_relevance("golang", 50.0, 0.0), 50.0);
    }

    #[test]
    fn test_features_are_scoped_per_project() {
        let other = Uuid::from_u128(0xbeef);
        let at = now() - Duration::hours(2);
        let mut records: Vec<PerformanceRecord> = (0..3)
            .map(|_| record("rust", ContentStyle::Casual, at, 10, false))
            .collect();
        records.extend((0..3).map(|_| PerformanceRecord {
            project_id: other,
            ..record("rust", ContentStyle::Casual, at, 0, true)
        }));

        let snapshot = compute_snapshot(&records, 7, now(), 1, &LearningConfig::default());
        let ours = snapshot.feature(PROJECT, FeatureType::Subreddit, "rust").unwrap();
        let theirs = snapshot.feature(other, FeatureType::Subreddit, "rust").unwrap();
        assert_eq!((ours.sample_count, ours.success_count), (3, 3));
        assert_eq!((theirs.sample_count, theirs.success_count), (3, 0));
        assert_eq!(theirs.removal_rate, 1.0);

        let priors = LearningPriors::from_snapshot(snapshot, PROJECT);
        assert_eq!(priors.subreddit_prior("rust"), 1.0);
        assert_eq!(priors.for_project(other).subreddit_prior("rust"), 0.0);
        assert_eq!(
            priors.for_project(Uuid::new_v4()).style_prior(ContentStyle::Casual),
            NEUTRAL_PRIOR
        );
    }

    #[test]
    fn test_exploration_policy_greedy_and_exploring() {
        let mut greedy = ExplorationPolicy::with_seed(0.0, 7);
        assert_eq!(greedy.choose(&[]), None);
        assert_eq!(greedy.choose(&[0.2, 0.9, 0.9, 0.1]), Some(1));

        let mut explorer = ExplorationPolicy::with_seed(1.0, 7);
        let picks: std::collections::HashSet<usize> =
            (0..200).filter_map(|_| explorer.choose(&[0.2, 0.9, 0.4])).collect();
        assert_eq!(picks.len(), 3);

        let mut a = ExplorationPolicy::with_seed(0.5, 42);
        let mut b = ExplorationPolicy::with_seed(0.5, 42);
        let rates = [0.1, 0.3, 0.2];
        for _ in 0..20 {
            assert_eq!(a.choose(&rates), b.choose(&rates));
        }
    }

    #[test]
    fn test_choose_style_prefers_best_prior() {
        let snapshot = LearningFeatureSnapshot {
            version: 1,
            computed_at: now(),
            window_days: 7,
            features: vec![LearningFeature {
                project_id: PROJECT,
                feature_type: FeatureType::ContentStyle,
                key: "storytelling".to_string(),
                sample_count: 10,
                success_count: 9,
                success_rate: 0.9,
                avg_score: 20.0,
                avg_engagement: 3.0,
                removal_rate: 0.0,
            }],
        };
        let priors = LearningPriors::from_snapshot(snapshot, PROJECT);
        let mut policy = ExplorationPolicy::with_seed(0.0, 1);
        assert_eq!(policy.choose_style(&priors), ContentStyle::Storytelling);
        assert_eq!(ExplorationPolicy::new(3.0).epsilon(), 1.0);
    }
}
