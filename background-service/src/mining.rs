//! One mining pass per project: fetch rising posts, score relevance with
//! bounded concurrency, weigh it by learned subreddit priors, rank, and store
//! new opportunities with a suggested content style.

use crate::learning::{ExplorationPolicy, LearningPriors};
use adkuu_core::store::OpportunityStore;
use adkuu_core::{
    BatchOutcome, CoreError, ErrorRecovery, LearningConfig, MiningConfig, Opportunity, Project,
    RedditPost, SubredditProfile,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use llm_interface::RelevanceScorer;
use opportunity_engine::{OpportunityEngine, ProjectFilters, ScoredPost};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where rising posts come from. Implemented by the Reddit API client.
pub trait PostSource: Send + Sync {
    fn fetch_posts(
        &self,
        subreddit: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<RedditPost>, CoreError>> + Send;

    fn subscriber_count(
        &self,
        subreddit: &str,
    ) -> impl Future<Output = Result<u64, CoreError>> + Send;
}

#[derive(Debug, Default)]
pub struct MiningReport {
    pub project_id: Uuid,
    pub fetched: usize,
    pub fresh: usize,
    pub filtered: usize,
    /// `(post_id, reason)` for posts that failed scoring.
    pub skipped: Vec<(String, String)>,
    pub failed_subreddits: Vec<String>,
    pub opportunities: Vec<Opportunity>,
}

pub struct OpportunityMiner<P, R, S> {
    source: P,
    scorer: R,
    store: Arc<S>,
    engine: OpportunityEngine,
    config: MiningConfig,
    prior_weight: f64,
    exploration: Mutex<ExplorationPolicy>,
}

/// Takes posts round-robin across subreddits until `limit`, so one busy
/// subreddit cannot use up the whole run.
fn interleave<T>(groups: Vec<Vec<T>>, limit: usize) -> Vec<T> {
    let mut groups: Vec<std::vec::IntoIter<T>> = groups.into_iter().map(Vec::into_iter).collect();
    let mut taken = Vec::new();
    while taken.len() < limit {
        let before = taken.len();
        for group in groups.iter_mut() {
            if taken.len() == limit {
                break;
            }
            if let Some(item) = group.next() {
                taken.push(item);
            }
        }
        if taken.len() == before {
            break;
        }
    }
    taken
}

impl<P, R, S> OpportunityMiner<P, R, S>
where
    P: PostSource,
    R: RelevanceScorer,
    S: OpportunityStore,
{
    pub fn new(
        source: P,
        scorer: R,
        store: Arc<S>,
        engine: OpportunityEngine,
        config: MiningConfig,
        learning: &LearningConfig,
    ) -> Self {
        Self {
            source,
            scorer,
            store,
            engine,
            config,
            prior_weight: learning.prior_weight,
            exploration: Mutex::new(ExplorationPolicy::new(learning.epsilon)),
        }
    }

    #[cfg(test)]
    fn with_exploration(mut self, policy: ExplorationPolicy) -> Self {
        self.exploration = Mutex::new(policy);
        self
    }

    pub fn engine(&self) -> &OpportunityEngine {
        &self.engine
    }

    /// Mines every target subreddit of `project`, weighing relevance by the
    /// project's `priors`.
    ///
    /// A failing subreddit or post is recorded in the report and skipped; only
    /// store failures abort the run.
    pub async fn mine_project(
        &self,
        project: &Project,
        priors: &LearningPriors,
        now: DateTime<Utc>,
    ) -> Result<MiningReport, CoreError> {
        let mut report = MiningReport {
            project_id: project.id,
            ..MiningReport::default()
        };
        let filters = ProjectFilters::from_project(project);
        let mut seen = self.store.known_post_ids(project.id).await?;
        let mut per_subreddit: Vec<Vec<(RedditPost, SubredditProfile)>> = Vec::new();

        for subreddit in &project.target_subreddits {
            let fetched = ErrorRecovery::run(move || self.fetch_subreddit(subreddit), None)
                .await
                .into_result();
            let (profile, posts) = match fetched {
                Ok(fetched) => fetched,
                Err(error) => {
                    warn!("Skipping r/{} for project {}: {}", subreddit, project.name, error);
                    report.failed_subreddits.push(subreddit.clone());
                    continue;
                }
            };

            let mut candidates = Vec::new();
            for post in posts {
                report.fetched += 1;
                if post.age_hours(now) > self.config.max_post_age_hours {
                    debug!("Post {} is older than the mining window", post.id);
                    continue;
                }
                if !seen.insert(post.id.clone()) {
                    continue;
                }
                if let Err(rejection) = filters.admits(&post) {
                    debug!("Post {} filtered: {}", post.id, rejection);
                    report.filtered += 1;
                    continue;
                }
                candidates.push((post, profile.clone()));
            }
            per_subreddit.push(candidates);
        }

        let candidates = interleave(per_subreddit, self.config.max_posts_per_run);
        report.fresh = candidates.len();

        let timeout = Duration::from_secs(self.config.relevance_timeout_secs.max(1));
        let scored: Vec<(String, Result<ScoredPost, CoreError>)> = stream::iter(candidates)
            .map(|(post, profile)| async move {
                let post_id = post.id.clone();
                let result = self
                    .relevance_for(&post, project, timeout)
                    .await
                    .map(|relevance| {
                        priors.weigh_relevance(&post.subreddit, relevance, self.prior_weight)
                    })
                    .and_then(|relevance| self.engine.score_post(post, &profile, relevance, now));
                (post_id, result)
            })
            .buffer_unordered(self.config.relevance_concurrency.max(1))
            .collect()
            .await;

        let mut outcome = BatchOutcome::new();
        for (post_id, result) in scored {
            outcome.record(post_id, result);
        }
        report.skipped = outcome
            .skipped
            .iter()
            .map(|(post_id, error)| (post_id.clone(), error.to_string()))
            .collect();

        let mut opportunities = self.engine.rank(outcome.succeeded, &filters);
        {
            let mut exploration = self
                .exploration
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for opportunity in &mut opportunities {
                opportunity.suggested_style = Some(exploration.choose_style(priors));
            }
        }
        if !opportunities.is_empty() {
            self.store.save_opportunities(&opportunities).await?;
        }

        info!(
            "Mined project {}: {} fetched, {} fresh, {} skipped, {} new opportunities",
            project.name,
            report.fetched,
            report.fresh,
            report.skipped.len(),
            opportunities.len()
        );
        report.opportunities = opportunities;
        Ok(report)
    }

    async fn fetch_subreddit(
        &self,
        subreddit: &str,
    ) -> Result<(SubredditProfile, Vec<RedditPost>), CoreError> {
        let subscribers = self.source.subscriber_count(subreddit).await?;
        let profile = self.engine.classifier().profile(subreddit, subscribers, None);
        let posts = self
            .source
            .fetch_posts(subreddit, self.config.max_posts_per_run)
            .await?;
        Ok((profile, posts))
    }

    async fn relevance_for(
        &self,
        post: &RedditPost,
        project: &Project,
        timeout: Duration,
    ) -> Result<f64, CoreError> {
        ErrorRecovery::run(
            move || async move {
                tokio::time::timeout(timeout, self.scorer.score_relevance(post, project))
                    .await
                    .unwrap_or_else(|_| {
                        Err(CoreError::Timeout {
                            seconds: timeout.as_secs(),
                        })
                    })
            },
            None,
        )
        .await
        .into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::compute_snapshot;
    use adkuu_core::store::MemoryStore;
    use adkuu_core::{
        AutomationLevel, ContentStyle, PerformanceRecord, PostingMode, QualityThresholds,
        UrgencyLevel,
    };
    use chrono::Duration as ChronoDuration;
    use std::collections::HashMap;

    struct FakeSource {
        posts: HashMap<String, Vec<RedditPost>>,
    }

    impl PostSource for FakeSource {
        async fn fetch_posts(
            &self,
            subreddit: &str,
            _limit: usize,
        ) -> Result<Vec<RedditPost>, CoreError> {
            self.posts
                .get(subreddit)
                .cloned()
                .ok_or_else(|| CoreError::NotFound {
                    resource: format!("r/{subreddit}"),
                })
        }

        async fn subscriber_count(&self, subreddit: &str) -> Result<u64, CoreError> {
            match subreddit {
                "rust" => Ok(20_000),
                _ => Ok(3_000_000),
            }
        }
    }

    /// Relevance from the post title; titles containing "broken" fail.
    struct TitleScorer;

    impl RelevanceScorer for TitleScorer {
        async fn score_relevance(
            &self,
            post: &RedditPost,
            _project: &Project,
        ) -> Result<f64, CoreError> {
            if post.title.contains("broken") {
                return Err(CoreError::invalid_input("unparseable relevance reply"));
            }
            Ok(if post.title.contains("workspace") { 90.0 } else { 40.0 })
        }

        fn name(&self) -> &str {
            "title"
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_718_000_000, 0).unwrap()
    }

    fn post(id: &str, subreddit: &str, title: &str, score: i64, age_minutes: i64) -> RedditPost {
        RedditPost {
            id: id.to_string(),
            subreddit: subreddit.to_string(),
            title: title.to_string(),
            content: None,
            author: "someone".to_string(),
            url: format!("https://reddit.com/r/{subreddit}/{id}"),
            score,
            num_comments: 10,
            created_utc: now() - ChronoDuration::minutes(age_minutes),
            language: None,
        }
    }

    fn project() -> Project {
        Project {
            id: Uuid::new_v4(),
            name: "demo".to_string(),
            keywords: vec!["workspace".to_string()],
            negative_keywords: vec!["hiring".to_string()],
            allowed_languages: Vec::new(),
            target_subreddits: vec!["rust".to_string(), "programming".to_string(), "gone".to_string()],
            automation_level: AutomationLevel::Assisted,
            posting_mode: PostingMode::Rotate,
            quality_thresholds: QualityThresholds::default(),
        }
    }

    fn miner(store: Arc<MemoryStore>) -> OpportunityMiner<FakeSource, TitleScorer, MemoryStore> {
        let mut posts = HashMap::new();
        posts.insert(
            "rust".to_string(),
            vec![
                post("r1", "rust", "Cargo workspace layout", 60, 30),
                post("r2", "rust", "Weekly thread", 5, 120),
                post("r3", "rust", "Old workspace question", 500, 60 * 30),
                post("r4", "rust", "We are hiring", 100, 20),
                post("r5", "rust", "broken relevance", 100, 20),
                post("r6", "rust", "From the future", 10, -30),
            ],
        );
        posts.insert(
            "programming".to_string(),
            vec![
                post("p1", "programming", "Monorepo workspace tooling", 300, 60),
                // Cross-posted id already seen in r/rust.
                post("r1", "programming", "Cargo workspace layout", 60, 30),
            ],
        );
        OpportunityMiner::new(
            FakeSource { posts },
            TitleScorer,
            store,
            OpportunityEngine::default(),
            MiningConfig::default(),
            &LearningConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_mining_isolates_failures() {
        let store = Arc::new(MemoryStore::new());
        let miner = miner(store.clone());
        let project = project();

        let neutral = LearningPriors::neutral();
        let report = miner.mine_project(&project, &neutral, now()).await.unwrap();
        assert_eq!(report.fetched, 8);
        assert_eq!(report.failed_subreddits, vec!["gone".to_string()]);
        assert_eq!(report.filtered, 1);
        // r1, r2, r5, r6 from r/rust and p1; r3 is too old, r4 filtered.
        assert_eq!(report.fresh, 5);

        let mut skipped: Vec<&str> = report.skipped.iter().map(|(id, _)| id.as_str()).collect();
        skipped.sort();
        assert_eq!(skipped, vec!["r5", "r6"]);

        let ids: Vec<&str> = report
            .opportunities
            .iter()
            .map(|o| o.post_id.as_str())
            .collect();
        assert_eq!(ids.len(), 3);
        // Only r1 is both young and fast for its small subreddit.
        assert_eq!(ids[0], "r1");
        assert_eq!(report.opportunities[0].urgency_level, UrgencyLevel::Critical);
        assert!(report.opportunities.iter().all(|o| o.project_id == project.id));

        assert_eq!(store.opportunities().await.len(), 3);
    }

    #[tokio::test]
    async fn test_second_run_skips_known_posts() {
        let store = Arc::new(MemoryStore::new());
        let miner = miner(store.clone());
        let project = project();

        let neutral = LearningPriors::neutral();
        miner.mine_project(&project, &neutral, now()).await.unwrap();
        let report = miner.mine_project(&project, &neutral, now()).await.unwrap();
        // Stored posts are not re-scored; the two that failed scoring are retried.
        assert_eq!(report.fresh, 2);
        assert!(report.opportunities.is_empty());
        assert_eq!(store.opportunities().await.len(), 3);
    }

    #[tokio::test]
    async fn test_per_run_limit() {
        let store = Arc::new(MemoryStore::new());
        let mut miner = miner(store);
        miner.config.max_posts_per_run = 2;
        let report = miner
            .mine_project(&project(), &LearningPriors::neutral(), now())
            .await
            .unwrap();
        assert_eq!(report.fresh, 2);
        // The budget is shared: r/rust does not crowd out r/programming.
        let mut ids: Vec<&str> = report
            .opportunities
            .iter()
            .map(|o| o.post_id.as_str())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["p1", "r1"]);
    }

    #[test]
    fn test_interleave_round_robin() {
        let groups = vec![vec![1, 2, 3, 4], vec![10], vec![], vec![20, 21]];
        assert_eq!(interleave(groups.clone(), 5), vec![1, 10, 20, 2, 21]);
        assert_eq!(interleave(groups.clone(), 100), vec![1, 10, 20, 2, 21, 3, 4]);
        assert!(interleave(groups, 0).is_empty());
    }

    #[tokio::test]
    async fn test_priors_weigh_relevance_and_suggest_style() {
        let store = Arc::new(MemoryStore::new());
        let project = project();
        let record = |subreddit: &str, style: ContentStyle, score: i64| PerformanceRecord {
            content_id: Uuid::new_v4(),
            project_id: project.id,
            account_id: None,
            subreddit: subreddit.to_string(),
            style,
            published_at: now() - ChronoDuration::hours(3),
            score,
            engagement: 1,
            removed: false,
        };
        let records: Vec<PerformanceRecord> = (0..3)
            .flat_map(|_| {
                [
                    record("rust", ContentStyle::Casual, 0),
                    record("programming", ContentStyle::Storytelling, 20),
                ]
            })
            .collect();
        let snapshot = compute_snapshot(&records, 7, now(), 1, &LearningConfig::default());
        let priors = LearningPriors::from_snapshot(snapshot, project.id);

        let miner = miner(store).with_exploration(ExplorationPolicy::with_seed(0.0, 3));
        let report = miner.mine_project(&project, &priors, now()).await.unwrap();

        let relevance: HashMap<&str, f64> = report
            .opportunities
            .iter()
            .map(|o| (o.post_id.as_str(), o.relevance_score))
            .collect();
        // r/rust never succeeded, r/programming always did; weight 0.2.
        assert!((relevance["r1"] - 72.0).abs() < 1e-9);
        assert!((relevance["r2"] - 32.0).abs() < 1e-9);
        assert_eq!(relevance["p1"], 100.0);
        assert!(report
            .opportunities
            .iter()
            .all(|o| o.suggested_style == Some(ContentStyle::Storytelling)));

        // Another project's history leaves relevance untouched.
        let stranger = Project {
            id: Uuid::new_v4(),
            ..project.clone()
        };
        let report = miner
            .mine_project(&stranger, &priors.for_project(stranger.id), now())
            .await
            .unwrap();
        let r1 = report.opportunities.iter().find(|o| o.post_id == "r1").unwrap();
        assert_eq!(r1.relevance_score, 90.0);
    }
}
