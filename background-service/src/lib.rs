//! Scheduled batch work: opportunity mining, account upkeep, performance
//! feedback and learning feature recomputation.

pub mod feedback;
pub mod learning;
pub mod mining;

pub use feedback::{credit_between, PerformanceFeedback};
pub use learning::{
    compute_snapshot, is_success, ExplorationPolicy, LearningFeatureUpdater, LearningPriors,
    LEARNING_JOB, NEUTRAL_PRIOR,
};
pub use mining::{MiningReport, OpportunityMiner, PostSource};

use account_selector::refresh_stored_account;
use adkuu_core::store::{
    AccountStore, JobLock, OpportunityStore, PerformanceStore, ProjectSource, SnapshotStore,
};
use adkuu_core::{
    CoreError, EngineConfig, ErrorReporter, LearningConfig, LearningFeatureSnapshot, Project,
    SchedulerConfig,
};
use chrono::{DateTime, Utc};
use llm_interface::RelevanceScorer;
use opportunity_engine::OpportunityEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

pub struct BackgroundService<P, R, S> {
    store: Arc<S>,
    miner: OpportunityMiner<P, R, S>,
    learning: LearningFeatureUpdater<S>,
    learning_config: LearningConfig,
    scheduler: SchedulerConfig,
    reporter: ErrorReporter,
}

impl<P, R, S> BackgroundService<P, R, S>
where
    P: PostSource,
    R: RelevanceScorer,
    S: AccountStore + SnapshotStore + JobLock + OpportunityStore + PerformanceStore + ProjectSource,
{
    pub fn new(store: Arc<S>, source: P, scorer: R, config: &EngineConfig) -> Self {
        Self {
            miner: OpportunityMiner::new(
                source,
                scorer,
                store.clone(),
                OpportunityEngine::from_config(config),
                config.mining.clone(),
                &config.learning,
            ),
            learning: LearningFeatureUpdater::new(store.clone(), config.learning.clone()),
            store,
            learning_config: config.learning.clone(),
            scheduler: config.scheduler.clone(),
            reporter: ErrorReporter::new(),
        }
    }

    pub fn learning(&self) -> &LearningFeatureUpdater<S> {
        &self.learning
    }

    /// Runs mining and learning on their intervals until `shutdown` turns true
    /// or its sender is dropped. Both jobs run once immediately on start.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mining_every = Duration::from_secs(self.scheduler.mining_interval_minutes.max(1) * 60);
        let learning_every =
            Duration::from_secs(self.scheduler.learning_interval_hours.max(1) * 3600);

        let mut mining = tokio::time::interval(mining_every);
        mining.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut learning = tokio::time::interval(learning_every);
        learning.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Background service started (mining every {:?}, learning every {:?})",
            mining_every, learning_every
        );

        while !*shutdown.borrow() {
            tokio::select! {
                _ = mining.tick() => {
                    self.mining_pass(Utc::now()).await;
                }
                _ = learning.tick() => {
                    self.learning_pass(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Background service stopped");
    }

    /// Mines every active project with its learned priors. Per-project
    /// failures are reported and never stop the pass.
    pub async fn mining_pass(&self, now: DateTime<Utc>) -> Vec<MiningReport> {
        let projects = match self.store.active_projects().await {
            Ok(projects) => projects,
            Err(error) => {
                self.reporter.report(&error);
                return Vec::new();
            }
        };
        let Some(first) = projects.first() else {
            return Vec::new();
        };
        let latest = LearningPriors::from_latest(
            self.store.as_ref(),
            first.id,
            &self.learning_config,
            now,
            &self.reporter,
        )
        .await;

        let mut reports = Vec::with_capacity(projects.len());
        for project in &projects {
            if let Err(error) = self.maintain_accounts(project, now).await {
                self.reporter.report(&error);
            }
            let priors = latest.for_project(project.id);
            match self.miner.mine_project(project, &priors, now).await {
                Ok(report) => reports.push(report),
                Err(error) => self.reporter.report(&error),
            }
        }
        reports
    }

    /// Resets daily counters and lifts expired rate limits for the project's
    /// accounts. Returns how many accounts changed.
    ///
    /// Writes are guarded, so a reservation or publish landing meanwhile is
    /// kept and that account is left for the next pass.
    pub async fn maintain_accounts(
        &self,
        project: &Project,
        now: DateTime<Utc>,
    ) -> Result<usize, CoreError> {
        let mut changed = 0;
        for account in self.store.list_accounts(project.id).await? {
            if refresh_stored_account(self.store.as_ref(), &account, now).await? {
                changed += 1;
            }
        }
        if changed > 0 {
            debug!("Refreshed {} accounts for project {}", changed, project.name);
        }
        Ok(changed)
    }

    /// Recomputes learning features. A concurrent run elsewhere is not an error.
    pub async fn learning_pass(&self, now: DateTime<Utc>) -> Option<LearningFeatureSnapshot> {
        match self
            .learning
            .update_learning_features(self.learning_config.window_days, now)
            .await
        {
            Ok(snapshot) => Some(snapshot),
            Err(CoreError::JobAlreadyRunning { job }) => {
                info!("Skipping learning pass, {} is held elsewhere", job);
                None
            }
            Err(error) => {
                self.reporter.report(&error);
                None
            }
        }
    }
}
