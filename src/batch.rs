use adkuu_core::{BatchOutcome, CoreError, Opportunity, Project, RedditPost};
use chrono::{DateTime, Utc};
use llm_interface::RelevanceScorer;
use opportunity_engine::{OpportunityEngine, ProjectFilters};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct SubredditInput {
    pub name: String,
    pub subscriber_count: u64,
    #[serde(default)]
    pub velocity_threshold: Option<f64>,
}

/// A project with the posts to rank for it, as read from stdin.
#[derive(Debug, Clone, Deserialize)]
pub struct RankBatch {
    pub project: Project,
    #[serde(default)]
    pub subreddits: Vec<SubredditInput>,
    pub posts: Vec<RedditPost>,
}

/// Scores and ranks every post in `batch`. Posts that cannot be scored are
/// logged and left out.
pub async fn rank_batch<R: RelevanceScorer>(
    batch: RankBatch,
    engine: &OpportunityEngine,
    scorer: &R,
    now: DateTime<Utc>,
) -> Vec<Opportunity> {
    let profiles: HashMap<String, _> = batch
        .subreddits
        .iter()
        .map(|s| {
            let profile = engine.classifier().profile(
                s.name.clone(),
                s.subscriber_count,
                s.velocity_threshold,
            );
            (s.name.to_lowercase(), profile)
        })
        .collect();

    let mut outcome = BatchOutcome::new();
    for post in batch.posts {
        let post_id = post.id.clone();
        let Some(profile) = profiles.get(&post.subreddit.to_lowercase()) else {
            outcome.record(
                post_id,
                Err(CoreError::NotFound {
                    resource: format!("subreddit profile for r/{}", post.subreddit),
                }),
            );
            continue;
        };
        let scored = match scorer.score_relevance(&post, &batch.project).await {
            Ok(relevance) => engine.score_post(post, profile, relevance, now),
            Err(error) => Err(error),
        };
        outcome.record(post_id, scored);
    }

    let filters = ProjectFilters::from_project(&batch.project);
    let opportunities = engine.rank(outcome.succeeded, &filters);
    info!(
        "Ranked {} opportunities for {} ({} posts skipped)",
        opportunities.len(),
        batch.project.name,
        outcome.skipped.len()
    );
    opportunities
}

#[cfg(test)]
mod tests {
    use super::*;
    use adkuu_core::UrgencyLevel;
    use llm_interface::KeywordRelevanceScorer;

    const BATCH: &str = r#"{
        "project": {
            "id": "6f1c1e44-5d43-4f7a-9a57-1f6b0c7e2d10",
            "name": "tooling",
            "keywords": ["cargo", "workspace"],
            "negative_keywords": ["hiring"],
            "automation_level": 2,
            "posting_mode": {"mode": "rotate"}
        },
        "subreddits": [{"name": "rust", "subscriber_count": 20000}],
        "posts": [
            {"id": "a", "subreddit": "rust", "title": "Cargo workspace tips", "author": "x",
             "url": "https://reddit.com/a", "score": 80, "num_comments": 12,
             "created_utc": "2024-06-10T11:30:00Z"},
            {"id": "b", "subreddit": "rust", "title": "Hiring Rust devs", "author": "y",
             "url": "https://reddit.com/b", "score": 300, "num_comments": 40,
             "created_utc": "2024-06-10T11:30:00Z"},
            {"id": "c", "subreddit": "golang", "title": "Unknown subreddit", "author": "z",
             "url": "https://reddit.com/c", "score": 10, "num_comments": 1,
             "created_utc": "2024-06-10T11:00:00Z"}
        ]
    }"#;

    #[tokio::test]
    async fn test_rank_batch_from_json() {
        let batch: RankBatch = serde_json::from_str(BATCH).unwrap();
        let now = DateTime::parse_from_rfc3339("2024-06-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let opportunities = rank_batch(
            batch,
            &OpportunityEngine::default(),
            &KeywordRelevanceScorer::new(),
            now,
        )
        .await;

        assert_eq!(opportunities.len(), 1);
        assert_eq!(opportunities[0].post_id, "a");
        assert_eq!(opportunities[0].urgency_level, UrgencyLevel::Critical);
        assert_eq!(opportunities[0].relevance_score, 100.0);
    }
}
