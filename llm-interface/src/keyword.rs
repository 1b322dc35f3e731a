use crate::RelevanceScorer;
use adkuu_core::{CoreError, Project, RedditPost};

/// Score used when a project has no keywords to match against.
pub const NO_KEYWORDS_SCORE: f64 = 50.0;
const NEGATIVE_PENALTY: f64 = 20.0;

/// Offline scorer: share of project keywords present in the post.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordRelevanceScorer;

impl KeywordRelevanceScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, post: &RedditPost, project: &Project) -> f64 {
        if project.keywords.is_empty() {
            return NO_KEYWORDS_SCORE;
        }

        let text = post.searchable_text();
        let matches = |keywords: &[String]| {
            keywords
                .iter()
                .filter(|k| !k.trim().is_empty() && text.contains(&k.trim().to_lowercase()))
                .count()
        };

        let positive = matches(project.keywords.as_slice());
        if positive == 0 {
            return 0.0;
        }
        let negative = matches(project.negative_keywords.as_slice());

        let share = positive as f64 / project.keywords.len() as f64 * 100.0;
        (share - negative as f64 * NEGATIVE_PENALTY).clamp(0.0, 100.0)
    }
}

impl RelevanceScorer for KeywordRelevanceScorer {
    async fn score_relevance(&self, post: &RedditPost, project: &Project) -> Result<f64, CoreError> {
        Ok(self.score(post, project))
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adkuu_core::{AutomationLevel, PostingMode, QualityThresholds};
    use chrono::Utc;
    use uuid::Uuid;

    fn project(keywords: &[&str], negative: &[&str]) -> Project {
        Project {
            id: Uuid::new_v4(),
            name: "devtools".to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            negative_keywords: negative.iter().map(|k| k.to_string()).collect(),
            allowed_languages: Vec::new(),
            target_subreddits: vec!["rust".to_string()],
            automation_level: AutomationLevel::Assisted,
            posting_mode: PostingMode::Rotate,
            quality_thresholds: QualityThresholds::default(),
        }
    }

    fn post(title: &str, body: &str) -> RedditPost {
        RedditPost {
            id: "t3_k".to_string(),
            subreddit: "rust".to_string(),
            title: title.to_string(),
            content: Some(body.to_string()),
            author: "a".to_string(),
            url: "https://reddit.com/t3_k".to_string(),
            score: 1,
            num_comments: 0,
            created_utc: Utc::now(),
            language: None,
        }
    }

    #[test]
    fn test_keyword_share() {
        let scorer = KeywordRelevanceScorer::new();
        let project = project(&["Cargo", "workspace", "linker", "profiling"], &[]);
        let score = scorer.score(&post("Cargo workspace layout", "any tips?"), &project);
        assert_eq!(score, 50.0);
        assert_eq!(scorer.score(&post("Unrelated", "cats"), &project), 0.0);
    }

    #[test]
    fn test_negative_penalty() {
        let scorer = KeywordRelevanceScorer::new();
        let project = project(&["cargo"], &["hiring"]);
        let score = scorer.score(&post("Cargo question", "we are hiring"), &project);
        assert_eq!(score, 80.0);
    }

    #[test]
    fn test_no_keywords_is_neutral() {
        let scorer = KeywordRelevanceScorer::new();
        assert_eq!(
            scorer.score(&post("anything", ""), &project(&[], &[])),
            NO_KEYWORDS_SCORE
        );
    }

    #[tokio::test]
    async fn test_trait_call() {
        let scorer = KeywordRelevanceScorer::new();
        let score = scorer
            .score_relevance(&post("linker errors", ""), &project(&["linker"], &[]))
            .await
            .unwrap();
        assert_eq!(score, 100.0);
        assert_eq!(scorer.name(), "keyword");
    }
}
