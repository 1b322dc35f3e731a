//! Relevance scoring capability.
//!
//! The engine never calls a model directly; it asks a [`RelevanceScorer`] for a
//! 0-100 score and treats every call as fallible and bounded by a timeout.

pub mod keyword;
pub mod openai;

pub use keyword::KeywordRelevanceScorer;
pub use openai::OpenAiRelevanceScorer;

use adkuu_core::{CoreError, Project, RedditPost};
use std::future::Future;

pub trait RelevanceScorer: Send + Sync {
    /// Returns how well `post` matches `project`, from 0 to 100.
    fn score_relevance(
        &self,
        post: &RedditPost,
        project: &Project,
    ) -> impl Future<Output = Result<f64, CoreError>> + Send;

    fn name(&self) -> &str;
}
