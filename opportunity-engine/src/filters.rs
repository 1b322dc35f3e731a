use adkuu_core::{Project, RedditPost};
use std::fmt;
use uuid::Uuid;

/// Why a post was excluded before ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterRejection {
    NegativeKeyword(String),
    Language(String),
}

impl fmt::Display for FilterRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterRejection::NegativeKeyword(keyword) => {
                write!(f, "contains negative keyword '{keyword}'")
            }
            FilterRejection::Language(language) => write!(f, "language '{language}' not allowed"),
        }
    }
}

/// Per-project hard preconditions applied before any scoring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectFilters {
    pub project_id: Uuid,
    negative_keywords: Vec<String>,
    allowed_languages: Vec<String>,
}

impl ProjectFilters {
    pub fn new(
        project_id: Uuid,
        negative_keywords: impl IntoIterator<Item = impl AsRef<str>>,
        allowed_languages: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Self {
        let normalize = |s: &str| s.trim().to_lowercase();
        Self {
            project_id,
            negative_keywords: negative_keywords
                .into_iter()
                .map(|k| normalize(k.as_ref()))
                .filter(|k| !k.is_empty())
                .collect(),
            allowed_languages: allowed_languages
                .into_iter()
                .map(|l| normalize(l.as_ref()))
                .filter(|l| !l.is_empty())
                .collect(),
        }
    }

    pub fn from_project(project: &Project) -> Self {
        Self::new(
            project.id,
            &project.negative_keywords,
            &project.allowed_languages,
        )
    }

    /// A post with no detected language passes the language filter, as does any
    /// post when the project allows every language.
    pub fn admits(&self, post: &RedditPost) -> Result<(), FilterRejection> {
        let text = post.searchable_text();
        if let Some(keyword) = self
            .negative_keywords
            .iter()
            .find(|k| text.contains(k.as_str()))
        {
            return Err(FilterRejection::NegativeKeyword(keyword.clone()));
        }

        if let Some(language) = &post.language {
            let language = language.to_lowercase();
            if !self.allowed_languages.is_empty() && !self.allowed_languages.contains(&language) {
                return Err(FilterRejection::Language(language));
            }
        }
        Ok(())
    }
}
