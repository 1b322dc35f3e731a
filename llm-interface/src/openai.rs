use crate::RelevanceScorer;
use adkuu_core::{CoreError, LlmConfig, LlmError, Project, RedditPost};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};

const PROVIDER: &str = "openai";
// Bodies beyond this add cost without changing the verdict.
const MAX_BODY_CHARS: usize = 2_000;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Scores relevance through any OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiRelevanceScorer {
    http_client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiRelevanceScorer {
    pub fn new(config: &LlmConfig) -> Result<Self, CoreError> {
        let api_key = config.api_key()?;
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    fn prompt(post: &RedditPost, project: &Project) -> String {
        let body: String = post
            .content
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(MAX_BODY_CHARS)
            .collect();
        format!(
            "Project: {}\nKeywords: {}\n\nSubreddit: r/{}\nTitle: {}\nBody: {}\n\n\
             How relevant is this post to the project, from 0 to 100? \
             Reply with the number only.",
            project.name,
            project.keywords.join(", "),
            post.subreddit,
            post.title,
            body
        )
    }

    fn status_error(status: StatusCode, retry_after: Option<u64>, model: &str) -> CoreError {
        let provider = PROVIDER.to_string();
        let error = match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::InvalidApiKey { provider },
            StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimitExceeded {
                provider,
                retry_after: retry_after.unwrap_or(60),
            },
            StatusCode::NOT_FOUND => LlmError::ModelNotAvailable {
                model: model.to_string(),
            },
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                LlmError::RequestTimeout { provider }
            }
            s if s.is_server_error() => LlmError::ServiceUnavailable { provider },
            s => LlmError::InvalidResponseFormat {
                provider,
                details: format!("unexpected status {s}"),
            },
        };
        error.into()
    }
}

/// Pulls the first number out of a model reply and checks it is a valid score.
pub fn parse_score(reply: &str) -> Result<f64, CoreError> {
    let invalid = |details: String| {
        CoreError::from(LlmError::InvalidResponseFormat {
            provider: PROVIDER.to_string(),
            details,
        })
    };

    let token = reply
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .find(|t| !t.is_empty() && t.chars().any(|c| c.is_ascii_digit()))
        .ok_or_else(|| invalid(format!("no score in reply '{}'", reply.trim())))?;
    let score: f64 = token
        .trim_end_matches('.')
        .parse()
        .map_err(|_| invalid(format!("unparseable score '{token}'")))?;

    if !(0.0..=100.0).contains(&score) {
        return Err(invalid(format!("score {score} outside 0-100")));
    }
    Ok(score)
}

impl RelevanceScorer for OpenAiRelevanceScorer {
    async fn score_relevance(&self, post: &RedditPost, project: &Project) -> Result<f64, CoreError> {
        let request = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: "You rate Reddit posts for marketing relevance.".to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Self::prompt(post, project),
                },
            ],
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!("Requesting relevance for post {} from {}", post.id, self.model);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreError::from(LlmError::RequestTimeout {
                        provider: PROVIDER.to_string(),
                    })
                } else {
                    CoreError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            error!("Relevance request for post {} failed: {}", post.id, status);
            return Err(Self::status_error(status, retry_after, &self.model));
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            warn!("Failed to decode chat response: {}", e);
            CoreError::from(LlmError::InvalidResponseFormat {
                provider: PROVIDER.to_string(),
                details: e.to_string(),
            })
        })?;

        let reply = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| {
                CoreError::from(LlmError::InvalidResponseFormat {
                    provider: PROVIDER.to_string(),
                    details: "empty choices".to_string(),
                })
            })?;
        parse_score(&reply)
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
