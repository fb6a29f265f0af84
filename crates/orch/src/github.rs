//! Pull-request hosting collaborator.
//!
//! The pipeline depends only on [`PullRequestHost`]; [`GithubClient`] is the
//! REST implementation used in CI.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("invalid repository '{0}', expected owner/name")]
    InvalidRepository(String),
    #[error("invalid token header value")]
    InvalidToken,
    #[error("github request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("github API error {status}: {body}")]
    Api { status: u16, body: String },
}

pub type Result<T> = std::result::Result<T, HostError>;

/// Title and body of a pull request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullRequestText {
    pub title: String,
    pub body: String,
}

/// A comment on a pull request conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrComment {
    pub id: u64,
    pub body: String,
    pub user: String,
    pub created_at: DateTime<Utc>,
}

/// The four operations the pipeline needs from the hosting service.
#[async_trait]
pub trait PullRequestHost: Send + Sync {
    async fn comment_on_pull_request(&self, repo: &str, pr_number: u64, body: &str) -> Result<()>;

    async fn get_pull_request_body(&self, repo: &str, pr_number: u64) -> Result<PullRequestText>;

    async fn get_comment_by_id(&self, repo: &str, comment_id: u64) -> Result<String>;

    async fn get_recent_comments(&self, repo: &str, pr_number: u64) -> Result<Vec<PrComment>>;
}

const GITHUB_API: &str = "https://api.github.com";
const RECENT_COMMENTS: u32 = 50;

#[derive(Serialize)]
struct CreateComment<'a> {
    body: &'a str,
}

#[derive(Deserialize)]
struct PullResponse {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Deserialize)]
struct CommentResponse {
    id: u64,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<UserResponse>,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct UserResponse {
    login: String,
}

impl From<CommentResponse> for PrComment {
    fn from(raw: CommentResponse) -> Self {
        Self {
            id: raw.id,
            body: raw.body.unwrap_or_default(),
            user: raw.user.map(|u| u.login).unwrap_or_default(),
            created_at: raw.created_at,
        }
    }
}

/// Split `owner/name`.
pub fn split_repository(repo: &str) -> Result<(&str, &str)> {
    match repo.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner, name))
        }
        _ => Err(HostError::InvalidRepository(repo.to_string())),
    }
}

/// GitHub REST client.
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
}

impl GithubClient {
    pub fn new(token: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("ai-orchestrator"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static("2022-11-28"),
        );
        let auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| HostError::InvalidToken)?;
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_base: GITHUB_API.to_string(),
        })
    }

    fn url(&self, repo: &str, path: &str) -> Result<String> {
        let (owner, name) = split_repository(repo)?;
        Ok(format!("{}/repos/{owner}/{name}/{path}", self.api_base))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(HostError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl PullRequestHost for GithubClient {
    async fn comment_on_pull_request(&self, repo: &str, pr_number: u64, body: &str) -> Result<()> {
        let url = self.url(repo, &format!("issues/{pr_number}/comments"))?;
        let response = self
            .http
            .post(url)
            .json(&CreateComment { body })
            .send()
            .await?;
        Self::check(response).await?;
        info!(repo, pr_number, bytes = body.len(), "posted comment");
        Ok(())
    }

    async fn get_pull_request_body(&self, repo: &str, pr_number: u64) -> Result<PullRequestText> {
        let url = self.url(repo, &format!("pulls/{pr_number}"))?;
        let response = Self::check(self.http.get(url).send().await?).await?;
        let pr: PullResponse = response.json().await?;
        Ok(PullRequestText {
            title: pr.title.unwrap_or_default(),
            body: pr.body.unwrap_or_default(),
        })
    }

    async fn get_comment_by_id(&self, repo: &str, comment_id: u64) -> Result<String> {
        let url = self.url(repo, &format!("issues/comments/{comment_id}"))?;
        let response = Self::check(self.http.get(url).send().await?).await?;
        let comment: CommentResponse = response.json().await?;
        Ok(comment.body.unwrap_or_default())
    }

    async fn get_recent_comments(&self, repo: &str, pr_number: u64) -> Result<Vec<PrComment>> {
        let url = self.url(
            repo,
            &format!("issues/{pr_number}/comments?per_page={RECENT_COMMENTS}"),
        )?;
        let response = Self::check(self.http.get(url).send().await?).await?;
        let comments: Vec<CommentResponse> = response.json().await?;
        debug!(repo, pr_number, count = comments.len(), "fetched comments");
        Ok(comments.into_iter().map(PrComment::from).collect())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_repository_requires_owner_and_name() {
        assert_eq!(split_repository("acme/calc").unwrap(), ("acme", "calc"));
        assert!(split_repository("acme").is_err());
        assert!(split_repository("/calc").is_err());
        assert!(split_repository("a/b/c").is_err());
    }

    #[test]
    fn client_builds_repo_urls() {
        let client = GithubClient::new("t0ken", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.url("acme/calc", "issues/7/comments").unwrap(),
            "https://api.github.com/repos/acme/calc/issues/7/comments"
        );
    }

    #[test]
    fn comment_response_maps_missing_fields() {
        let raw: CommentResponse = serde_json::from_str(
            r#"{"id": 9, "body": null, "user": null, "created_at": "2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        let comment = PrComment::from(raw);
        assert_eq!(comment.id, 9);
        assert!(comment.body.is_empty());
        assert!(comment.user.is_empty());
    }
}
