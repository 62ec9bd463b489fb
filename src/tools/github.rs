use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{ButlerError, Result};

pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

/// Token written into starter configuration files.
pub const PLACEHOLDER_TOKEN: &str = "YOUR_GITHUB_TOKEN_HERE";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitHubUser {
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitAuthor {
    pub name: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitDetail {
    pub message: String,
    pub author: CommitAuthor,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Commit {
    pub sha: String,
    pub commit: CommitDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub user: GitHubUser,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub user: GitHubUser,
    pub created_at: DateTime<Utc>,
    /// Present when the issue is actually a pull request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<serde_json::Value>,
}

impl Issue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

/// The three repository queries the GitHub assistant needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitHubApi: Send + Sync {
    async fn get_commits(&self, repo: &str, since: DateTime<Utc>) -> Result<Vec<Commit>>;

    /// All pull requests, newest first. The API has no `since` filter here.
    async fn get_pull_requests(&self, repo: &str) -> Result<Vec<PullRequest>>;

    async fn get_issues(&self, repo: &str, since: DateTime<Utc>) -> Result<Vec<Issue>>;
}

pub struct GitHubClient {
    client: Client,
    base_url: String,
}

impl GitHubClient {
    pub fn new(token: &str, base_url: &str) -> Result<Self> {
        let token = token.trim();
        if token.is_empty() || token == PLACEHOLDER_TOKEN {
            return Err(ButlerError::ConfigError("GitHub token is required".to_string()).into());
        }

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| ButlerError::ConfigError(format!("Invalid GitHub token: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github.v3+json"),
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("personal-butler/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| {
                ButlerError::NetworkError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json::<T>().await?)
    }
}

fn since_param(since: DateTime<Utc>) -> String {
    since.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl GitHubApi for GitHubClient {
    async fn get_commits(&self, repo: &str, since: DateTime<Utc>) -> Result<Vec<Commit>> {
        self.get_json(
            &format!("/repos/{}/commits", repo),
            &[("since", since_param(since))],
        )
        .await
    }

    async fn get_pull_requests(&self, repo: &str) -> Result<Vec<PullRequest>> {
        self.get_json(
            &format!("/repos/{}/pulls", repo),
            &[
                ("state", "all".to_string()),
                ("sort", "created".to_string()),
                ("direction", "desc".to_string()),
            ],
        )
        .await
    }

    async fn get_issues(&self, repo: &str, since: DateTime<Utc>) -> Result<Vec<Issue>> {
        self.get_json(
            &format!("/repos/{}/issues", repo),
            &[("state", "all".to_string()), ("since", since_param(since))],
        )
        .await
    }
}
