use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::agents::agent::{Agent, AgentFailure, AgentOutput, TaskPayload};
use crate::assistants::{decode_settings, GITHUB_ASSISTANT};
use crate::config::AgentDescriptor;
use crate::error::{ButlerError, Result};
use crate::tools::github::{GitHubApi, GitHubClient, DEFAULT_API_BASE_URL};

const DEFAULT_TIME_RANGE_HOURS: i64 = 24;

fn default_analysis_depth() -> String {
    "basic".to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GithubAssistantConfig {
    #[serde(default)]
    pub github_token: String,
    #[serde(default)]
    pub repositories: Vec<String>,
    #[serde(default = "default_analysis_depth")]
    pub analysis_depth: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

/// One entry of the activity timeline.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Activity {
    Commit {
        repo: String,
        message: String,
        author: String,
        timestamp: DateTime<Utc>,
    },
    PullRequest {
        repo: String,
        title: String,
        state: String,
        author: String,
        timestamp: DateTime<Utc>,
    },
    Issue {
        repo: String,
        title: String,
        state: String,
        author: String,
        timestamp: DateTime<Utc>,
    },
}

impl Activity {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Activity::Commit { timestamp, .. }
            | Activity::PullRequest { timestamp, .. }
            | Activity::Issue { timestamp, .. } => *timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RepositorySummary {
    pub commit_count: usize,
    pub new_pr_count: usize,
    pub issue_count: usize,
}

struct RepositoryReport {
    activities: Vec<Activity>,
    summary: RepositorySummary,
}

/// Collects recent commits, pull requests and issues across the configured
/// repositories.
pub struct GithubAssistant {
    config: GithubAssistantConfig,
    api: Arc<dyn GitHubApi>,
}

impl GithubAssistant {
    pub fn from_descriptor(descriptor: &AgentDescriptor) -> Result<Self> {
        let config: GithubAssistantConfig = decode_settings(descriptor)?;
        let api = GitHubClient::new(&config.github_token, &config.api_base_url)?;
        Ok(Self::with_api(config, Arc::new(api)))
    }

    pub fn with_api(config: GithubAssistantConfig, api: Arc<dyn GitHubApi>) -> Self {
        Self { config, api }
    }

    async fn analyze_repository(&self, repo: &str, since: DateTime<Utc>) -> Result<RepositoryReport> {
        let (commits, pull_requests, issues) = tokio::try_join!(
            self.api.get_commits(repo, since),
            self.api.get_pull_requests(repo),
            self.api.get_issues(repo, since),
        )?;

        let mut activities = Vec::new();

        for commit in &commits {
            activities.push(Activity::Commit {
                repo: repo.to_string(),
                message: commit.commit.message.clone(),
                author: commit.commit.author.name.clone(),
                timestamp: commit.commit.author.date,
            });
        }

        let mut new_pr_count = 0;
        for pr in pull_requests.iter().filter(|pr| pr.created_at > since) {
            new_pr_count += 1;
            activities.push(Activity::PullRequest {
                repo: repo.to_string(),
                title: pr.title.clone(),
                state: pr.state.clone(),
                author: pr.user.login.clone(),
                timestamp: pr.created_at,
            });
        }

        // The issues endpoint also lists pull requests.
        let issues: Vec<_> = issues.iter().filter(|i| !i.is_pull_request()).collect();
        for issue in issues.iter().filter(|i| i.created_at > since) {
            activities.push(Activity::Issue {
                repo: repo.to_string(),
                title: issue.title.clone(),
                state: issue.state.clone(),
                author: issue.user.login.clone(),
                timestamp: issue.created_at,
            });
        }

        Ok(RepositoryReport {
            activities,
            summary: RepositorySummary {
                commit_count: commits.len(),
                new_pr_count,
                issue_count: issues.len(),
            },
        })
    }

    fn generate_insights(activities: &[Activity], analysis_depth: &str) -> Value {
        json!({
            "status": "Analysis pending.",
            "analysis_depth": analysis_depth,
            "activity_count": activities.len(),
        })
    }

    fn generate_recommendations(_insights: &Value) -> Vec<String> {
        vec!["Review repository activity.".to_string()]
    }
}

/// Start of the look-back window. Accepts `<N>h` and `<N>d`; anything else
/// means the last 24 hours.
pub fn since_for(time_range: Option<&Value>, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let default = now - Duration::hours(DEFAULT_TIME_RANGE_HOURS);
    let Some(range) = time_range.and_then(Value::as_str).map(str::trim) else {
        return Ok(default);
    };

    let (amount, unit): (&str, fn(i64) -> Duration) = if let Some(hours) = range.strip_suffix('h') {
        (hours, Duration::hours)
    } else if let Some(days) = range.strip_suffix('d') {
        (days, Duration::days)
    } else {
        return Ok(default);
    };

    let invalid = || ButlerError::ParseError(format!("invalid time_range '{}'", range));
    let amount: u32 = amount.trim().parse().map_err(|_| invalid())?;
    Ok(now.checked_sub_signed(unit(i64::from(amount))).ok_or_else(invalid)?)
}

#[async_trait]
impl Agent for GithubAssistant {
    fn name(&self) -> &str {
        GITHUB_ASSISTANT
    }

    async fn execute(&self, task: &TaskPayload) -> Result<AgentOutput> {
        let since = since_for(task.get("time_range"), Utc::now())?;
        let analysis_depth = task
            .get("analysis_depth")
            .and_then(Value::as_str)
            .unwrap_or(&self.config.analysis_depth)
            .to_string();

        info!(
            "GitHub Assistant analyzing {} repositories since {}",
            self.config.repositories.len(),
            since
        );

        let reports = join_all(
            self.config
                .repositories
                .iter()
                .map(|repo| async move { (repo, self.analyze_repository(repo, since).await) }),
        )
        .await;

        let mut summary = Map::new();
        let mut activities = Vec::new();
        let mut failed = Vec::new();

        for (repo, report) in reports {
            match report {
                Ok(report) => {
                    summary.insert(repo.clone(), json!(report.summary));
                    activities.extend(report.activities);
                }
                Err(e) => {
                    error!("Failed to analyze repository {}: {}", repo, e);
                    failed.push(json!({ "repository": repo, "error": e.to_string() }));
                }
            }
        }

        if !self.config.repositories.is_empty() && failed.len() == self.config.repositories.len() {
            return Err(ButlerError::AgentError(format!(
                "all {} repositories failed to load",
                failed.len()
            ))
            .into());
        }

        activities.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));

        let insights = Self::generate_insights(&activities, &analysis_depth);
        let recommendations = Self::generate_recommendations(&insights);

        let mut output = AgentOutput::new();
        output.insert("since".to_string(), json!(since));
        output.insert("summary".to_string(), Value::Object(summary));
        output.insert("detailed_activities".to_string(), json!(activities));
        output.insert("insights".to_string(), insights);
        output.insert("recommendations".to_string(), json!(recommendations));
        output.insert("failed_repositories".to_string(), json!(failed));
        Ok(output)
    }

    async fn fallback_strategy(&self, _task: &TaskPayload, error: &AgentFailure) -> Result<AgentOutput> {
        warn!("GitHub Assistant fallback due to: {}", error);

        let mut output = AgentOutput::new();
        output.insert(
            "message".to_string(),
            json!("GitHub service is temporarily unavailable."),
        );
        output.insert(
            "suggestion".to_string(),
            json!("Please check your GitHub token and repository names."),
        );
        output.insert("error".to_string(), json!(error.to_string()));
        Ok(output)
    }

    async fn close_resources(&self) -> Result<()> {
        info!("GitHub Assistant released its HTTP client");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::github::{Commit, CommitAuthor, CommitDetail, GitHubUser, Issue, MockGitHubApi, PullRequest};
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, hour, 0, 0).unwrap()
    }

    fn commit(message: &str, when: DateTime<Utc>) -> Commit {
        Commit {
            sha: format!("sha-{}", message),
            commit: CommitDetail {
                message: message.to_string(),
                author: CommitAuthor {
                    name: "Mona".to_string(),
                    date: when,
                },
            },
        }
    }

    fn pull(title: &str, when: DateTime<Utc>) -> PullRequest {
        PullRequest {
            number: 1,
            title: title.to_string(),
            state: "open".to_string(),
            user: GitHubUser {
                login: "hubot".to_string(),
            },
            created_at: when,
        }
    }

    fn issue(title: &str, when: DateTime<Utc>, is_pr: bool) -> Issue {
        Issue {
            number: 2,
            title: title.to_string(),
            state: "open".to_string(),
            user: GitHubUser {
                login: "octocat".to_string(),
            },
            created_at: when,
            pull_request: is_pr.then(|| json!({})),
        }
    }

    fn config(repositories: &[&str]) -> GithubAssistantConfig {
        GithubAssistantConfig {
            github_token: "ghp_example".to_string(),
            repositories: repositories.iter().map(|r| r.to_string()).collect(),
            analysis_depth: "basic".to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }

    fn task_with_range(range: &str) -> TaskPayload {
        let mut task = TaskPayload::new();
        task.insert("time_range".to_string(), json!(range));
        task
    }

    #[test]
    fn test_time_range_parsing() {
        let now = at(12);
        assert_eq!(since_for(None, now).unwrap(), now - Duration::hours(24));
        assert_eq!(since_for(Some(&json!("6h")), now).unwrap(), now - Duration::hours(6));
        assert_eq!(since_for(Some(&json!("7d")), now).unwrap(), now - Duration::days(7));
        assert_eq!(since_for(Some(&json!("weekly")), now).unwrap(), now - Duration::hours(24));
        assert_eq!(since_for(Some(&json!(12)), now).unwrap(), now - Duration::hours(24));
        assert!(since_for(Some(&json!("xh")), now).is_err());
        assert!(since_for(Some(&json!("-3d")), now).is_err());
    }

    #[test]
    fn test_placeholder_token_is_rejected_at_construction() {
        let descriptor = AgentDescriptor::new(GITHUB_ASSISTANT)
            .with_setting("github_token", json!("YOUR_GITHUB_TOKEN_HERE"))
            .with_setting("repositories", json!(["octocat/Hello-World"]));
        assert!(GithubAssistant::from_descriptor(&descriptor).is_err());
    }

    #[tokio::test]
    async fn test_timeline_is_merged_filtered_and_sorted() {
        let mut api = MockGitHubApi::new();
        api.expect_get_commits().returning(|_, _| {
            Ok(vec![
                commit("first", Utc::now() - Duration::hours(3)),
                commit("second", Utc::now() - Duration::minutes(30)),
            ])
        });
        api.expect_get_pull_requests().returning(|_| {
            Ok(vec![
                pull("fresh", Utc::now() - Duration::hours(1)),
                pull("ancient", Utc::now() - Duration::days(30)),
            ])
        });
        api.expect_get_issues().returning(|_, _| {
            Ok(vec![
                issue("bug", Utc::now() - Duration::hours(2), false),
                issue("pr in disguise", Utc::now() - Duration::hours(2), true),
            ])
        });

        let assistant = GithubAssistant::with_api(config(&["octocat/Hello-World"]), Arc::new(api));
        let output = assistant.execute(&task_with_range("24h")).await.unwrap();

        let summary = &output["summary"]["octocat/Hello-World"];
        assert_eq!(summary["commit_count"], 2);
        assert_eq!(summary["new_pr_count"], 1);
        assert_eq!(summary["issue_count"], 1);

        let timeline = output["detailed_activities"].as_array().unwrap();
        let kinds: Vec<&str> = timeline.iter().map(|a| a["type"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["commit", "pull_request", "issue", "commit"]);
        assert_eq!(timeline[0]["message"], "second");
        assert_eq!(output["recommendations"], json!(["Review repository activity."]));
        assert_eq!(output["failed_repositories"], json!([]));
    }

    #[tokio::test]
    async fn test_one_failing_repository_is_reported_not_raised() {
        let mut api = MockGitHubApi::new();
        api.expect_get_commits().returning(|repo, _| {
            if repo == "acme/private" {
                Err(ButlerError::NetworkError("404 Not Found".to_string()).into())
            } else {
                Ok(vec![])
            }
        });
        api.expect_get_pull_requests().returning(|_| Ok(vec![]));
        api.expect_get_issues().returning(|_, _| Ok(vec![]));

        let assistant = GithubAssistant::with_api(
            config(&["octocat/Hello-World", "acme/private"]),
            Arc::new(api),
        );
        let output = assistant.execute(&TaskPayload::new()).await.unwrap();

        assert!(output["summary"].get("octocat/Hello-World").is_some());
        assert!(output["summary"].get("acme/private").is_none());
        assert_eq!(output["failed_repositories"][0]["repository"], "acme/private");
    }

    #[tokio::test]
    async fn test_all_repositories_failing_raises_and_falls_back() {
        let mut api = MockGitHubApi::new();
        api.expect_get_commits()
            .returning(|_, _| Err(ButlerError::NetworkError("401 Unauthorized".to_string()).into()));
        api.expect_get_pull_requests().returning(|_| Ok(vec![]));
        api.expect_get_issues().returning(|_, _| Ok(vec![]));

        let assistant = GithubAssistant::with_api(config(&["a/b", "c/d"]), Arc::new(api));
        let err = assistant.execute(&TaskPayload::new()).await.unwrap_err();
        assert!(err.to_string().contains("all 2 repositories failed"));

        let fallback = assistant
            .fallback_strategy(&TaskPayload::new(), err.as_ref())
            .await
            .unwrap();
        assert_eq!(
            fallback["suggestion"],
            "Please check your GitHub token and repository names."
        );
        assert!(fallback["error"].as_str().unwrap().contains("repositories failed"));
    }

    #[tokio::test]
    async fn test_task_analysis_depth_overrides_configuration() {
        let mut api = MockGitHubApi::new();
        api.expect_get_commits().returning(|_, _| Ok(vec![]));
        api.expect_get_pull_requests().returning(|_| Ok(vec![]));
        api.expect_get_issues().returning(|_, _| Ok(vec![]));

        let assistant = GithubAssistant::with_api(config(&["octocat/Hello-World"]), Arc::new(api));
        let mut task = TaskPayload::new();
        task.insert("analysis_depth".to_string(), json!("deep"));

        let output = assistant.execute(&task).await.unwrap();
        assert_eq!(output["insights"]["analysis_depth"], "deep");
    }
}
