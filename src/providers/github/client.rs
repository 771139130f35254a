use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

use crate::auth::Token;
use crate::error::{DoraError, Result};
use crate::providers::http::{Auth, UpstreamClient};

pub const INCIDENT_LABEL: &str = "incident";

#[derive(Debug, Deserialize)]
pub struct WorkflowRunsPage {
    pub workflow_runs: Vec<WorkflowRunDto>,
}

#[derive(Debug, Deserialize)]
pub struct WorkflowRunDto {
    pub head_sha: String,
    pub status: Option<String>,
    pub conclusion: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CommitDto {
    pub sha: String,
    pub commit: CommitDetailDto,
}

#[derive(Debug, Deserialize)]
pub struct CommitDetailDto {
    pub author: Option<SignatureDto>,
    pub committer: Option<SignatureDto>,
}

#[derive(Debug, Deserialize)]
pub struct SignatureDto {
    pub date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct IssueDto {
    pub number: u64,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

impl WorkflowRunDto {
    pub fn is_completed(&self) -> bool {
        self.status.as_deref() == Some("completed")
    }
}

impl CommitDto {
    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        self.commit
            .committer
            .as_ref()
            .or(self.commit.author.as_ref())
            .map(|s| s.date)
    }
}

pub struct GitHubClient {
    upstream: Arc<UpstreamClient>,
    api_url: Url,
    auth: Auth,
}

impl GitHubClient {
    pub fn new(upstream: Arc<UpstreamClient>, base_url: &str, token: Option<Token>) -> Result<Self> {
        let api_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .map_err(|e| DoraError::Config(format!("Invalid GitHub API URL: {e}")))?;

        let auth = token.map_or(Auth::Anonymous, Auth::Bearer);

        Ok(Self {
            upstream,
            api_url,
            auth,
        })
    }

    fn repo_url(&self, owner: &str, repo: &str, path: &str) -> Result<Url> {
        self.api_url
            .join(&format!(
                "repos/{}/{}/{path}",
                urlencoding::encode(owner),
                urlencoding::encode(repo)
            ))
            .map_err(|e| DoraError::Config(format!("Invalid repository URL: {e}")))
    }

    /// Completed runs of one workflow on one branch created since `since`.
    pub async fn fetch_workflow_runs(
        &self,
        owner: &str,
        repo: &str,
        workflow: &str,
        branch: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<WorkflowRunDto>> {
        let mut url = self.repo_url(
            owner,
            repo,
            &format!("actions/workflows/{}/runs", urlencoding::encode(workflow)),
        )?;
        url.query_pairs_mut()
            .append_pair("branch", branch)
            .append_pair("status", "completed")
            .append_pair("created", &format!(">={}", since.format("%Y-%m-%d")));

        self.fetch_pages(url, |page: WorkflowRunsPage| page.workflow_runs)
            .await
    }

    pub async fn fetch_commits(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<CommitDto>> {
        let mut url = self.repo_url(owner, repo, "commits")?;
        url.query_pairs_mut()
            .append_pair("sha", branch)
            .append_pair("since", &since.to_rfc3339());

        self.fetch_pages(url, |commits: Vec<CommitDto>| commits).await
    }

    /// Issues labelled as incidents, excluding pull requests.
    pub async fn fetch_incident_issues(
        &self,
        owner: &str,
        repo: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<IssueDto>> {
        let mut url = self.repo_url(owner, repo, "issues")?;
        url.query_pairs_mut()
            .append_pair("labels", INCIDENT_LABEL)
            .append_pair("state", "all")
            .append_pair("since", &since.to_rfc3339());

        let issues = self.fetch_pages(url, |issues: Vec<IssueDto>| issues).await?;
        Ok(issues
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .collect())
    }

    async fn fetch_pages<P, T>(&self, url: Url, extract: impl Fn(P) -> Vec<T>) -> Result<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let config = self.upstream.config();
        let mut items = Vec::new();

        for page in 1..=config.max_pages {
            let mut page_url = url.clone();
            page_url
                .query_pairs_mut()
                .append_pair("per_page", &config.page_size.to_string())
                .append_pair("page", &page.to_string());

            let batch = extract(self.upstream.get_json::<P>(&page_url, &self.auth).await?.body);
            let fetched = batch.len();
            items.extend(batch);

            debug!(
                "Page {page} of {}: fetched {fetched} items (total: {})",
                url.path(),
                items.len()
            );

            if fetched < config.page_size as usize {
                return Ok(items);
            }
        }

        warn!(
            "Stopped paging {} at the {}-page limit; older items were not fetched",
            url.path(),
            config.max_pages
        );
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Platform;
    use crate::providers::http::testing;
    use mockito::Matcher;

    fn client(server: &mockito::ServerGuard) -> GitHubClient {
        GitHubClient::new(
            Arc::new(testing::client(Platform::GitHub)),
            &server.url(),
            Some(Token::from("ghp_test")),
        )
        .unwrap()
    }

    fn since() -> DateTime<Utc> {
        "2024-05-01T00:00:00Z".parse().unwrap()
    }

    #[tokio::test]
    async fn test_workflow_runs_are_paged_until_short_page() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/repos/acme/widgets/actions/workflows/deploy.yml/runs")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("branch".into(), "main".into()),
                Matcher::UrlEncoded("created".into(), ">=2024-05-01".into()),
                Matcher::UrlEncoded("page".into(), "1".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"total_count": 3, "workflow_runs": [
                    {"id": 1, "head_sha": "a", "status": "completed", "conclusion": "success",
                     "created_at": "2024-05-02T10:00:00Z", "updated_at": "2024-05-02T10:05:00Z"},
                    {"id": 2, "head_sha": "b", "status": "completed", "conclusion": "failure",
                     "created_at": "2024-05-03T10:00:00Z", "updated_at": "2024-05-03T10:05:00Z"}
                ]}"#,
            )
            .create_async()
            .await;
        let second = server
            .mock("GET", "/repos/acme/widgets/actions/workflows/deploy.yml/runs")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"total_count": 3, "workflow_runs": [
                    {"id": 3, "head_sha": "c", "status": "completed", "conclusion": "success",
                     "created_at": "2024-05-04T10:00:00Z", "updated_at": "2024-05-04T10:05:00Z"}
                ]}"#,
            )
            .create_async()
            .await;

        let runs = client(&server)
            .fetch_workflow_runs("acme", "widgets", "deploy.yml", "main", since())
            .await
            .unwrap();

        assert_eq!(runs.len(), 3);
        assert_eq!(runs[2].head_sha, "c");
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_commit_time_prefers_committer_date() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/widgets/commits")
            .match_query(Matcher::Any)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"sha": "a", "commit": {
                    "author": {"date": "2024-05-01T08:00:00Z"},
                    "committer": {"date": "2024-05-01T09:00:00Z"}}}]"#,
            )
            .create_async()
            .await;

        let commits = client(&server)
            .fetch_commits("acme", "widgets", "main", since())
            .await
            .unwrap();

        assert_eq!(commits.len(), 1);
        assert_eq!(
            commits[0].committed_at().unwrap().to_rfc3339(),
            "2024-05-01T09:00:00+00:00"
        );
    }

    #[tokio::test]
    async fn test_pull_requests_are_not_incidents() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/widgets/issues")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("labels".into(), "incident".into()),
                Matcher::UrlEncoded("page".into(), "1".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"number": 7, "created_at": "2024-05-02T00:00:00Z", "closed_at": null},
                    {"number": 8, "created_at": "2024-05-02T00:00:00Z", "closed_at": null,
                     "pull_request": {"url": "https://api.github.com/repos/acme/widgets/pulls/8"}}
                ]"#,
            )
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/widgets/issues")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create_async()
            .await;

        let issues = client(&server)
            .fetch_incident_issues("acme", "widgets", since())
            .await
            .unwrap();

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].number, 7);
    }

    #[tokio::test]
    async fn test_paging_stops_at_the_page_limit() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/acme/widgets/commits")
            .match_query(Matcher::Any)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"sha": "a", "commit": {"committer": {"date": "2024-05-01T09:00:00Z"}}},
                    {"sha": "b", "commit": {"committer": {"date": "2024-05-01T08:00:00Z"}}}]"#,
            )
            .expect(5)
            .create_async()
            .await;

        let commits = client(&server)
            .fetch_commits("acme", "widgets", "main", since())
            .await
            .unwrap();

        assert_eq!(commits.len(), 10);
        mock.assert_async().await;
    }
}
