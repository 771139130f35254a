use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

use crate::auth::Token;
use crate::error::{DoraError, Result};
use crate::providers::http::{Auth, UpstreamClient};

const API_VERSION: &str = "7.0";
const CONTINUATION_HEADER: &str = "x-ms-continuationtoken";

#[derive(Debug, Deserialize)]
pub struct ListResponse<T> {
    pub value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDto {
    pub id: u64,
    pub status: Option<String>,
    pub result: Option<String>,
    pub finish_time: Option<DateTime<Utc>>,
    pub source_version: Option<String>,
    pub definition: Option<DefinitionDto>,
}

#[derive(Debug, Deserialize)]
pub struct DefinitionDto {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitDto {
    pub commit_id: String,
    pub author: Option<GitUserDto>,
    pub committer: Option<GitUserDto>,
}

#[derive(Debug, Deserialize)]
pub struct GitUserDto {
    pub date: DateTime<Utc>,
}

impl CommitDto {
    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        self.committer
            .as_ref()
            .or(self.author.as_ref())
            .map(|u| u.date)
    }
}

/// Which builds to list: by definition id when known, otherwise by name.
#[derive(Debug, Clone, Copy)]
pub enum BuildDefinition<'a> {
    Id(&'a str),
    Name(&'a str),
}

pub struct AzureDevOpsClient {
    upstream: Arc<UpstreamClient>,
    api_url: Url,
    auth: Auth,
}

impl AzureDevOpsClient {
    pub fn new(upstream: Arc<UpstreamClient>, base_url: &str, token: Token) -> Result<Self> {
        let api_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .map_err(|e| DoraError::Config(format!("Invalid Azure DevOps URL: {e}")))?;

        Ok(Self {
            upstream,
            api_url,
            auth: Auth::Basic(token),
        })
    }

    fn project_url(&self, organization: &str, project: &str, path: &str) -> Result<Url> {
        let mut url = self
            .api_url
            .join(&format!(
                "{}/{}/_apis/{path}",
                urlencoding::encode(organization),
                urlencoding::encode(project)
            ))
            .map_err(|e| DoraError::Config(format!("Invalid project URL: {e}")))?;
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        Ok(url)
    }

    /// Completed builds on `branch` finished since `since`, newest first.
    pub async fn fetch_builds(
        &self,
        organization: &str,
        project: &str,
        definition: BuildDefinition<'_>,
        branch: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<BuildDto>> {
        let config = self.upstream.config();
        let mut url = self.project_url(organization, project, "build/builds")?;
        {
            let mut query = url.query_pairs_mut();
            if let BuildDefinition::Id(id) = definition {
                query.append_pair("definitions", id);
            }
            query
                .append_pair("branchName", &format!("refs/heads/{branch}"))
                .append_pair("minTime", &since.to_rfc3339_opts(SecondsFormat::Secs, true))
                .append_pair("statusFilter", "completed")
                .append_pair("queryOrder", "finishTimeDescending")
                .append_pair("$top", &config.page_size.to_string());
        }

        let mut builds = Vec::new();
        let mut continuation: Option<String> = None;
        let mut complete = false;

        for page in 1..=config.max_pages {
            let mut page_url = url.clone();
            if let Some(token) = &continuation {
                page_url
                    .query_pairs_mut()
                    .append_pair("continuationToken", token);
            }

            let response = self
                .upstream
                .get_json::<ListResponse<BuildDto>>(&page_url, &self.auth)
                .await?;
            let fetched = response.body.value.len();
            builds.extend(response.body.value);

            debug!(
                "Page {page}: fetched {fetched} builds (total: {})",
                builds.len()
            );

            continuation = response
                .headers
                .get(CONTINUATION_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string);
            if continuation.is_none() || fetched == 0 {
                complete = true;
                break;
            }
        }
        if !complete {
            warn!(
                "Stopped paging builds for {organization}/{project} at the {}-page limit; \
                 older builds were not fetched",
                config.max_pages
            );
        }

        if let BuildDefinition::Name(name) = definition {
            builds.retain(|b| b.definition.as_ref().is_some_and(|d| d.name == name));
        }

        Ok(builds)
    }

    pub async fn fetch_commits(
        &self,
        organization: &str,
        project: &str,
        repository: &str,
        branch: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<CommitDto>> {
        let config = self.upstream.config();
        let mut url = self.project_url(
            organization,
            project,
            &format!("git/repositories/{}/commits", urlencoding::encode(repository)),
        )?;
        url.query_pairs_mut()
            .append_pair("searchCriteria.itemVersion.version", branch)
            .append_pair(
                "searchCriteria.fromDate",
                &since.to_rfc3339_opts(SecondsFormat::Secs, true),
            )
            .append_pair("searchCriteria.$top", &config.page_size.to_string());

        let mut commits = Vec::new();
        let mut complete = false;
        for page in 0..config.max_pages {
            let mut page_url = url.clone();
            page_url.query_pairs_mut().append_pair(
                "searchCriteria.$skip",
                &(page * config.page_size).to_string(),
            );

            let batch = self
                .upstream
                .get_json::<ListResponse<CommitDto>>(&page_url, &self.auth)
                .await?
                .body
                .value;
            let fetched = batch.len();
            commits.extend(batch);

            debug!(
                "Page {}: fetched {fetched} commits (total: {})",
                page + 1,
                commits.len()
            );

            if fetched < config.page_size as usize {
                complete = true;
                break;
            }
        }
        if !complete {
            warn!(
                "Stopped paging commits for {organization}/{project}/{repository} at the \
                 {}-page limit; older commits were not fetched",
                config.max_pages
            );
        }

        Ok(commits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Platform;
    use crate::providers::http::testing;
    use mockito::Matcher;

    fn client(server: &mockito::ServerGuard) -> AzureDevOpsClient {
        AzureDevOpsClient::new(
            Arc::new(testing::client(Platform::AzureDevOps)),
            &server.url(),
            Token::from("pat"),
        )
        .unwrap()
    }

    fn since() -> DateTime<Utc> {
        "2024-05-01T00:00:00Z".parse().unwrap()
    }

    fn build(id: u64, result: &str, definition: &str) -> String {
        format!(
            r#"{{"id": {id}, "status": "completed", "result": "{result}",
                "finishTime": "2024-05-0{id}T12:00:00Z", "sourceVersion": "sha{id}",
                "definition": {{"id": 42, "name": "{definition}"}}}}"#
        )
    }

    #[tokio::test]
    async fn test_builds_follow_continuation_token() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/contoso/shop/_apis/build/builds")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("api-version".into(), "7.0".into()),
                Matcher::UrlEncoded("definitions".into(), "42".into()),
                Matcher::UrlEncoded("branchName".into(), "refs/heads/main".into()),
                Matcher::UrlEncoded("statusFilter".into(), "completed".into()),
                Matcher::Regex("top=2$".into()),
            ]))
            .match_header("authorization", "Basic OnBhdA==")
            .expect(1)
            .with_header("content-type", "application/json")
            .with_header(CONTINUATION_HEADER, "page2")
            .with_body(format!(
                r#"{{"count": 2, "value": [{}, {}]}}"#,
                build(1, "succeeded", "CI"),
                build(2, "failed", "CI")
            ))
            .create_async()
            .await;
        let second = server
            .mock("GET", "/contoso/shop/_apis/build/builds")
            .match_query(Matcher::UrlEncoded(
                "continuationToken".into(),
                "page2".into(),
            ))
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"count": 1, "value": [{}]}}"#, build(3, "succeeded", "CI")))
            .create_async()
            .await;

        let builds = client(&server)
            .fetch_builds("contoso", "shop", BuildDefinition::Id("42"), "main", since())
            .await
            .unwrap();

        assert_eq!(builds.len(), 3);
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_builds_stop_at_the_page_limit() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/contoso/shop/_apis/build/builds")
            .match_query(Matcher::Any)
            .with_header("content-type", "application/json")
            .with_header(CONTINUATION_HEADER, "more")
            .with_body(format!(
                r#"{{"count": 2, "value": [{}, {}]}}"#,
                build(1, "succeeded", "CI"),
                build(2, "succeeded", "CI")
            ))
            .expect(5)
            .create_async()
            .await;

        let builds = client(&server)
            .fetch_builds("contoso", "shop", BuildDefinition::Id("42"), "main", since())
            .await
            .unwrap();

        assert_eq!(builds.len(), 10);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_builds_without_id_are_filtered_by_name() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/contoso/shop/_apis/build/builds")
            .match_query(Matcher::Any)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"count": 2, "value": [{}, {}]}}"#,
                build(1, "succeeded", "CI"),
                build(2, "succeeded", "Nightly")
            ))
            .create_async()
            .await;

        let builds = client(&server)
            .fetch_builds("contoso", "shop", BuildDefinition::Name("CI"), "main", since())
            .await
            .unwrap();

        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].id, 1);
    }

    #[tokio::test]
    async fn test_commits_are_paged_with_skip() {
        let mut server = mockito::Server::new_async().await;
        let commit = |id: &str| {
            format!(r#"{{"commitId": "{id}", "committer": {{"date": "2024-05-02T09:00:00Z"}}}}"#)
        };
        server
            .mock("GET", "/contoso/shop/_apis/git/repositories/web/commits")
            .match_query(Matcher::UrlEncoded("searchCriteria.$skip".into(), "0".into()))
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"count": 2, "value": [{}, {}]}}"#, commit("a"), commit("b")))
            .create_async()
            .await;
        let last = server
            .mock("GET", "/contoso/shop/_apis/git/repositories/web/commits")
            .match_query(Matcher::UrlEncoded("searchCriteria.$skip".into(), "2".into()))
            .with_header("content-type", "application/json")
            .with_body(r#"{"count": 0, "value": []}"#)
            .create_async()
            .await;

        let commits = client(&server)
            .fetch_commits("contoso", "shop", "web", "main", since())
            .await
            .unwrap();

        assert_eq!(commits.len(), 2);
        assert!(commits[0].committed_at().is_some());
        last.assert_async().await;
    }

    #[tokio::test]
    async fn test_sign_in_page_is_an_authentication_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/contoso/shop/_apis/build/builds")
            .match_query(Matcher::Any)
            .with_status(203)
            .with_body("<html>Sign in</html>")
            .create_async()
            .await;

        let err = client(&server)
            .fetch_builds("contoso", "shop", BuildDefinition::Id("42"), "main", since())
            .await
            .unwrap_err();

        assert!(matches!(err, DoraError::Authentication(_)));
    }
}
