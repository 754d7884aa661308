//! GitHub REST v3 implementation of [`RepoHost`].

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use drive_sync_core::contract::{
    Issue, MergeCommit, MergeRequest, PullRequest, PullRequestDraft, RepoCommit, RepoFile, RepoHost,
};
use drive_sync_core::error::{SyncError, SyncResult};
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::http::{build_client, checked, network};

pub const GITHUB_API_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Deserialize)]
struct ContentResponse {
    path: String,
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct CommitAuthor {
    name: Option<String>,
    date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    author: CommitAuthor,
    message: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: u64,
    title: String,
    body: Option<String>,
    html_url: String,
}

impl From<PullResponse> for PullRequest {
    fn from(pr: PullResponse) -> Self {
        PullRequest {
            number: pr.number,
            title: pr.title,
            body: pr.body.unwrap_or_default(),
            html_url: pr.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    number: u64,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct MergeResponse {
    sha: String,
    merged: bool,
}

pub struct GitHubClient {
    http: Client,
    api_base_url: String,
    owner: String,
    repo: String,
    token: String,
}

impl GitHubClient {
    pub fn new(
        api_base_url: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
    ) -> SyncResult<Self> {
        let client = Self {
            http: build_client()?,
            api_base_url: api_base_url.into(),
            owner: owner.into(),
            repo: repo.into(),
            token: token.into(),
        };
        info!(owner = %client.owner, repo = %client.repo, "Initialized GitHub client");
        Ok(client)
    }

    fn repo_url(&self, tail: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base_url, self.owner, self.repo, tail
        )
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }
}

fn decode_content(encoded: &str) -> SyncResult<String> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD.decode(compact).map_err(|e| SyncError::Api {
        status: 200,
        message: format!("invalid base64 content: {e}"),
    })?;
    String::from_utf8(bytes).map_err(|e| SyncError::Api {
        status: 200,
        message: format!("content is not UTF-8: {e}"),
    })
}

#[async_trait]
impl RepoHost for GitHubClient {
    async fn get_file_content(&self, path: &str, git_ref: &str) -> SyncResult<Option<RepoFile>> {
        let response = self
            .request(self.http.get(self.repo_url(&format!("contents/{path}"))))
            .query(&[("ref", git_ref)])
            .send()
            .await
            .map_err(network)?;
        let body: ContentResponse = match checked(response).await {
            Ok(response) => response.json().await.map_err(network)?,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(RepoFile {
            path: body.path,
            content: decode_content(&body.content)?,
            sha: body.sha,
        }))
    }

    async fn latest_commit(&self, path: &str, git_ref: &str) -> SyncResult<Option<RepoCommit>> {
        let response = self
            .request(self.http.get(self.repo_url("commits")))
            .query(&[("path", path), ("sha", git_ref), ("per_page", "1")])
            .send()
            .await
            .map_err(network)?;
        let commits: Vec<CommitResponse> = checked(response).await?.json().await.map_err(network)?;
        Ok(commits.into_iter().next().map(|c| RepoCommit {
            sha: c.sha,
            date: c.commit.author.date,
            author: c.commit.author.name.unwrap_or_default(),
            message: c.commit.message,
        }))
    }

    async fn create_or_update_pull_request(&self, draft: PullRequestDraft) -> SyncResult<PullRequest> {
        let head = format!("{}:{}", self.owner, draft.head);
        let response = self
            .request(self.http.get(self.repo_url("pulls")))
            .query(&[
                ("head", head.as_str()),
                ("base", draft.base.as_str()),
                ("state", "open"),
            ])
            .send()
            .await
            .map_err(network)?;
        let open: Vec<PullResponse> = checked(response).await?.json().await.map_err(network)?;

        if let Some(existing) = open.into_iter().next() {
            let response = self
                .request(
                    self.http
                        .patch(self.repo_url(&format!("pulls/{}", existing.number))),
                )
                .json(&json!({"title": draft.title, "body": draft.body}))
                .send()
                .await
                .map_err(network)?;
            let pr: PullResponse = checked(response).await?.json().await.map_err(network)?;
            info!(pr_number = pr.number, "Updated existing pull request");
            return Ok(pr.into());
        }

        let response = self
            .request(self.http.post(self.repo_url("pulls")))
            .json(&json!({
                "title": draft.title,
                "head": draft.head,
                "base": draft.base,
                "body": draft.body,
            }))
            .send()
            .await
            .map_err(network)?;
        let pr: PullRequest = checked(response)
            .await?
            .json::<PullResponse>()
            .await
            .map_err(network)?
            .into();
        info!(pr_number = pr.number, "Created pull request");

        if !draft.labels.is_empty() {
            self.add_labels(pr.number, draft.labels).await?;
        }
        Ok(pr)
    }

    async fn add_labels(&self, number: u64, labels: Vec<String>) -> SyncResult<()> {
        let response = self
            .request(
                self.http
                    .post(self.repo_url(&format!("issues/{number}/labels"))),
            )
            .json(&json!({ "labels": labels }))
            .send()
            .await
            .map_err(network)?;
        checked(response).await?;
        debug!(number, ?labels, "Added labels");
        Ok(())
    }

    async fn create_issue(&self, title: &str, body: &str, labels: Vec<String>) -> SyncResult<Issue> {
        let response = self
            .request(self.http.post(self.repo_url("issues")))
            .json(&json!({"title": title, "body": body, "labels": labels}))
            .send()
            .await
            .map_err(network)?;
        let issue: IssueResponse = checked(response).await?.json().await.map_err(network)?;
        info!(issue = issue.number, "Created issue");
        Ok(Issue {
            number: issue.number,
            html_url: issue.html_url,
        })
    }

    async fn branch_exists(&self, branch: &str) -> SyncResult<bool> {
        let response = self
            .request(self.http.get(self.repo_url(&format!("branches/{branch}"))))
            .send()
            .await
            .map_err(network)?;
        match checked(response).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn merge_pull_request(&self, number: u64, request: MergeRequest) -> SyncResult<MergeCommit> {
        let response = self
            .request(self.http.put(self.repo_url(&format!("pulls/{number}/merge"))))
            .json(&json!({
                "merge_method": request.method,
                "commit_title": request.commit_title,
                "commit_message": request.commit_message,
            }))
            .send()
            .await
            .map_err(network)?;
        let merged: MergeResponse = checked(response).await?.json().await.map_err(network)?;
        info!(pr_number = number, sha = %merged.sha, "Merged pull request");
        Ok(MergeCommit {
            sha: merged.sha,
            merged: merged.merged,
        })
    }
}
