//! # contract: service seams for the sync pipeline
//!
//! This module defines the traits the pipeline talks through:
//!
//! - [`RemoteStore`]: the cloud file tree editors work in (Google Drive).
//! - [`RepoHost`]: the hosting platform holding the canonical copy (GitHub).
//! - [`GitWorkspace`]: the local working tree the apply stage writes into.
//!
//! Concrete HTTP clients live in the `drive-sync` binary crate; the local git
//! implementation is [`crate::git::CommandGit`]. Every trait is annotated for
//! `mockall` so tests can drive the orchestrator without network access.
//!
//! ## Error contract
//! Implementors map "object does not exist" to [`crate::error::SyncError::NotFound`] and
//! throttling responses to [`crate::error::SyncError::RateLimited`]; the pipeline relies on
//! both distinctions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::SyncResult;

/// MIME type Drive uses for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// A file or folder in the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub modified_time: Option<DateTime<Utc>>,
    pub size: Option<u64>,
}

impl RemoteEntry {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

/// Cloud file storage holding the editable JSON content.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List the non-trashed children of a folder, ordered by name.
    async fn list_files(
        &self,
        folder_id: &str,
        mime_type: Option<String>,
    ) -> SyncResult<Vec<RemoteEntry>>;

    /// Fetch metadata for one file; `None` when it does not exist.
    async fn get_metadata(&self, file_id: &str) -> SyncResult<Option<RemoteEntry>>;

    /// Download a file's content as text.
    async fn download_text(&self, file_id: &str) -> SyncResult<String>;

    /// Create a new JSON file inside `folder_id`.
    async fn create_file(&self, folder_id: &str, name: &str, content: &str)
        -> SyncResult<RemoteEntry>;

    /// Replace the content of an existing file.
    async fn update_file(&self, file_id: &str, content: &str) -> SyncResult<RemoteEntry>;

    async fn create_folder(&self, parent_id: &str, name: &str) -> SyncResult<RemoteEntry>;

    /// Find a direct child folder by name.
    async fn find_folder(&self, parent_id: &str, name: &str) -> SyncResult<Option<RemoteEntry>>;

    async fn delete_file(&self, file_id: &str) -> SyncResult<()>;
}

/// Create `name` under `parent_id` unless a folder with that name exists.
pub async fn get_or_create_folder(
    remote: &dyn RemoteStore,
    parent_id: &str,
    name: &str,
) -> SyncResult<RemoteEntry> {
    if let Some(existing) = remote.find_folder(parent_id, name).await? {
        debug!(folder = name, folder_id = %existing.id, "Folder exists");
        return Ok(existing);
    }
    remote.create_folder(parent_id, name).await
}

/// Walk (creating as needed) a `/`-separated folder path below `root_id`.
pub async fn ensure_folder_path(
    remote: &dyn RemoteStore,
    root_id: &str,
    relative_dir: &str,
) -> SyncResult<String> {
    let mut folder_id = root_id.to_string();
    for segment in relative_dir.split('/').filter(|s| !s.is_empty() && *s != ".") {
        folder_id = get_or_create_folder(remote, &folder_id, segment).await?.id;
    }
    Ok(folder_id)
}

/// File content at a ref on the repo host.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoFile {
    pub path: String,
    pub content: String,
    pub sha: String,
}

/// Most recent commit touching a path.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoCommit {
    pub sha: String,
    pub date: DateTime<Utc>,
    pub author: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub html_url: String,
}

/// What to open (or refresh) as a pull request from `head`.
#[derive(Debug, Clone, PartialEq)]
pub struct PullRequestDraft {
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
    /// Applied only when the pull request is newly created.
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub number: u64,
    pub html_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    Merge,
    Squash,
    Rebase,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeRequest {
    pub method: MergeMethod,
    pub commit_title: String,
    pub commit_message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeCommit {
    pub sha: String,
    pub merged: bool,
}

/// Source hosting platform holding the canonical versioned copy.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// File content and blob sha at `git_ref`; `None` when the path does not exist.
    async fn get_file_content(&self, path: &str, git_ref: &str) -> SyncResult<Option<RepoFile>>;

    /// Latest commit touching `path` on `git_ref`; `None` when there is none.
    async fn latest_commit(&self, path: &str, git_ref: &str) -> SyncResult<Option<RepoCommit>>;

    /// Update the open pull request for `draft.head`, or create one.
    async fn create_or_update_pull_request(&self, draft: PullRequestDraft)
        -> SyncResult<PullRequest>;

    async fn add_labels(&self, number: u64, labels: Vec<String>) -> SyncResult<()>;

    async fn create_issue(&self, title: &str, body: &str, labels: Vec<String>)
        -> SyncResult<Issue>;

    async fn branch_exists(&self, branch: &str) -> SyncResult<bool>;

    async fn merge_pull_request(&self, number: u64, request: MergeRequest)
        -> SyncResult<MergeCommit>;
}

/// Local version-control operations on the repository working tree.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait GitWorkspace: Send + Sync {
    fn add(&self, path: &Path) -> SyncResult<()>;

    fn commit(&self, message: &str) -> SyncResult<()>;

    /// Create or reset `branch` to the current HEAD and check it out.
    fn checkout_branch(&self, branch: &str) -> SyncResult<()>;

    fn force_push(&self, remote: &str, branch: &str) -> SyncResult<()>;
}
