//! Sync-state document kept next to the content in the remote store.
//!
//! The document lives at `<root>/<metadata_folder>/<metadata_file>` and is
//! always loaded and saved whole. Saves carry a revision precondition: the
//! stored document is re-read first and the write is refused when another run
//! has saved since this one loaded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::contract::{get_or_create_folder, RemoteStore};
use crate::error::{SyncError, SyncResult};

pub const DOCUMENT_VERSION: &str = "1.0";
pub const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDirection {
    #[serde(rename = "drive-to-github")]
    DriveToGithub,
    #[serde(rename = "github-to-drive")]
    GithubToDrive,
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncDirection::DriveToGithub => write!(f, "drive-to-github"),
            SyncDirection::GithubToDrive => write!(f, "github-to-drive"),
        }
    }
}

/// Remembered sync state of one content path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drive_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drive_modified_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_direction: Option<SyncDirection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_modified_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveInfo {
    pub folder_id: String,
    pub folder_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Success,
    Failed,
}

/// Either the list of transferred paths or just how many there were.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilesChanged {
    Paths(Vec<String>),
    Count(u64),
}

impl FilesChanged {
    pub fn len(&self) -> usize {
        match self {
            FilesChanged::Paths(paths) => paths.len(),
            FilesChanged::Count(n) => *n as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub direction: SyncDirection,
    pub status: HistoryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_changed: Option<FilesChanged>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_merged: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncHistoryEntry {
    pub fn success(direction: SyncDirection, files_changed: FilesChanged) -> Self {
        Self {
            timestamp: Utc::now(),
            direction,
            status: HistoryStatus::Success,
            files_changed: Some(files_changed),
            conflicts: None,
            pr_number: None,
            auto_merged: None,
            merge_reason: None,
            error: None,
        }
    }

    pub fn failed(direction: SyncDirection, error: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            direction,
            status: HistoryStatus::Failed,
            files_changed: None,
            conflicts: None,
            pr_number: None,
            auto_merged: None,
            merge_reason: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadataDocument {
    pub version: String,
    /// Incremented on every save; documents without it load as revision 0.
    #[serde(default)]
    pub revision: u64,
    pub last_sync: DateTime<Utc>,
    pub repository: RepositoryInfo,
    pub drive: DriveInfo,
    #[serde(default)]
    pub files: BTreeMap<String, TrackedFile>,
    #[serde(default)]
    pub sync_history: Vec<SyncHistoryEntry>,
}

impl SyncMetadataDocument {
    pub fn empty(config: &Config) -> Self {
        Self {
            version: DOCUMENT_VERSION.to_string(),
            revision: 0,
            last_sync: Utc::now(),
            repository: RepositoryInfo {
                owner: config.github.owner.clone(),
                repo: config.github.repo.clone(),
                branch: config.github.branch.clone(),
            },
            drive: DriveInfo {
                folder_id: config.drive.folder_id.clone(),
                folder_url: config.drive.folder_url(),
            },
            files: BTreeMap::new(),
            sync_history: Vec::new(),
        }
    }
}

/// Loaded sync-state document plus the handle needed to write it back.
pub struct SyncMetadataStore {
    remote: Arc<dyn RemoteStore>,
    folder_id: String,
    file_name: String,
    file_id: Option<String>,
    loaded_revision: u64,
    document: SyncMetadataDocument,
}

impl SyncMetadataStore {
    /// Load the stored document, creating the metadata folder if needed.
    /// A missing document yields a fresh, unsaved one.
    pub async fn load(remote: Arc<dyn RemoteStore>, config: &Config) -> SyncResult<Self> {
        let folder =
            get_or_create_folder(remote.as_ref(), &config.drive.folder_id, &config.drive.metadata_folder)
                .await
                .inspect_err(|e| error!(error = %e, "Failed to load sync metadata"))?;
        let file_name = config.drive.metadata_file.clone();

        let stored = read_stored(remote.as_ref(), &folder.id, &file_name).await?;
        let (file_id, document) = match stored {
            Some((id, document)) => {
                info!(
                    files_tracked = document.files.len(),
                    last_sync = %document.last_sync,
                    revision = document.revision,
                    "Loaded sync state"
                );
                (Some(id), document)
            }
            None => {
                info!("No existing sync state found, creating new one");
                (None, SyncMetadataDocument::empty(config))
            }
        };

        Ok(Self {
            remote,
            folder_id: folder.id,
            file_name,
            file_id,
            loaded_revision: document.revision,
            document,
        })
    }

    /// Write the document back, refusing when the stored copy moved on since load.
    pub async fn save(&mut self) -> SyncResult<()> {
        let expected = self.file_id.as_ref().map(|_| self.loaded_revision);
        let found = read_stored(self.remote.as_ref(), &self.folder_id, &self.file_name)
            .await?
            .map(|(_, doc)| doc.revision);
        if found != expected {
            error!(?expected, ?found, "Sync state changed since it was loaded");
            return Err(SyncError::ConcurrentModification {
                expected: expected.unwrap_or(0),
                found: found.unwrap_or(0),
            });
        }

        self.document.revision = self.loaded_revision + 1;
        self.document.last_sync = Utc::now();
        let content = serde_json::to_string_pretty(&self.document)?;

        let entry = match &self.file_id {
            Some(id) => self.remote.update_file(id, &content).await,
            None => {
                self.remote
                    .create_file(&self.folder_id, &self.file_name, &content)
                    .await
            }
        }
        .inspect_err(|e| error!(error = %e, "Failed to save sync metadata"))?;

        self.file_id = Some(entry.id);
        self.loaded_revision = self.document.revision;
        info!(file_id = ?self.file_id, revision = self.document.revision, "Saved sync state");
        Ok(())
    }

    pub fn file(&self, path: &str) -> Option<&TrackedFile> {
        self.document.files.get(path)
    }

    pub fn files(&self) -> &BTreeMap<String, TrackedFile> {
        &self.document.files
    }

    /// Merge new fields over the existing record of `path`; `lastUpdated` is refreshed.
    pub fn upsert_file(&mut self, path: &str, update: impl FnOnce(&mut TrackedFile)) {
        let record = self.document.files.entry(path.to_string()).or_default();
        update(record);
        record.last_updated = Some(Utc::now());
        debug!(path, "Tracked file updated");
    }

    /// Record a run outcome, newest first, keeping at most [`HISTORY_LIMIT`] entries.
    pub fn add_history(&mut self, entry: SyncHistoryEntry) {
        self.document.sync_history.insert(0, entry);
        self.document.sync_history.truncate(HISTORY_LIMIT);
    }

    pub fn last_sync(&self) -> DateTime<Utc> {
        self.document.last_sync
    }

    pub fn revision(&self) -> u64 {
        self.document.revision
    }

    pub fn document(&self) -> &SyncMetadataDocument {
        &self.document
    }
}

async fn read_stored(
    remote: &dyn RemoteStore,
    folder_id: &str,
    file_name: &str,
) -> SyncResult<Option<(String, SyncMetadataDocument)>> {
    let entries = remote.list_files(folder_id, None).await?;
    let Some(entry) = entries.into_iter().find(|e| e.name == file_name) else {
        return Ok(None);
    };
    let content = remote.download_text(&entry.id).await?;
    let document: SyncMetadataDocument = serde_json::from_str(&content)
        .map_err(|e| SyncError::Metadata(format!("{file_name} is malformed: {e}")))?;
    Ok(Some((entry.id, document)))
}
