//! Change detection: which content paths need to move from Drive to the repo.
//!
//! Two policies exist, selected by [`DetectionMode`]:
//! - remote-only compares Drive modification times against the last sync of
//!   each path and treats the repository as passive;
//! - two-way also looks at the latest repository commit per tracked path and
//!   classifies simultaneous edits as conflicts.

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::config::{Config, DetectionMode};
use crate::contract::{RemoteEntry, RemoteStore, RepoHost};
use crate::error::SyncResult;
use crate::metadata::SyncMetadataStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeStatus {
    NoChange,
    Changed,
    DriveOnly,
    GithubOnly,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    UseDrive,
    UseGithub,
    ManualReview,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub path: String,
    pub status: ChangeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,
}

impl ChangeRecord {
    /// Whether the Drive copy has to be staged for the apply stage.
    ///
    /// Conflicts held for manual review are staged too so they can be
    /// reported; the apply stage refuses them.
    pub fn needs_download(&self) -> bool {
        match self.status {
            ChangeStatus::Changed | ChangeStatus::DriveOnly => true,
            ChangeStatus::Conflict => self.resolution != Some(Resolution::UseGithub),
            ChangeStatus::NoChange | ChangeStatus::GithubOnly => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSummary {
    pub total: usize,
    pub no_change: usize,
    pub changed: usize,
    pub drive_only: usize,
    pub github_only: usize,
    pub conflicts: usize,
    pub manual_review: usize,
}

impl ChangeSummary {
    fn count(&mut self, status: ChangeStatus, resolution: Option<Resolution>) {
        self.total += 1;
        match status {
            ChangeStatus::NoChange => self.no_change += 1,
            ChangeStatus::Changed => self.changed += 1,
            ChangeStatus::DriveOnly => self.drive_only += 1,
            ChangeStatus::GithubOnly => self.github_only += 1,
            ChangeStatus::Conflict => self.conflicts += 1,
        }
        if resolution == Some(Resolution::ManualReview) {
            self.manual_review += 1;
        }
    }
}

/// Result of one detection pass. Only paths that are not NO_CHANGE are listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeReport {
    pub timestamp: DateTime<Utc>,
    pub last_sync: DateTime<Utc>,
    pub changes: Vec<ChangeRecord>,
    pub summary: ChangeSummary,
}

impl ChangeReport {
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// A JSON file found in the Drive tree, with its `/`-separated relative path.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFile {
    pub path: String,
    pub entry: RemoteEntry,
}

/// Depth-first walk of the Drive tree in listing order.
///
/// Only `*.json` files are returned. Entries whose name starts with `.` are
/// skipped, which keeps the metadata folder out of the content set.
pub async fn scan_remote_tree(remote: &dyn RemoteStore, root_id: &str) -> SyncResult<Vec<RemoteFile>> {
    let mut files = Vec::new();
    scan_folder(remote, root_id.to_string(), String::new(), &mut files).await?;
    Ok(files)
}

fn scan_folder<'a>(
    remote: &'a dyn RemoteStore,
    folder_id: String,
    base: String,
    out: &'a mut Vec<RemoteFile>,
) -> BoxFuture<'a, SyncResult<()>> {
    async move {
        let items = remote.list_files(&folder_id, None).await?;
        for item in items {
            if item.name.starts_with('.') {
                debug!(name = %item.name, "Skipping hidden entry");
                continue;
            }
            let path = if base.is_empty() {
                item.name.clone()
            } else {
                format!("{base}/{}", item.name)
            };
            if item.is_folder() {
                scan_folder(remote, item.id.clone(), path, &mut *out).await?;
            } else if item.name.ends_with(".json") {
                out.push(RemoteFile { path, entry: item });
            }
        }
        Ok(())
    }
    .boxed()
}

/// Remote-only rule: changed iff Drive is strictly newer than the last sync,
/// or the path was never synced. No Drive timestamp means nothing to pull.
pub fn classify_remote_only(
    drive_modified: Option<DateTime<Utc>>,
    last_synced: Option<DateTime<Utc>>,
) -> ChangeStatus {
    match (drive_modified, last_synced) {
        (None, _) => ChangeStatus::NoChange,
        (Some(_), None) => ChangeStatus::Changed,
        (Some(remote), Some(synced)) if remote > synced => ChangeStatus::Changed,
        _ => ChangeStatus::NoChange,
    }
}

/// Two-way rule with most-recent-wins inside the grace period.
pub fn classify_two_way(
    drive_modified: Option<DateTime<Utc>>,
    github_modified: Option<DateTime<Utc>>,
    last_synced: Option<DateTime<Utc>>,
    grace_period: Duration,
) -> (ChangeStatus, Option<Resolution>) {
    let newer = |t: Option<DateTime<Utc>>| match (t, last_synced) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(t), Some(synced)) => t > synced,
    };

    match (newer(drive_modified), newer(github_modified), drive_modified, github_modified) {
        (false, false, _, _) => (ChangeStatus::NoChange, None),
        (true, false, _, _) => (ChangeStatus::DriveOnly, Some(Resolution::UseDrive)),
        (false, true, _, _) => (ChangeStatus::GithubOnly, Some(Resolution::UseGithub)),
        (true, true, Some(drive), Some(github)) => {
            let resolution = if (drive - github).abs() < grace_period {
                if drive > github {
                    Resolution::UseDrive
                } else {
                    Resolution::UseGithub
                }
            } else {
                Resolution::ManualReview
            };
            (ChangeStatus::Conflict, Some(resolution))
        }
        (true, true, _, _) => (ChangeStatus::Conflict, Some(Resolution::ManualReview)),
    }
}

/// Index scanned files by path. When Drive holds several copies of a path the
/// most recently modified one wins.
fn newest_by_path(files: &[RemoteFile]) -> HashMap<&str, &RemoteEntry> {
    let mut by_path: HashMap<&str, &RemoteEntry> = HashMap::new();
    for file in files {
        match by_path.entry(file.path.as_str()) {
            Entry::Vacant(slot) => {
                slot.insert(&file.entry);
            }
            Entry::Occupied(mut slot) => {
                warn!(
                    path = %file.path,
                    first = %slot.get().id,
                    other = %file.entry.id,
                    "Duplicate Drive files share a path, using the newest copy"
                );
                if file.entry.modified_time > slot.get().modified_time {
                    slot.insert(&file.entry);
                }
            }
        }
    }
    by_path
}

struct RepoSignal {
    sha: String,
    modified: DateTime<Utc>,
}

/// Classify every known path according to `config.sync.detection`.
pub async fn detect_changes(
    config: &Config,
    remote: &dyn RemoteStore,
    repo: &dyn RepoHost,
    metadata: &SyncMetadataStore,
) -> SyncResult<ChangeReport> {
    info!(mode = ?config.sync.detection, "Starting change detection");

    info!("Scanning Google Drive");
    let drive_files = scan_remote_tree(remote, &config.drive.folder_id).await?;
    info!(count = drive_files.len(), "Found files in Drive");

    let repo_files = match config.sync.detection {
        DetectionMode::RemoteOnly => HashMap::new(),
        DetectionMode::TwoWay => {
            info!("Checking GitHub");
            let found = repo_signals(config, repo, metadata).await;
            info!(count = found.len(), "Found files in GitHub");
            found
        }
    };

    let mut paths: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let tracked_paths = metadata.files().keys().cloned();
    let repo_paths = metadata
        .files()
        .keys()
        .filter(|p| repo_files.contains_key(*p))
        .cloned();
    for path in drive_files
        .iter()
        .map(|f| f.path.clone())
        .chain(repo_paths)
        .chain(tracked_paths)
    {
        if seen.insert(path.clone()) {
            paths.push(path);
        }
    }

    let by_path = newest_by_path(&drive_files);

    let mut summary = ChangeSummary::default();
    let mut changes = Vec::new();
    for path in paths {
        let drive = by_path.get(path.as_str());
        let github = repo_files.get(&path);
        let last_synced = metadata.file(&path).and_then(|f| f.last_synced_time);
        let drive_modified = drive.and_then(|d| d.modified_time);

        let (status, resolution) = match config.sync.detection {
            DetectionMode::RemoteOnly => (classify_remote_only(drive_modified, last_synced), None),
            DetectionMode::TwoWay => classify_two_way(
                drive_modified,
                github.map(|g| g.modified),
                last_synced,
                config.sync.grace_period(),
            ),
        };
        summary.count(status, resolution);

        if status == ChangeStatus::NoChange {
            continue;
        }
        debug!(path = %path, ?status, ?resolution, "Change detected");
        changes.push(ChangeRecord {
            path,
            status,
            resolution,
            drive_id: drive.map(|d| d.id.clone()),
            drive_modified,
            github_modified: github.map(|g| g.modified),
            github_sha: github.map(|g| g.sha.clone()),
            last_synced,
        });
    }

    info!(
        total = summary.total,
        no_change = summary.no_change,
        changed = summary.changed,
        drive_only = summary.drive_only,
        github_only = summary.github_only,
        conflicts = summary.conflicts,
        manual_review = summary.manual_review,
        "Change detection complete"
    );

    Ok(ChangeReport {
        timestamp: Utc::now(),
        last_sync: metadata.last_sync(),
        changes,
        summary,
    })
}

/// Latest commit per tracked path. Lookup errors degrade that path to no signal.
async fn repo_signals(
    config: &Config,
    repo: &dyn RepoHost,
    metadata: &SyncMetadataStore,
) -> HashMap<String, RepoSignal> {
    let mut found = HashMap::new();
    for path in metadata.files().keys() {
        let repo_path = config.paths.repo_path(path);
        match repo.latest_commit(&repo_path, &config.github.branch).await {
            Ok(Some(commit)) => {
                found.insert(
                    path.clone(),
                    RepoSignal {
                        sha: commit.sha,
                        modified: commit.date,
                    },
                );
            }
            Ok(None) => {}
            Err(e) => warn!(path = %path, error = %e, "Could not get GitHub file info"),
        }
    }
    found
}
