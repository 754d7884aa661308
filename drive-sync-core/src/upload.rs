//! GitHub → Drive direction: push repository edits of tracked files back to
//! Drive, and seed an empty Drive folder from the content directory.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::contract::{ensure_folder_path, RemoteEntry, RemoteStore, RepoHost};
use crate::error::{SyncError, SyncResult};
use crate::metadata::{FilesChanged, SyncDirection, SyncHistoryEntry, SyncMetadataStore};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UploadReport {
    pub uploaded: Vec<String>,
    pub skipped: Vec<String>,
}

fn split_path(relative: &str) -> (&str, &str) {
    match relative.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", relative),
    }
}

/// Upload `content` to the Drive location of `relative`, updating the known
/// file when there is one. A tracked id that no longer exists falls back to
/// creating the file again.
async fn put_file(
    remote: &dyn RemoteStore,
    root_id: &str,
    relative: &str,
    known_id: Option<&str>,
    content: &str,
) -> SyncResult<RemoteEntry> {
    if let Some(id) = known_id {
        match remote.update_file(id, content).await {
            Ok(entry) => return Ok(entry),
            Err(e) if e.is_not_found() => {
                warn!(path = relative, drive_id = id, "Tracked Drive file is gone, recreating");
            }
            Err(e) => return Err(e),
        }
    }

    let (dir, name) = split_path(relative);
    let folder_id = ensure_folder_path(remote, root_id, dir).await?;
    let existing = remote
        .list_files(&folder_id, None)
        .await?
        .into_iter()
        .find(|e| e.name == name && !e.is_folder());
    match existing {
        Some(entry) => remote.update_file(&entry.id, content).await,
        None => remote.create_file(&folder_id, name, content).await,
    }
}

/// Sync time that cannot trail Drive's own modification time for the upload.
fn synced_at(entry: &RemoteEntry) -> DateTime<Utc> {
    let now = Utc::now();
    entry.modified_time.map_or(now, |m| m.max(now))
}

/// Upload every tracked file whose latest repository commit is newer than its
/// last sync.
pub async fn upload_to_drive(
    config: &Config,
    remote: Arc<dyn RemoteStore>,
    repo: &dyn RepoHost,
) -> SyncResult<UploadReport> {
    info!("=== Starting GitHub -> Drive sync ===");
    let mut metadata = SyncMetadataStore::load(remote.clone(), config).await?;
    let mut report = UploadReport::default();

    let tracked: Vec<_> = metadata
        .files()
        .iter()
        .map(|(path, file)| (path.clone(), file.clone()))
        .collect();

    for (relative, file) in tracked {
        let local = config.paths.content_path(&relative);
        if !local.exists() {
            warn!(path = %relative, "Local file not found, skipping");
            report.skipped.push(relative);
            continue;
        }

        let repo_path = config.paths.repo_path(&relative);
        let Some(commit) = repo.latest_commit(&repo_path, &config.github.branch).await? else {
            warn!(path = %relative, "No commit found for file");
            report.skipped.push(relative);
            continue;
        };
        if file.last_synced_time.is_some_and(|synced| commit.date <= synced) {
            debug!(path = %relative, "File unchanged in GitHub");
            continue;
        }

        let content = fs::read_to_string(&local).map_err(|e| SyncError::io(&local, e))?;
        let entry = put_file(
            remote.as_ref(),
            &config.drive.folder_id,
            &relative,
            file.drive_id.as_deref(),
            &content,
        )
        .await?;

        metadata.upsert_file(&relative, |record| {
            record.drive_id = Some(entry.id.clone());
            record.drive_modified_time = entry.modified_time;
            record.github_sha = Some(commit.sha.clone());
            record.github_modified_time = Some(commit.date);
            record.github_path = Some(repo_path.clone());
            record.last_synced_time = Some(synced_at(&entry));
            record.sync_direction = Some(SyncDirection::GithubToDrive);
        });
        info!(path = %relative, "Uploaded to Drive");
        report.uploaded.push(relative);
    }

    if !report.uploaded.is_empty() {
        metadata.add_history(SyncHistoryEntry::success(
            SyncDirection::GithubToDrive,
            FilesChanged::Paths(report.uploaded.clone()),
        ));
        metadata.save().await?;
    }

    info!(uploaded = report.uploaded.len(), "=== Upload complete ===");
    Ok(report)
}

/// Mirror the whole content directory into Drive and track every file.
pub async fn initial_upload(config: &Config, remote: Arc<dyn RemoteStore>) -> SyncResult<UploadReport> {
    info!(folder_id = %config.drive.folder_id, "Starting initial upload to Google Drive");
    let mut metadata = SyncMetadataStore::load(remote.clone(), config).await?;
    let mut report = UploadReport::default();

    let root = config.paths.content_root();
    info!(pages_dir = %root.display(), "Uploading pages directory");
    for relative in local_json_files(&root)? {
        let local = config.paths.content_path(&relative);
        let content = fs::read_to_string(&local).map_err(|e| SyncError::io(&local, e))?;
        let known = metadata.file(&relative).and_then(|f| f.drive_id.clone());

        let entry = put_file(
            remote.as_ref(),
            &config.drive.folder_id,
            &relative,
            known.as_deref(),
            &content,
        )
        .await?;
        if known.is_some() {
            info!(path = %relative, file_id = %entry.id, "Updated file");
        } else {
            info!(path = %relative, file_id = %entry.id, "Uploaded file");
        }

        let repo_path = config.paths.repo_path(&relative);
        metadata.upsert_file(&relative, |record| {
            record.drive_id = Some(entry.id.clone());
            record.drive_modified_time = entry.modified_time;
            record.github_path = Some(repo_path);
            record.last_synced_time = Some(synced_at(&entry));
            record.sync_direction = Some(SyncDirection::GithubToDrive);
        });
        report.uploaded.push(relative);
    }

    metadata.save().await?;
    info!(
        uploaded = report.uploaded.len(),
        url = %config.drive.folder_url(),
        "Initial upload complete"
    );
    Ok(report)
}

/// Relative `/` paths of all `*.json` files under `root`, directories first
/// visited in name order.
fn local_json_files(root: &Path) -> SyncResult<Vec<String>> {
    fn walk(dir: &Path, base: &str, out: &mut Vec<String>) -> SyncResult<()> {
        let mut entries = fs::read_dir(dir)
            .map_err(|e| SyncError::io(dir, e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SyncError::io(dir, e))?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let relative = if base.is_empty() {
                name.clone()
            } else {
                format!("{base}/{name}")
            };
            let path = entry.path();
            if path.is_dir() {
                walk(&path, &relative, out)?;
            } else if name.ends_with(".json") {
                out.push(relative);
            }
        }
        Ok(())
    }

    let mut out = Vec::new();
    walk(root, "", &mut out)?;
    Ok(out)
}
