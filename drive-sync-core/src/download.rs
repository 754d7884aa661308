use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::config::RetryPolicy;
use crate::contract::RemoteStore;
use crate::detect::{ChangeReport, ChangeStatus, Resolution};
use crate::error::{SyncError, SyncResult};

/// Suffix appended to a staged file's name for its sidecar.
pub const SIDECAR_EXTENSION: &str = ".meta";

/// Sidecar written next to every staged file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedMeta {
    pub drive_id: String,
    #[serde(default)]
    pub drive_modified: Option<DateTime<Utc>>,
    pub downloaded_at: DateTime<Utc>,
    pub status: ChangeStatus,
    #[serde(default)]
    pub resolution: Option<Resolution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedFile {
    pub path: String,
    pub local_path: PathBuf,
    pub drive_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadReport {
    pub downloaded: Vec<StagedFile>,
    pub errors: Vec<DownloadFailure>,
    pub download_dir: PathBuf,
}

pub fn sidecar_path(local_path: &Path) -> PathBuf {
    let mut name = local_path.as_os_str().to_owned();
    name.push(SIDECAR_EXTENSION);
    PathBuf::from(name)
}

pub fn read_sidecar(local_path: &Path) -> SyncResult<StagedMeta> {
    let path = sidecar_path(local_path);
    let raw = fs::read_to_string(&path).map_err(|e| SyncError::io(&path, e))?;
    Ok(serde_json::from_str(&raw)?)
}

/// A relative `/` path with no root, `..` or empty segments.
pub fn is_safe_relative_path(path: &str) -> bool {
    !path.is_empty()
        && path.split('/').all(|s| !s.is_empty())
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// Remove and recreate the staging directory.
pub fn prepare_staging_dir(dir: &Path) -> SyncResult<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|e| SyncError::io(dir, e))?;
    }
    fs::create_dir_all(dir).map_err(|e| SyncError::io(dir, e))?;
    debug!(dir = %dir.display(), "Staging directory ready");
    Ok(())
}

/// Fetch a file's text, backing off on rate limits.
///
/// Returns `None` when the file no longer exists or is empty.
pub async fn download_with_retry(
    remote: &dyn RemoteStore,
    file_id: &str,
    policy: &RetryPolicy,
) -> SyncResult<Option<String>> {
    let mut attempt = 0;
    loop {
        match remote.download_text(file_id).await {
            Ok(content) if content.is_empty() => return Ok(None),
            Ok(content) => return Ok(Some(content)),
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) if e.is_rate_limited() && attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                warn!(file_id, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Rate limited, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Stage every record of `report` that needs the Drive copy.
///
/// Per-file failures are collected in the report; only failures to write into
/// the staging directory abort the batch.
pub async fn download_changes(
    remote: &dyn RemoteStore,
    report: &ChangeReport,
    staging_dir: &Path,
    policy: &RetryPolicy,
) -> SyncResult<DownloadReport> {
    info!(dir = %staging_dir.display(), "Starting file downloads from Drive");
    fs::create_dir_all(staging_dir).map_err(|e| SyncError::io(staging_dir, e))?;

    let mut downloaded = Vec::new();
    let mut errors = Vec::new();

    for change in report.changes.iter().filter(|c| c.needs_download()) {
        let Some(drive_id) = change.drive_id.as_deref() else {
            warn!(path = %change.path, "No Drive ID for file");
            continue;
        };
        if !is_safe_relative_path(&change.path) {
            warn!(path = %change.path, "Refusing to stage file outside the staging directory");
            errors.push(DownloadFailure {
                path: change.path.clone(),
                error: "unsafe relative path".to_string(),
            });
            continue;
        }

        info!(path = %change.path, drive_id, "Downloading file");
        let content = match download_with_retry(remote, drive_id, policy).await {
            Ok(Some(content)) => content,
            Ok(None) => {
                warn!(path = %change.path, "File not found or empty");
                continue;
            }
            Err(e) => {
                error!(path = %change.path, error = %e, "Failed to download file");
                errors.push(DownloadFailure {
                    path: change.path.clone(),
                    error: e.to_string(),
                });
                continue;
            }
        };

        let local_path = change
            .path
            .split('/')
            .fold(staging_dir.to_path_buf(), |p, s| p.join(s));
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }
        fs::write(&local_path, &content).map_err(|e| SyncError::io(&local_path, e))?;

        let meta = StagedMeta {
            drive_id: drive_id.to_string(),
            drive_modified: change.drive_modified,
            downloaded_at: Utc::now(),
            status: change.status,
            resolution: change.resolution,
        };
        let meta_path = sidecar_path(&local_path);
        fs::write(&meta_path, serde_json::to_string_pretty(&meta)?)
            .map_err(|e| SyncError::io(&meta_path, e))?;

        debug!(path = %change.path, size = content.len(), "Downloaded file");
        downloaded.push(StagedFile {
            path: change.path.clone(),
            local_path,
            drive_id: drive_id.to_string(),
        });
    }

    info!(downloaded = downloaded.len(), errors = errors.len(), "Download complete");
    Ok(DownloadReport {
        downloaded,
        errors,
        download_dir: staging_dir.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_appends_suffix() {
        assert_eq!(
            sidecar_path(Path::new("/tmp/stage/blog/a.json")),
            PathBuf::from("/tmp/stage/blog/a.json.meta")
        );
    }

    #[test]
    fn unsafe_paths_are_rejected() {
        assert!(is_safe_relative_path("blog/post.json"));
        assert!(!is_safe_relative_path("../secrets.json"));
        assert!(!is_safe_relative_path("/etc/passwd"));
        assert!(!is_safe_relative_path("blog//post.json"));
        assert!(!is_safe_relative_path(""));
    }
}
