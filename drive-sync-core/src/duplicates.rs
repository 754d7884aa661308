//! Drive files that share a content path.
//!
//! Drive allows several files with the same name in one folder. Only one copy
//! per path can be synchronised, so these helpers report the extra copies and
//! can remove all but the most recently modified one.

use serde::Serialize;
use std::fmt::Write;
use tracing::{info, warn};

use crate::config::Config;
use crate::contract::{RemoteEntry, RemoteStore};
use crate::detect::{scan_remote_tree, RemoteFile};
use crate::error::SyncResult;

/// All copies of one path, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    pub path: String,
    pub copies: Vec<RemoteEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReport {
    pub total_files: usize,
    pub unique_paths: usize,
    pub duplicates: Vec<DuplicateGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemovedCopy {
    pub path: String,
    pub kept: RemoteEntry,
    pub deleted: RemoteEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub removed: Vec<RemovedCopy>,
    pub remaining_paths: usize,
}

/// Group scanned files by path, keeping the order in which paths first appear.
///
/// Copies are sorted newest first; entries without a modification time sort
/// last and ties keep listing order.
pub fn group_duplicates(files: &[RemoteFile]) -> DuplicateReport {
    let mut groups: Vec<DuplicateGroup> = Vec::new();
    for file in files {
        match groups.iter_mut().find(|g| g.path == file.path) {
            Some(group) => group.copies.push(file.entry.clone()),
            None => groups.push(DuplicateGroup {
                path: file.path.clone(),
                copies: vec![file.entry.clone()],
            }),
        }
    }

    let unique_paths = groups.len();
    let mut duplicates: Vec<DuplicateGroup> =
        groups.into_iter().filter(|g| g.copies.len() > 1).collect();
    for group in &mut duplicates {
        group
            .copies
            .sort_by(|a, b| b.modified_time.cmp(&a.modified_time));
    }

    DuplicateReport {
        total_files: files.len(),
        unique_paths,
        duplicates,
    }
}

pub async fn check_duplicates(config: &Config, remote: &dyn RemoteStore) -> SyncResult<DuplicateReport> {
    let files = scan_remote_tree(remote, &config.drive.folder_id).await?;
    let report = group_duplicates(&files);
    for group in &report.duplicates {
        warn!(path = %group.path, copies = group.copies.len(), "Duplicate Drive files");
    }
    info!(
        total = report.total_files,
        unique = report.unique_paths,
        duplicates = report.duplicates.len(),
        "Duplicate check complete"
    );
    Ok(report)
}

/// Delete every copy but the newest for each duplicated path.
pub async fn cleanup_duplicates(config: &Config, remote: &dyn RemoteStore) -> SyncResult<CleanupReport> {
    let report = check_duplicates(config, remote).await?;
    let mut cleanup = CleanupReport {
        removed: Vec::new(),
        remaining_paths: report.unique_paths,
    };

    for group in report.duplicates {
        let mut copies = group.copies.into_iter();
        let Some(kept) = copies.next() else {
            continue;
        };
        for copy in copies {
            info!(path = %group.path, kept = %kept.id, deleted = %copy.id, "Deleting duplicate");
            remote.delete_file(&copy.id).await?;
            cleanup.removed.push(RemovedCopy {
                path: group.path.clone(),
                kept: kept.clone(),
                deleted: copy,
            });
        }
    }

    info!(deleted = cleanup.removed.len(), "Duplicate cleanup complete");
    Ok(cleanup)
}

fn modified_label(entry: &RemoteEntry) -> String {
    entry
        .modified_time
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn render_duplicates(report: &DuplicateReport) -> String {
    let mut out = String::new();
    if report.duplicates.is_empty() {
        let _ = writeln!(out, "No duplicate files");
    }
    for group in &report.duplicates {
        let _ = writeln!(out, "DUPLICATE: {} ({} copies)", group.path, group.copies.len());
        for (i, copy) in group.copies.iter().enumerate() {
            let _ = writeln!(out, "  {}. {} ({})", i + 1, copy.id, modified_label(copy));
        }
    }
    let _ = writeln!(out, "\nTotal files: {}", report.total_files);
    let _ = writeln!(out, "Unique paths: {}", report.unique_paths);
    let _ = writeln!(out, "Duplicates: {}", report.duplicates.len());
    out
}

pub fn render_cleanup(report: &CleanupReport) -> String {
    let mut out = String::new();
    for removed in &report.removed {
        let _ = writeln!(
            out,
            "{}: kept {} ({}), deleted {} ({})",
            removed.path,
            removed.kept.id,
            modified_label(&removed.kept),
            removed.deleted.id,
            modified_label(&removed.deleted)
        );
    }
    let _ = writeln!(out, "\nFiles deleted: {}", report.removed.len());
    let _ = writeln!(out, "Paths remaining: {}", report.remaining_paths);
    out
}
