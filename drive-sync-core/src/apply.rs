//! Apply stage: write staged content into the working tree, publish it on
//! the content branch and open (or refresh) the pull request.
//!
//! Failures after files were written abort the remaining steps; nothing that
//! was already written or pushed is rolled back.

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use tracing::{debug, error, info, warn};

use crate::config::{Config, DetectionMode};
use crate::contract::{GitWorkspace, MergeMethod, MergeRequest, PullRequest, PullRequestDraft, RepoHost};
use crate::detect::Resolution;
use crate::download::{read_sidecar, DownloadReport, StagedFile};
use crate::error::{SyncError, SyncResult};
use crate::merge::{merge_json, Override};
use crate::metadata::{SyncDirection, SyncMetadataStore};

pub const PR_TITLE: &str = "Content update from Google Drive";
pub const PR_LABELS: [&str; 2] = ["content-sync", "automated"];

/// How a file reached the working tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ApplyKind {
    /// No local copy existed; the staged text was written as-is.
    Created,
    #[serde(rename_all = "camelCase")]
    Merged {
        changed: bool,
        git_only: Vec<String>,
        drive_override: Vec<Override>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedFile {
    pub path: String,
    #[serde(flatten)]
    pub kind: ApplyKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub applied: Vec<AppliedFile>,
    /// Paths whose merge reproduced the repository copy byte for byte. They
    /// are tracked as synced but never staged.
    pub unchanged: Vec<String>,
    /// Staged files held back for manual review.
    pub conflicts: Vec<StagedFile>,
}

impl ApplyReport {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn applied_paths(&self) -> Vec<String> {
        self.applied.iter().map(|f| f.path.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeSkipReason {
    Conflicts,
    Disabled,
    CriticalFiles,
    MergeError,
}

impl MergeSkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeSkipReason::Conflicts => "conflicts",
            MergeSkipReason::Disabled => "disabled",
            MergeSkipReason::CriticalFiles => "critical-files",
            MergeSkipReason::MergeError => "merge-error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeDecision {
    pub merged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<MergeSkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MergeDecision {
    fn skipped(reason: MergeSkipReason) -> Self {
        Self {
            merged: false,
            reason: Some(reason),
            sha: None,
            error: None,
        }
    }
}

/// Everything the apply stage did in one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    pub report: ApplyReport,
    pub pull_request: Option<PullRequest>,
    pub merge: Option<MergeDecision>,
}

/// Write each staged file into the working tree and `git add` it.
///
/// Files under an existing path are merged over the repository copy and
/// pretty-printed; new paths get the staged text verbatim. A merge that
/// reproduces the file on disk is left unstaged. Every accepted path is
/// recorded as synced from Drive in `metadata` (in memory only).
pub fn apply_files(
    config: &Config,
    git: &dyn GitWorkspace,
    metadata: &mut SyncMetadataStore,
    download: &DownloadReport,
) -> SyncResult<ApplyReport> {
    info!(files = download.downloaded.len(), "Applying changes to repository");
    let mut report = ApplyReport::default();

    for file in &download.downloaded {
        let meta = read_sidecar(&file.local_path)?;

        if config.sync.detection == DetectionMode::TwoWay
            && meta.resolution == Some(Resolution::ManualReview)
        {
            warn!(path = %file.path, "Conflict requires manual review");
            report.conflicts.push(file.clone());
            continue;
        }

        let staged = fs::read_to_string(&file.local_path)
            .map_err(|e| SyncError::io(&file.local_path, e))?;
        let remote: Value = serde_json::from_str(&staged)?;

        let dest = config.paths.content_path(&file.path);
        let kind = if dest.exists() {
            let current = fs::read_to_string(&dest).map_err(|e| SyncError::io(&dest, e))?;
            let repo: Value = serde_json::from_str(&current)?;
            let merge = merge_json(&repo, &remote);
            let mut pretty = serde_json::to_string_pretty(&merge.merged)?;
            pretty.push('\n');
            debug!(
                path = %file.path,
                changed = merge.changed,
                git_only = merge.git_only.len(),
                overrides = merge.drive_override.len(),
                "Merged file"
            );
            if pretty == current {
                None
            } else {
                fs::write(&dest, pretty).map_err(|e| SyncError::io(&dest, e))?;
                Some(ApplyKind::Merged {
                    changed: merge.changed,
                    git_only: merge.git_only,
                    drive_override: merge.drive_override,
                })
            }
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
            }
            fs::write(&dest, &staged).map_err(|e| SyncError::io(&dest, e))?;
            Some(ApplyKind::Created)
        };

        let repo_path = config.paths.repo_path(&file.path);
        metadata.upsert_file(&file.path, |record| {
            record.drive_id = Some(meta.drive_id.clone());
            record.drive_modified_time = meta.drive_modified;
            record.last_synced_time = Some(Utc::now());
            record.sync_direction = Some(SyncDirection::DriveToGithub);
            record.github_path = Some(repo_path);
        });

        match kind {
            Some(kind) => {
                git.add(&dest)?;
                info!(path = %file.path, "Applied file");
                report.applied.push(AppliedFile {
                    path: file.path.clone(),
                    kind,
                });
            }
            None => {
                info!(path = %file.path, "Repository copy already up to date");
                report.unchanged.push(file.path.clone());
            }
        }
    }

    Ok(report)
}

pub fn commit_message(paths: &[String]) -> String {
    let list = paths
        .iter()
        .map(|p| format!("- {p}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("content: update from Google Drive\n\nModified files:\n{list}\n\nAutomated sync from Google Drive")
}

/// One commit for the whole batch, then force-push it as the content branch.
pub fn commit_and_push(config: &Config, git: &dyn GitWorkspace, paths: &[String]) -> SyncResult<()> {
    git.commit(&commit_message(paths))?;
    let branch = &config.github.content_branch;
    git.checkout_branch(branch)?;
    git.force_push(&config.github.remote, branch)?;
    info!(branch = %branch, files = paths.len(), "Committed and pushed changes");
    Ok(())
}

pub fn pull_request_body(report: &ApplyReport, now: DateTime<Utc>) -> String {
    let mut body = String::from("## Automated Content Sync from Google Drive\n\n");
    body.push_str(&format!("**Files modified:** {}\n\n", report.applied.len()));
    for file in &report.applied {
        body.push_str(&format!("- `{}`\n", file.path));
    }

    body.push_str("\n### Merge details\n\n");
    for file in &report.applied {
        match &file.kind {
            ApplyKind::Created => body.push_str(&format!("- `{}`: new file\n", file.path)),
            ApplyKind::Merged {
                changed: false, ..
            } => body.push_str(&format!("- `{}`: no effective change\n", file.path)),
            ApplyKind::Merged {
                git_only,
                drive_override,
                ..
            } => {
                body.push_str(&format!(
                    "- `{}`: {} field(s) updated from Drive, {} repository-only field(s) preserved\n",
                    file.path,
                    drive_override.len(),
                    git_only.len()
                ));
                for o in drive_override {
                    body.push_str(&format!("  - updated `{}`\n", o.path));
                }
                for path in git_only {
                    body.push_str(&format!("  - preserved `{path}`\n"));
                }
            }
        }
    }

    if report.has_conflicts() {
        body.push_str("\n### Held for manual review\n\n");
        for file in &report.conflicts {
            body.push_str(&format!("- `{}`\n", file.path));
        }
    }

    body.push_str(&format!("\n**Sync timestamp:** {}\n\n", now.to_rfc3339()));
    body.push_str("Validation passed\n");
    if report.has_conflicts() {
        body.push_str("Conflicts detected - manual review required\n");
    } else {
        body.push_str("No conflicts detected\n");
    }
    body
}

pub async fn open_pull_request(
    config: &Config,
    repo: &dyn RepoHost,
    report: &ApplyReport,
) -> SyncResult<PullRequest> {
    let draft = PullRequestDraft {
        head: config.github.content_branch.clone(),
        base: config.github.branch.clone(),
        title: PR_TITLE.to_string(),
        body: pull_request_body(report, Utc::now()),
        labels: PR_LABELS.iter().map(|l| l.to_string()).collect(),
    };
    let pr = repo.create_or_update_pull_request(draft).await?;
    info!(pr_number = pr.number, url = %pr.html_url, "Created/updated pull request");
    Ok(pr)
}

fn review_globs(patterns: &[String]) -> SyncResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| SyncError::Config(format!("invalid require_review glob {pattern:?}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| SyncError::Config(format!("invalid require_review globs: {e}")))
}

/// Squash-merge `pr` unless conflicts, policy or critical paths forbid it.
pub async fn auto_merge_if_eligible(
    config: &Config,
    repo: &dyn RepoHost,
    pr: &PullRequest,
    report: &ApplyReport,
) -> SyncResult<MergeDecision> {
    if report.has_conflicts() {
        info!(pr_number = pr.number, "Skipping auto-merge: conflicts detected");
        repo.add_labels(pr.number, vec!["requires-review".into(), "conflict".into()])
            .await?;
        return Ok(MergeDecision::skipped(MergeSkipReason::Conflicts));
    }

    if !config.sync.auto_merge {
        info!(pr_number = pr.number, "Skipping auto-merge: feature disabled");
        return Ok(MergeDecision::skipped(MergeSkipReason::Disabled));
    }

    let critical = review_globs(&config.sync.require_review)?;
    if report.applied.iter().any(|f| critical.is_match(&f.path)) {
        info!(pr_number = pr.number, "Skipping auto-merge: critical files changed");
        repo.add_labels(pr.number, vec!["requires-review".into(), "critical-file".into()])
            .await?;
        return Ok(MergeDecision::skipped(MergeSkipReason::CriticalFiles));
    }

    info!(pr_number = pr.number, "Auto-merging PR");
    let request = MergeRequest {
        method: MergeMethod::Squash,
        commit_title: format!("{} (#{})", pr.title, pr.number),
        commit_message: pr.body.clone(),
    };
    match repo.merge_pull_request(pr.number, request).await {
        Ok(commit) => Ok(MergeDecision {
            merged: true,
            reason: None,
            sha: Some(commit.sha),
            error: None,
        }),
        Err(e) => {
            error!(pr_number = pr.number, error = %e, "Auto-merge failed");
            repo.add_labels(pr.number, vec!["auto-merge-failed".into()])
                .await?;
            Ok(MergeDecision {
                merged: false,
                reason: Some(MergeSkipReason::MergeError),
                sha: None,
                error: Some(e.to_string()),
            })
        }
    }
}

/// The full apply stage: write, commit, push, save metadata, open the pull
/// request and decide on auto-merge. Nothing is published when no file is
/// modified; tracking for files that were already up to date is still saved.
pub async fn apply_changes(
    config: &Config,
    repo: &dyn RepoHost,
    git: &dyn GitWorkspace,
    metadata: &mut SyncMetadataStore,
    download: &DownloadReport,
) -> SyncResult<ApplyOutcome> {
    let report = apply_files(config, git, metadata, download)?;
    if report.applied.is_empty() {
        info!(
            conflicts = report.conflicts.len(),
            unchanged = report.unchanged.len(),
            "No files applied"
        );
        if !report.unchanged.is_empty() {
            metadata.save().await?;
        }
        return Ok(ApplyOutcome {
            report,
            pull_request: None,
            merge: None,
        });
    }

    commit_and_push(config, git, &report.applied_paths())?;
    metadata.save().await?;

    let pr = open_pull_request(config, repo, &report).await?;
    let merge = auto_merge_if_eligible(config, repo, &pr, &report).await?;
    Ok(ApplyOutcome {
        report,
        pull_request: Some(pr),
        merge: Some(merge),
    })
}
