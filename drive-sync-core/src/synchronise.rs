//! High-level pipeline: orchestrates detect → download → validate → apply for
//! one Drive → GitHub run.
//!
//! # States
//! `Detecting → Downloading → Validating → Applying → PrCreated →
//! (AutoMerged | RequiresReview) → Done`, with `Failed` reachable from every
//! step. Runs with nothing to do stop early in `Done`.
//!
//! # Error Handling
//! The first failing step ends the run. A failed history entry is then
//! recorded on a freshly loaded metadata document; if that also fails it is
//! logged and the original error is returned.
//!
//! # Artifacts
//! `changes.json`, `download.json` and `validation.json` are written to the
//! staging directory as the run progresses.

use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::apply::{apply_changes, ApplyOutcome};
use crate::config::Config;
use crate::contract::{GitWorkspace, RemoteStore, RepoHost};
use crate::detect::{detect_changes, ChangeReport};
use crate::download::{download_changes, prepare_staging_dir, DownloadReport};
use crate::error::{SyncError, SyncResult};
use crate::metadata::{FilesChanged, SyncDirection, SyncHistoryEntry, SyncMetadataStore};
use crate::validate::{ValidationReport, Validator};

pub const VALIDATION_ISSUE_TITLE: &str = "Content validation failed";
pub const VALIDATION_ISSUE_LABELS: [&str; 2] = ["validation-error", "content"];

/// External services one run talks to.
#[derive(Clone)]
pub struct SyncServices {
    pub remote: Arc<dyn RemoteStore>,
    pub repo: Arc<dyn RepoHost>,
    pub git: Arc<dyn GitWorkspace>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    Detecting,
    Downloading,
    Validating,
    Applying,
    PrCreated,
    AutoMerged,
    RequiresReview,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub final_state: SyncState,
    /// Every state entered, in order.
    pub visited: Vec<SyncState>,
    pub changes: Option<ChangeReport>,
    pub download: Option<DownloadReport>,
    pub validation: Option<ValidationReport>,
    pub apply: Option<ApplyOutcome>,
}

impl SyncReport {
    fn new() -> Self {
        Self {
            final_state: SyncState::Detecting,
            visited: Vec::new(),
            changes: None,
            download: None,
            validation: None,
            apply: None,
        }
    }

    fn enter(&mut self, state: SyncState) {
        info!(state = ?state, "[SYNC] Entering state");
        self.final_state = state;
        self.visited.push(state);
    }

    /// Files written to the working tree this run.
    pub fn applied_paths(&self) -> Vec<String> {
        self.apply
            .as_ref()
            .map(|a| a.report.applied_paths())
            .unwrap_or_default()
    }
}

/// Run one Drive → GitHub synchronisation.
pub async fn synchronise(config: &Config, services: &SyncServices) -> SyncResult<SyncReport> {
    info!("[SYNC] === Starting Google Drive -> GitHub sync ===");
    let mut report = SyncReport::new();

    match run(config, services, &mut report).await {
        Ok(()) => {
            report.enter(SyncState::Done);
            info!(applied = report.applied_paths().len(), "[SYNC] === Sync complete ===");
            Ok(report)
        }
        Err(e) => {
            report.enter(SyncState::Failed);
            error!(error = %e, "[SYNC][ERROR] Sync failed");
            record_failure(config, services, &e).await;
            Err(e)
        }
    }
}

async fn run(config: &Config, services: &SyncServices, report: &mut SyncReport) -> SyncResult<()> {
    let staging = config.paths.staging_dir.as_path();

    report.enter(SyncState::Detecting);
    prepare_staging_dir(staging)?;
    let mut metadata = SyncMetadataStore::load(services.remote.clone(), config).await?;
    let changes = detect_changes(
        config,
        services.remote.as_ref(),
        services.repo.as_ref(),
        &metadata,
    )
    .await?;
    write_artifact(staging, "changes.json", &changes)?;
    report.changes = Some(changes.clone());
    if !changes.has_changes() {
        info!("[SYNC] No changes detected");
        return Ok(());
    }

    report.enter(SyncState::Downloading);
    let download = download_changes(
        services.remote.as_ref(),
        &changes,
        staging,
        &config.sync.retry,
    )
    .await?;
    write_artifact(staging, "download.json", &download)?;
    report.download = Some(download.clone());
    if download.downloaded.is_empty() {
        info!("[SYNC] No files to download");
        return Ok(());
    }

    report.enter(SyncState::Validating);
    let validation = Validator::new(&config.validation)?.validate_staged(&download);
    write_artifact(staging, "validation.json", &validation)?;
    report.validation = Some(validation.clone());
    if !validation.valid {
        open_validation_issue(config, services.repo.as_ref(), &validation.errors).await?;
        return Err(SyncError::ValidationFailed(validation.errors));
    }

    report.enter(SyncState::Applying);
    let outcome = apply_changes(
        config,
        services.repo.as_ref(),
        services.git.as_ref(),
        &mut metadata,
        &download,
    )
    .await?;

    let (Some(pr), Some(merge)) = (outcome.pull_request.clone(), outcome.merge.clone()) else {
        info!("[SYNC] Nothing applied");
        report.apply = Some(outcome);
        return Ok(());
    };

    report.enter(SyncState::PrCreated);
    report.enter(if merge.merged {
        SyncState::AutoMerged
    } else {
        SyncState::RequiresReview
    });

    let mut entry = SyncHistoryEntry::success(
        SyncDirection::DriveToGithub,
        FilesChanged::Paths(outcome.report.applied_paths()),
    );
    entry.conflicts = Some(outcome.report.conflicts.len() as u64);
    entry.pr_number = Some(pr.number);
    entry.auto_merged = Some(merge.merged);
    entry.merge_reason = merge.reason.map(|r| r.as_str().to_string());
    metadata.add_history(entry);
    metadata.save().await?;

    if merge.merged {
        info!(pr_number = pr.number, sha = ?merge.sha, "[SYNC] PR auto-merged");
    } else {
        info!(pr_number = pr.number, url = %pr.html_url, "[SYNC] PR requires review");
    }
    report.apply = Some(outcome);
    Ok(())
}

async fn open_validation_issue(config: &Config, repo: &dyn RepoHost, errors: &[String]) -> SyncResult<()> {
    let mut body = format!("Validation errors:\n```\n{}\n```", errors.join("\n"));
    if let Some(email) = &config.sync.notification_email {
        body.push_str(&format!("\n\ncc: {email}"));
    }
    let labels = VALIDATION_ISSUE_LABELS.iter().map(|l| l.to_string()).collect();
    let issue = repo.create_issue(VALIDATION_ISSUE_TITLE, &body, labels).await?;
    warn!(issue = issue.number, url = %issue.html_url, "[SYNC] Opened validation issue");
    Ok(())
}

/// Best effort: reload, append a failed entry, save. Secondary errors are logged only.
async fn record_failure(config: &Config, services: &SyncServices, cause: &SyncError) {
    let result = async {
        let mut metadata = SyncMetadataStore::load(services.remote.clone(), config).await?;
        metadata.add_history(SyncHistoryEntry::failed(
            SyncDirection::DriveToGithub,
            cause.to_string(),
        ));
        metadata.save().await
    }
    .await;
    if let Err(e) = result {
        error!(error = %e, "[SYNC][ERROR] Could not save error to metadata");
    }
}

fn write_artifact<T: Serialize>(staging: &Path, name: &str, value: &T) -> SyncResult<()> {
    let path = staging.join(name);
    fs::write(&path, serde_json::to_string_pretty(value)?).map_err(|e| SyncError::io(&path, e))
}
