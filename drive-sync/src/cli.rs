//! # drive-sync CLI Interface
//!
//! Command parsing and wiring of the real Drive, GitHub and git services into
//! the pipelines of [`drive_sync_core`]. Each pipeline stage is also exposed
//! as its own command so CI jobs can run them step by step, passing the JSON
//! artifacts between steps.
//!
//! Commands print `::set-output name=<key>::<value>` lines for CI consumers.
//! Non-trivial logic belongs in the core crate.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use drive_sync_core::apply::{apply_changes, ApplyReport};
use drive_sync_core::contract::{RemoteStore, RepoHost};
use drive_sync_core::detect::{detect_changes, ChangeReport};
use drive_sync_core::download::{download_changes, prepare_staging_dir, DownloadReport};
use drive_sync_core::duplicates::{
    check_duplicates, cleanup_duplicates, render_cleanup, render_duplicates,
};
use drive_sync_core::git::CommandGit;
use drive_sync_core::metadata::SyncMetadataStore;
use drive_sync_core::status::render_status;
use drive_sync_core::synchronise::{synchronise, SyncServices};
use drive_sync_core::upload::{initial_upload, upload_to_drive};
use drive_sync_core::validate::Validator;

use crate::authorize::authorize;
use crate::drive::{GoogleDriveClient, TOKEN_FILE};
use crate::github::{GitHubClient, GITHUB_API_URL};
use crate::load_config::{load_config, CliConfig};

/// Keep website content in Google Drive and a GitHub repository in step.
#[derive(Parser)]
#[clap(
    name = "drive-sync",
    version,
    about = "Synchronise JSON page content between Google Drive and a GitHub repository"
)]
pub struct Cli {
    /// Path to an optional YAML config file
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Obtain a Google Drive OAuth token through the browser
    Authorize {
        #[clap(long, default_value = "client_secret.json")]
        client_secret: PathBuf,
    },
    /// Upload the whole content directory to an empty Drive folder
    InitialUpload,
    /// Detect Drive edits since the last sync and write changes.json
    DetectChanges,
    /// Download the changed files into the staging directory
    DownloadChanges {
        /// Change report to read (defaults to the staging directory's changes.json)
        changes: Option<PathBuf>,
    },
    /// Validate staged (or any) content directory
    Validate { dir: Option<PathBuf> },
    /// Apply downloaded files, push the content branch and open a pull request
    ApplyChanges {
        /// Download report to read (defaults to the staging directory's download.json)
        download: Option<PathBuf>,
    },
    /// Run detect, download, validate and apply as one pipeline
    Sync,
    /// Upload repository edits of tracked files back to Drive
    UploadToDrive,
    /// Show the recorded sync state and history
    Status,
    /// List Drive files that share a content path
    CheckDuplicates,
    /// Delete all but the newest Drive copy of each duplicated path
    CleanupDuplicates,
}

/// One `::set-output` line for CI consumers.
pub fn output_line(key: &str, value: impl std::fmt::Display) -> String {
    format!("::set-output name={key}::{value}")
}

fn json_output<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<String> {
    Ok(output_line(key, serde_json::to_string(value)?))
}

/// `has-changes` and the full change report as JSON.
pub fn detect_outputs(report: &ChangeReport) -> Result<Vec<String>> {
    Ok(vec![
        output_line("has-changes", report.has_changes()),
        json_output("changes", report)?,
    ])
}

/// The staged files as a JSON array.
pub fn download_outputs(report: &DownloadReport) -> Result<Vec<String>> {
    Ok(vec![json_output("downloaded", &report.downloaded)?])
}

/// Applied paths as a JSON array, then `has-conflicts`.
pub fn apply_outputs(report: &ApplyReport) -> Result<Vec<String>> {
    Ok(vec![
        json_output("applied", &report.applied_paths())?,
        output_line("has-conflicts", report.has_conflicts()),
    ])
}

fn print_outputs(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}

fn remote_store(config: &CliConfig) -> Result<Arc<GoogleDriveClient>> {
    if config.core.drive.folder_id.is_empty() {
        bail!("GOOGLE_DRIVE_FOLDER_ID is not set");
    }
    Ok(Arc::new(GoogleDriveClient::from_secrets(&config.secrets)?))
}

fn repo_host(config: &CliConfig) -> Result<Arc<GitHubClient>> {
    let token = config
        .secrets
        .github_token
        .clone()
        .ok_or_else(|| anyhow!("GITHUB_TOKEN is not set"))?;
    let github = &config.core.github;
    if github.owner.is_empty() || github.repo.is_empty() {
        bail!("GITHUB_REPOSITORY_OWNER and GITHUB_REPOSITORY_NAME must be set");
    }
    Ok(Arc::new(GitHubClient::new(
        GITHUB_API_URL,
        &github.owner,
        &github.repo,
        token,
    )?))
}

fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_artifact<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "Wrote artifact");
    Ok(())
}

/// Async CLI entrypoint, shared by `main` and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    let config = load_config(cli.config.as_deref())?;
    let core = &config.core;

    match cli.command {
        Commands::Authorize { client_secret } => {
            tracing::info!(command = "authorize", "Starting OAuth authorization");
            authorize(&client_secret, Path::new(TOKEN_FILE)).await?;
        }
        Commands::InitialUpload => {
            tracing::info!(command = "initial-upload", "Starting initial upload");
            let report = initial_upload(core, remote_store(&config)?).await?;
            println!(
                "Uploaded {} files to {}",
                report.uploaded.len(),
                core.drive.folder_url()
            );
        }
        Commands::DetectChanges => {
            tracing::info!(command = "detect-changes", "Detecting changes");
            let remote = remote_store(&config)?;
            let repo = repo_host(&config)?;
            let metadata = SyncMetadataStore::load(remote.clone(), core).await?;
            let report = detect_changes(core, remote.as_ref(), repo.as_ref(), &metadata).await?;
            write_artifact(&core.paths.staging_artifact("changes.json"), &report)?;
            print_outputs(detect_outputs(&report)?);
        }
        Commands::DownloadChanges { changes } => {
            tracing::info!(command = "download-changes", "Downloading changed files");
            let changes_path = changes.unwrap_or_else(|| core.paths.staging_artifact("changes.json"));
            // Read before the staging directory is recreated.
            let report: ChangeReport = read_artifact(&changes_path)?;
            let remote = remote_store(&config)?;
            prepare_staging_dir(&core.paths.staging_dir)?;
            let download = download_changes(
                remote.as_ref(),
                &report,
                &core.paths.staging_dir,
                &core.sync.retry,
            )
            .await?;
            write_artifact(&core.paths.staging_artifact("download.json"), &download)?;
            print_outputs(download_outputs(&download)?);
        }
        Commands::Validate { dir } => {
            let dir = dir.unwrap_or_else(|| core.paths.staging_dir.clone());
            tracing::info!(command = "validate", dir = %dir.display(), "Validating content");
            let report = Validator::new(&core.validation)?.validate_dir(&dir)?;
            println!("{}", output_line("valid", report.valid));
            if !report.valid {
                for error in &report.errors {
                    eprintln!("{error}");
                }
                bail!("validation failed for {} file(s)", report.errors.len());
            }
            println!("All {} files are valid", report.files.len());
        }
        Commands::ApplyChanges { download } => {
            tracing::info!(command = "apply-changes", "Applying downloaded changes");
            let download_path =
                download.unwrap_or_else(|| core.paths.staging_artifact("download.json"));
            let download: DownloadReport = read_artifact(&download_path)?;
            let remote = remote_store(&config)?;
            let repo = repo_host(&config)?;
            let git = CommandGit::new(&core.paths.repo_root);
            let mut metadata = SyncMetadataStore::load(remote, core).await?;
            let outcome = apply_changes(core, repo.as_ref(), &git, &mut metadata, &download).await?;
            print_outputs(apply_outputs(&outcome.report)?);
            if let Some(pr) = &outcome.pull_request {
                println!("Pull request: {}", pr.html_url);
            }
        }
        Commands::Sync => {
            tracing::info!(command = "sync", "Starting synchronisation");
            let remote: Arc<dyn RemoteStore> = remote_store(&config)?;
            let repo: Arc<dyn RepoHost> = repo_host(&config)?;
            let services = SyncServices {
                remote,
                repo,
                git: Arc::new(CommandGit::new(&core.paths.repo_root)),
            };
            let report = synchronise(core, &services).await?;
            let applied = report
                .apply
                .as_ref()
                .map(|a| a.report.clone())
                .unwrap_or_default();
            println!(
                "{}",
                output_line(
                    "has-changes",
                    report.changes.as_ref().is_some_and(|c| c.has_changes()),
                )
            );
            print_outputs(apply_outputs(&applied)?);
            tracing::info!(command = "sync", final_state = ?report.final_state, "Synchronisation complete");
        }
        Commands::UploadToDrive => {
            tracing::info!(command = "upload-to-drive", "Uploading repository edits");
            let remote = remote_store(&config)?;
            let repo = repo_host(&config)?;
            let report = upload_to_drive(core, remote, repo.as_ref()).await?;
            println!(
                "Uploaded {} file(s), skipped {}",
                report.uploaded.len(),
                report.skipped.len()
            );
        }
        Commands::Status => {
            let remote = remote_store(&config)?;
            let metadata = SyncMetadataStore::load(remote, core).await?;
            println!("{}", render_status(metadata.document(), Utc::now()));
        }
        Commands::CheckDuplicates => {
            tracing::info!(command = "check-duplicates", "Checking for duplicate Drive files");
            let remote = remote_store(&config)?;
            let report = check_duplicates(core, remote.as_ref()).await?;
            print!("{}", render_duplicates(&report));
        }
        Commands::CleanupDuplicates => {
            tracing::info!(command = "cleanup-duplicates", "Removing duplicate Drive files");
            let remote = remote_store(&config)?;
            let report = cleanup_duplicates(core, remote.as_ref()).await?;
            print!("{}", render_cleanup(&report));
        }
    }

    Ok(())
}
