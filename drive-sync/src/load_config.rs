//! `load_config` module: reads the optional YAML file into the core
//! [`Config`] and layers environment variables on top.
//!
//! # Responsibilities
//! - Parse the user-supplied YAML (every section optional) into typed settings
//! - Apply environment overrides for deployment values (folder id, repository, branch)
//! - Collect secrets (OAuth credentials, GitHub token) from the environment only
//!
//! # Errors
//! All errors use `anyhow::Error` with the offending path or variable in the
//! message and surface at the CLI boundary.

use anyhow::{Context, Result};
use drive_sync_core::config::Config;
use std::env;
use std::fs;
use std::path::Path;
use tracing::{error, info};

/// Values that must never come from a checked-in file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Secrets {
    /// OAuth token JSON (`GOOGLE_DRIVE_CREDENTIALS`).
    pub drive_credentials: Option<String>,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub github_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub core: Config,
    pub secrets: Secrets,
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Loads `path` when given (defaults otherwise), then applies the environment.
pub fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let mut core = match path {
        Some(path) => read_yaml(path)?,
        None => {
            info!("No config file given, using defaults and environment");
            Config::default()
        }
    };

    apply_env_overrides(&mut core);

    let secrets = Secrets {
        drive_credentials: non_empty_var("GOOGLE_DRIVE_CREDENTIALS"),
        google_client_id: non_empty_var("GOOGLE_CLIENT_ID"),
        google_client_secret: non_empty_var("GOOGLE_CLIENT_SECRET"),
        github_token: non_empty_var("GITHUB_TOKEN"),
    };
    info!(
        drive_credentials_set = secrets.drive_credentials.is_some(),
        client_credentials_set =
            secrets.google_client_id.is_some() && secrets.google_client_secret.is_some(),
        github_token_set = secrets.github_token.is_some(),
        "Secrets collected from environment"
    );

    core.trace_loaded();
    Ok(CliConfig { core, secrets })
}

fn read_yaml(path: &Path) -> Result<Config> {
    info!(config_path = ?path, "Loading configuration from file");
    let content = fs::read_to_string(path)
        .inspect_err(|e| error!(error = ?e, config_path = ?path, "Failed to read config file"))
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    // An empty file is a valid "all defaults" config.
    if content.trim().is_empty() {
        return Ok(Config::default());
    }

    let config: Config = serde_yaml::from_str(&content)
        .inspect_err(|e| error!(error = ?e, config_path = ?path, "Failed to parse config YAML"))
        .with_context(|| format!("Failed to parse config YAML {}", path.display()))?;
    info!(config_path = ?path, "Parsed config YAML successfully");
    Ok(config)
}

/// Environment wins over the file for deployment-specific values.
pub fn apply_env_overrides(config: &mut Config) {
    if let Some(folder_id) = non_empty_var("GOOGLE_DRIVE_FOLDER_ID") {
        config.drive.folder_id = folder_id;
    }
    if let Some(owner) = non_empty_var("GITHUB_REPOSITORY_OWNER") {
        config.github.owner = owner;
    }
    if let Some(repo) = non_empty_var("GITHUB_REPOSITORY_NAME") {
        config.github.repo = repo;
    }
    if let Some(branch) = non_empty_var("GITHUB_BRANCH") {
        config.github.branch = branch;
    }
    if let Some(email) = non_empty_var("NOTIFICATION_EMAIL") {
        config.sync.notification_email = Some(email);
    }
}
